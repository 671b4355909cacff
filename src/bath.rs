//! Bath expansion terms and their cached superoperator forms.
//!
//! A bath correlation function enters the hierarchy as a finite list of
//! exponential terms `eta * exp(-gamma * t)`, each tagged by statistics and
//! role. The table of `(eta, gamma)` coefficients is consumed as-is; see
//! [`crate::corr`] for generators of the standard expansions.

use ndarray::{ self as nd };
use num_complex::Complex64 as C64;
use crate::{
    HeomError, HeomResult,
    sparse::Csc,
    superop,
};

/// Statistics-and-role tag of a single expansion term.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TermKind {
    /// Bosonic term carrying the real part of the correlation function.
    BosonReal,
    /// Bosonic term carrying the imaginary part of the correlation function.
    BosonImag,
    /// Bosonic term carrying both parts with a shared decay frequency.
    BosonRealImag,
    /// Fermionic absorption term.
    FermionAbsorb,
    /// Fermionic emission term.
    FermionEmit,
}

impl TermKind {
    /// Return `true` for the bosonic kinds.
    pub fn is_bosonic(&self) -> bool {
        matches!(
            *self,
            Self::BosonReal | Self::BosonImag | Self::BosonRealImag
        )
    }

    /// Return `true` for the fermionic kinds.
    pub fn is_fermionic(&self) -> bool { !self.is_bosonic() }
}

/// A single exponential expansion term of a bath correlation function.
///
/// For `BosonRealImag` the coefficient is the full complex `eta`; for
/// `BosonReal`/`BosonImag` it is the real- or imaginary-part coefficient.
/// Fermionic absorb/emit terms come in cross-referenced pairs: `eta_pair`
/// holds the partner expansion's coefficient entering the opposite-side
/// lift. For bosonic kinds `eta_pair == eta`.
#[derive(Clone, Debug)]
pub struct ExpTerm {
    pub kind: TermKind,
    pub eta: C64,
    pub eta_pair: C64,
    pub gamma: C64,
    dim: usize,
    pub(crate) spre: Csc,
    pub(crate) spost: Csc,
    pub(crate) comm: Csc,
    pub(crate) acomm: Csc,
    pub(crate) spre_dag: Csc,
    pub(crate) spost_dag: Csc,
}

impl ExpTerm {
    /// Create a new term for coupling operator `op`, caching its lifts.
    pub fn new(
        kind: TermKind,
        eta: C64,
        eta_pair: C64,
        gamma: C64,
        op: &nd::Array2<C64>,
    ) -> HeomResult<Self>
    {
        let (nr, nc) = op.dim();
        if nr != nc { return Err(HeomError::NonSquare(nr, nc)); }
        let spre = superop::spre(&op.view());
        let spost = superop::spost(&op.view());
        let comm = spre.sub(&spost);
        let acomm = spre.add(&spost);
        let opd = superop::dagger(&op.view());
        let spre_dag = superop::spre(&opd.view());
        let spost_dag = superop::spost(&opd.view());
        Ok(Self {
            kind,
            eta,
            eta_pair,
            gamma,
            dim: nr,
            spre,
            spost,
            comm,
            acomm,
            spre_dag,
            spost_dag,
        })
    }

    /// Return the system dimension of the coupling operator.
    pub fn dim(&self) -> usize { self.dim }
}

fn check_square(op: &nd::Array2<C64>) -> HeomResult<usize> {
    let (nr, nc) = op.dim();
    if nr != nc { return Err(HeomError::NonSquare(nr, nc)); }
    Ok(nr)
}

fn gamma_close(a: C64, b: C64) -> bool {
    (a - b).norm() <= 1e-12 * a.norm().max(b.norm()).max(1.0)
}

/// An ordered list of bosonic expansion terms sharing a coupling operator.
#[derive(Clone, Debug)]
pub struct BosonBath {
    terms: Vec<ExpTerm>,
    dim: usize,
}

impl BosonBath {
    /// Build from a raw coefficient table `C(t) = sum_k eta_k exp(-gamma_k t)`.
    ///
    /// Each entry is split into its real- and imaginary-part contributions;
    /// contributions sharing a decay frequency merge into a single
    /// `BosonRealImag` term, the rest become `BosonReal`/`BosonImag` terms.
    /// The merged term count is the number of hierarchy modes this bath
    /// contributes.
    pub fn new(op: &nd::Array2<C64>, eta: &[C64], gamma: &[C64])
        -> HeomResult<Self>
    {
        let dim = check_square(op)?;
        if eta.is_empty() || eta.len() != gamma.len() {
            return Err(HeomError::EmptyBath);
        }
        let mut re_parts: Vec<(C64, C64)> = Vec::new(); // (gamma, eta_re)
        let mut im_parts: Vec<(C64, C64)> = Vec::new(); // (gamma, eta_im)
        for (e, g) in eta.iter().zip(gamma) {
            if e.re != 0.0 {
                re_parts.push((*g, C64::from(e.re)));
            }
            if e.im != 0.0 {
                im_parts.push((*g, C64::from(e.im)));
            }
        }
        let mut terms: Vec<ExpTerm> = Vec::new();
        let mut im_used: Vec<bool> = vec![false; im_parts.len()];
        for (g, er) in re_parts {
            let partner = im_parts.iter().enumerate()
                .find(|(k, (gi, _))| !im_used[*k] && gamma_close(g, *gi));
            if let Some((k, (_, ei))) = partner {
                let full = C64::new(er.re, ei.re);
                im_used[k] = true;
                terms.push(
                    ExpTerm::new(TermKind::BosonRealImag, full, full, g, op)?
                );
            } else {
                terms.push(
                    ExpTerm::new(TermKind::BosonReal, er, er, g, op)?
                );
            }
        }
        for (k, (g, ei)) in im_parts.into_iter().enumerate() {
            if im_used[k] { continue; }
            terms.push(ExpTerm::new(TermKind::BosonImag, ei, ei, g, op)?);
        }
        if terms.is_empty() { return Err(HeomError::EmptyBath); }
        Ok(Self { terms, dim })
    }

    /// Return the expansion terms.
    pub fn terms(&self) -> &[ExpTerm] { &self.terms }

    /// Return the number of hierarchy modes this bath contributes.
    pub fn len(&self) -> usize { self.terms.len() }

    /// Return `true` if no terms are present.
    pub fn is_empty(&self) -> bool { self.terms.is_empty() }

    /// Return the system dimension.
    pub fn dim(&self) -> usize { self.dim }
}

/// An ordered list of fermionic absorb/emit expansion term pairs.
#[derive(Clone, Debug)]
pub struct FermionBath {
    terms: Vec<ExpTerm>,
    dim: usize,
}

impl FermionBath {
    /// Build from raw absorption (`sigma = +`) and emission (`sigma = -`)
    /// coefficient tables for the annihilation-side coupling operator `op`.
    ///
    /// The absorption terms couple through `op^†` and the emission terms
    /// through `op`; each table entry becomes its own hierarchy mode, with
    /// the partner coefficient cross-referenced for the opposite-side lift.
    pub fn new(
        op: &nd::Array2<C64>,
        eta_absorb: &[C64],
        gamma_absorb: &[C64],
        eta_emit: &[C64],
        gamma_emit: &[C64],
    ) -> HeomResult<Self>
    {
        let dim = check_square(op)?;
        if eta_absorb.is_empty()
            || eta_absorb.len() != gamma_absorb.len()
            || eta_emit.len() != gamma_emit.len()
            || eta_absorb.len() != eta_emit.len()
        {
            return Err(HeomError::EmptyBath);
        }
        let opd = superop::dagger(&op.view());
        let mut terms: Vec<ExpTerm>
            = Vec::with_capacity(2 * eta_absorb.len());
        let iter
            = eta_absorb.iter().zip(gamma_absorb)
            .zip(eta_emit.iter().zip(gamma_emit));
        for ((ea, ga), (ee, ge)) in iter {
            terms.push(
                ExpTerm::new(TermKind::FermionAbsorb, *ea, *ee, *ga, &opd)?
            );
            terms.push(
                ExpTerm::new(TermKind::FermionEmit, *ee, *ea, *ge, op)?
            );
        }
        Ok(Self { terms, dim })
    }

    /// Return the expansion terms, absorb/emit interleaved.
    pub fn terms(&self) -> &[ExpTerm] { &self.terms }

    /// Return the number of hierarchy modes this bath contributes.
    pub fn len(&self) -> usize { self.terms.len() }

    /// Return `true` if no terms are present.
    pub fn is_empty(&self) -> bool { self.terms.is_empty() }

    /// Return the system dimension.
    pub fn dim(&self) -> usize { self.dim }
}

/// Flat view over the terms of several same-statistics baths, as consumed by
/// the assembler.
#[derive(Clone, Debug)]
pub(crate) struct CombinedBath<'a> {
    pub(crate) terms: Vec<&'a ExpTerm>,
    pub(crate) dim: usize,
}

impl<'a> CombinedBath<'a> {
    pub(crate) fn from_boson(
        baths: &'a [BosonBath],
        dim: usize,
    ) -> HeomResult<Self> {
        let mut terms: Vec<&ExpTerm> = Vec::new();
        for bath in baths {
            if bath.dim() != dim {
                return Err(HeomError::DimMismatch {
                    expected: dim,
                    got: bath.dim(),
                });
            }
            terms.extend(bath.terms());
        }
        if terms.is_empty() { return Err(HeomError::EmptyBath); }
        Ok(Self { terms, dim })
    }

    pub(crate) fn from_fermion(
        baths: &'a [FermionBath],
        dim: usize,
    ) -> HeomResult<Self> {
        let mut terms: Vec<&ExpTerm> = Vec::new();
        for bath in baths {
            if bath.dim() != dim {
                return Err(HeomError::DimMismatch {
                    expected: dim,
                    got: bath.dim(),
                });
            }
            terms.extend(bath.terms());
        }
        if terms.is_empty() { return Err(HeomError::EmptyBath); }
        Ok(Self { terms, dim })
    }

    pub(crate) fn len(&self) -> usize { self.terms.len() }
}

#[cfg(test)]
mod test {
    use super::*;

    fn c(re: f64, im: f64) -> C64 { C64::new(re, im) }

    fn coupling() -> nd::Array2<C64> {
        nd::array![
            [c(0.1234, 0.0), c(0.1357, 0.2468)],
            [c(0.1357, -0.2468), c(0.5678, 0.0)],
        ]
    }

    #[test]
    fn combine_splits_real_and_imag_parts() {
        // one complex coefficient and two purely real ones
        let eta = [c(0.5, -0.2), c(0.3, 0.0), c(0.1, 0.0)];
        let gamma = [c(1.0, 0.0), c(2.0, 0.0), c(3.0, 0.0)];
        let bath = BosonBath::new(&coupling(), &eta, &gamma).unwrap();
        let kinds: Vec<TermKind>
            = bath.terms().iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TermKind::BosonRealImag,
                TermKind::BosonReal,
                TermKind::BosonReal,
            ],
        );
        assert_eq!(bath.terms()[0].eta, c(0.5, -0.2));
        assert_eq!(bath.terms()[1].eta, c(0.3, 0.0));
    }

    #[test]
    fn combine_keeps_unmatched_imag_part() {
        // imaginary part at a frequency with no real-part partner
        let eta = [c(0.0, 0.7), c(0.3, 0.0)];
        let gamma = [c(1.0, 0.0), c(2.0, 0.0)];
        let bath = BosonBath::new(&coupling(), &eta, &gamma).unwrap();
        let kinds: Vec<TermKind>
            = bath.terms().iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TermKind::BosonReal, TermKind::BosonImag]);
        assert_eq!(bath.terms()[1].eta, c(0.7, 0.0));
    }

    #[test]
    fn empty_table_rejected() {
        assert!(BosonBath::new(&coupling(), &[], &[]).is_err());
    }

    #[test]
    fn fermion_terms_interleave_absorb_emit() {
        let op = nd::array![
            [c(0.0, 0.0), c(1.0, 0.0)],
            [c(0.0, 0.0), c(0.0, 0.0)],
        ];
        let ea = [c(0.1, 0.2), c(0.3, 0.0)];
        let ga = [c(1.0, -0.5), c(2.0, -0.5)];
        let ee = [c(0.1, -0.2), c(0.3, 0.0)];
        let ge = [c(1.0, 0.5), c(2.0, 0.5)];
        let bath = FermionBath::new(&op, &ea, &ga, &ee, &ge).unwrap();
        assert_eq!(bath.len(), 4);
        assert_eq!(bath.terms()[0].kind, TermKind::FermionAbsorb);
        assert_eq!(bath.terms()[1].kind, TermKind::FermionEmit);
        assert_eq!(bath.terms()[0].eta_pair, ee[0]);
        assert_eq!(bath.terms()[1].eta_pair, ea[0]);
    }
}
