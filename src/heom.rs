//! Assembly of the HEOM generator over the ADO hierarchy.
//!
//! Each ADO label contributes a diagonal block (the system Liouvillian
//! damped by the label's decay frequencies) and coupling blocks to its
//! immediate hierarchy neighbors. Blocks are emitted into per-worker
//! triplet partitions, concatenated at the join point, and compressed once;
//! the result is order-independent since duplicate positions are additive.

use std::sync::mpsc;
use ndarray::{ self as nd };
use num_complex::Complex64 as C64;
use num_traits::Zero;
use rayon::iter::{ IntoParallelIterator, ParallelIterator };
use crate::{
    HeomError, HeomResult,
    bath::{ BosonBath, CombinedBath, ExpTerm, FermionBath },
    hierarchy::Hierarchy,
    sparse::{ Coo, Csc },
    superop,
};

/// Fermion-exchange grading of the hierarchy.
///
/// Purely bosonic generators carry `None`; fermionic and mixed generators
/// must be graded `Even` or `Odd`, which fixes the overall sign of the
/// fermionic gradient operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Parity {
    Even,
    Odd,
    None,
}

impl Parity {
    /// The sign `(-1)^pi` entering the fermionic gradients.
    pub(crate) fn sign(&self) -> f64 {
        match *self {
            Self::Even | Self::None => 1.0,
            Self::Odd => -1.0,
        }
    }
}

/// An assembled HEOM generator.
///
/// Holds the sparse superoperator together with the hierarchy metadata and
/// label tables needed for neighbor lookups after construction.
#[derive(Clone, Debug)]
pub struct HeomMatrix {
    pub(crate) data: Csc,
    pub(crate) l_sys: Csc,
    dim: usize,
    tier_boson: usize,
    tier_fermion: usize,
    n_ado: usize,
    n_ado_boson: usize,
    n_ado_fermion: usize,
    parity: Parity,
    boson: Option<Hierarchy>,
    fermion: Option<Hierarchy>,
}

impl HeomMatrix {
    /// Return the assembled sparse generator.
    pub fn data(&self) -> &Csc { &self.data }

    /// Return the generator's shape, `(N_ado d^2, N_ado d^2)`.
    pub fn shape(&self) -> (usize, usize) { self.data.shape() }

    /// Return the number of stored entries of the generator.
    pub fn nnz(&self) -> usize { self.data.nnz() }

    /// Return the system dimension `d`.
    pub fn dim(&self) -> usize { self.dim }

    /// Return the total number of ADOs.
    pub fn n_ado(&self) -> usize { self.n_ado }

    /// Return the number of bosonic sub-labels (1 if no bosonic bath).
    pub fn n_ado_boson(&self) -> usize { self.n_ado_boson }

    /// Return the number of fermionic sub-labels (1 if no fermionic bath).
    pub fn n_ado_fermion(&self) -> usize { self.n_ado_fermion }

    /// Return the bosonic excitation tier.
    pub fn tier_boson(&self) -> usize { self.tier_boson }

    /// Return the fermionic excitation tier.
    pub fn tier_fermion(&self) -> usize { self.tier_fermion }

    /// Return the grading of the hierarchy.
    pub fn parity(&self) -> Parity { self.parity }

    /// Return the bosonic label table, if a bosonic bath is present.
    pub fn boson_hierarchy(&self) -> Option<&Hierarchy> {
        self.boson.as_ref()
    }

    /// Return the fermionic label table, if a fermionic bath is present.
    pub fn fermion_hierarchy(&self) -> Option<&Hierarchy> {
        self.fermion.as_ref()
    }

    /// Return the `(bosonic, fermionic)` label parts of the ADO at a linear
    /// index; the part of an absent statistics is empty.
    pub fn label_of(&self, idx: usize) -> Option<(Vec<usize>, Vec<usize>)> {
        if idx >= self.n_ado { return None; }
        let idx_b = idx / self.n_ado_fermion;
        let idx_f = idx % self.n_ado_fermion;
        let lb = match &self.boson {
            Some(h) => h.label(idx_b)?.to_vec(),
            None => Vec::new(),
        };
        let lf = match &self.fermion {
            Some(h) => h.label(idx_f)?.to_vec(),
            None => Vec::new(),
        };
        Some((lb, lf))
    }

    /// Return the linear index of an ADO given its label parts; the part of
    /// an absent statistics must be empty.
    pub fn index_of(&self, boson: &[usize], fermion: &[usize])
        -> Option<usize>
    {
        let idx_b = match &self.boson {
            Some(h) => h.index(boson)?,
            None => if boson.is_empty() { 0 } else { return None; },
        };
        let idx_f = match &self.fermion {
            Some(h) => h.index(fermion)?,
            None => if fermion.is_empty() { 0 } else { return None; },
        };
        Some(idx_b * self.n_ado_fermion + idx_f)
    }

    /// Inject Lindblad jump terms into every diagonal block of the
    /// generator.
    ///
    /// The sparsity of the generator may grow; an empty jump list leaves it
    /// untouched. Jump operators are validated against the system dimension
    /// before any work.
    pub fn add_dissipator(&mut self, jump_ops: &[nd::Array2<C64>])
        -> HeomResult<()>
    {
        if jump_ops.is_empty() { return Ok(()); }
        for j in jump_ops {
            let (nr, nc) = j.dim();
            if nr != nc { return Err(HeomError::NonSquare(nr, nc)); }
            if nr != self.dim {
                return Err(HeomError::DimMismatch {
                    expected: self.dim,
                    got: nr,
                });
            }
        }
        let dis = superop::dissipator(jump_ops);
        let d2 = self.dim * self.dim;
        let n = self.data.nrows();
        let mut coo = Coo::with_capacity(
            n, n, self.data.nnz() + self.n_ado * dis.nnz());
        for (r, c, v) in self.data.iter() { coo.push_keep(r, c, v); }
        for b in 0..self.n_ado {
            coo.push_block(&dis, b * d2, b * d2);
        }
        self.data = coo.into_csc();
        Ok(())
    }
}

/// Assemble the HEOM generator for a purely bosonic environment.
///
/// The hierarchy is graded [`Parity::None`]. Fails on a non-square
/// Hamiltonian, an empty bath list, or a coupling-operator dimension
/// mismatch.
pub fn make_heom_boson(
    Hsys: &nd::Array2<C64>,
    tier: usize,
    baths: &[BosonBath],
    verbose: bool,
) -> HeomResult<HeomMatrix>
{
    build(Hsys, Some((tier, baths)), None, Parity::None, verbose)
}

/// Assemble the HEOM generator for a purely fermionic environment.
///
/// `parity` must be [`Parity::Even`] or [`Parity::Odd`]; validation
/// otherwise follows [`make_heom_boson`].
pub fn make_heom_fermion(
    Hsys: &nd::Array2<C64>,
    tier: usize,
    baths: &[FermionBath],
    parity: Parity,
    verbose: bool,
) -> HeomResult<HeomMatrix>
{
    if parity == Parity::None {
        return Err(HeomError::InvalidParity(parity));
    }
    build(Hsys, None, Some((tier, baths)), parity, verbose)
}

/// Assemble the HEOM generator for a mixed bosonic/fermionic environment.
///
/// The full label is the Cartesian product of the two sub-hierarchies, with
/// the bosonic sub-index major. Both bath lists must be non-empty; `parity`
/// must be [`Parity::Even`] or [`Parity::Odd`].
pub fn make_heom_boson_fermion(
    Hsys: &nd::Array2<C64>,
    tier_boson: usize,
    tier_fermion: usize,
    bboson: &[BosonBath],
    bfermion: &[FermionBath],
    parity: Parity,
    verbose: bool,
) -> HeomResult<HeomMatrix>
{
    if parity == Parity::None {
        return Err(HeomError::InvalidParity(parity));
    }
    build(
        Hsys,
        Some((tier_boson, bboson)),
        Some((tier_fermion, bfermion)),
        parity,
        verbose,
    )
}

struct AssemblyCtx<'a> {
    l_sys: &'a Csc,
    d2: usize,
    n: usize,
    bterms: &'a [&'a ExpTerm],
    fterms: &'a [&'a ExpTerm],
    hb: Option<&'a Hierarchy>,
    hf: Option<&'a Hierarchy>,
    n_ado_fermion: usize,
    parity: Parity,
}

fn build(
    Hsys: &nd::Array2<C64>,
    boson: Option<(usize, &[BosonBath])>,
    fermion: Option<(usize, &[FermionBath])>,
    parity: Parity,
    verbose: bool,
) -> HeomResult<HeomMatrix>
{
    let (nr, nc) = Hsys.dim();
    if nr != nc { return Err(HeomError::NonSquare(nr, nc)); }
    let d = nr;
    let cb = boson
        .map(|(_, baths)| CombinedBath::from_boson(baths, d))
        .transpose()?;
    let cf = fermion
        .map(|(_, baths)| CombinedBath::from_fermion(baths, d))
        .transpose()?;
    if cb.is_none() && cf.is_none() { return Err(HeomError::EmptyBath); }

    let tier_boson = boson.map(|(tier, _)| tier).unwrap_or(0);
    let tier_fermion = fermion.map(|(tier, _)| tier).unwrap_or(0);
    let hb = cb.as_ref()
        .map(|c| Hierarchy::build(&vec![tier_boson + 1; c.len()], tier_boson))
        .transpose()?;
    let hf = cf.as_ref()
        .map(|c| Hierarchy::build(&vec![2; c.len()], tier_fermion))
        .transpose()?;

    let n_ado_boson = hb.as_ref().map(|h| h.len()).unwrap_or(1);
    let n_ado_fermion = hf.as_ref().map(|h| h.len()).unwrap_or(1);
    let n_ado = n_ado_boson * n_ado_fermion;
    let d2 = d * d;
    let n = n_ado * d2;
    let l_sys = superop::liouvillian(&Hsys.view());

    if verbose {
        println!(
            "assembling heom generator: {} ados, system dimension {}",
            n_ado, d,
        );
    }
    let empty: [&ExpTerm; 0] = [];
    let ctx = AssemblyCtx {
        l_sys: &l_sys,
        d2,
        n,
        bterms: cb.as_ref().map(|c| c.terms.as_slice())
            .unwrap_or(&empty),
        fterms: cf.as_ref().map(|c| c.terms.as_slice())
            .unwrap_or(&empty),
        hb: hb.as_ref(),
        hf: hf.as_ref(),
        n_ado_fermion,
        parity,
    };
    let data = assemble(&ctx, n_ado, verbose);
    if verbose {
        println!(
            "assembled heom generator: shape ({}, {}), {} stored entries",
            n, n, data.nnz(),
        );
    }
    Ok(HeomMatrix {
        data,
        l_sys,
        dim: d,
        tier_boson,
        tier_fermion,
        n_ado,
        n_ado_boson,
        n_ado_fermion,
        parity,
        boson: hb,
        fermion: hf,
    })
}

fn assemble(ctx: &AssemblyCtx, n_ado: usize, verbose: bool) -> Csc {
    let progress = verbose.then(|| spawn_progress(n_ado));
    let tx = progress.as_ref().map(|(tx, _)| tx);
    let coo: Coo = (0..n_ado).into_par_iter()
        .fold(
            || Coo::new(ctx.n, ctx.n),
            |mut acc, idx| {
                emit_ado(ctx, idx, &mut acc);
                if let Some(tx) = tx { let _ = tx.send(1); }
                acc
            },
        )
        .reduce(
            || Coo::new(ctx.n, ctx.n),
            |mut a, b| { a.append(b); a },
        );
    if let Some((tx, handle)) = progress {
        drop(tx);
        let _ = handle.join();
    }
    coo.into_csc()
}

// all blocks incident on the source label at linear index `idx`
fn emit_ado(ctx: &AssemblyCtx, idx: usize, coo: &mut Coo) {
    let idx_b = idx / ctx.n_ado_fermion;
    let idx_f = idx % ctx.n_ado_fermion;
    let label_b = ctx.hb
        .map(|h| h.label(idx_b).expect("emit_ado: bosonic label missing"));
    let label_f = ctx.hf
        .map(|h| h.label(idx_f).expect("emit_ado: fermionic label missing"));
    let row_off = idx * ctx.d2;

    // diagonal block: L_sys - (sum_k s_k gamma_k) I
    coo.push_block(ctx.l_sys, row_off, row_off);
    let mut sum_gamma = C64::zero();
    if let Some(lb) = label_b {
        sum_gamma += lb.iter().zip(ctx.bterms)
            .map(|(s, t)| (*s as f64) * t.gamma)
            .sum::<C64>();
    }
    if let Some(lf) = label_f {
        sum_gamma += lf.iter().zip(ctx.fterms)
            .map(|(s, t)| (*s as f64) * t.gamma)
            .sum::<C64>();
    }
    if !sum_gamma.is_zero() {
        for q in 0..ctx.d2 {
            coo.push(row_off + q, row_off + q, -sum_gamma);
        }
    }

    // bosonic neighbor blocks
    if let (Some(hb), Some(lb)) = (ctx.hb, label_b) {
        for (k, term) in ctx.bterms.iter().copied().enumerate() {
            if lb[k] >= 1 {
                let col_b = hb.lowered(idx_b, k)
                    .expect("emit_ado: missing lower neighbor");
                let col_off = (col_b * ctx.n_ado_fermion + idx_f) * ctx.d2;
                let parts
                    = superop::prev_grad(term, lb[k], 0, 0, ctx.parity);
                for (block, coeff) in parts {
                    coo.push_block_scaled(block, coeff, row_off, col_off);
                }
            }
            if let Some(col_b) = hb.raised(idx_b, k) {
                let col_off = (col_b * ctx.n_ado_fermion + idx_f) * ctx.d2;
                for (block, coeff) in superop::next_grad(term, 0, 0, ctx.parity) {
                    coo.push_block_scaled(block, coeff, row_off, col_off);
                }
            }
        }
    }

    // fermionic neighbor blocks; n_exc and n_before are evaluated on the
    // source label
    if let (Some(hf), Some(lf)) = (ctx.hf, label_f) {
        let n_exc: usize = lf.iter().sum();
        let mut n_before: usize = 0;
        for (k, term) in ctx.fterms.iter().copied().enumerate() {
            if lf[k] == 1 {
                let col_f = hf.lowered(idx_f, k)
                    .expect("emit_ado: missing lower neighbor");
                let col_off = (idx_b * ctx.n_ado_fermion + col_f) * ctx.d2;
                let parts
                    = superop::prev_grad(term, 1, n_exc, n_before, ctx.parity);
                for (block, coeff) in parts {
                    coo.push_block_scaled(block, coeff, row_off, col_off);
                }
            } else if let Some(col_f) = hf.raised(idx_f, k) {
                let col_off = (idx_b * ctx.n_ado_fermion + col_f) * ctx.d2;
                let parts
                    = superop::next_grad(term, n_exc, n_before, ctx.parity);
                for (block, coeff) in parts {
                    coo.push_block_scaled(block, coeff, row_off, col_off);
                }
            }
            n_before += lf[k];
        }
    }
}

fn spawn_progress(total: usize)
    -> (mpsc::Sender<usize>, std::thread::JoinHandle<()>)
{
    let (tx, rx) = mpsc::channel::<usize>();
    let handle = std::thread::spawn(move || {
        let mut done: usize = 0;
        let mut next_mark: usize = 1;
        for count in rx {
            done += count;
            if done * 10 >= next_mark * total {
                println!("  assembled {} / {} ado blocks", done, total);
                while done * 10 >= next_mark * total && next_mark <= 10 {
                    next_mark += 1;
                }
            }
        }
    });
    (tx, handle)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::superop::{ dagger, liouvillian_dense, spre, spost };

    fn c(re: f64, im: f64) -> C64 { C64::new(re, im) }

    fn max_diff(a: &nd::Array2<C64>, b: &nd::Array2<C64>) -> f64 {
        (a - b).iter().map(|v| v.norm()).fold(0.0, f64::max)
    }

    #[test]
    fn single_mode_matches_reference() {
        let h = nd::array![
            [c(0.0, 0.0), c(0.5, 0.0)],
            [c(0.5, 0.0), c(0.0, 0.0)],
        ];
        let q = nd::array![
            [c(1.0, 0.0), c(0.0, 0.0)],
            [c(0.0, 0.0), c(-1.0, 0.0)],
        ];
        let eta = [c(0.3, 0.0)];
        let gamma = [c(0.7, 0.0)];
        let bath = BosonBath::new(&q, &eta, &gamma).unwrap();
        let m = make_heom_boson(&h, 1, &[bath], false).unwrap();
        assert_eq!(m.n_ado(), 2);
        assert_eq!(m.shape(), (8, 8));
        assert_eq!(m.parity(), Parity::None);

        let lsys = liouvillian_dense(&h.view());
        let comm = (spre(&q.view()).sub(&spost(&q.view()))).to_dense();
        let mut expected: nd::Array2<C64> = nd::Array2::zeros((8, 8));
        expected.slice_mut(nd::s![0..4, 0..4]).assign(&lsys);
        // next gradient out of the ground label
        expected.slice_mut(nd::s![0..4, 4..8])
            .assign(&comm.mapv(|v| -C64::i() * v));
        // prev gradient at occupation 1
        expected.slice_mut(nd::s![4..8, 0..4])
            .assign(&comm.mapv(|v| -C64::i() * c(0.3, 0.0) * v));
        let mut diag = lsys.clone();
        for k in 0..4 { diag[[k, k]] -= c(0.7, 0.0); }
        expected.slice_mut(nd::s![4..8, 4..8]).assign(&diag);
        assert!(max_diff(&m.data().to_dense(), &expected) < 1e-15);
    }

    #[test]
    fn mixed_index_is_boson_major() {
        let h = nd::array![
            [c(0.0, 0.0), c(0.1, 0.0)],
            [c(0.1, 0.0), c(0.2, 0.0)],
        ];
        let q = nd::array![
            [c(0.5, 0.0), c(0.0, 0.0)],
            [c(0.0, 0.0), c(-0.5, 0.0)],
        ];
        let bb = BosonBath::new(
            &q, &[c(0.3, 0.1)], &[c(0.7, 0.0)]).unwrap();
        let op = nd::array![
            [c(0.0, 0.0), c(1.0, 0.0)],
            [c(0.0, 0.0), c(0.0, 0.0)],
        ];
        let fb = FermionBath::new(
            &op,
            &[c(0.2, 0.1)], &[c(1.0, -0.4)],
            &[c(0.2, -0.1)], &[c(1.0, 0.4)],
        ).unwrap();
        let m = make_heom_boson_fermion(
            &h, 1, 1, &[bb], &[fb], Parity::Even, false).unwrap();
        assert_eq!(m.n_ado_boson(), 2);
        assert_eq!(m.n_ado_fermion(), 3);
        assert_eq!(m.n_ado(), 6);
        let idx = m.index_of(&[1], &[0, 1]).unwrap();
        assert_eq!(idx, 1 * 3 + m.fermion_hierarchy().unwrap()
            .index(&[0, 1]).unwrap());
        assert_eq!(m.label_of(idx), Some((vec![1], vec![0, 1])));
    }

    #[test]
    fn fermion_parity_flips_upward_sign() {
        let h = nd::array![
            [c(0.0, 0.0), c(0.0, 0.0)],
            [c(0.0, 0.0), c(1.0, 0.0)],
        ];
        let op = nd::array![
            [c(0.0, 0.0), c(1.0, 0.0)],
            [c(0.0, 0.0), c(0.0, 0.0)],
        ];
        let fb = || FermionBath::new(
            &op,
            &[c(0.2, 0.1)], &[c(1.0, -0.4)],
            &[c(0.2, -0.1)], &[c(1.0, 0.4)],
        ).unwrap();
        let even = make_heom_fermion(
            &h, 1, &[fb()], Parity::Even, false).unwrap();
        let odd = make_heom_fermion(
            &h, 1, &[fb()], Parity::Odd, false).unwrap();
        // the upward block out of the vacuum label through the absorb mode
        // couples ado 0 to ado index_of([0..], [1, 0, ...])
        let target = even.fermion_hierarchy().unwrap()
            .index(&[1, 0]).unwrap();
        let opd = dagger(&op.view());
        let spre_d = spre(&opd.view()).to_dense();
        let d2 = 4;
        let mut diff: nd::Array2<C64> = nd::Array2::zeros((d2, d2));
        for r in 0..d2 {
            for col in 0..d2 {
                diff[[r, col]]
                    = even.data().get(r, target * d2 + col)
                    - odd.data().get(r, target * d2 + col);
            }
        }
        // even minus odd leaves twice the parity-sensitive spre part
        let expected = spre_d.mapv(|v| -2.0 * C64::i() * v);
        assert!(max_diff(&diff, &expected) < 1e-14);
    }

    #[test]
    fn bosonic_parity_is_none_and_fermionless() {
        let h = nd::array![
            [c(0.1, 0.0), c(0.0, 0.0)],
            [c(0.0, 0.0), c(0.3, 0.0)],
        ];
        let q = nd::array![
            [c(0.0, 0.0), c(1.0, 0.0)],
            [c(1.0, 0.0), c(0.0, 0.0)],
        ];
        let bath = BosonBath::new(
            &q, &[c(0.4, 0.0)], &[c(0.9, 0.0)]).unwrap();
        let m = make_heom_boson(&h, 2, &[bath], false).unwrap();
        assert_eq!(m.parity(), Parity::None);
        assert_eq!(m.n_ado_fermion(), 1);
        assert!(m.fermion_hierarchy().is_none());
    }

    #[test]
    fn invalid_parity_rejected() {
        let h = nd::array![
            [c(0.0, 0.0), c(0.0, 0.0)],
            [c(0.0, 0.0), c(1.0, 0.0)],
        ];
        let op = nd::array![
            [c(0.0, 0.0), c(1.0, 0.0)],
            [c(0.0, 0.0), c(0.0, 0.0)],
        ];
        let fb = FermionBath::new(
            &op,
            &[c(0.2, 0.1)], &[c(1.0, -0.4)],
            &[c(0.2, -0.1)], &[c(1.0, 0.4)],
        ).unwrap();
        let res = make_heom_fermion(&h, 1, &[fb], Parity::None, false);
        assert!(matches!(res, Err(HeomError::InvalidParity(_))));
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let h = nd::Array2::<C64>::zeros((3, 3));
        let q = nd::array![
            [c(0.0, 0.0), c(1.0, 0.0)],
            [c(1.0, 0.0), c(0.0, 0.0)],
        ];
        let bath = BosonBath::new(
            &q, &[c(0.4, 0.0)], &[c(0.9, 0.0)]).unwrap();
        let res = make_heom_boson(&h, 2, &[bath], false);
        assert!(matches!(res, Err(HeomError::DimMismatch { .. })));
    }

    #[test]
    fn empty_bath_list_rejected() {
        let h = nd::Array2::<C64>::zeros((2, 2));
        let res = make_heom_boson(&h, 2, &[], false);
        assert!(matches!(res, Err(HeomError::EmptyBath)));
    }

    #[test]
    fn empty_dissipator_is_identity_operation() {
        let h = nd::array![
            [c(0.1, 0.0), c(0.2, 0.0)],
            [c(0.2, 0.0), c(0.3, 0.0)],
        ];
        let q = nd::array![
            [c(0.0, 0.0), c(1.0, 0.0)],
            [c(1.0, 0.0), c(0.0, 0.0)],
        ];
        let bath = BosonBath::new(
            &q, &[c(0.4, 0.1)], &[c(0.9, 0.0)]).unwrap();
        let mut m = make_heom_boson(&h, 2, &[bath], false).unwrap();
        let before = m.data().clone();
        m.add_dissipator(&[]).unwrap();
        assert_eq!(m.data(), &before);
    }
}
