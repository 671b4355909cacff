//! The flattened auxiliary-density-operator state vector.
//!
//! Block `b` of the vector occupies the contiguous range
//! `[b d^2, (b + 1) d^2)` and is read column-major as a `d x d` matrix; the
//! physical reduced density matrix is block 0. A vector carries the grading
//! of the generator it belongs to and is validated against it at every API
//! boundary.

use ndarray::{ self as nd };
use num_complex::Complex64 as C64;
use crate::{
    HeomError, HeomResult,
    heom::{ HeomMatrix, Parity },
};

/// Flat complex state vector over the ADO hierarchy.
#[derive(Clone, Debug, PartialEq)]
pub struct AdoVector {
    pub(crate) data: nd::Array1<C64>,
    pub(crate) dim: usize,
    pub(crate) n_ado: usize,
    pub(crate) parity: Parity,
}

impl AdoVector {
    /// Create a vector from an initial reduced density matrix, which fills
    /// block 0; all other blocks start at zero.
    pub fn from_rho(rho: &nd::Array2<C64>, m: &HeomMatrix)
        -> HeomResult<Self>
    {
        let (nr, nc) = rho.dim();
        if nr != nc { return Err(HeomError::NonSquare(nr, nc)); }
        if nr != m.dim() {
            return Err(HeomError::DimMismatch { expected: m.dim(), got: nr });
        }
        let d = m.dim();
        let mut data: nd::Array1<C64>
            = nd::Array1::zeros(m.n_ado() * d * d);
        for c in 0..d {
            for r in 0..d {
                data[c * d + r] = rho[[r, c]];
            }
        }
        Ok(Self { data, dim: d, n_ado: m.n_ado(), parity: m.parity() })
    }

    /// Create a vector from raw flattened data.
    pub fn from_raw(data: nd::Array1<C64>, m: &HeomMatrix)
        -> HeomResult<Self>
    {
        let expected = m.n_ado() * m.dim() * m.dim();
        if data.len() != expected {
            return Err(HeomError::AdoLenMismatch {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            data,
            dim: m.dim(),
            n_ado: m.n_ado(),
            parity: m.parity(),
        })
    }

    /// Return the flattened data.
    pub fn data(&self) -> &nd::Array1<C64> { &self.data }

    /// Return the system dimension `d`.
    pub fn dim(&self) -> usize { self.dim }

    /// Return the number of ADO blocks.
    pub fn n_ado(&self) -> usize { self.n_ado }

    /// Return the grading inherited from the generator.
    pub fn parity(&self) -> Parity { self.parity }

    /// Return block `b` as a `d x d` matrix.
    pub fn block(&self, b: usize) -> Option<nd::Array2<C64>> {
        if b >= self.n_ado { return None; }
        let d = self.dim;
        let off = b * d * d;
        Some(nd::Array2::from_shape_fn((d, d), |(r, c)| {
            self.data[off + c * d + r]
        }))
    }

    /// Return the physical reduced density matrix (block 0).
    pub fn get_rho(&self) -> nd::Array2<C64> {
        self.block(0).expect("AdoVector::get_rho: missing block 0")
    }

    /// Return the expectation value `Tr(op rho)` of a system operator in
    /// the reduced state.
    pub fn expect_val(&self, op: &nd::Array2<C64>) -> HeomResult<C64> {
        let (nr, nc) = op.dim();
        if nr != nc { return Err(HeomError::NonSquare(nr, nc)); }
        if nr != self.dim {
            return Err(HeomError::DimMismatch {
                expected: self.dim,
                got: nr,
            });
        }
        let rho = self.get_rho();
        Ok(op.dot(&rho).diag().iter().sum())
    }

    /// Return the trace of the reduced density matrix.
    pub fn trace(&self) -> C64 {
        let d = self.dim;
        (0..d).map(|r| self.data[r * d + r]).sum()
    }

    /// Check shape and grading against a generator.
    pub(crate) fn check_compat(&self, m: &HeomMatrix) -> HeomResult<()> {
        let expected = m.n_ado() * m.dim() * m.dim();
        if self.data.len() != expected {
            return Err(HeomError::AdoLenMismatch {
                expected,
                got: self.data.len(),
            });
        }
        if self.parity != m.parity() {
            return Err(HeomError::AdoParityMismatch {
                matrix: m.parity(),
                ado: self.parity,
            });
        }
        Ok(())
    }

    pub(crate) fn with_data(&self, data: nd::Array1<C64>) -> Self {
        Self {
            data,
            dim: self.dim,
            n_ado: self.n_ado,
            parity: self.parity,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bath::BosonBath;
    use crate::heom::make_heom_boson;

    fn c(re: f64, im: f64) -> C64 { C64::new(re, im) }

    fn small_matrix() -> HeomMatrix {
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
        make_heom_boson(&h, 1, &[bath], false).unwrap()
    }

    #[test]
    fn block_zero_round_trips() {
        let m = small_matrix();
        let rho = nd::array![
            [c(0.7, 0.0), c(0.1, 0.2)],
            [c(0.1, -0.2), c(0.3, 0.0)],
        ];
        let ados = AdoVector::from_rho(&rho, &m).unwrap();
        assert_eq!(ados.get_rho(), rho);
        assert!((ados.trace() - c(1.0, 0.0)).norm() < 1e-15);
        // all other blocks start empty
        let b1 = ados.block(1).unwrap();
        assert!(b1.iter().all(|v| v.norm() == 0.0));
    }

    #[test]
    fn expectation_values() {
        let m = small_matrix();
        let rho = nd::array![
            [c(0.25, 0.0), c(0.0, 0.0)],
            [c(0.0, 0.0), c(0.75, 0.0)],
        ];
        let ados = AdoVector::from_rho(&rho, &m).unwrap();
        let sz = nd::array![
            [c(1.0, 0.0), c(0.0, 0.0)],
            [c(0.0, 0.0), c(-1.0, 0.0)],
        ];
        let val = ados.expect_val(&sz).unwrap();
        assert!((val - c(-0.5, 0.0)).norm() < 1e-15);
    }

    #[test]
    fn wrong_dimension_rejected() {
        let m = small_matrix();
        let rho = nd::Array2::<C64>::zeros((3, 3));
        assert!(AdoVector::from_rho(&rho, &m).is_err());
        let raw = nd::Array1::<C64>::zeros(5);
        assert!(AdoVector::from_raw(raw, &m).is_err());
    }
}
