//! Stationary-state solve under the trace-preservation constraint.
//!
//! The generator is singular on the physical subspace, so one row is
//! replaced by the constraint `Tr(rho_0) = 1` and the resulting linear
//! system is handed to a pluggable solver. A dense LU fallback backed by
//! the usual LAPACK route is bundled; external sparse direct or iterative
//! solvers implement [`LinearSolver`].

use ndarray::{ self as nd };
use ndarray_linalg::Solve;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use crate::{
    HeomError, HeomResult,
    ado::AdoVector,
    heom::HeomMatrix,
    sparse::{ Coo, Csc },
};

/// Interface to an external linear solver for `A x = b`.
pub trait LinearSolver {
    fn solve(&self, a: &Csc, b: &[C64]) -> HeomResult<Vec<C64>>;
}

/// Bundled dense LU solver.
///
/// Densifies the system first, so it is only suitable up to moderate
/// hierarchy sizes.
#[derive(Copy, Clone, Debug, Default)]
pub struct DenseLu;

impl LinearSolver for DenseLu {
    fn solve(&self, a: &Csc, b: &[C64]) -> HeomResult<Vec<C64>> {
        let ad = a.to_dense();
        let bd: nd::Array1<C64> = nd::Array1::from(b.to_vec());
        let x = ad.solve_into(bd)?;
        Ok(x.to_vec())
    }
}

/// Options for the steady-state solve.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SteadyOpts {
    /// Residual tolerance on `‖A x - b‖`.
    pub tol: f64,
}

impl Default for SteadyOpts {
    fn default() -> Self { Self { tol: 1e-10 } }
}

/// Solve for the stationary ADO vector of a generator.
///
/// Row 0 of the generator is replaced by the trace row over block 0 and the
/// right-hand side carries a single 1 there. The solver's result is
/// residual-checked before being wrapped as an ADO vector.
pub fn steady_state(
    m: &HeomMatrix,
    solver: &dyn LinearSolver,
    opts: &SteadyOpts,
) -> HeomResult<AdoVector>
{
    let (n, _) = m.shape();
    let d = m.dim();
    let mut coo = Coo::with_capacity(n, n, m.nnz() + d);
    for (r, c, v) in m.data().iter() {
        if r != 0 { coo.push_keep(r, c, v); }
    }
    for j in 0..d {
        coo.push_keep(0, j * d + j, C64::from(1.0));
    }
    let a = coo.into_csc();
    let mut b: Vec<C64> = vec![C64::zero(); n];
    b[0] = C64::from(1.0);

    let x = solver.solve(&a, &b)?;
    let xarr: nd::Array1<C64> = nd::Array1::from(x);
    let ax = a.mul_vec(xarr.view());
    let residual: f64
        = ax.iter().zip(&b)
        .map(|(u, v)| (u - v).norm_sqr())
        .sum::<f64>()
        .sqrt();
    if residual > opts.tol {
        return Err(HeomError::SolverResidual { residual, tol: opts.tol });
    }
    AdoVector::from_raw(xarr, m)
}

#[cfg(test)]
mod test {
    use super::*;

    fn c(re: f64, im: f64) -> C64 { C64::new(re, im) }

    #[test]
    fn dense_lu_solves_small_system() {
        let a = nd::array![
            [c(2.0, 0.0), c(1.0, 0.0)],
            [c(0.0, 1.0), c(3.0, 0.0)],
        ];
        let sa = Csc::from_dense(&a.view());
        let b = [c(3.0, 0.0), c(3.0, 1.0)];
        let x = DenseLu.solve(&sa, &b).unwrap();
        let xarr: nd::Array1<C64> = nd::Array1::from(x);
        let ax = sa.mul_vec(xarr.view());
        assert!(
            ax.iter().zip(&b).all(|(u, v)| (u - v).norm() < 1e-12)
        );
    }
}
