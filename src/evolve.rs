//! Time evolution of ADO vectors under an assembled HEOM generator.
//!
//! Two drivers are provided: a sparse matrix-exponential propagator applied
//! over fixed steps, and an adaptive embedded Runge-Kutta integration of
//! `dv/dt = L v` saving at caller-supplied time points. The ODE path
//! optionally handles a time-dependent system Hamiltonian through an update
//! hook that refreshes a pre-allocated sparse buffer before each
//! right-hand-side evaluation.

use std::{ path::Path, rc::Rc };
use ndarray::{ self as nd };
use num_complex::Complex64 as C64;
use crate::{
    HeomError, HeomResult,
    ado::AdoVector,
    checkpoint::CheckpointWriter,
    heom::HeomMatrix,
    sparse::{ Coo, Csc },
    superop,
};

/// Heap-allocated [`Fn`] trait object giving the system Hamiltonian at a
/// time; any extra parameters are captured by the closure.
pub type DriveFn<'a> = Rc<dyn Fn(f64) -> nd::Array2<C64> + 'a>;

/// Different descriptions of the initial state of an evolution.
#[derive(Clone, Debug)]
pub enum Initial<'a> {
    /// An initial reduced density matrix; all auxiliary blocks start at
    /// zero.
    Rho(&'a nd::Array2<C64>),
    /// A full ADO vector, e.g. from a previous evolution segment.
    Ados(&'a AdoVector),
}

impl<'a> From<&'a nd::Array2<C64>> for Initial<'a> {
    fn from(rho: &'a nd::Array2<C64>) -> Self { Self::Rho(rho) }
}

impl<'a> From<&'a AdoVector> for Initial<'a> {
    fn from(ados: &'a AdoVector) -> Self { Self::Ados(ados) }
}

impl<'a> Initial<'a> {
    fn resolve(self, m: &HeomMatrix) -> HeomResult<AdoVector> {
        match self {
            Self::Rho(rho) => AdoVector::from_rho(rho, m),
            Self::Ados(ados) => {
                ados.check_compat(m)?;
                Ok(ados.clone())
            },
        }
    }
}

/// Options for the matrix-exponential propagator.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PropOpts {
    /// Truncation threshold on the Taylor series.
    pub threshold: f64,
    /// Drop tolerance applied after each sparse product.
    pub nonzero_tol: f64,
}

impl Default for PropOpts {
    fn default() -> Self {
        Self { threshold: 1e-6, nonzero_tol: 1e-14 }
    }
}

/// Options for the adaptive ODE integration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OdeOpts {
    /// Relative tolerance.
    pub rtol: f64,
    /// Absolute tolerance.
    pub atol: f64,
    /// Step budget for a single call.
    pub max_steps: usize,
}

impl Default for OdeOpts {
    fn default() -> Self {
        Self { rtol: 1e-6, atol: 1e-8, max_steps: 100_000 }
    }
}

// series cap; the threshold check governs normal termination
const EXPM_MAX_TERMS: usize = 1000;

pub(crate) fn taylor_expm(l: &Csc, dt: f64, opts: &PropOpts)
    -> HeomResult<Csc>
{
    let n = l.nrows();
    let ldt = l.scale(C64::from(dt));
    let mut p = Csc::eye(n);
    let mut term = Csc::eye(n);
    for j in 1..=EXPM_MAX_TERMS {
        term = term.matmul(&ldt, opts.nonzero_tol);
        term.scale_mut(C64::from((j as f64).recip()));
        p = p.add(&term);
        if term.max_abs() < opts.threshold { return Ok(p); }
    }
    Err(HeomError::ExpmDiverged {
        terms: EXPM_MAX_TERMS,
        last: term.max_abs(),
    })
}

/// Sparse propagator `P = expm(L dt)`, computed once and applied stepwise.
#[derive(Clone, Debug)]
pub struct Propagator {
    p: Csc,
    dt: f64,
}

impl Propagator {
    /// Compute the propagator for a fixed step `dt` by a truncated Taylor
    /// series with a sparsity-preserving drop tolerance.
    pub fn new(m: &HeomMatrix, dt: f64, opts: &PropOpts)
        -> HeomResult<Self>
    {
        Ok(Self { p: taylor_expm(&m.data, dt, opts)?, dt })
    }

    /// Return the time step.
    pub fn dt(&self) -> f64 { self.dt }

    /// Advance an ADO vector by one step.
    pub fn apply(&self, v: &AdoVector) -> HeomResult<AdoVector> {
        if v.data().len() != self.p.ncols() {
            return Err(HeomError::AdoLenMismatch {
                expected: self.p.ncols(),
                got: v.data().len(),
            });
        }
        Ok(v.with_data(self.p.mul_vec(v.data().view())))
    }
}

/// Propagate by repeated application of the matrix exponential over `steps`
/// fixed steps of `dt`, returning the trajectory including the initial
/// state.
///
/// If a checkpoint path is given it must not already exist; each saved
/// state is streamed to it keyed by its decimal time stamp.
pub fn evolve<'a, I>(
    m: &HeomMatrix,
    init: I,
    dt: f64,
    steps: usize,
    opts: &PropOpts,
    checkpoint: Option<&Path>,
) -> HeomResult<Vec<AdoVector>>
where I: Into<Initial<'a>>
{
    let v0 = init.into().resolve(m)?;
    let mut sink = checkpoint
        .map(|path| CheckpointWriter::create(path, m))
        .transpose()?;
    let prop = Propagator::new(m, dt, opts)?;
    let mut out: Vec<AdoVector> = Vec::with_capacity(steps + 1);
    if let Some(sink) = sink.as_mut() { sink.write(0.0, &v0)?; }
    out.push(v0);
    for k in 1..=steps {
        let next = prop.apply(
            out.last().expect("evolve: empty trajectory"))?;
        if let Some(sink) = sink.as_mut() {
            sink.write(k as f64 * dt, &next)?;
        }
        out.push(next);
    }
    Ok(out)
}

/// Integrate `dv/dt = L v` with an adaptive embedded Runge-Kutta scheme,
/// saving the state at the supplied time points (the first of which holds
/// the initial state).
///
/// With a drive, the generator splits as `L_0 + L_t(t)`: the assembled
/// matrix minus the static system-Liouvillian diagonal, plus the lifted
/// Liouvillian of `drive(t)` recomputed into a pre-allocated buffer before
/// each right-hand-side evaluation.
pub fn evolve_ode<'a, 'b, I>(
    m: &HeomMatrix,
    init: I,
    tlist: &[f64],
    opts: &OdeOpts,
    drive: Option<DriveFn<'b>>,
    checkpoint: Option<&Path>,
) -> HeomResult<Vec<AdoVector>>
where I: Into<Initial<'a>>
{
    let v0 = init.into().resolve(m)?;
    if tlist.is_empty()
        || tlist.iter().zip(tlist.iter().skip(1)).any(|(a, b)| *b <= *a)
    {
        return Err(HeomError::BadTimeList);
    }
    let mut sink = checkpoint
        .map(|path| CheckpointWriter::create(path, m))
        .transpose()?;

    let d = m.dim();
    let d2 = d * d;
    let mut rhs: Box<dyn FnMut(f64, &nd::Array1<C64>) -> nd::Array1<C64> + '_>
        = match drive {
            None => {
                let l = &m.data;
                Box::new(move |_t, y| l.mul_vec(y.view()))
            },
            Some(hfn) => {
                let h0 = hfn(tlist[0]);
                let (nr, nc) = h0.dim();
                if nr != nc { return Err(HeomError::NonSquare(nr, nc)); }
                if nr != d {
                    return Err(HeomError::DimMismatch {
                        expected: d,
                        got: nr,
                    });
                }
                let l0 = m.data.sub(
                    &lift_diag(&m.l_sys, m.n_ado(), false));
                let mut lt = lift_diag(
                    &superop::liouvillian_pattern(d), m.n_ado(), true);
                Box::new(move |t, y| {
                    let block = superop::liouvillian_dense(&hfn(t).view());
                    lt.for_each_entry_mut(|r, c, v| {
                        *v = block[[r % d2, c % d2]];
                    });
                    let mut dy = l0.mul_vec(y.view());
                    lt.mul_vec_acc(y.view(), &mut dy);
                    dy
                })
            },
        };

    let mut out: Vec<AdoVector> = Vec::with_capacity(tlist.len());
    let stepper = Rkf45 {
        rtol: opts.rtol,
        atol: opts.atol,
        max_steps: opts.max_steps,
    };
    stepper.integrate(
        v0.data(),
        tlist,
        &mut rhs,
        |save_idx, y| {
            let state = v0.with_data(y.clone());
            if let Some(sink) = sink.as_mut() {
                sink.write(tlist[save_idx], &state)?;
            }
            out.push(state);
            Ok(())
        },
    )?;
    Ok(out)
}

// block-diagonal lift of a d^2-sized superoperator block onto the full
// hierarchy space; `keep` preserves stored zeros for pattern buffers
fn lift_diag(block: &Csc, n_blocks: usize, keep: bool) -> Csc {
    let d2 = block.nrows();
    let n = n_blocks * d2;
    let mut coo = Coo::with_capacity(n, n, n_blocks * block.nnz());
    for b in 0..n_blocks {
        if keep {
            coo.push_block_keep(block, b * d2, b * d2);
        } else {
            coo.push_block(block, b * d2, b * d2);
        }
    }
    coo.into_csc()
}

// Fehlberg 4(5) embedded pair
struct Rkf45 {
    rtol: f64,
    atol: f64,
    max_steps: usize,
}

impl Rkf45 {
    fn integrate<F, S>(
        &self,
        y0: &nd::Array1<C64>,
        tlist: &[f64],
        mut rhs: F,
        mut on_save: S,
    ) -> HeomResult<()>
    where
        F: FnMut(f64, &nd::Array1<C64>) -> nd::Array1<C64>,
        S: FnMut(usize, &nd::Array1<C64>) -> HeomResult<()>,
    {
        let mut y: nd::Array1<C64> = y0.clone();
        on_save(0, &y)?;
        let mut t = tlist[0];
        let mut h = match tlist.get(1) {
            Some(t1) => t1 - tlist[0],
            None => return Ok(()),
        };
        let mut steps: usize = 0;
        let mut k1: nd::Array1<C64>;
        let mut k2: nd::Array1<C64>;
        let mut k3: nd::Array1<C64>;
        let mut k4: nd::Array1<C64>;
        let mut k5: nd::Array1<C64>;
        let mut k6: nd::Array1<C64>;
        for (save_idx, &t_target) in tlist.iter().enumerate().skip(1) {
            while t < t_target - 1e-12 * t_target.abs().max(1.0) {
                if steps >= self.max_steps {
                    return Err(HeomError::OdeMaxSteps {
                        max_steps: self.max_steps,
                    });
                }
                steps += 1;
                let ht = h.min(t_target - t);
                k1 = rhs(t, &y);
                k2 = rhs(
                    t + ht / 4.0,
                    &(&y + &k1 * (ht / 4.0)),
                );
                k3 = rhs(
                    t + 3.0 * ht / 8.0,
                    &(&y + &k1 * (3.0 * ht / 32.0) + &k2 * (9.0 * ht / 32.0)),
                );
                k4 = rhs(
                    t + 12.0 * ht / 13.0,
                    &(
                        &y + &k1 * (1932.0 * ht / 2197.0)
                        - &k2 * (7200.0 * ht / 2197.0)
                        + &k3 * (7296.0 * ht / 2197.0)
                    ),
                );
                k5 = rhs(
                    t + ht,
                    &(
                        &y + &k1 * (439.0 * ht / 216.0)
                        - &k2 * (8.0 * ht)
                        + &k3 * (3680.0 * ht / 513.0)
                        - &k4 * (845.0 * ht / 4104.0)
                    ),
                );
                k6 = rhs(
                    t + ht / 2.0,
                    &(
                        &y - &k1 * (8.0 * ht / 27.0)
                        + &k2 * (2.0 * ht)
                        - &k3 * (3544.0 * ht / 2565.0)
                        + &k4 * (1859.0 * ht / 4104.0)
                        - &k5 * (11.0 * ht / 40.0)
                    ),
                );
                let y5: nd::Array1<C64>
                    = &y + &k1 * (16.0 * ht / 135.0)
                    + &k3 * (6656.0 * ht / 12825.0)
                    + &k4 * (28561.0 * ht / 56430.0)
                    - &k5 * (9.0 * ht / 50.0)
                    + &k6 * (2.0 * ht / 55.0);
                let y4: nd::Array1<C64>
                    = &y + &k1 * (25.0 * ht / 216.0)
                    + &k3 * (1408.0 * ht / 2565.0)
                    + &k4 * (2197.0 * ht / 4104.0)
                    - &k5 * (ht / 5.0);
                let err = y5.iter().zip(y4.iter()).zip(y.iter())
                    .map(|((a, b), prev)| {
                        (a - b).norm()
                            / (self.atol
                                + self.rtol * prev.norm().max(a.norm()))
                    })
                    .fold(0.0, f64::max);
                if err <= 1.0 {
                    t += ht;
                    y = y5;
                }
                let factor
                    = if err > 0.0 {
                        (0.9 * err.powf(-0.2)).clamp(0.2, 5.0)
                    } else {
                        5.0
                    };
                // a step clipped to a save point says nothing about the
                // natural step size unless it was rejected
                if ht >= h || err > 1.0 {
                    h = ht * factor;
                }
            }
            on_save(save_idx, &y)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn c(re: f64, im: f64) -> C64 { C64::new(re, im) }

    #[test]
    fn expm_of_diagonal() {
        let l = nd::array![
            [c(-0.5, 0.0), c(0.0, 0.0)],
            [c(0.0, 0.0), c(-1.0, 0.0)],
        ];
        let sl = Csc::from_dense(&l.view());
        let opts = PropOpts { threshold: 1e-12, nonzero_tol: 0.0 };
        let p = taylor_expm(&sl, 0.1, &opts).unwrap();
        assert!((p.get(0, 0) - c((-0.05_f64).exp(), 0.0)).norm() < 1e-10);
        assert!((p.get(1, 1) - c((-0.1_f64).exp(), 0.0)).norm() < 1e-10);
        assert!(p.get(0, 1).norm() < 1e-12);
    }

    #[test]
    fn expm_of_rotation() {
        let w = 0.8;
        let l = nd::array![
            [c(0.0, 0.0), c(-w, 0.0)],
            [c(w, 0.0), c(0.0, 0.0)],
        ];
        let sl = Csc::from_dense(&l.view());
        let opts = PropOpts { threshold: 1e-12, nonzero_tol: 1e-16 };
        let p = taylor_expm(&sl, 1.0, &opts).unwrap();
        assert!((p.get(0, 0) - c(w.cos(), 0.0)).norm() < 1e-9);
        assert!((p.get(0, 1) - c(-w.sin(), 0.0)).norm() < 1e-9);
        assert!((p.get(1, 0) - c(w.sin(), 0.0)).norm() < 1e-9);
    }

    #[test]
    fn rkf45_scalar_decay() {
        let stepper = Rkf45 { rtol: 1e-8, atol: 1e-10, max_steps: 100_000 };
        let y0 = nd::array![c(1.0, 0.0)];
        let tlist = [0.0, 0.5, 1.0];
        let mut saved: Vec<C64> = Vec::new();
        stepper.integrate(
            &y0,
            &tlist,
            |_t, y| y.mapv(|v| -v),
            |_idx, y| { saved.push(y[0]); Ok(()) },
        ).unwrap();
        assert_eq!(saved.len(), 3);
        assert!((saved[1] - c((-0.5_f64).exp(), 0.0)).norm() < 1e-7);
        assert!((saved[2] - c((-1.0_f64).exp(), 0.0)).norm() < 1e-7);
    }

    #[test]
    fn rkf45_phase_rotation_preserves_norm() {
        let stepper = Rkf45 { rtol: 1e-9, atol: 1e-11, max_steps: 100_000 };
        let y0 = nd::array![c(1.0, 0.0)];
        let tlist: Vec<f64> = (0..=10).map(|k| 0.3 * k as f64).collect();
        let mut saved: Vec<C64> = Vec::new();
        stepper.integrate(
            &y0,
            &tlist,
            |_t, y| y.mapv(|v| C64::i() * v),
            |_idx, y| { saved.push(y[0]); Ok(()) },
        ).unwrap();
        for (k, v) in saved.iter().enumerate() {
            assert!((v.norm() - 1.0).abs() < 1e-7);
            let expected = (C64::i() * (0.3 * k as f64)).exp();
            assert!((v - expected).norm() < 1e-6);
        }
    }

    #[test]
    fn rkf45_exhausts_step_budget() {
        let stepper = Rkf45 { rtol: 1e-12, atol: 1e-14, max_steps: 3 };
        let y0 = nd::array![c(1.0, 0.0)];
        let tlist = [0.0, 100.0];
        let res = stepper.integrate(
            &y0,
            &tlist,
            |_t, y| y.mapv(|v| -v),
            |_idx, _y| Ok(()),
        );
        assert!(matches!(res, Err(HeomError::OdeMaxSteps { .. })));
    }
}
