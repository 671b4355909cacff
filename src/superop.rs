//! Lifts of system-space operators onto the vectorized (Liouville) space.
//!
//! A `d x d` density matrix is flattened column-major, so that left
//! multiplication by `A` becomes `spre(A) = I (x) A` and right multiplication
//! becomes `spost(A) = A^T (x) I` on the `d^2`-dimensional space. The
//! per-term gradient operators of the hierarchy are linear combinations of
//! these lifts, with extra sign bookkeeping for fermionic modes.

use itertools::Itertools;
use ndarray::{ self as nd };
use num_complex::Complex64 as C64;
use crate::{
    bath::{ ExpTerm, TermKind },
    heom::Parity,
    sparse::{ Coo, Csc },
};

/// Lift left multiplication by `a` onto the vectorized space.
///
/// Exact zeros of `a` are not stored.
pub fn spre(a: &nd::ArrayView2<C64>) -> Csc {
    let d = a.nrows();
    let mut coo = Coo::with_capacity(d * d, d * d, d * d * d);
    for c in 0..d {
        for m in 0..d {
            for r in 0..d {
                coo.push(c * d + r, c * d + m, a[[r, m]]);
            }
        }
    }
    coo.into_csc()
}

/// Lift right multiplication by `a` onto the vectorized space.
///
/// Exact zeros of `a` are not stored.
pub fn spost(a: &nd::ArrayView2<C64>) -> Csc {
    let d = a.nrows();
    let mut coo = Coo::with_capacity(d * d, d * d, d * d * d);
    for m in 0..d {
        for c in 0..d {
            for r in 0..d {
                coo.push(c * d + r, m * d + r, a[[m, c]]);
            }
        }
    }
    coo.into_csc()
}

/// Return the conjugate transpose of a dense operator.
pub fn dagger(a: &nd::ArrayView2<C64>) -> nd::Array2<C64> {
    a.t().mapv(|v| v.conj())
}

/// Compute the system Liouvillian `-i (spre(h) - spost(h))` as a dense
/// array.
pub fn liouvillian_dense(h: &nd::ArrayView2<C64>) -> nd::Array2<C64> {
    let d = h.nrows();
    if h.ncols() != d {
        panic!("liouvillian_dense: non-square Hamiltonian");
    }
    let d2 = d * d;
    let mut l: nd::Array2<C64> = nd::Array2::zeros((d2, d2));
    let iter
        = (0..d).cartesian_product(0..d)
        .cartesian_product((0..d).cartesian_product(0..d));
    for ((c, r), (cp, rp)) in iter {
        let mut v = C64::from(0.0);
        if c == cp { v += h[[r, rp]]; }
        if r == rp { v -= h[[cp, c]]; }
        l[[c * d + r, cp * d + rp]] = -C64::i() * v;
    }
    l
}

/// Compute the system Liouvillian `-i (spre(h) - spost(h))`, storing only
/// nonzero entries.
pub fn liouvillian(h: &nd::ArrayView2<C64>) -> Csc {
    Csc::from_dense(&liouvillian_dense(h).view())
}

/// Build the structural sparsity pattern of a system Liouvillian for a dense
/// `d x d` Hamiltonian, with all values zero.
///
/// The pattern covers every position either lift can touch, independent of
/// the Hamiltonian's values, so a buffer with this pattern can be refreshed
/// in place as the Hamiltonian changes in time.
pub fn liouvillian_pattern(d: usize) -> Csc {
    let d2 = d * d;
    let mut coo = Coo::with_capacity(d2, d2, d2 * (2 * d - 1));
    let iter
        = (0..d).cartesian_product(0..d)
        .cartesian_product((0..d).cartesian_product(0..d));
    for ((cp, rp), (c, r)) in iter {
        if c == cp || r == rp {
            coo.push_keep(c * d + r, cp * d + rp, C64::from(0.0));
        }
    }
    coo.into_csc()
}

/// Build the Lindblad dissipator block
/// `sum_i (spre(J_i) spost(J_i^†) - spre(J_i^† J_i)/2 - spost(J_i^† J_i)/2)`
/// on the vectorized space.
///
/// *Panics* if the jump operators are not square or disagree in dimension;
/// callers validate at the API boundary.
pub fn dissipator(jump_ops: &[nd::Array2<C64>]) -> Csc {
    let d = jump_ops.first()
        .map(|j| j.nrows())
        .expect("dissipator: empty jump operator list");
    let mut acc = Csc::zeros(d * d, d * d);
    for j in jump_ops {
        if j.nrows() != d || j.ncols() != d {
            panic!("dissipator: jump operator dimension mismatch");
        }
        let jdag = dagger(&j.view());
        let jdag_j = jdag.dot(j);
        let sandwich
            = spre(&j.view()).matmul(&spost(&jdag.view()), 0.0);
        acc = acc
            .add(&sandwich)
            .add(&spre(&jdag_j.view()).scale(C64::from(-0.5)))
            .add(&spost(&jdag_j.view()).scale(C64::from(-0.5)));
    }
    acc
}

fn sign_of(n: usize) -> f64 {
    if n % 2 == 0 { 1.0 } else { -1.0 }
}

/// Gradient operator coupling an ADO to its lower neighbor in bath term
/// `term` at occupation `n_k`, expressed as scaled cached blocks.
///
/// `n_exc` is the total fermionic excitation and `n_before` the sum of
/// fermionic coordinates left of the term, both on the source label; they
/// are ignored for bosonic kinds.
pub(crate) fn prev_grad<'a>(
    term: &'a ExpTerm,
    n_k: usize,
    n_exc: usize,
    n_before: usize,
    parity: Parity,
) -> Vec<(&'a Csc, C64)> {
    let i = C64::i();
    let n = C64::from(n_k as f64);
    match term.kind {
        TermKind::BosonReal => {
            vec![(&term.comm, -i * n * term.eta)]
        },
        TermKind::BosonImag => {
            vec![(&term.acomm, n * term.eta)]
        },
        TermKind::BosonRealImag => {
            vec![
                (&term.spre, -i * n * term.eta),
                (&term.spost, i * n * term.eta.conj()),
            ]
        },
        TermKind::FermionAbsorb | TermKind::FermionEmit => {
            let sb = sign_of(n_before);
            // (-1)^(n_exc - 1); anticommutation bookkeeping over the modes
            // to the right is carried by the excitation total
            let se = sign_of(n_exc + 1);
            let ps = parity.sign();
            vec![
                (&term.spre, -i * sb * ps * term.eta),
                (&term.spost, i * sb * se * term.eta_pair.conj()),
            ]
        },
    }
}

/// Gradient operator coupling an ADO to its upper neighbor in bath term
/// `term`.
///
/// Bosonic kinds carry no occupation factor; fermionic kinds use the
/// daggered-coupling lifts and the same sign bookkeeping as
/// [`prev_grad`].
pub(crate) fn next_grad<'a>(
    term: &'a ExpTerm,
    n_exc: usize,
    n_before: usize,
    parity: Parity,
) -> Vec<(&'a Csc, C64)> {
    let i = C64::i();
    match term.kind {
        TermKind::BosonReal | TermKind::BosonImag
        | TermKind::BosonRealImag => {
            vec![(&term.comm, -i)]
        },
        TermKind::FermionAbsorb | TermKind::FermionEmit => {
            let sb = sign_of(n_before);
            let se = sign_of(n_exc + 1);
            let ps = parity.sign();
            vec![
                (&term.spre_dag, -i * sb * ps),
                (&term.spost_dag, -i * sb * se),
            ]
        },
    }
}

#[cfg(test)]
mod test {
    use ndarray::linalg::kron;
    use super::*;

    fn c(re: f64, im: f64) -> C64 { C64::new(re, im) }

    fn sample_op() -> nd::Array2<C64> {
        nd::array![
            [c(0.3, 0.0), c(0.1, 0.2)],
            [c(0.1, -0.2), c(-0.7, 0.0)],
        ]
    }

    fn max_diff(a: &nd::Array2<C64>, b: &nd::Array2<C64>) -> f64 {
        (a - b).iter().map(|v| v.norm()).fold(0.0, f64::max)
    }

    #[test]
    fn spre_is_kron_eye_op() {
        let a = sample_op();
        let eye: nd::Array2<C64> = nd::Array2::eye(2);
        assert!(max_diff(&spre(&a.view()).to_dense(), &kron(&eye, &a)) < 1e-15);
    }

    #[test]
    fn spost_is_kron_transpose_eye() {
        let a = sample_op();
        let eye: nd::Array2<C64> = nd::Array2::eye(2);
        let at = a.t().to_owned();
        assert!(
            max_diff(&spost(&a.view()).to_dense(), &kron(&at, &eye)) < 1e-15
        );
    }

    #[test]
    fn liouvillian_is_commutator() {
        let h = nd::array![
            [c(0.6969, 0.0), c(0.4364, 0.0)],
            [c(0.4364, 0.0), c(0.3215, 0.0)],
        ];
        let rho = nd::array![
            [c(0.6, 0.0), c(0.2, 0.1)],
            [c(0.2, -0.1), c(0.4, 0.0)],
        ];
        let l = liouvillian(&h.view());
        // vectorize rho column-major
        let v: nd::Array1<C64>
            = (0..4).map(|k| rho[[k % 2, k / 2]]).collect();
        let lv = l.mul_vec(v.view());
        let drho = -C64::i() * (h.dot(&rho) - rho.dot(&h));
        let expected: nd::Array1<C64>
            = (0..4).map(|k| drho[[k % 2, k / 2]]).collect();
        assert!(
            lv.iter().zip(expected.iter())
                .all(|(u, w)| (u - w).norm() < 1e-14)
        );
    }

    #[test]
    fn liouvillian_drops_cancelled_diagonal() {
        let h = nd::array![
            [c(0.6969, 0.0), c(0.4364, 0.0)],
            [c(0.4364, 0.0), c(0.3215, 0.0)],
        ];
        // positions (0,0) and (3,3) cancel exactly for any Hamiltonian
        let l = liouvillian(&h.view());
        assert_eq!(l.nnz(), 10);
        assert_eq!(liouvillian_pattern(2).nnz(), 12);
    }

    #[test]
    fn dissipator_annihilates_maximally_mixed_for_hermitian_jumps() {
        // for Hermitian J, the dissipator of the identity state vanishes
        let j = nd::array![
            [c(0.0, 0.0), c(0.145, -0.7414)],
            [c(0.145, 0.7414), c(0.0, 0.0)],
        ];
        let dis = dissipator(&[j]);
        let eye_vec: nd::Array1<C64>
            = (0..4).map(|k| {
                if k % 2 == k / 2 { c(0.5, 0.0) } else { c(0.0, 0.0) }
            })
            .collect();
        let out = dis.mul_vec(eye_vec.view());
        assert!(out.iter().all(|v| v.norm() < 1e-14));
    }
}
