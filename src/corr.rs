//! Exponential expansions of standard bath correlation functions.
//!
//! These generators sit outside the core data flow: each returns a plain
//! `(eta, gamma)` coefficient table for `C(t) = sum_k eta_k exp(-gamma_k t)`
//! that is then fed to [`BosonBath::new`][crate::bath::BosonBath::new] or
//! [`FermionBath::new`][crate::bath::FermionBath::new]. Matsubara expansions
//! place poles at the exact thermal frequencies; the Pade variants use the
//! [N-1/N] spectrum decomposition, whose poles and residues come out of a
//! pair of symmetric tridiagonal eigenproblems.

use std::f64::consts::PI;
use ndarray::{ self as nd };
use ndarray_linalg::{ Eigh, UPLO };
use num_complex::Complex64 as C64;

fn cot(x: f64) -> f64 { x.cos() / x.sin() }

/// Drude-Lorentz spectral density with a Matsubara expansion.
///
/// `lambda` is the coupling strength, `w` the cutoff frequency, `kt` the
/// temperature, and `nk` the number of Matsubara terms kept beyond the
/// Drude pole. Returns `nk + 1` coefficients.
pub fn drude_lorentz_matsubara(lambda: f64, w: f64, kt: f64, nk: usize)
    -> (Vec<C64>, Vec<C64>)
{
    let beta = kt.recip();
    let mut eta: Vec<C64> = Vec::with_capacity(nk + 1);
    let mut gamma: Vec<C64> = Vec::with_capacity(nk + 1);
    eta.push(C64::new(lambda * w * cot(beta * w / 2.0), -lambda * w));
    gamma.push(C64::from(w));
    for k in 1..=nk {
        let nu = 2.0 * PI * (k as f64) / beta;
        eta.push(C64::from(4.0 * lambda * w * kt * nu / (nu * nu - w * w)));
        gamma.push(C64::from(nu));
    }
    (eta, gamma)
}

/// Drude-Lorentz spectral density with an [N-1/N] Pade expansion.
///
/// Arguments as in [`drude_lorentz_matsubara`]; the `nk` thermal poles are
/// the Pade poles of the Bose function rather than the Matsubara
/// frequencies. Returns `nk + 1` coefficients.
pub fn drude_lorentz_pade(lambda: f64, w: f64, kt: f64, nk: usize)
    -> (Vec<C64>, Vec<C64>)
{
    let beta = kt.recip();
    let (kappa, epsilon) = pade_kappa_epsilon(nk, Statistics::Boson);
    let mut eta: Vec<C64> = Vec::with_capacity(nk + 1);
    let mut gamma: Vec<C64> = Vec::with_capacity(nk + 1);
    eta.push(C64::new(lambda * w * cot(beta * w / 2.0), -lambda * w));
    gamma.push(C64::from(w));
    for ll in 1..=nk {
        let nu = epsilon[ll] / beta;
        eta.push(C64::from(
            (kappa[ll] / beta) * 4.0 * lambda * w * nu / (nu * nu - w * w)
        ));
        gamma.push(C64::from(nu));
    }
    (eta, gamma)
}

/// Underdamped Brownian-oscillator spectral density with a Matsubara
/// expansion.
///
/// `lambda` is the coupling strength, `w0` the resonance frequency, `gamma`
/// the oscillator damping, `kt` the temperature, and `nk` the number of
/// Matsubara terms beyond the two resonance poles. Returns `nk + 2`
/// coefficients.
pub fn underdamped_matsubara(
    lambda: f64,
    w0: f64,
    gamma: f64,
    kt: f64,
    nk: usize,
) -> (Vec<C64>, Vec<C64>)
{
    let beta = kt.recip();
    let Om = (w0 * w0 - gamma * gamma / 4.0).sqrt();
    let Gam = gamma / 2.0;
    let pm = C64::new(Om, Gam);
    let mm = C64::new(Om, -Gam);
    let amp = lambda * lambda / (4.0 * Om);
    let mut eta: Vec<C64> = Vec::with_capacity(nk + 2);
    let mut freq: Vec<C64> = Vec::with_capacity(nk + 2);
    eta.push(amp * ((beta / 2.0 * pm).tanh().inv() + 1.0));
    freq.push(C64::new(Gam, -Om));
    eta.push(amp * ((beta / 2.0 * mm).tanh().inv() - 1.0));
    freq.push(C64::new(Gam, Om));
    for k in 1..=nk {
        let nu = 2.0 * PI * (k as f64) / beta;
        let denom = (pm * pm + nu * nu) * (mm * mm + nu * nu);
        eta.push(-2.0 * lambda * lambda * gamma / beta * nu / denom);
        freq.push(C64::from(nu));
    }
    (eta, freq)
}

/// Fermionic Lorentz spectral density with a Matsubara expansion.
///
/// `gamma` is the coupling strength, `mu` the chemical potential, `w` the
/// cutoff width, `kt` the temperature, and `nk` the number of Matsubara
/// terms. Returns `(eta_absorb, gamma_absorb, eta_emit, gamma_emit)` tables
/// of `nk + 1` coefficients each.
pub fn lorentz_matsubara(gamma: f64, mu: f64, w: f64, kt: f64, nk: usize)
    -> (Vec<C64>, Vec<C64>, Vec<C64>, Vec<C64>)
{
    let beta = kt.recip();
    let mut tables: Vec<(Vec<C64>, Vec<C64>)> = Vec::with_capacity(2);
    for sigma in [1.0, -1.0] {
        let mut eta: Vec<C64> = Vec::with_capacity(nk + 1);
        let mut freq: Vec<C64> = Vec::with_capacity(nk + 1);
        let x0 = C64::new(0.0, sigma * beta * w);
        eta.push(0.5 * gamma * w * fermi(x0));
        freq.push(C64::new(w, -sigma * mu));
        for ll in 1..=nk {
            let nu = (2.0 * (ll as f64) - 1.0) * PI / beta;
            eta.push(C64::new(
                0.0,
                -gamma * w * w / beta / (w * w - nu * nu),
            ));
            freq.push(C64::new(nu, -sigma * mu));
        }
        tables.push((eta, freq));
    }
    let (ee, ge) = tables.pop().unwrap();
    let (ea, ga) = tables.pop().unwrap();
    (ea, ga, ee, ge)
}

/// Fermionic Lorentz spectral density with an [N-1/N] Pade expansion.
///
/// Arguments and return as in [`lorentz_matsubara`], with the Fermi-function
/// Pade poles replacing the Matsubara frequencies.
pub fn lorentz_pade(gamma: f64, mu: f64, w: f64, kt: f64, nk: usize)
    -> (Vec<C64>, Vec<C64>, Vec<C64>, Vec<C64>)
{
    let beta = kt.recip();
    let (kappa, epsilon) = pade_kappa_epsilon(nk, Statistics::Fermion);
    let mut tables: Vec<(Vec<C64>, Vec<C64>)> = Vec::with_capacity(2);
    for sigma in [1.0, -1.0] {
        let mut eta: Vec<C64> = Vec::with_capacity(nk + 1);
        let mut freq: Vec<C64> = Vec::with_capacity(nk + 1);
        let x0 = C64::new(0.0, sigma * beta * w);
        eta.push(0.5 * gamma * w * fermi_pade(x0, &kappa, &epsilon));
        freq.push(C64::new(w, -sigma * mu));
        for ll in 1..=nk {
            let nu = epsilon[ll] / beta;
            eta.push(C64::new(
                0.0,
                -kappa[ll] * gamma * w * w / beta / (w * w - nu * nu),
            ));
            freq.push(C64::new(nu, -sigma * mu));
        }
        tables.push((eta, freq));
    }
    let (ee, ge) = tables.pop().unwrap();
    let (ea, ga) = tables.pop().unwrap();
    (ea, ga, ee, ge)
}

fn fermi(x: C64) -> C64 { (x.exp() + 1.0).inv() }

fn fermi_pade(x: C64, kappa: &[f64], epsilon: &[f64]) -> C64 {
    let mut f = C64::from(0.5);
    for ll in 1..kappa.len() {
        f -= 2.0 * kappa[ll] * x / (x * x + epsilon[ll] * epsilon[ll]);
    }
    f
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Statistics {
    Boson,
    Fermion,
}

impl Statistics {
    /// Tridiagonal weights of the thermal-function continued fraction.
    fn b(&self, m: usize) -> f64 {
        match *self {
            Self::Boson => (2 * m + 1) as f64,
            Self::Fermion => (2 * m - 1) as f64,
        }
    }

    /// Residue prefactor of the [N-1/N] decomposition.
    fn residue_prefactor(&self, nk: usize) -> f64 {
        let n = nk as f64;
        match *self {
            Self::Boson => 0.5 * n * (2.0 * n + 3.0),
            Self::Fermion => 0.5 * n * (2.0 * n + 1.0),
        }
    }
}

// eigenvalues of the symmetric tridiagonal matrix with off-diagonal entries
// 1/sqrt(b(m + off) b(m + 1 + off)); the negative half maps to the poles
fn pade_poles(count: usize, size: usize, off: usize, stat: Statistics)
    -> Vec<f64>
{
    let mut lambda: nd::Array2<f64> = nd::Array2::zeros((size, size));
    for m in 1..size {
        let v = (stat.b(m + off) * stat.b(m + 1 + off)).sqrt().recip();
        lambda[[m - 1, m]] = v;
        lambda[[m, m - 1]] = v;
    }
    let (evals, _) = lambda.eigh(UPLO::Lower)
        .expect("pade_poles: error diagonalizing");
    evals.iter().take(count).map(|ev| -2.0 / *ev).collect()
}

// residues kappa[1..=nk] and poles epsilon[1..=nk] of the [N-1/N]
// decomposition, both with a zero sentinel at index 0
fn pade_kappa_epsilon(nk: usize, stat: Statistics) -> (Vec<f64>, Vec<f64>) {
    if nk == 0 { return (vec![0.0], vec![0.0]); }
    let eps = pade_poles(nk, 2 * nk, 0, stat);
    let chi = pade_poles(nk - 1, (2 * nk).saturating_sub(1), 1, stat);
    let prefactor = stat.residue_prefactor(nk);
    let delta = |a: usize, b: usize| if a == b { 1.0 } else { 0.0 };
    let mut kappa: Vec<f64> = vec![0.0];
    for j in 0..nk {
        let mut term = prefactor;
        for k in 0..nk - 1 {
            term *= (chi[k].powi(2) - eps[j].powi(2))
                / (eps[k].powi(2) - eps[j].powi(2) + delta(j, k));
        }
        term /= eps[nk - 1].powi(2) - eps[j].powi(2) + delta(j, nk - 1);
        kappa.push(term);
    }
    let mut epsilon: Vec<f64> = vec![0.0];
    epsilon.extend(eps);
    (kappa, epsilon)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pade_poles_approach_matsubara() {
        // the lowest Pade pole of the Bose function reproduces the first
        // Matsubara frequency; the highest overshoots it
        let (kappa, epsilon) = pade_kappa_epsilon(4, Statistics::Boson);
        assert_eq!(kappa.len(), 5);
        assert_eq!(epsilon.len(), 5);
        assert!((epsilon[1] - 2.0 * PI).abs() < 0.05);
        assert!((kappa[1] - 1.0).abs() < 0.05);
        assert!(epsilon[4] > 2.0 * PI * 4.0);
    }

    #[test]
    fn fermi_pade_matches_fermi_function() {
        let (kappa, epsilon) = pade_kappa_epsilon(5, Statistics::Fermion);
        for x in [0.1, 0.5, 1.0, -0.7] {
            let exact = fermi(C64::from(x));
            let approx = fermi_pade(C64::from(x), &kappa, &epsilon);
            assert!((exact - approx).norm() < 1e-8);
        }
    }

    #[test]
    fn drude_lorentz_tables_have_expected_shape() {
        let (eta, gamma) = drude_lorentz_pade(0.1450, 0.6464, 0.7414, 5);
        assert_eq!(eta.len(), 6);
        assert_eq!(gamma.len(), 6);
        // the Drude pole carries the full imaginary part
        assert!((eta[0].im + 0.1450 * 0.6464).abs() < 1e-12);
        assert!(eta.iter().skip(1).all(|e| e.im == 0.0));
        assert!(gamma.iter().all(|g| g.im == 0.0 && g.re > 0.0));
    }

    #[test]
    fn matsubara_frequencies_are_thermal() {
        let kt = 0.5;
        let (_, gamma) = drude_lorentz_matsubara(0.1, 1.0, kt, 3);
        for (k, g) in gamma.iter().enumerate().skip(1) {
            assert!((g.re - 2.0 * PI * (k as f64) * kt).abs() < 1e-12);
        }
    }

    #[test]
    fn underdamped_resonance_pair_is_conjugate() {
        let (eta, gamma) = underdamped_matsubara(0.2, 1.0, 0.1, 0.5, 2);
        assert_eq!(eta.len(), 4);
        assert_eq!(gamma[0], gamma[1].conj());
        // Matsubara tail is purely real
        assert!(eta.iter().skip(2).all(|e| e.im.abs() < 1e-15));
    }

    #[test]
    fn lorentz_tables_pair_absorb_emit() {
        let (ea, ga, ee, ge) = lorentz_pade(1.0, 0.5, 2.0, 0.5, 3);
        assert_eq!(ea.len(), 4);
        assert_eq!(ee.len(), 4);
        // frequencies differ only in the chemical-potential rotation
        for (a, e) in ga.iter().zip(&ge) {
            assert!((a.re - e.re).abs() < 1e-12);
            assert!((a.im + e.im).abs() < 1e-12);
        }
        // absorb/emit leading coefficients are complex conjugates
        assert!((ea[0] - ee[0].conj()).norm() < 1e-12);
    }
}
