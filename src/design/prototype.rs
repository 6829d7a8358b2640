//! Analog low-pass prototypes
//!
//! Each prototype is a normalized (1 rad/s) analog low-pass filter expressed as
//! zeros, poles and gain. Frequency transforms in [`super::transform`] turn
//! them into the requested band shape.

use std::f64::consts::PI;

use num_complex::Complex64;

use super::Zpk;

/// Maximum Durand-Kerner iterations when solving for Bessel poles
const MAX_ROOT_ITERATIONS: usize = 500;

/// Convergence threshold for the root finder
const ROOT_TOLERANCE: f64 = 1e-14;

/// Imaginary parts below this (relative) are treated as zero
const REAL_TOLERANCE: f64 = 1e-9;

/// `-N+1, -N+3, ..., N-1`
fn symmetric_indices(order: usize) -> impl Iterator<Item = f64> {
    let n = order as f64;
    (0..order).map(move |k| -n + 1.0 + 2.0 * k as f64)
}

/// Product of `-x` over all roots
fn neg_product(roots: &[Complex64]) -> Complex64 {
    roots
        .iter()
        .fold(Complex64::new(1.0, 0.0), |acc, &r| acc * -r)
}

/// Butterworth: poles evenly spaced on the left half of the unit circle
pub fn butterworth(order: usize) -> Zpk {
    let n = order as f64;
    let poles = symmetric_indices(order)
        .map(|m| -Complex64::from_polar(1.0, PI * m / (2.0 * n)))
        .collect();

    Zpk {
        zeros: Vec::new(),
        poles,
        gain: 1.0,
    }
}

/// Chebyshev type I: equiripple pass band with `ripple_db` peak-to-peak ripple
pub fn chebyshev1(order: usize, ripple_db: f64) -> Zpk {
    let n = order as f64;
    let eps = (10f64.powf(0.1 * ripple_db) - 1.0).sqrt();
    let mu = (1.0 / eps).asinh() / n;

    let poles: Vec<Complex64> = symmetric_indices(order)
        .map(|m| -Complex64::new(mu, PI * m / (2.0 * n)).sinh())
        .collect();

    let mut gain = neg_product(&poles).re;
    if order % 2 == 0 {
        gain /= (1.0 + eps * eps).sqrt();
    }

    Zpk {
        zeros: Vec::new(),
        poles,
        gain,
    }
}

/// Chebyshev type II: flat pass band, equiripple stop band `stopband_db` down
pub fn chebyshev2(order: usize, stopband_db: f64) -> Zpk {
    let n = order as f64;
    let de = 1.0 / (10f64.powf(0.1 * stopband_db) - 1.0).sqrt();
    let mu = (1.0 / de).asinh() / n;

    // Odd orders have one zero at infinity, which drops out of the list
    let zeros: Vec<Complex64> = symmetric_indices(order)
        .filter(|m| *m != 0.0)
        .map(|m| Complex64::new(0.0, 1.0 / (m * PI / (2.0 * n)).sin()))
        .collect();

    let poles: Vec<Complex64> = symmetric_indices(order)
        .map(|m| {
            let base = -Complex64::from_polar(1.0, PI * m / (2.0 * n));
            let warped = Complex64::new(mu.sinh() * base.re, mu.cosh() * base.im);
            warped.inv()
        })
        .collect();

    let gain = (neg_product(&poles) / neg_product(&zeros)).re;

    Zpk { zeros, poles, gain }
}

/// Bessel: maximally flat group delay, phase-normalized like Butterworth
///
/// The poles are the roots of the reverse Bessel polynomial rescaled so the
/// constant term is one, which gives unity DC gain with `gain = 1`.
pub fn bessel(order: usize) -> Zpk {
    let coeffs = reverse_bessel_coefficients(order);
    let scale = coeffs[0].powf(1.0 / order as f64);

    // q(t) = theta(scale * t) / scale^N, monic
    let normalized: Vec<f64> = coeffs
        .iter()
        .enumerate()
        .map(|(k, a)| a * scale.powi(k as i32 - order as i32))
        .collect();

    let poles = conjugate_symmetric(durand_kerner(&normalized));

    Zpk {
        zeros: Vec::new(),
        poles,
        gain: 1.0,
    }
}

/// `a_k = (2N - k)! / (2^(N - k) k! (N - k)!)`, lowest power first
fn reverse_bessel_coefficients(order: usize) -> Vec<f64> {
    let factorial = |n: usize| (1..=n).fold(1.0f64, |acc, i| acc * i as f64);
    (0..=order)
        .map(|k| {
            factorial(2 * order - k)
                / (2f64.powi((order - k) as i32) * factorial(k) * factorial(order - k))
        })
        .collect()
}

fn eval_poly(coeffs: &[f64], x: Complex64) -> Complex64 {
    coeffs
        .iter()
        .rev()
        .fold(Complex64::new(0.0, 0.0), |acc, &c| acc * x + c)
}

/// Simultaneous root finding for a monic polynomial (lowest power first)
fn durand_kerner(coeffs: &[f64]) -> Vec<Complex64> {
    let degree = coeffs.len() - 1;
    let seed = Complex64::new(0.4, 0.9);
    let mut roots: Vec<Complex64> = (0..degree).map(|i| seed.powu(i as u32)).collect();

    for _ in 0..MAX_ROOT_ITERATIONS {
        let mut max_step = 0.0f64;
        for i in 0..degree {
            let denom = (0..degree)
                .filter(|&j| j != i)
                .fold(Complex64::new(1.0, 0.0), |acc, j| acc * (roots[i] - roots[j]));
            let step = eval_poly(coeffs, roots[i]) / denom;
            roots[i] -= step;
            max_step = max_step.max(step.norm());
        }
        if max_step < ROOT_TOLERANCE {
            break;
        }
    }

    roots
}

/// Snap near-real roots onto the real axis and rebuild exact conjugate pairs
fn conjugate_symmetric(roots: Vec<Complex64>) -> Vec<Complex64> {
    let is_real = |r: &Complex64| r.im.abs() <= REAL_TOLERANCE * r.norm().max(1.0);

    let mut out: Vec<Complex64> = roots
        .iter()
        .filter(|r| is_real(r))
        .map(|r| Complex64::new(r.re, 0.0))
        .collect();
    for r in roots.iter().filter(|r| !is_real(r) && r.im > 0.0) {
        out.push(*r);
        out.push(r.conj());
    }

    if out.len() == roots.len() {
        out
    } else {
        roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_butterworth_poles_on_unit_circle() {
        let zpk = butterworth(5);
        assert_eq!(zpk.poles.len(), 5);
        for p in &zpk.poles {
            assert_abs_diff_eq!(p.norm(), 1.0, epsilon = 1e-12);
            assert!(p.re < 0.0);
        }
    }

    #[test]
    fn test_chebyshev1_even_order_gain() {
        // |H(0)| equals the bottom of the ripple band for even orders
        let zpk = chebyshev1(4, 1.0);
        let dc = zpk.gain / neg_product(&zpk.poles).re;
        assert_abs_diff_eq!(dc, 10f64.powf(-1.0 / 20.0), epsilon = 1e-9);
    }

    #[test]
    fn test_chebyshev2_zero_count() {
        assert_eq!(chebyshev2(4, 40.0).zeros.len(), 4);
        assert_eq!(chebyshev2(5, 40.0).zeros.len(), 4);
        for z in chebyshev2(5, 40.0).zeros {
            assert_abs_diff_eq!(z.re, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_bessel_coefficients() {
        // theta_3(s) = s^3 + 6s^2 + 15s + 15
        let coeffs = reverse_bessel_coefficients(3);
        assert_eq!(coeffs, vec![15.0, 15.0, 6.0, 1.0]);
    }

    #[test]
    fn test_bessel_poles_stable_with_unity_dc() {
        for order in 1..=10 {
            let zpk = bessel(order);
            assert_eq!(zpk.poles.len(), order);
            for p in &zpk.poles {
                assert!(p.re < 0.0, "order {} pole {} not stable", order, p);
            }
            let dc = neg_product(&zpk.poles);
            assert_abs_diff_eq!(dc.re, 1.0, epsilon = 1e-6);
        }
    }
}
