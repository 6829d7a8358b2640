//! Frequency transforms, bilinear mapping and section pairing
//!
//! All transforms operate on [`Zpk`] form. Analog frequencies are in rad/s.

use num_complex::Complex64;

use super::{BiquadCoeffs, Zpk};

/// Imaginary parts below this (relative) are treated as zero when pairing
const PAIR_TOLERANCE: f64 = 1e-9;

/// `prod f(z) / prod f(p)`, accumulated one quotient at a time
///
/// Neither product is formed on its own, so 32-root band designs stay
/// inside `f64` range.
fn root_ratio(
    zeros: &[Complex64],
    poles: &[Complex64],
    f: impl Fn(Complex64) -> Complex64,
) -> Complex64 {
    let paired = zeros.len().min(poles.len());
    let mut ratio = zeros
        .iter()
        .zip(poles)
        .fold(Complex64::new(1.0, 0.0), |acc, (&z, &p)| acc * f(z) / f(p));
    for &z in &zeros[paired..] {
        ratio *= f(z);
    }
    for &p in &poles[paired..] {
        ratio /= f(p);
    }
    ratio
}

/// Number of zeros at infinity
fn relative_degree(zpk: &Zpk) -> usize {
    zpk.poles.len().saturating_sub(zpk.zeros.len())
}

/// Pre-warp a digital frequency (Hz) for the bilinear transform
pub fn prewarp(freq: f64, sample_rate: f64) -> f64 {
    2.0 * sample_rate * (std::f64::consts::PI * freq / sample_rate).tan()
}

/// Low-pass prototype to low-pass with cutoff `wo`
pub fn lowpass(zpk: Zpk, wo: f64) -> Zpk {
    let degree = relative_degree(&zpk);
    Zpk {
        zeros: zpk.zeros.iter().map(|&z| z * wo).collect(),
        poles: zpk.poles.iter().map(|&p| p * wo).collect(),
        gain: zpk.gain * wo.powi(degree as i32),
    }
}

/// Low-pass prototype to high-pass with cutoff `wo`
pub fn highpass(zpk: Zpk, wo: f64) -> Zpk {
    let degree = relative_degree(&zpk);
    let ratio = root_ratio(&zpk.zeros, &zpk.poles, |r| -r);

    let mut zeros: Vec<Complex64> = zpk.zeros.iter().map(|&z| wo / z).collect();
    zeros.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));

    Zpk {
        zeros,
        poles: zpk.poles.iter().map(|&p| wo / p).collect(),
        gain: zpk.gain * ratio.re,
    }
}

/// Split each root `r` into `r ± sqrt(r^2 - wo^2)`
fn split_band(roots: &[Complex64], wo: f64) -> Vec<Complex64> {
    let wo2 = Complex64::new(wo * wo, 0.0);
    let mut out = Vec::with_capacity(roots.len() * 2);
    for &r in roots {
        out.push(r + (r * r - wo2).sqrt());
    }
    for &r in roots {
        out.push(r - (r * r - wo2).sqrt());
    }
    out
}

/// Low-pass prototype to band-pass centered on `wo` with bandwidth `bw`
pub fn bandpass(zpk: Zpk, wo: f64, bw: f64) -> Zpk {
    let degree = relative_degree(&zpk);

    let zeros_lp: Vec<Complex64> = zpk.zeros.iter().map(|&z| z * bw / 2.0).collect();
    let poles_lp: Vec<Complex64> = zpk.poles.iter().map(|&p| p * bw / 2.0).collect();

    let mut zeros = split_band(&zeros_lp, wo);
    zeros.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));

    Zpk {
        zeros,
        poles: split_band(&poles_lp, wo),
        gain: zpk.gain * bw.powi(degree as i32),
    }
}

/// Low-pass prototype to band-stop centered on `wo` with bandwidth `bw`
pub fn bandstop(zpk: Zpk, wo: f64, bw: f64) -> Zpk {
    let degree = relative_degree(&zpk);
    let ratio = root_ratio(&zpk.zeros, &zpk.poles, |r| -r);

    let zeros_hp: Vec<Complex64> = zpk.zeros.iter().map(|&z| (bw / 2.0) / z).collect();
    let poles_hp: Vec<Complex64> = zpk.poles.iter().map(|&p| (bw / 2.0) / p).collect();

    let mut zeros = split_band(&zeros_hp, wo);
    zeros.extend(std::iter::repeat(Complex64::new(0.0, wo)).take(degree));
    zeros.extend(std::iter::repeat(Complex64::new(0.0, -wo)).take(degree));

    Zpk {
        zeros,
        poles: split_band(&poles_hp, wo),
        gain: zpk.gain * ratio.re,
    }
}

/// Map an analog filter into the z-plane
pub fn bilinear(zpk: Zpk, sample_rate: f64) -> Zpk {
    let degree = relative_degree(&zpk);
    let fs2 = Complex64::new(2.0 * sample_rate, 0.0);

    let mut zeros: Vec<Complex64> = zpk.zeros.iter().map(|&z| (fs2 + z) / (fs2 - z)).collect();
    zeros.extend(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(degree));

    let ratio = root_ratio(&zpk.zeros, &zpk.poles, |r| fs2 - r);

    Zpk {
        zeros,
        poles: zpk.poles.iter().map(|&p| (fs2 + p) / (fs2 - p)).collect(),
        gain: zpk.gain * ratio.re,
    }
}

// ============================================================================
// Second-order sections
// ============================================================================

/// One or two roots that become the numerator or denominator of a section
#[derive(Debug, Clone, Copy)]
enum RootGroup {
    Pair(Complex64, Complex64),
    Single(f64),
}

impl RootGroup {
    /// Representative root used for nearest-neighbour matching
    fn anchor(&self) -> Complex64 {
        match *self {
            RootGroup::Pair(a, _) => a,
            RootGroup::Single(r) => Complex64::new(r, 0.0),
        }
    }

    /// `[c1, c2]` of `1 + c1 z^-1 + c2 z^-2`
    fn polynomial(&self) -> [f64; 2] {
        match *self {
            RootGroup::Pair(a, b) => [-(a + b).re, (a * b).re],
            RootGroup::Single(r) => [-r, 0.0],
        }
    }
}

/// Gather roots into conjugate pairs, then real pairs, then at most one single
fn group_roots(roots: &[Complex64]) -> Vec<RootGroup> {
    let is_real = |r: &Complex64| r.im.abs() <= PAIR_TOLERANCE * r.norm().max(1.0);

    let mut groups: Vec<RootGroup> = roots
        .iter()
        .filter(|r| !is_real(r) && r.im > 0.0)
        .map(|r| RootGroup::Pair(*r, r.conj()))
        .collect();

    let mut reals: Vec<f64> = roots.iter().filter(|r| is_real(r)).map(|r| r.re).collect();
    reals.sort_by(|a, b| a.total_cmp(b));
    let mut chunks = reals.chunks_exact(2);
    for pair in chunks.by_ref() {
        groups.push(RootGroup::Pair(
            Complex64::new(pair[0], 0.0),
            Complex64::new(pair[1], 0.0),
        ));
    }
    if let [single] = chunks.remainder() {
        groups.push(RootGroup::Single(*single));
    }

    groups
}

/// Pair poles with their nearest zeros and emit normalized biquad sections
///
/// Poles closest to the unit circle are matched first. The overall gain is
/// folded into the first section.
pub fn to_sections(zpk: &Zpk) -> Vec<BiquadCoeffs> {
    let mut pole_groups = group_roots(&zpk.poles);
    let mut zero_groups = group_roots(&zpk.zeros);

    let circle_distance = |g: &RootGroup| (1.0 - g.anchor().norm()).abs();
    pole_groups.sort_by(|a, b| circle_distance(a).total_cmp(&circle_distance(b)));

    let mut sections = Vec::with_capacity(pole_groups.len());
    for poles in &pole_groups {
        let numerator = if zero_groups.is_empty() {
            [0.0, 0.0]
        } else {
            let anchor = poles.anchor();
            let nearest = zero_groups
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    (a.anchor() - anchor)
                        .norm()
                        .total_cmp(&(b.anchor() - anchor).norm())
                })
                .map(|(i, _)| i)
                .unwrap_or(0);
            zero_groups.swap_remove(nearest).polynomial()
        };
        let denominator = poles.polynomial();

        sections.push(BiquadCoeffs {
            b0: 1.0,
            b1: numerator[0],
            b2: numerator[1],
            a1: denominator[0],
            a2: denominator[1],
        });
    }

    if let Some(first) = sections.first_mut() {
        first.b0 *= zpk.gain;
        first.b1 *= zpk.gain;
        first.b2 *= zpk.gain;
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_prewarp_is_near_identity_at_low_frequency() {
        let w = prewarp(10.0, 48000.0);
        assert_abs_diff_eq!(w, 2.0 * std::f64::consts::PI * 10.0, epsilon = 1e-3);
    }

    #[test]
    fn test_highpass_adds_zeros_at_origin() {
        let proto = Zpk {
            zeros: Vec::new(),
            poles: vec![Complex64::new(-1.0, 0.0)],
            gain: 1.0,
        };
        let hp = highpass(proto, 10.0);
        assert_eq!(hp.zeros.len(), 1);
        assert_abs_diff_eq!(hp.zeros[0].norm(), 0.0);
        assert_abs_diff_eq!(hp.poles[0].re, -10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_bilinear_keeps_root_counts_equal() {
        let proto = Zpk {
            zeros: Vec::new(),
            poles: vec![Complex64::new(-1.0, 1.0), Complex64::new(-1.0, -1.0)],
            gain: 2.0,
        };
        let digital = bilinear(proto, 8.0);
        assert_eq!(digital.zeros.len(), digital.poles.len());
        for z in &digital.zeros {
            assert_abs_diff_eq!(z.re, -1.0);
        }
        for p in &digital.poles {
            assert!(p.norm() < 1.0);
        }
    }

    #[test]
    fn test_bilinear_gain_stays_finite_with_many_poles() {
        // 32 poles far from the origin overflow a plain product of (fs2 - p)
        let proto = Zpk {
            zeros: vec![Complex64::new(0.0, 0.0); 16],
            poles: vec![Complex64::new(-2.0e4, 0.0); 32],
            gain: 1.0e40,
        };
        let digital = bilinear(proto, 48000.0);
        assert!(digital.gain.is_finite());
        assert!(digital.gain > 0.0);
    }

    #[test]
    fn test_root_ratio_handles_unequal_counts() {
        let zeros = vec![Complex64::new(2.0, 0.0)];
        let poles = vec![Complex64::new(4.0, 0.0), Complex64::new(5.0, 0.0)];
        let ratio = root_ratio(&zeros, &poles, |r| r);
        assert_abs_diff_eq!(ratio.re, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(ratio.im, 0.0);
    }

    #[test]
    fn test_group_roots_pairs_conjugates_and_reals() {
        let roots = vec![
            Complex64::new(0.5, 0.5),
            Complex64::new(0.5, -0.5),
            Complex64::new(0.1, 0.0),
            Complex64::new(0.2, 0.0),
            Complex64::new(0.3, 0.0),
        ];
        let groups = group_roots(&roots);
        assert_eq!(groups.len(), 3);
        assert!(matches!(groups[2], RootGroup::Single(_)));
    }

    #[test]
    fn test_to_sections_folds_gain_into_first() {
        let zpk = Zpk {
            zeros: vec![Complex64::new(-1.0, 0.0); 4],
            poles: vec![
                Complex64::new(0.5, 0.3),
                Complex64::new(0.5, -0.3),
                Complex64::new(0.4, 0.1),
                Complex64::new(0.4, -0.1),
            ],
            gain: 0.25,
        };
        let sections = to_sections(&zpk);
        assert_eq!(sections.len(), 2);
        assert_abs_diff_eq!(sections[0].b0, 0.25);
        assert_abs_diff_eq!(sections[1].b0, 1.0);
        assert_abs_diff_eq!(sections[1].b1, 2.0);
        assert_abs_diff_eq!(sections[1].b2, 1.0);
    }
}
