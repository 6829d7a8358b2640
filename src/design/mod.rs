//! IIR Filter Design
//!
//! Classic analog prototypes (Butterworth, Chebyshev I/II, Bessel) mapped to
//! digital biquad cascades through pre-warped frequency transforms and the
//! bilinear transform.
//!
//! ```text
//! prototype (zpk, 1 rad/s) -> lp/hp/bp/bs transform -> bilinear -> sections
//! ```

pub mod prototype;
pub mod transform;

use std::f64::consts::PI;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{RackError, Result};

/// Highest supported prototype order
pub const MAX_ORDER: usize = 16;

/// Pass-band ripple used when a Chebyshev I design is given none
pub const DEFAULT_PASSBAND_RIPPLE_DB: f64 = 1.0;

/// Stop-band attenuation used when a Chebyshev II design is given none
pub const DEFAULT_STOPBAND_ATTENUATION_DB: f64 = 40.0;

// ============================================================================
// Design Inputs
// ============================================================================

/// Zeros, poles and gain of a transfer function
#[derive(Debug, Clone, PartialEq)]
pub struct Zpk {
    pub zeros: Vec<Complex64>,
    pub poles: Vec<Complex64>,
    pub gain: f64,
}

/// Analog prototype family together with its shape parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prototype {
    Butterworth,
    Bessel,
    /// Pass-band ripple in dB
    ChebyshevI { ripple_db: f64 },
    /// Stop-band attenuation in dB
    ChebyshevII { attenuation_db: f64 },
}

impl Prototype {
    fn analog(&self, order: usize) -> Zpk {
        match *self {
            Prototype::Butterworth => prototype::butterworth(order),
            Prototype::Bessel => prototype::bessel(order),
            Prototype::ChebyshevI { ripple_db } => {
                let ripple = if ripple_db > 0.0 {
                    ripple_db
                } else {
                    DEFAULT_PASSBAND_RIPPLE_DB
                };
                prototype::chebyshev1(order, ripple)
            }
            Prototype::ChebyshevII { attenuation_db } => {
                let attenuation = if attenuation_db > 0.0 {
                    attenuation_db
                } else {
                    DEFAULT_STOPBAND_ATTENUATION_DB
                };
                prototype::chebyshev2(order, attenuation)
            }
        }
    }
}

/// Digital band layout, frequencies in Hz
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Band {
    Lowpass { cutoff: f64 },
    Highpass { cutoff: f64 },
    Bandpass { center: f64, width: f64 },
    Bandstop { center: f64, width: f64 },
}

impl Band {
    /// Check every edge frequency lies strictly inside `(0, nyquist)`
    pub fn validate(&self, sample_rate: f64) -> Result<()> {
        let nyquist = sample_rate / 2.0;
        let expected = format!("0 < f < {} Hz", nyquist);
        let check = |name: &str, f: f64| {
            if f.is_finite() && f > 0.0 && f < nyquist {
                Ok(())
            } else {
                Err(RackError::invalid_parameter(name, f, expected.clone()))
            }
        };

        match *self {
            Band::Lowpass { cutoff } | Band::Highpass { cutoff } => check("cutoff", cutoff),
            Band::Bandpass { center, width } | Band::Bandstop { center, width } => {
                check("center", center)?;
                if !(width.is_finite() && width > 0.0) {
                    return Err(RackError::invalid_parameter("width", width, "width > 0"));
                }
                check("low band edge", center - width / 2.0)?;
                check("high band edge", center + width / 2.0)
            }
        }
    }
}

// ============================================================================
// Biquad Sections
// ============================================================================

/// Normalized biquad coefficients
/// H(z) = (b0 + b1*z^-1 + b2*z^-2) / (1 + a1*z^-1 + a2*z^-2)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::identity()
    }
}

impl BiquadCoeffs {
    /// Pass-through section
    pub fn identity() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    fn normalized(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Audio EQ Cookbook low shelf; `a` is the linear shelf amplitude
    pub fn low_shelf(sample_rate: f64, freq: f64, a: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * freq / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * sin_w0 / (2.0 * q);

        Self::normalized(
            a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
            a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
            (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
            -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
            (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
        )
    }

    /// Audio EQ Cookbook high shelf
    pub fn high_shelf(sample_rate: f64, freq: f64, a: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * freq / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * sin_w0 / (2.0 * q);

        Self::normalized(
            a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
            a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
            (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
            2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
            (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
        )
    }

    /// Audio EQ Cookbook peaking (constant-Q) band
    pub fn peaking(sample_rate: f64, freq: f64, a: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * freq / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);

        Self::normalized(
            1.0 + alpha * a,
            -2.0 * cos_w0,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos_w0,
            1.0 - alpha / a,
        )
    }

    /// Complex response at normalized angular frequency `w` (rad/sample)
    pub fn response(&self, w: f64) -> Complex64 {
        let z1 = Complex64::from_polar(1.0, -w);
        let z2 = z1 * z1;
        let num = self.b0 + z1 * self.b1 + z2 * self.b2;
        let den = 1.0 + z1 * self.a1 + z2 * self.a2;
        num / den
    }
}

/// Transposed direct form II history for one section
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BiquadState {
    s1: f64,
    s2: f64,
}

impl BiquadState {
    /// Process a single sample
    #[inline]
    pub fn process(&mut self, input: f64, c: &BiquadCoeffs) -> f64 {
        let output = c.b0 * input + self.s1;
        self.s1 = c.b1 * input - c.a1 * output + self.s2;
        self.s2 = c.b2 * input - c.a2 * output;
        output
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Cascade
// ============================================================================

/// Series of biquad sections with their per-sample history
///
/// An empty cascade is the identity.
#[derive(Debug, Clone, Default)]
pub struct Cascade {
    sections: Vec<BiquadCoeffs>,
    states: Vec<BiquadState>,
}

impl Cascade {
    /// Build a cascade directly from coefficients, with cleared history
    pub fn from_sections(sections: Vec<BiquadCoeffs>) -> Self {
        let states = vec![BiquadState::default(); sections.len()];
        Self { sections, states }
    }

    /// Design a digital filter
    ///
    /// # Arguments
    /// * `prototype` - Analog family and its ripple/attenuation
    /// * `band` - Band layout in Hz
    /// * `order` - Prototype order (1..=16); band-pass and band-stop double it
    /// * `sample_rate` - Sample rate in Hz
    ///
    /// # Errors
    /// `InvalidFilter` for an order or sample rate out of range,
    /// `InvalidParameter` for band edges outside `(0, nyquist)`.
    pub fn design(
        prototype: Prototype,
        band: Band,
        order: usize,
        sample_rate: f64,
    ) -> Result<Self> {
        if order == 0 || order > MAX_ORDER {
            return Err(RackError::InvalidFilter {
                reason: format!("order {} outside 1..={}", order, MAX_ORDER),
            });
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(RackError::InvalidFilter {
                reason: format!("sample rate {} must be positive", sample_rate),
            });
        }
        band.validate(sample_rate)?;

        let analog = prototype.analog(order);
        let shaped = match band {
            Band::Lowpass { cutoff } => {
                transform::lowpass(analog, transform::prewarp(cutoff, sample_rate))
            }
            Band::Highpass { cutoff } => {
                transform::highpass(analog, transform::prewarp(cutoff, sample_rate))
            }
            Band::Bandpass { center, width } | Band::Bandstop { center, width } => {
                let low = transform::prewarp(center - width / 2.0, sample_rate);
                let high = transform::prewarp(center + width / 2.0, sample_rate);
                let wo = (low * high).sqrt();
                let bw = high - low;
                if matches!(band, Band::Bandpass { .. }) {
                    transform::bandpass(analog, wo, bw)
                } else {
                    transform::bandstop(analog, wo, bw)
                }
            }
        };

        let digital = transform::bilinear(shaped, sample_rate);
        Ok(Self::from_sections(transform::to_sections(&digital)))
    }

    /// Filter one sample through every section in turn
    #[inline]
    pub fn filter(&mut self, input: f64) -> f64 {
        self.sections
            .iter()
            .zip(self.states.iter_mut())
            .fold(input, |x, (c, s)| s.process(x, c))
    }

    /// Clear all history
    pub fn reset(&mut self) {
        self.states.iter_mut().for_each(BiquadState::reset);
    }

    /// Adopt another cascade's history when the section layout matches
    ///
    /// Returns `true` when history was carried over.
    pub fn carry_state_from(&mut self, previous: &Cascade) -> bool {
        if previous.states.len() == self.states.len() {
            self.states.copy_from_slice(&previous.states);
            true
        } else {
            false
        }
    }

    pub fn sections(&self) -> &[BiquadCoeffs] {
        &self.sections
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Magnitude response at `freq` Hz
    pub fn response_at(&self, freq: f64, sample_rate: f64) -> f64 {
        let w = 2.0 * PI * freq / sample_rate;
        self.sections
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, c| acc * c.response(w))
            .norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const FS: f64 = 48000.0;

    fn lowpass(prototype: Prototype, order: usize, cutoff: f64) -> Cascade {
        Cascade::design(prototype, Band::Lowpass { cutoff }, order, FS).unwrap()
    }

    #[test]
    fn test_butterworth_lowpass_corner() {
        for order in [1, 2, 4, 7] {
            let c = lowpass(Prototype::Butterworth, order, 1000.0);
            assert_eq!(c.len(), (order + 1) / 2);
            assert_relative_eq!(c.response_at(1.0, FS), 1.0, epsilon = 1e-6);
            assert_relative_eq!(c.response_at(1000.0, FS), 0.5f64.sqrt(), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_butterworth_highpass() {
        let c = Cascade::design(Prototype::Butterworth, Band::Highpass { cutoff: 500.0 }, 4, FS)
            .unwrap();
        assert!(c.response_at(50.0, FS) < 1e-3);
        assert_relative_eq!(c.response_at(20000.0, FS), 1.0, epsilon = 1e-3);
        assert_relative_eq!(c.response_at(500.0, FS), 0.5f64.sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn test_bandpass_and_bandstop_center() {
        let band = Band::Bandpass {
            center: 1000.0,
            width: 200.0,
        };
        let bp = Cascade::design(Prototype::Butterworth, band, 2, FS).unwrap();
        assert_eq!(bp.len(), 2);
        assert!(bp.response_at(1000.0, FS) > 0.95);
        assert!(bp.response_at(100.0, FS) < 0.01);

        let band = Band::Bandstop {
            center: 1000.0,
            width: 200.0,
        };
        let bs = Cascade::design(Prototype::Butterworth, band, 2, FS).unwrap();
        assert!(bs.response_at(1000.0, FS) < 0.05);
        assert!(bs.response_at(100.0, FS) > 0.95);
    }

    #[test]
    fn test_max_order_keeps_unity_passband() {
        let prototypes = [
            Prototype::Butterworth,
            Prototype::Bessel,
            Prototype::ChebyshevI { ripple_db: 1.0 },
            Prototype::ChebyshevII { attenuation_db: 40.0 },
        ];
        // Geometric band center in the digital domain maps onto the prototype's DC
        let wo = (transform::prewarp(1500.0, FS) * transform::prewarp(2500.0, FS)).sqrt();
        let center = FS / PI * (wo / (2.0 * FS)).atan();
        let bands = [
            (Band::Lowpass { cutoff: 1000.0 }, 20.0),
            (Band::Highpass { cutoff: 1000.0 }, 20000.0),
            (
                Band::Bandpass {
                    center: 2000.0,
                    width: 1000.0,
                },
                center,
            ),
            (
                Band::Bandstop {
                    center: 2000.0,
                    width: 1000.0,
                },
                20.0,
            ),
        ];

        for prototype in prototypes {
            for (band, pass) in bands {
                let mut c = Cascade::design(prototype, band, MAX_ORDER, FS).unwrap();
                let m = c.response_at(pass, FS);
                assert!(
                    m.is_finite() && m > 0.85 && m < 1.0 + 1e-4,
                    "{:?} {:?}: {}",
                    prototype,
                    band,
                    m
                );
                for n in 0..256 {
                    let y = c.filter(if n == 0 { 1.0 } else { 0.0 });
                    assert!(y.is_finite(), "{:?} {:?} sample {}", prototype, band, n);
                }
            }
        }
    }

    #[test]
    fn test_chebyshev_ripple_bounds() {
        let c1 = lowpass(Prototype::ChebyshevI { ripple_db: 1.0 }, 4, 2000.0);
        let floor = 10f64.powf(-1.0 / 20.0);
        for f in [100.0, 500.0, 1000.0, 1500.0, 1900.0] {
            let m = c1.response_at(f, FS);
            assert!(m <= 1.0 + 1e-6 && m >= floor - 1e-6, "{} Hz: {}", f, m);
        }

        let c2 = lowpass(Prototype::ChebyshevII { attenuation_db: 40.0 }, 4, 2000.0);
        assert!(c2.response_at(10000.0, FS) <= 0.0101);
        assert_relative_eq!(c2.response_at(1.0, FS), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_non_positive_ripple_falls_back() {
        let explicit = lowpass(Prototype::ChebyshevI { ripple_db: 1.0 }, 3, 800.0);
        let fallback = lowpass(Prototype::ChebyshevI { ripple_db: 0.0 }, 3, 800.0);
        assert_eq!(explicit.sections(), fallback.sections());
    }

    #[test]
    fn test_bessel_lowpass_is_stable_and_unity_at_dc() {
        let mut c = lowpass(Prototype::Bessel, 6, 1200.0);
        assert_relative_eq!(c.response_at(0.0, FS), 1.0, epsilon = 1e-6);
        assert!(c.response_at(15000.0, FS) < 0.01);

        // Impulse response decays
        let mut tail = 0.0;
        for n in 0..20000 {
            let y = c.filter(if n == 0 { 1.0 } else { 0.0 });
            if n > 19000 {
                tail += y.abs();
            }
        }
        assert!(tail < 1e-9);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let band = Band::Lowpass { cutoff: 1000.0 };
        assert!(matches!(
            Cascade::design(Prototype::Butterworth, band, 0, FS),
            Err(RackError::InvalidFilter { .. })
        ));
        assert!(matches!(
            Cascade::design(Prototype::Butterworth, band, 17, FS),
            Err(RackError::InvalidFilter { .. })
        ));
        assert!(matches!(
            Cascade::design(Prototype::Butterworth, Band::Lowpass { cutoff: 24000.0 }, 2, FS),
            Err(RackError::InvalidParameter { .. })
        ));
        let wide = Band::Bandpass {
            center: 100.0,
            width: 400.0,
        };
        assert!(matches!(
            Cascade::design(Prototype::Butterworth, wide, 2, FS),
            Err(RackError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_state_carries_over_matching_layout() {
        let mut a = lowpass(Prototype::Butterworth, 4, 1000.0);
        for _ in 0..32 {
            a.filter(0.5);
        }
        let mut b = lowpass(Prototype::Butterworth, 4, 2000.0);
        assert!(b.carry_state_from(&a));
        assert_ne!(b.states, vec![BiquadState::default(); 2]);

        let mut c = lowpass(Prototype::Butterworth, 5, 2000.0);
        assert!(!c.carry_state_from(&a));

        b.reset();
        assert_eq!(b.states, vec![BiquadState::default(); 2]);
    }

    #[test]
    fn test_empty_cascade_is_identity() {
        let mut c = Cascade::default();
        assert_eq!(c.filter(0.25), 0.25);
        assert_eq!(c.response_at(1000.0, FS), 1.0);
    }
}
