//! Ten-band Graphic Equalizer
//!
//! Fixed octave-spaced bands, each driven by a gain in `[0, 1]` that maps to
//! a linear shelf/peak amplitude `A = 10^(0.15 * g)` (0 is flat, 1 is about
//! +6 dB at the band centre). The lowest band is a low shelf, the highest a
//! high shelf, the rest are peaking filters. Bands are cascaded per channel.

use serde::{Deserialize, Serialize};

use super::{EffectModule, EffectRuntime, ModuleBinding, StreamLayout};
use crate::config::FilterSpec;
use crate::design::{BiquadCoeffs, BiquadState};
use crate::error::{RackError, Result};

/// Number of bands
pub const BAND_COUNT: usize = 10;

/// Band centre frequencies in Hz
pub const BAND_CENTERS: [f64; BAND_COUNT] = [
    31.0, 63.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

const MODULE: &str = "graphic_equalizer";

/// Clamp one gain into `[0, 1]`; NaN counts as flat
fn sanitize_gain(g: f64) -> f64 {
    if g.is_nan() {
        0.0
    } else {
        g.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicEqParams {
    /// Per-band gain in `[0, 1]`
    pub gains: [f64; BAND_COUNT],
    /// Band quality factor
    pub q: f64,
}

impl Default for GraphicEqParams {
    fn default() -> Self {
        Self {
            gains: [0.0; BAND_COUNT],
            q: 1.0,
        }
    }
}

impl GraphicEqParams {
    /// Build from any number of gains; missing bands are flat, extras ignored
    pub fn from_gains(gains: &[f64], q: f64) -> Self {
        let mut out = [0.0; BAND_COUNT];
        for (slot, g) in out.iter_mut().zip(gains.iter()) {
            *slot = sanitize_gain(*g);
        }
        Self { gains: out, q }
    }

    fn sanitized(mut self) -> Self {
        self.gains.iter_mut().for_each(|g| *g = sanitize_gain(*g));
        self
    }
}

#[derive(Debug)]
pub struct GraphicEqualizer {
    binding: ModuleBinding,
    layout: StreamLayout,
    params: GraphicEqParams,
    /// Active bands only; bands at or above Nyquist are skipped
    coeffs: Vec<BiquadCoeffs>,
    /// `channels` rows of `coeffs.len()` states
    states: Vec<BiquadState>,
}

impl GraphicEqualizer {
    /// Create an equalizer; gains are sanitized into `[0, 1]`
    ///
    /// # Errors
    /// `InvalidParameter` for a bad layout or a non-positive Q.
    pub fn new(
        runtime: &EffectRuntime,
        layout: StreamLayout,
        params: GraphicEqParams,
    ) -> Result<Self> {
        layout.validate()?;
        validate_q(params.q)?;

        let mut eq = Self {
            binding: runtime.bind(MODULE)?,
            layout,
            params: params.sanitized(),
            coeffs: Vec::new(),
            states: Vec::new(),
        };
        eq.rebuild();
        Ok(eq)
    }

    pub fn params(&self) -> GraphicEqParams {
        self.params
    }

    pub fn gains(&self) -> [f64; BAND_COUNT] {
        self.params.gains
    }

    pub fn q(&self) -> f64 {
        self.params.q
    }

    pub fn binding(&self) -> &ModuleBinding {
        &self.binding
    }

    /// Number of bands below Nyquist at this sample rate
    pub fn active_bands(&self) -> usize {
        self.coeffs.len()
    }

    /// Replace all gains (history is kept)
    pub fn set_gains(&mut self, gains: &[f64]) {
        self.params = GraphicEqParams::from_gains(gains, self.params.q);
        self.rebuild();
    }

    /// Flatten every band
    pub fn reset_gains(&mut self) {
        self.set_gains(&[]);
    }

    pub fn set_q(&mut self, q: f64) -> Result<()> {
        validate_q(q)?;
        self.params.q = q;
        self.rebuild();
        Ok(())
    }

    fn rebuild(&mut self) {
        let fs = self.layout.sample_rate;
        let q = self.params.q;

        self.coeffs = BAND_CENTERS
            .iter()
            .zip(self.params.gains.iter())
            .enumerate()
            .filter(|(_, (freq, _))| **freq < fs / 2.0)
            .map(|(band, (&freq, &gain))| {
                let a = 10f64.powf(0.15 * gain);
                match band {
                    0 => BiquadCoeffs::low_shelf(fs, freq, a, q),
                    b if b == BAND_COUNT - 1 => BiquadCoeffs::high_shelf(fs, freq, a, q),
                    _ => BiquadCoeffs::peaking(fs, freq, a, q),
                }
            })
            .collect();

        let needed = self.coeffs.len() * self.layout.channels;
        if self.states.len() != needed {
            self.states = vec![BiquadState::default(); needed];
        }
    }
}

fn validate_q(q: f64) -> Result<()> {
    if q.is_finite() && q > 0.0 {
        Ok(())
    } else {
        Err(RackError::invalid_parameter("q", q, "> 0"))
    }
}

impl EffectModule for GraphicEqualizer {
    fn name(&self) -> &'static str {
        MODULE
    }

    fn layout(&self) -> StreamLayout {
        self.layout
    }

    fn process(&mut self, buffer: &mut [f64]) -> Result<()> {
        let frames = self.layout.frames_in(MODULE, buffer.len())?;
        let channels = self.layout.channels;
        let bands = self.coeffs.len();
        if bands == 0 {
            return Ok(());
        }

        for frame in buffer[..frames * channels].chunks_exact_mut(channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let states = &mut self.states[ch * bands..(ch + 1) * bands];
                *sample = self
                    .coeffs
                    .iter()
                    .zip(states.iter_mut())
                    .fold(*sample, |x, (c, s)| s.process(x, c));
            }
        }

        if buffer.iter().any(|x| !x.is_finite()) {
            return Err(RackError::processing(MODULE, "non-finite output"));
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.states.iter_mut().for_each(BiquadState::reset);
    }

    fn spec(&self) -> FilterSpec {
        FilterSpec::GraphicEqualizer {
            layout: self.layout,
            params: self.params,
        }
    }
}
