//! Lookahead Limiter
//!
//! Peak limiter with a delay line so gain reduction can engage before the
//! peak reaches the output. Per frame:
//!
//! 1. peak = max |x| across channels
//! 2. target gain = threshold / peak when the peak exceeds the threshold
//! 3. gain follows the target with the attack coefficient when falling,
//!    the release coefficient when rising
//! 4. output = delayed frame * gain

use log::debug;
use serde::{Deserialize, Serialize};

use super::{EffectModule, EffectRuntime, ModuleBinding, StreamLayout};
use crate::config::FilterSpec;
use crate::error::{RackError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Most channels the limiter handles
pub const MAX_CHANNELS: usize = 8;

/// Delay line length in frames; lookahead is capped one below this
pub const MAX_LOOKAHEAD_FRAMES: usize = 4096;

const MODULE: &str = "limiter";

/// Convert decibels to linear amplitude
#[inline]
fn db_to_linear(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// One-pole smoothing coefficient for a time constant
#[inline]
fn time_to_coeff(time_ms: f64, sample_rate: f64) -> f64 {
    (-1.0 / (time_ms * sample_rate / 1000.0)).exp()
}

// ============================================================================
// Parameters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterParams {
    /// Ceiling in dBFS
    pub threshold_db: f64,
    /// Attack time in ms; 0 reacts instantly
    pub attack_ms: f64,
    /// Release time in ms, must be positive
    pub release_ms: f64,
    /// Lookahead delay in ms
    pub lookahead_ms: f64,
}

impl Default for LimiterParams {
    fn default() -> Self {
        Self {
            threshold_db: -0.1,
            attack_ms: 0.1,
            release_ms: 2.0,
            lookahead_ms: 100.0,
        }
    }
}

impl LimiterParams {
    pub fn validate(&self) -> Result<()> {
        if !self.threshold_db.is_finite() {
            return Err(RackError::invalid_parameter(
                "threshold_db",
                self.threshold_db,
                "finite dB value",
            ));
        }
        if !(self.attack_ms.is_finite() && self.attack_ms >= 0.0) {
            return Err(RackError::invalid_parameter("attack_ms", self.attack_ms, ">= 0"));
        }
        if !(self.release_ms.is_finite() && self.release_ms > 0.0) {
            return Err(RackError::invalid_parameter("release_ms", self.release_ms, "> 0"));
        }
        if !(self.lookahead_ms.is_finite() && self.lookahead_ms >= 0.0) {
            return Err(RackError::invalid_parameter(
                "lookahead_ms",
                self.lookahead_ms,
                ">= 0",
            ));
        }
        Ok(())
    }

    /// Lookahead in frames, capped to the delay line
    fn lookahead_frames(&self, sample_rate: f64) -> usize {
        let frames = (self.lookahead_ms * sample_rate / 1000.0).floor() as usize;
        frames.min(MAX_LOOKAHEAD_FRAMES - 1)
    }
}

// ============================================================================
// Limiter
// ============================================================================

#[derive(Debug)]
pub struct Limiter {
    binding: ModuleBinding,
    layout: StreamLayout,
    params: LimiterParams,
    gain: f64,
    /// Interleaved delay line, `MAX_LOOKAHEAD_FRAMES * channels`
    delay: Vec<f64>,
    write_pos: usize,
    lookahead: usize,
}

impl Limiter {
    /// Create a limiter
    ///
    /// # Errors
    /// `InvalidParameter` for a bad layout, more than 8 channels or invalid
    /// parameters.
    pub fn new(
        runtime: &EffectRuntime,
        layout: StreamLayout,
        params: LimiterParams,
    ) -> Result<Self> {
        layout.validate()?;
        if layout.channels > MAX_CHANNELS {
            return Err(RackError::invalid_parameter(
                "channels",
                layout.channels as f64,
                format!("at most {}", MAX_CHANNELS),
            ));
        }
        params.validate()?;

        let binding = runtime.bind(MODULE)?;
        let lookahead = params.lookahead_frames(layout.sample_rate);
        debug!(
            "Limiter: {} ch, threshold {} dB, lookahead {} frames",
            layout.channels, params.threshold_db, lookahead
        );

        Ok(Self {
            binding,
            layout,
            params,
            gain: 1.0,
            delay: vec![0.0; MAX_LOOKAHEAD_FRAMES * layout.channels],
            write_pos: 0,
            lookahead,
        })
    }

    pub fn params(&self) -> LimiterParams {
        self.params
    }

    pub fn binding(&self) -> &ModuleBinding {
        &self.binding
    }

    /// Current smoothed gain
    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Lookahead currently applied, in frames
    pub fn lookahead_frames(&self) -> usize {
        self.lookahead
    }

    /// Replace parameters; a lookahead change clears the delay line
    pub fn set_params(&mut self, params: LimiterParams) -> Result<()> {
        params.validate()?;
        let lookahead = params.lookahead_frames(self.layout.sample_rate);
        self.params = params;
        if lookahead != self.lookahead {
            self.lookahead = lookahead;
            self.reset();
        }
        Ok(())
    }

    pub fn set_threshold_db(&mut self, threshold_db: f64) -> Result<()> {
        self.set_params(LimiterParams {
            threshold_db,
            ..self.params
        })
    }

    pub fn set_attack_ms(&mut self, attack_ms: f64) -> Result<()> {
        self.set_params(LimiterParams {
            attack_ms,
            ..self.params
        })
    }

    pub fn set_release_ms(&mut self, release_ms: f64) -> Result<()> {
        self.set_params(LimiterParams {
            release_ms,
            ..self.params
        })
    }

    pub fn set_lookahead_ms(&mut self, lookahead_ms: f64) -> Result<()> {
        self.set_params(LimiterParams {
            lookahead_ms,
            ..self.params
        })
    }
}

impl EffectModule for Limiter {
    fn name(&self) -> &'static str {
        MODULE
    }

    fn layout(&self) -> StreamLayout {
        self.layout
    }

    fn process(&mut self, buffer: &mut [f64]) -> Result<()> {
        let frames = self.layout.frames_in(MODULE, buffer.len())?;
        let channels = self.layout.channels;

        let threshold = db_to_linear(self.params.threshold_db);
        let attack = if self.params.attack_ms > 0.0 {
            time_to_coeff(self.params.attack_ms, self.layout.sample_rate)
        } else {
            0.0
        };
        let release = time_to_coeff(self.params.release_ms, self.layout.sample_rate);

        for frame in buffer[..frames * channels].chunks_exact_mut(channels) {
            let peak = frame.iter().fold(0.0f64, |acc, x| acc.max(x.abs()));
            let target = if peak > threshold { threshold / peak } else { 1.0 };

            let coeff = if target < self.gain { attack } else { release };
            self.gain = (1.0 - coeff) * target + coeff * self.gain;

            if self.lookahead == 0 {
                frame.iter_mut().for_each(|x| *x *= self.gain);
                continue;
            }

            let read_pos =
                (self.write_pos + MAX_LOOKAHEAD_FRAMES - self.lookahead) % MAX_LOOKAHEAD_FRAMES;
            for (ch, sample) in frame.iter_mut().enumerate() {
                let delayed = self.delay[read_pos * channels + ch];
                self.delay[self.write_pos * channels + ch] = *sample;
                *sample = delayed * self.gain;
            }
            self.write_pos = (self.write_pos + 1) % MAX_LOOKAHEAD_FRAMES;
        }

        Ok(())
    }

    fn reset(&mut self) {
        self.gain = 1.0;
        self.write_pos = 0;
        self.delay.iter_mut().for_each(|x| *x = 0.0);
    }

    fn spec(&self) -> FilterSpec {
        FilterSpec::Limiter {
            layout: self.layout,
            params: self.params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::Platform;
    use approx::assert_abs_diff_eq;

    fn runtime() -> EffectRuntime {
        EffectRuntime::load(Platform::new("linux", "x86_64").unwrap())
    }

    fn layout(channels: usize) -> StreamLayout {
        StreamLayout::new(channels, 4096, 48000.0).unwrap()
    }

    #[test]
    fn test_defaults() {
        let p = LimiterParams::default();
        assert_eq!(p.threshold_db, -0.1);
        assert_eq!(p.attack_ms, 0.1);
        assert_eq!(p.release_ms, 2.0);
        assert_eq!(p.lookahead_ms, 100.0);
    }

    #[test]
    fn test_lookahead_is_capped() {
        let limiter = Limiter::new(&runtime(), layout(2), LimiterParams::default()).unwrap();
        // 100 ms at 48 kHz is 4800 frames
        assert_eq!(limiter.lookahead_frames(), MAX_LOOKAHEAD_FRAMES - 1);
    }

    #[test]
    fn test_rejects_bad_params() {
        let rt = runtime();
        let bad = LimiterParams {
            release_ms: 0.0,
            ..LimiterParams::default()
        };
        assert!(Limiter::new(&rt, layout(2), bad).is_err());
        assert!(Limiter::new(&rt, layout(9), LimiterParams::default()).is_err());
    }

    #[test]
    fn test_limits_loud_signal() {
        let params = LimiterParams {
            threshold_db: -6.0,
            lookahead_ms: 0.0,
            ..LimiterParams::default()
        };
        let mut limiter = Limiter::new(&runtime(), layout(2), params).unwrap();
        let mut buf = vec![1.0; 4096];
        limiter.process(&mut buf).unwrap();

        let ceiling = db_to_linear(-6.0);
        assert_abs_diff_eq!(buf[4095], ceiling, epsilon = 1e-6);
        assert_abs_diff_eq!(limiter.gain(), ceiling, epsilon = 1e-6);
    }

    #[test]
    fn test_quiet_signal_is_delayed_not_scaled() {
        let params = LimiterParams {
            lookahead_ms: 1.0,
            ..LimiterParams::default()
        };
        let mut limiter = Limiter::new(&runtime(), layout(2), params).unwrap();
        assert_eq!(limiter.lookahead_frames(), 48);

        let mut buf = vec![0.0; 256];
        buf[0] = 0.25;
        buf[1] = -0.125;
        limiter.process(&mut buf).unwrap();

        assert_eq!(buf[0], 0.0);
        assert_abs_diff_eq!(buf[96], 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(buf[97], -0.125, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_oversized_buffer() {
        let layout = StreamLayout::new(2, 64, 48000.0).unwrap();
        let mut limiter = Limiter::new(&runtime(), layout, LimiterParams::default()).unwrap();
        let mut buf = vec![0.0; 65];
        assert!(matches!(
            limiter.process(&mut buf),
            Err(RackError::ProcessingError { .. })
        ));
    }

    #[test]
    fn test_lookahead_change_resets_state() {
        let params = LimiterParams {
            threshold_db: -6.0,
            lookahead_ms: 0.0,
            ..LimiterParams::default()
        };
        let mut limiter = Limiter::new(&runtime(), layout(1), params).unwrap();
        let mut buf = vec![1.0; 512];
        limiter.process(&mut buf).unwrap();
        assert!(limiter.gain() < 1.0);

        limiter.set_threshold_db(-3.0).unwrap();
        assert!(limiter.gain() < 1.0);

        limiter.set_lookahead_ms(2.0).unwrap();
        assert_eq!(limiter.gain(), 1.0);
    }

    #[test]
    fn test_instances_keep_separate_state() {
        let rt = runtime();
        let params = LimiterParams {
            threshold_db: -6.0,
            lookahead_ms: 0.0,
            ..LimiterParams::default()
        };
        let mut a = Limiter::new(&rt, layout(1), params).unwrap();
        let b = Limiter::new(&rt, layout(1), params).unwrap();

        let mut buf = vec![1.0; 256];
        a.process(&mut buf).unwrap();
        assert!(a.gain() < 1.0);
        assert_eq!(b.gain(), 1.0);
    }
}
