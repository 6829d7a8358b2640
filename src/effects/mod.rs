//! Effect modules
//!
//! Heavyweight effects (limiter, channel balancer, graphic equalizer) sit
//! behind the [`EffectModule`] trait. Each one is bound through an
//! [`EffectRuntime`] at construction, owns its private state, and processes
//! whole interleaved frames of at most `block_size` samples per call.

pub mod balancer;
pub mod graphic_eq;
pub mod limiter;
pub mod loader;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::FilterSpec;
use crate::error::{RackError, Result};

pub use balancer::{BalancerParams, ChannelBalancer};
pub use graphic_eq::{GraphicEqParams, GraphicEqualizer, BAND_CENTERS, BAND_COUNT};
pub use limiter::{Limiter, LimiterParams};
pub use loader::{Arch, EffectRuntime, ModuleBinding, Os, Platform};

/// Interleaved stream shape an effect is prepared for
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamLayout {
    /// Interleaved channel count
    pub channels: usize,
    /// Largest buffer, in samples, accepted per `process` call
    pub block_size: usize,
    /// Sample rate in Hz
    pub sample_rate: f64,
}

impl StreamLayout {
    /// Validated layout
    ///
    /// # Errors
    /// `InvalidParameter` for zero channels, zero block size or a
    /// non-positive sample rate.
    pub fn new(channels: usize, block_size: usize, sample_rate: f64) -> Result<Self> {
        let layout = Self {
            channels,
            block_size,
            sample_rate,
        };
        layout.validate()?;
        Ok(layout)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(RackError::invalid_parameter("channels", 0.0, "at least 1"));
        }
        if self.block_size == 0 {
            return Err(RackError::invalid_parameter("block_size", 0.0, "at least 1"));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(RackError::invalid_parameter(
                "sample_rate",
                self.sample_rate,
                "positive sample rate",
            ));
        }
        Ok(())
    }

    /// Number of whole frames in a buffer, rejecting buffers over the block size
    pub fn frames_in(&self, effect: &str, len: usize) -> Result<usize> {
        if len > self.block_size {
            return Err(RackError::processing(
                effect,
                format!(
                    "buffer of {} samples exceeds block size {}",
                    len, self.block_size
                ),
            ));
        }
        Ok(len / self.channels)
    }
}

/// Uniform contract for every effect module
pub trait EffectModule: Send + fmt::Debug {
    /// Module name as exported by the effect library
    fn name(&self) -> &'static str;

    fn layout(&self) -> StreamLayout;

    fn channels(&self) -> usize {
        self.layout().channels
    }

    fn block_size(&self) -> usize {
        self.layout().block_size
    }

    fn sample_rate(&self) -> f64 {
        self.layout().sample_rate
    }

    /// Process an interleaved buffer in place
    ///
    /// Trailing samples that do not fill a whole frame are left untouched.
    fn process(&mut self, buffer: &mut [f64]) -> Result<()>;

    /// Clear internal state (envelopes, delay lines, filter history)
    fn reset(&mut self);

    /// Serializable description that rebuilds an equivalent module
    fn spec(&self) -> FilterSpec;
}
