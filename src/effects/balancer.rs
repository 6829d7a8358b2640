//! Channel Balancer
//!
//! Shifts the stereo image toward one side by attenuating the other. The
//! preference runs from 0 (hard left) through 0.5 (centered) to 1 (hard
//! right). Only the first two channels of each frame are touched; mono
//! streams pass through.

use serde::{Deserialize, Serialize};

use super::{EffectModule, EffectRuntime, ModuleBinding, StreamLayout};
use crate::config::FilterSpec;
use crate::error::{RackError, Result};

const MODULE: &str = "channel_balancer";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerParams {
    /// Balance preference in `[0, 1]`
    pub preference: f64,
}

impl Default for BalancerParams {
    fn default() -> Self {
        Self { preference: 0.5 }
    }
}

impl BalancerParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.preference) {
            return Err(RackError::invalid_parameter(
                "preference",
                self.preference,
                "0.0 to 1.0",
            ));
        }
        Ok(())
    }

    /// (left, right) gains for the preference
    pub fn gains(&self) -> (f64, f64) {
        let x = self.preference - 0.5;
        if x < 0.0 {
            (1.0, 1.0 + 2.0 * x)
        } else {
            (1.0 - 2.0 * x, 1.0)
        }
    }
}

#[derive(Debug)]
pub struct ChannelBalancer {
    binding: ModuleBinding,
    layout: StreamLayout,
    params: BalancerParams,
}

impl ChannelBalancer {
    pub fn new(
        runtime: &EffectRuntime,
        layout: StreamLayout,
        params: BalancerParams,
    ) -> Result<Self> {
        layout.validate()?;
        params.validate()?;
        Ok(Self {
            binding: runtime.bind(MODULE)?,
            layout,
            params,
        })
    }

    pub fn preference(&self) -> f64 {
        self.params.preference
    }

    pub fn binding(&self) -> &ModuleBinding {
        &self.binding
    }

    /// Set the preference; out-of-range values are rejected and the old one kept
    pub fn set_preference(&mut self, preference: f64) -> Result<()> {
        let params = BalancerParams { preference };
        params.validate()?;
        self.params = params;
        Ok(())
    }
}

impl EffectModule for ChannelBalancer {
    fn name(&self) -> &'static str {
        MODULE
    }

    fn layout(&self) -> StreamLayout {
        self.layout
    }

    fn process(&mut self, buffer: &mut [f64]) -> Result<()> {
        let frames = self.layout.frames_in(MODULE, buffer.len())?;
        let channels = self.layout.channels;
        if channels < 2 {
            return Ok(());
        }

        let (left, right) = self.params.gains();
        for frame in buffer[..frames * channels].chunks_exact_mut(channels) {
            frame[0] *= left;
            frame[1] *= right;
        }
        Ok(())
    }

    fn reset(&mut self) {}

    fn spec(&self) -> FilterSpec {
        FilterSpec::ChannelBalancer {
            layout: self.layout,
            params: self.params,
        }
    }
}
