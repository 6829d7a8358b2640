//! Audiorack - Real-time Audio Filter Rack
//!
//! Audiorack captures PCM audio from a device line, runs it through an
//! ordered rack of filters and writes the result to a playback line.
//!
//! # Architecture
//!
//! - `codec`: raw PCM bytes to normalized `f64` samples and back
//! - `design` / `filter`: Butterworth, Bessel and Chebyshev IIR designs
//!   behind the [`DesignedFilter`] adapter
//! - `effects`: limiter, channel balancer and graphic equalizer modules
//!   bound through an explicitly loaded [`EffectRuntime`]
//! - `rack`: the ordered, position-addressable filter chain
//! - `pipeline`: the capture → rack → playback worker and device backends
//! - `config`: JSON rack presets

pub mod cli;
pub mod codec;
pub mod config;
pub mod design;
pub mod effects;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod rack;

pub use config::{ConfigStore, FilterSpec, Preset};
pub use effects::{EffectModule, EffectRuntime, Platform};
pub use error::{RackError, Result};
pub use filter::{DesignedFilter, FilterKind};
pub use pipeline::{AudioFormat, AudioHost, Pipeline, PipelineConfig};
pub use rack::{FilterHandle, FilterRack, SharedRack};
