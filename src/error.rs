//! Error handling for audiorack
//!
//! Every failure surfaces as a typed [`RackError`] at the call that triggered it.
//! Errors are grouped into four categories (see [`ErrorCategory`]) which decide
//! whether the caller can recover or must rebuild the failing component.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for audiorack operations
pub type Result<T> = std::result::Result<T, RackError>;

/// Broad classification of an error, used to pick a recovery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Raised while constructing or configuring something. Never retried.
    Configuration,
    /// Rack position errors. The rack is left untouched.
    Bounds,
    /// A filter or effect failed mid-buffer. Fatal to the current run.
    Processing,
    /// Devices, files and other external resources.
    Resource,
}

/// Main error type for audiorack operations
#[derive(Error, Debug)]
pub enum RackError {
    // Configuration Errors
    #[error("Unsupported sample format: {details}")]
    UnsupportedFormat { details: String },

    #[error("Invalid filter: {reason}")]
    InvalidFilter { reason: String },

    #[error("Invalid parameter: {param} = {value} (expected {expected})")]
    InvalidParameter {
        param: String,
        value: f64,
        expected: String,
    },

    #[error("Line does not support format {format}")]
    LineUnsupported { format: String },

    #[error("Unsupported platform: {os}-{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    // Bounds Errors
    #[error("Filter rack is empty")]
    EmptyRack,

    #[error("Rack position {position} is out of range (rack holds {size} filters)")]
    OutOfRange { position: usize, size: usize },

    // Processing Errors
    #[error("Processing error in {effect}: {reason}")]
    ProcessingError { effect: String, reason: String },

    // Resource Errors
    #[error("Audio device unavailable: {reason}")]
    DeviceUnavailable { reason: String },

    #[error("Configuration file error at {path}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RackError {
    /// Shorthand for an [`RackError::InvalidParameter`]
    pub fn invalid_parameter(param: &str, value: f64, expected: impl Into<String>) -> Self {
        RackError::InvalidParameter {
            param: param.to_string(),
            value,
            expected: expected.into(),
        }
    }

    /// Shorthand for a [`RackError::ProcessingError`]
    pub fn processing(effect: &str, reason: impl Into<String>) -> Self {
        RackError::ProcessingError {
            effect: effect.to_string(),
            reason: reason.into(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            RackError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            RackError::InvalidFilter { .. } => "INVALID_FILTER",
            RackError::InvalidParameter { .. } => "INVALID_PARAMETER",
            RackError::LineUnsupported { .. } => "LINE_UNSUPPORTED",
            RackError::UnsupportedPlatform { .. } => "UNSUPPORTED_PLATFORM",
            RackError::EmptyRack => "EMPTY_RACK",
            RackError::OutOfRange { .. } => "OUT_OF_RANGE",
            RackError::ProcessingError { .. } => "PROCESSING_ERROR",
            RackError::DeviceUnavailable { .. } => "DEVICE_UNAVAILABLE",
            RackError::ConfigIo { .. } => "CONFIG_IO_ERROR",
            RackError::Wav(_) => "WAV_ERROR",
            RackError::Io(_) => "IO_ERROR",
            RackError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Get the category this error belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            RackError::UnsupportedFormat { .. }
            | RackError::InvalidFilter { .. }
            | RackError::InvalidParameter { .. }
            | RackError::LineUnsupported { .. }
            | RackError::UnsupportedPlatform { .. } => ErrorCategory::Configuration,
            RackError::EmptyRack | RackError::OutOfRange { .. } => ErrorCategory::Bounds,
            RackError::ProcessingError { .. } => ErrorCategory::Processing,
            RackError::DeviceUnavailable { .. }
            | RackError::ConfigIo { .. }
            | RackError::Wav(_)
            | RackError::Io(_)
            | RackError::Serialization(_) => ErrorCategory::Resource,
        }
    }

    /// Check if the caller can recover from this error without rebuilding anything
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Bounds)
            || matches!(self, RackError::InvalidParameter { .. })
    }

    /// Returns a suggested recovery action for this error
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            RackError::UnsupportedFormat { .. } => {
                "Use 8, 16 or 32-bit PCM, or 32/64-bit float samples"
            }
            RackError::InvalidFilter { .. } => {
                "Use one of: butterworth, bessel, chebyshev1, chebyshev2 with order 1-16"
            }
            RackError::InvalidParameter { .. } => "Adjust the parameter to be within valid range",
            RackError::LineUnsupported { .. } => {
                "Pick a format the audio host reports as supported"
            }
            RackError::UnsupportedPlatform { .. } => {
                "Effect modules ship for linux, macos and windows on x86_64 or aarch64"
            }
            RackError::EmptyRack => "Insert a filter before addressing rack positions",
            RackError::OutOfRange { .. } => "Address a position below the rack size",
            RackError::ProcessingError { .. } => {
                "Remove or rebuild the failing effect, then restart the pipeline"
            }
            RackError::DeviceUnavailable { .. } => {
                "Close other applications holding the device and start again"
            }
            RackError::ConfigIo { .. } => "Check the preset directory exists and is writable",
            _ => "Check the error details and try again",
        }
    }
}
