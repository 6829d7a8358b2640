//! Line format descriptor

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{Encoding, Endianness, SampleSpec};
use crate::error::{RackError, Result};

/// Format of an audio line: rate, sample encoding and channel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Frames per second
    pub sample_rate: u32,
    /// Bits per sample
    pub bit_depth: u16,
    /// Interleaved channels
    pub channels: u16,
    pub encoding: Encoding,
    #[serde(default)]
    pub endianness: Endianness,
}

impl AudioFormat {
    pub fn new(
        sample_rate: u32,
        bit_depth: u16,
        channels: u16,
        encoding: Encoding,
        endianness: Endianness,
    ) -> Self {
        Self {
            sample_rate,
            bit_depth,
            channels,
            encoding,
            endianness,
        }
    }

    /// Signed 16-bit little-endian PCM
    pub fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self::new(
            sample_rate,
            16,
            channels,
            Encoding::SignedInt,
            Endianness::Little,
        )
    }

    /// 32-bit little-endian float
    pub fn float32(sample_rate: u32, channels: u16) -> Self {
        Self::new(sample_rate, 32, channels, Encoding::Float, Endianness::Little)
    }

    pub fn sample_spec(&self) -> SampleSpec {
        SampleSpec {
            bit_depth: self.bit_depth,
            encoding: self.encoding,
            endianness: self.endianness,
        }
    }

    /// Check the codec can handle this format and the layout is usable
    pub fn validate(&self) -> Result<()> {
        self.sample_spec().validate()?;
        if self.sample_rate == 0 {
            return Err(RackError::UnsupportedFormat {
                details: "sample rate of 0 Hz".to_string(),
            });
        }
        if self.channels == 0 {
            return Err(RackError::UnsupportedFormat {
                details: "zero channels".to_string(),
            });
        }
        Ok(())
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.sample_spec().bytes_per_sample()
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Bytes in one block of `duration`, rounded to whole frames (at least one)
    pub fn block_bytes(&self, duration: Duration) -> usize {
        let frames = (self.sample_rate as f64 * duration.as_secs_f64()).round() as usize;
        frames.max(1) * self.bytes_per_frame()
    }

    /// Playback time of `bytes` worth of frames
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let frames = bytes / self.bytes_per_frame().max(1);
        Duration::from_secs_f64(frames as f64 / self.sample_rate.max(1) as f64)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {}-bit {} {}, {} ch",
            self.sample_rate, self.bit_depth, self.encoding, self.endianness, self.channels
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_bytes() {
        let format = AudioFormat::pcm16(48000, 2);
        assert_eq!(format.bytes_per_frame(), 4);
        // 20 ms at 48 kHz = 960 frames
        assert_eq!(format.block_bytes(Duration::from_millis(20)), 3840);
        assert_eq!(format.block_bytes(Duration::ZERO), 4);
    }

    #[test]
    fn test_validate() {
        assert!(AudioFormat::pcm16(44100, 1).validate().is_ok());
        assert!(AudioFormat::float32(44100, 2).validate().is_ok());

        let bad = AudioFormat::new(44100, 24, 2, Encoding::SignedInt, Endianness::Little);
        assert!(matches!(
            bad.validate(),
            Err(RackError::UnsupportedFormat { .. })
        ));
        assert!(AudioFormat::pcm16(44100, 0).validate().is_err());
    }

    #[test]
    fn test_duration_of() {
        let format = AudioFormat::pcm16(1000, 1);
        assert_eq!(format.duration_of(2000), Duration::from_secs(1));
    }
}
