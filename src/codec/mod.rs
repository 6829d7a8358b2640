//! PCM Sample Codec
//!
//! Converts between the raw byte blocks exchanged with audio devices and the
//! normalized `f64` samples the filter rack works on. Interleaving and sample
//! order are preserved in both directions; information is only lost through
//! quantization on the way back to integer PCM.
//!
//! | depth | encoding | decode           |
//! |-------|----------|------------------|
//! | 8     | unsigned | `(b - 128) / 128`|
//! | 8     | signed   | `v / 127`        |
//! | 16    | signed   | `v / 32767`      |
//! | 16    | unsigned | `(u - 32768) / 32768` |
//! | 32    | float    | passthrough      |
//! | 32    | signed   | `v / 2147483647` |
//! | 32    | unsigned | `(u - 2^31) / 2^31` |
//! | 64    | float    | passthrough      |
//!
//! Encoding clamps every sample to `[-1, 1]` and applies the inverse formula,
//! rounding to the nearest step.

use std::fmt;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{RackError, Result};

// ============================================================================
// Constants
// ============================================================================

const I8_SCALE: f64 = 127.0;
const U8_OFFSET: f64 = 128.0;
const I16_SCALE: f64 = 32767.0;
const U16_OFFSET: f64 = 32768.0;
const I32_SCALE: f64 = 2147483647.0;
const U32_OFFSET: f64 = 2147483648.0;

// ============================================================================
// Format Descriptors
// ============================================================================

/// How sample values are represented in the byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Two's complement integer PCM
    SignedInt,
    /// Offset-binary integer PCM (silence sits at mid-range)
    UnsignedInt,
    /// IEEE-754 floating point
    Float,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::SignedInt => write!(f, "signed"),
            Encoding::UnsignedInt => write!(f, "unsigned"),
            Encoding::Float => write!(f, "float"),
        }
    }
}

/// Byte order of multi-byte samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

impl Endianness {
    /// Byte order of the machine we are running on
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endianness::Little => write!(f, "little-endian"),
            Endianness::Big => write!(f, "big-endian"),
        }
    }
}

/// Bit depth, encoding and byte order of one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSpec {
    pub bit_depth: u16,
    pub encoding: Encoding,
    pub endianness: Endianness,
}

impl SampleSpec {
    /// Create a validated sample spec
    ///
    /// # Errors
    /// * `UnsupportedFormat` - bit depth outside {8, 16, 32, 64}, 64-bit
    ///   integer PCM, or float encoding below 32 bits
    pub fn new(bit_depth: u16, encoding: Encoding, endianness: Endianness) -> Result<Self> {
        let spec = Self {
            bit_depth,
            encoding,
            endianness,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// 16-bit signed little-endian, the most common device format
    pub fn pcm16() -> Self {
        Self {
            bit_depth: 16,
            encoding: Encoding::SignedInt,
            endianness: Endianness::Little,
        }
    }

    /// Check that the codec can handle this spec
    pub fn validate(&self) -> Result<()> {
        SampleKind::resolve(self).map(|_| ())
    }

    /// Size of one sample in bytes
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bit_depth / 8)
    }
}

impl fmt::Display for SampleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-bit {} {}",
            self.bit_depth, self.encoding, self.endianness
        )
    }
}

// ============================================================================
// Sample Kinds
// ============================================================================

/// Concrete sample layout resolved from a [`SampleSpec`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleKind {
    U8,
    I8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl SampleKind {
    fn resolve(spec: &SampleSpec) -> Result<Self> {
        let kind = match (spec.bit_depth, spec.encoding) {
            (8, Encoding::UnsignedInt) => SampleKind::U8,
            (8, Encoding::SignedInt) => SampleKind::I8,
            (16, Encoding::SignedInt) => SampleKind::I16,
            (16, Encoding::UnsignedInt) => SampleKind::U16,
            (32, Encoding::SignedInt) => SampleKind::I32,
            (32, Encoding::UnsignedInt) => SampleKind::U32,
            (32, Encoding::Float) => SampleKind::F32,
            (64, Encoding::Float) => SampleKind::F64,
            (64, _) => {
                return Err(RackError::UnsupportedFormat {
                    details: "64-bit integer PCM".to_string(),
                })
            }
            (8 | 16, Encoding::Float) => {
                return Err(RackError::UnsupportedFormat {
                    details: format!("{}-bit float samples", spec.bit_depth),
                })
            }
            (depth, _) => {
                return Err(RackError::UnsupportedFormat {
                    details: format!("{}-bit samples (expected 8, 16, 32 or 64)", depth),
                })
            }
        };
        Ok(kind)
    }

    fn width(self) -> usize {
        match self {
            SampleKind::U8 | SampleKind::I8 => 1,
            SampleKind::I16 | SampleKind::U16 => 2,
            SampleKind::I32 | SampleKind::U32 | SampleKind::F32 => 4,
            SampleKind::F64 => 8,
        }
    }

    #[inline]
    fn read<B: ByteOrder>(self, bytes: &[u8]) -> f64 {
        match self {
            SampleKind::U8 => (f64::from(bytes[0]) - U8_OFFSET) / U8_OFFSET,
            SampleKind::I8 => f64::from(bytes[0] as i8) / I8_SCALE,
            SampleKind::I16 => f64::from(B::read_i16(bytes)) / I16_SCALE,
            SampleKind::U16 => (f64::from(B::read_u16(bytes)) - U16_OFFSET) / U16_OFFSET,
            SampleKind::I32 => f64::from(B::read_i32(bytes)) / I32_SCALE,
            SampleKind::U32 => (f64::from(B::read_u32(bytes)) - U32_OFFSET) / U32_OFFSET,
            SampleKind::F32 => f64::from(B::read_f32(bytes)),
            SampleKind::F64 => B::read_f64(bytes),
        }
    }

    #[inline]
    fn write<B: ByteOrder>(self, sample: f64, bytes: &mut [u8]) {
        let x = sample.clamp(-1.0, 1.0);
        match self {
            SampleKind::U8 => {
                bytes[0] = (x * U8_OFFSET + U8_OFFSET).round().clamp(0.0, 255.0) as u8;
            }
            SampleKind::I8 => bytes[0] = (x * I8_SCALE).round() as i8 as u8,
            SampleKind::I16 => B::write_i16(bytes, (x * I16_SCALE).round() as i16),
            SampleKind::U16 => B::write_u16(
                bytes,
                (x * U16_OFFSET + U16_OFFSET).round().clamp(0.0, 65535.0) as u16,
            ),
            SampleKind::I32 => B::write_i32(bytes, (x * I32_SCALE).round() as i32),
            SampleKind::U32 => B::write_u32(
                bytes,
                (x * U32_OFFSET + U32_OFFSET)
                    .round()
                    .clamp(0.0, f64::from(u32::MAX)) as u32,
            ),
            SampleKind::F32 => B::write_f32(bytes, x as f32),
            SampleKind::F64 => B::write_f64(bytes, x),
        }
    }
}

// ============================================================================
// Sample Codec
// ============================================================================

/// Codec bound to one validated [`SampleSpec`]
///
/// The pipeline worker builds one of these per run and reuses its output
/// buffers, so the per-block path never re-validates or reallocates.
#[derive(Debug, Clone, Copy)]
pub struct SampleCodec {
    spec: SampleSpec,
    kind: SampleKind,
}

impl SampleCodec {
    /// Create a codec for the given spec
    pub fn new(spec: SampleSpec) -> Result<Self> {
        let kind = SampleKind::resolve(&spec)?;
        Ok(Self { spec, kind })
    }

    pub fn spec(&self) -> &SampleSpec {
        &self.spec
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.kind.width()
    }

    /// Decode every whole sample in `bytes` into `out`, replacing its contents
    ///
    /// Trailing bytes that do not form a complete sample are ignored.
    pub fn decode_into(&self, bytes: &[u8], out: &mut Vec<f64>) {
        out.clear();
        match self.spec.endianness {
            Endianness::Little => self.decode_with::<LittleEndian>(bytes, out),
            Endianness::Big => self.decode_with::<BigEndian>(bytes, out),
        }
    }

    /// Encode `samples` into exactly `min(byte_len, samples.len() * width)` bytes
    ///
    /// Excess samples are dropped; a trailing partial-sample region is zeroed.
    pub fn encode_into(&self, samples: &[f64], byte_len: usize, out: &mut Vec<u8>) {
        let width = self.kind.width();
        let len = byte_len.min(samples.len() * width);
        out.clear();
        out.resize(len, 0);
        match self.spec.endianness {
            Endianness::Little => self.encode_with::<LittleEndian>(samples, out),
            Endianness::Big => self.encode_with::<BigEndian>(samples, out),
        }
    }

    fn decode_with<B: ByteOrder>(&self, bytes: &[u8], out: &mut Vec<f64>) {
        let kind = self.kind;
        out.extend(bytes.chunks_exact(kind.width()).map(|c| kind.read::<B>(c)));
    }

    fn encode_with<B: ByteOrder>(&self, samples: &[f64], out: &mut [u8]) {
        let kind = self.kind;
        for (chunk, &sample) in out.chunks_exact_mut(kind.width()).zip(samples) {
            kind.write::<B>(sample, chunk);
        }
    }
}

// ============================================================================
// Free Functions
// ============================================================================

/// Decode the first `count` bytes of `bytes` into normalized samples
///
/// # Arguments
/// * `bytes` - Raw PCM block
/// * `count` - Number of valid bytes (clamped to `bytes.len()`)
/// * `spec` - Layout of one sample
///
/// # Returns
/// `floor(min(count, bytes.len()) / bytes_per_sample)` samples in stream order
///
/// # Errors
/// * `UnsupportedFormat` - if the codec cannot handle `spec`
pub fn decode(bytes: &[u8], count: usize, spec: &SampleSpec) -> Result<Vec<f64>> {
    let codec = SampleCodec::new(*spec)?;
    let consumed = &bytes[..count.min(bytes.len())];
    let mut out = Vec::with_capacity(consumed.len() / codec.bytes_per_sample());
    codec.decode_into(consumed, &mut out);
    Ok(out)
}

/// Encode normalized samples into at most `byte_len` bytes
///
/// # Errors
/// * `UnsupportedFormat` - if the codec cannot handle `spec`
pub fn encode(samples: &[f64], byte_len: usize, spec: &SampleSpec) -> Result<Vec<u8>> {
    let codec = SampleCodec::new(*spec)?;
    let mut out = Vec::new();
    codec.encode_into(samples, byte_len, &mut out);
    Ok(out)
}
