//! WAV-file audio host
//!
//! Capture lines stream a WAV file as little-endian PCM blocks, optionally
//! paced to real time; playback lines write processed blocks into a WAV file
//! that is finalized on close. Supported sample layouts are 8-bit unsigned,
//! 16/32-bit signed integer and 32-bit float.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{debug, info};

use super::device::{
    AudioHost, CaptureLine, LineKind, LineRelease, LineRequest, PlaybackLine, ReadOutcome,
    StopSignal,
};
use super::format::AudioFormat;
use super::lock;
use crate::codec::{Encoding, Endianness};
use crate::error::{RackError, Result};

/// Longest sleep between stop-signal checks while pacing
const PACING_SLICE: Duration = Duration::from_millis(10);

type SharedReader = Arc<Mutex<Option<WavReader<BufReader<File>>>>>;
type SharedWriter = Arc<Mutex<Option<WavWriter<BufWriter<File>>>>>;

/// Line format of a WAV file
///
/// # Errors
/// * `DeviceUnavailable` - if the file cannot be opened or parsed
/// * `UnsupportedFormat` - for layouts the WAV lines cannot carry (e.g. 24-bit)
pub fn format_of(path: &Path) -> Result<AudioFormat> {
    let reader = open_reader(path)?;
    format_from_spec(reader.spec())
}

fn open_reader(path: &Path) -> Result<WavReader<BufReader<File>>> {
    WavReader::open(path).map_err(|e| RackError::DeviceUnavailable {
        reason: format!("cannot open {}: {}", path.display(), e),
    })
}

fn format_from_spec(spec: WavSpec) -> Result<AudioFormat> {
    let encoding = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 8) => Encoding::UnsignedInt,
        (SampleFormat::Int, 16 | 32) => Encoding::SignedInt,
        (SampleFormat::Float, 32) => Encoding::Float,
        (format, bits) => {
            return Err(RackError::UnsupportedFormat {
                details: format!("{}-bit {:?} WAV data", bits, format),
            })
        }
    };
    Ok(AudioFormat::new(
        spec.sample_rate,
        spec.bits_per_sample,
        spec.channels,
        encoding,
        Endianness::Little,
    ))
}

fn spec_for(format: &AudioFormat) -> Option<WavSpec> {
    let sample_format = match (format.encoding, format.bit_depth) {
        (Encoding::UnsignedInt, 8) | (Encoding::SignedInt, 16 | 32) => SampleFormat::Int,
        (Encoding::Float, 32) => SampleFormat::Float,
        _ => return None,
    };
    if format.endianness != Endianness::Little || format.channels == 0 {
        return None;
    }
    Some(WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bit_depth,
        sample_format,
    })
}

// ============================================================================
// Host
// ============================================================================

/// Audio host backed by WAV files
#[derive(Debug, Clone, Default)]
pub struct WavHost {
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    realtime: bool,
}

impl WavHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// File that capture lines read from
    pub fn with_input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input = Some(path.into());
        self
    }

    /// File that playback lines write to
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Pace capture reads to the file's sample rate
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn input(&self) -> Option<&Path> {
        self.input.as_deref()
    }

    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    fn input_path(&self) -> Result<&Path> {
        self.input().ok_or_else(|| RackError::DeviceUnavailable {
            reason: "no capture file configured".to_string(),
        })
    }
}

impl AudioHost for WavHost {
    fn name(&self) -> &str {
        "wav"
    }

    fn is_supported(&self, request: &LineRequest) -> bool {
        match request.kind {
            LineKind::Capture => self
                .input()
                .and_then(|path| format_of(path).ok())
                .map_or(false, |format| format == request.format),
            LineKind::Playback => self.output.is_some() && spec_for(&request.format).is_some(),
        }
    }

    fn open_capture(&self, format: Option<&AudioFormat>) -> Result<Box<dyn CaptureLine>> {
        let path = self.input_path()?;
        let reader = open_reader(path)?;
        let file_format = format_from_spec(reader.spec())?;
        if let Some(requested) = format {
            if *requested != file_format {
                return Err(RackError::LineUnsupported {
                    format: requested.to_string(),
                });
            }
        }

        debug!(
            "WAV capture line on {} ({}, {} frames)",
            path.display(),
            file_format,
            reader.duration()
        );
        let reader: SharedReader = Arc::new(Mutex::new(Some(reader)));
        let release = {
            let reader = Arc::clone(&reader);
            LineRelease::new(move || {
                lock(&reader).take();
                Ok(())
            })
        };
        Ok(Box::new(WavCapture {
            reader,
            format: file_format,
            realtime: self.realtime,
            started: None,
            delivered: 0,
            release,
        }))
    }

    fn open_playback(&self, format: &AudioFormat) -> Result<Box<dyn PlaybackLine>> {
        let path = self.output().ok_or_else(|| RackError::DeviceUnavailable {
            reason: "no playback file configured".to_string(),
        })?;
        let spec = spec_for(format).ok_or_else(|| RackError::LineUnsupported {
            format: format.to_string(),
        })?;
        let writer = WavWriter::create(path, spec).map_err(|e| RackError::DeviceUnavailable {
            reason: format!("cannot create {}: {}", path.display(), e),
        })?;

        debug!("WAV playback line on {} ({})", path.display(), format);
        let writer: SharedWriter = Arc::new(Mutex::new(Some(writer)));
        let release = {
            let writer = Arc::clone(&writer);
            let path = path.to_path_buf();
            LineRelease::new(move || {
                if let Some(wav) = lock(&writer).take() {
                    let frames = wav.duration();
                    wav.finalize()?;
                    info!("Wrote {} frames to {}", frames, path.display());
                }
                Ok(())
            })
        };
        Ok(Box::new(WavPlayback {
            writer,
            format: *format,
            release,
        }))
    }
}

// ============================================================================
// Lines
// ============================================================================

struct WavCapture {
    reader: SharedReader,
    format: AudioFormat,
    realtime: bool,
    started: Option<Instant>,
    delivered: usize,
    release: LineRelease,
}

impl WavCapture {
    fn fill(&self, buffer: &mut [u8]) -> Result<usize> {
        let mut guard = lock(&self.reader);
        let reader = guard.as_mut().ok_or_else(|| RackError::DeviceUnavailable {
            reason: "capture line is closed".to_string(),
        })?;
        let width = self.format.bytes_per_sample();
        let max_samples = buffer.len() / width;
        let mut count = 0;

        if self.format.encoding == Encoding::Float {
            for sample in reader.samples::<f32>().take(max_samples) {
                LittleEndian::write_f32(&mut buffer[count * width..], sample?);
                count += 1;
            }
        } else {
            for sample in reader.samples::<i32>().take(max_samples) {
                let value = sample?;
                let slot = &mut buffer[count * width..];
                match self.format.bit_depth {
                    8 => slot[0] = (value + 128) as u8,
                    16 => LittleEndian::write_i16(slot, value as i16),
                    _ => LittleEndian::write_i32(slot, value),
                }
                count += 1;
            }
        }
        Ok(count * width)
    }

    /// Sleep until the delivered audio is due, returning `false` if stopped
    fn pace(&self, stop: &StopSignal) -> bool {
        let Some(started) = self.started else {
            return true;
        };
        let due = started + self.format.duration_of(self.delivered);
        loop {
            if stop.is_raised() || self.release.is_released() {
                return false;
            }
            let now = Instant::now();
            if now >= due {
                return true;
            }
            thread::sleep((due - now).min(PACING_SLICE));
        }
    }
}

impl CaptureLine for WavCapture {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self) -> Result<()> {
        if self.realtime {
            self.started = Some(Instant::now());
        }
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8], stop: &StopSignal) -> Result<ReadOutcome> {
        if stop.is_raised() {
            return Ok(ReadOutcome::Interrupted);
        }
        let n = self.fill(buffer)?;
        if n == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }
        self.delivered += n;
        if !self.pace(stop) {
            return Ok(ReadOutcome::Interrupted);
        }
        Ok(ReadOutcome::Data(n))
    }

    fn stop(&mut self) -> Result<()> {
        self.started = None;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.release.release()
    }

    fn release_handle(&self) -> LineRelease {
        self.release.clone()
    }
}

struct WavPlayback {
    writer: SharedWriter,
    format: AudioFormat,
    release: LineRelease,
}

impl PlaybackLine for WavPlayback {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Every whole sample is written; a trailing partial sample is dropped
    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let mut guard = lock(&self.writer);
        let writer = guard.as_mut().ok_or_else(|| RackError::DeviceUnavailable {
            reason: "playback line is closed".to_string(),
        })?;
        let width = self.format.bytes_per_sample();

        for chunk in bytes.chunks_exact(width) {
            match (self.format.encoding, self.format.bit_depth) {
                (Encoding::Float, _) => writer.write_sample(LittleEndian::read_f32(chunk))?,
                (_, 8) => writer.write_sample((i16::from(chunk[0]) - 128) as i8)?,
                (_, 16) => writer.write_sample(LittleEndian::read_i16(chunk))?,
                _ => writer.write_sample(LittleEndian::read_i32(chunk))?,
            }
        }
        Ok(bytes.len())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(writer) = lock(&self.writer).as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.release.release()
    }

    fn release_handle(&self) -> LineRelease {
        self.release.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_wav(path: &Path, spec: WavSpec, samples: &[i32]) {
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &s in samples {
            if spec.bits_per_sample == 8 {
                writer.write_sample(s as i8).unwrap();
            } else {
                writer.write_sample(s).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn int_spec(bits: u16, channels: u16) -> WavSpec {
        WavSpec {
            channels,
            sample_rate: 8000,
            bits_per_sample: bits,
            sample_format: SampleFormat::Int,
        }
    }

    #[test]
    fn test_format_of() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.wav");
        write_wav(&path, int_spec(16, 2), &[0, 0]);

        assert_eq!(format_of(&path).unwrap(), AudioFormat::pcm16(8000, 2));
        assert!(matches!(
            format_of(&dir.path().join("missing.wav")),
            Err(RackError::DeviceUnavailable { .. })
        ));
    }

    #[test]
    fn test_24_bit_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.wav");
        write_wav(&path, int_spec(24, 1), &[1000]);
        assert!(matches!(
            format_of(&path),
            Err(RackError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_capture_16_bit_blocks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.wav");
        write_wav(&path, int_spec(16, 1), &[1, -2, 300]);

        let host = WavHost::new().with_input(&path);
        let mut line = host.open_capture(None).unwrap();
        line.start().unwrap();
        let stop = StopSignal::new();
        let mut buf = [0u8; 4];

        assert_eq!(line.read(&mut buf, &stop).unwrap(), ReadOutcome::Data(4));
        assert_eq!(LittleEndian::read_i16(&buf[0..2]), 1);
        assert_eq!(LittleEndian::read_i16(&buf[2..4]), -2);
        assert_eq!(line.read(&mut buf, &stop).unwrap(), ReadOutcome::Data(2));
        assert_eq!(LittleEndian::read_i16(&buf[0..2]), 300);
        assert_eq!(line.read(&mut buf, &stop).unwrap(), ReadOutcome::EndOfStream);
    }

    #[test]
    fn test_capture_8_bit_is_unsigned() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.wav");
        write_wav(&path, int_spec(8, 1), &[-128, 0, 127]);

        let host = WavHost::new().with_input(&path);
        let mut line = host.open_capture(None).unwrap();
        assert_eq!(line.format().encoding, Encoding::UnsignedInt);
        let mut buf = [0u8; 3];
        line.read(&mut buf, &StopSignal::new()).unwrap();
        assert_eq!(buf, [0, 128, 255]);
    }

    #[test]
    fn test_capture_rejects_other_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.wav");
        write_wav(&path, int_spec(16, 1), &[0]);

        let host = WavHost::new().with_input(&path);
        let other = AudioFormat::pcm16(44100, 1);
        assert!(!host.is_supported(&LineRequest::capture(other)));
        assert!(matches!(
            host.open_capture(Some(&other)),
            Err(RackError::LineUnsupported { .. })
        ));
    }

    #[test]
    fn test_playback_writes_wav() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.wav");
        let format = AudioFormat::pcm16(8000, 1);
        let host = WavHost::new().with_output(&path);
        assert!(host.is_supported(&LineRequest::playback(format)));

        let mut line = host.open_playback(&format).unwrap();
        let mut bytes = [0u8; 4];
        LittleEndian::write_i16(&mut bytes[0..2], 1234);
        LittleEndian::write_i16(&mut bytes[2..4], -1234);
        assert_eq!(line.write(&bytes).unwrap(), 4);
        line.close().unwrap();
        line.close().unwrap();

        let mut reader = WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1234, -1234]);
    }

    #[test]
    fn test_release_handle_finalizes_output() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.wav");
        let format = AudioFormat::pcm16(8000, 1);
        let host = WavHost::new().with_output(&path);

        let mut line = host.open_playback(&format).unwrap();
        let mut bytes = [0u8; 2];
        LittleEndian::write_i16(&mut bytes, 77);
        line.write(&bytes).unwrap();

        let release = line.release_handle();
        thread::spawn(move || release.release()).join().unwrap().unwrap();
        assert!(line.write(&bytes).is_err());
        line.close().unwrap();

        let mut reader = WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![77]);
    }

    #[test]
    fn test_missing_paths_are_unavailable() {
        let host = WavHost::new();
        assert!(matches!(
            host.open_capture(None),
            Err(RackError::DeviceUnavailable { .. })
        ));
        assert!(matches!(
            host.open_playback(&AudioFormat::pcm16(8000, 1)),
            Err(RackError::DeviceUnavailable { .. })
        ));
    }

    #[test]
    fn test_realtime_pacing_honours_stop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.wav");
        // one second of audio at 8 kHz
        write_wav(&path, int_spec(16, 1), &vec![0; 8000]);

        let host = WavHost::new().with_input(&path).realtime(true);
        let mut line = host.open_capture(None).unwrap();
        line.start().unwrap();

        let stop = StopSignal::new();
        let trigger = stop.clone();
        let raiser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            trigger.raise();
        });

        let started = Instant::now();
        let mut buf = vec![0u8; 16000];
        assert_eq!(line.read(&mut buf, &stop).unwrap(), ReadOutcome::Interrupted);
        assert!(started.elapsed() < Duration::from_millis(500));
        raiser.join().unwrap();
    }
}
