//! In-memory audio host
//!
//! Capture lines replay scripted byte blocks; playback lines record into a
//! shared buffer. Counters track how many lines were opened and are still
//! open, which makes the host useful for exercising the pipeline lifecycle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::debug;

use super::device::{
    AudioHost, CaptureLine, LineKind, LineRelease, LineRequest, PlaybackLine, ReadOutcome,
    StopSignal,
};
use super::format::AudioFormat;
use crate::codec::SampleCodec;
use crate::error::{RackError, Result};

/// How often a starved capture line checks for data or a stop request
const POLL_INTERVAL: Duration = Duration::from_millis(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct HostState {
    blocks: Mutex<VecDeque<Vec<u8>>>,
    recorded: Mutex<Vec<u8>>,
    end_of_stream: AtomicBool,
    unavailable: AtomicBool,
    capture_opens: AtomicUsize,
    playback_opens: AtomicUsize,
    open_lines: AtomicUsize,
}

/// Scripted audio host, cheap to clone; clones share state
#[derive(Debug, Clone)]
pub struct MemoryHost {
    format: AudioFormat,
    state: Arc<HostState>,
}

impl MemoryHost {
    /// Host whose only supported format is `format`
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            state: Arc::new(HostState::default()),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Queue one raw capture block
    pub fn push_block(&self, bytes: Vec<u8>) {
        lock(&self.state.blocks).push_back(bytes);
    }

    /// Encode samples in the host format and queue them as one block
    pub fn push_samples(&self, samples: &[f64]) -> Result<()> {
        let codec = SampleCodec::new(self.format.sample_spec())?;
        let mut bytes = Vec::new();
        codec.encode_into(samples, samples.len() * codec.bytes_per_sample(), &mut bytes);
        self.push_block(bytes);
        Ok(())
    }

    /// Report end-of-stream once the queued blocks are consumed
    pub fn finish(&self) {
        self.state.end_of_stream.store(true, Ordering::Release);
    }

    /// Make every subsequent open fail with `DeviceUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.unavailable.store(unavailable, Ordering::Release);
    }

    /// Everything written to playback lines so far
    pub fn recorded(&self) -> Vec<u8> {
        lock(&self.state.recorded).clone()
    }

    /// Recorded bytes decoded in the host format
    pub fn recorded_samples(&self) -> Result<Vec<f64>> {
        let codec = SampleCodec::new(self.format.sample_spec())?;
        let mut out = Vec::new();
        codec.decode_into(&lock(&self.state.recorded), &mut out);
        Ok(out)
    }

    pub fn pending_blocks(&self) -> usize {
        lock(&self.state.blocks).len()
    }

    pub fn capture_opens(&self) -> usize {
        self.state.capture_opens.load(Ordering::Acquire)
    }

    pub fn playback_opens(&self) -> usize {
        self.state.playback_opens.load(Ordering::Acquire)
    }

    /// Lines opened and not yet closed
    pub fn open_lines(&self) -> usize {
        self.state.open_lines.load(Ordering::Acquire)
    }

    /// Count a newly opened line and build the release that uncounts it
    fn track_open(&self) -> LineRelease {
        self.state.open_lines.fetch_add(1, Ordering::AcqRel);
        let state = Arc::clone(&self.state);
        LineRelease::new(move || {
            state.open_lines.fetch_sub(1, Ordering::AcqRel);
            Ok(())
        })
    }

    fn check_available(&self) -> Result<()> {
        if self.state.unavailable.load(Ordering::Acquire) {
            return Err(RackError::DeviceUnavailable {
                reason: "memory host marked unavailable".to_string(),
            });
        }
        Ok(())
    }
}

impl AudioHost for MemoryHost {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_supported(&self, request: &LineRequest) -> bool {
        request.format == self.format
    }

    fn open_capture(&self, format: Option<&AudioFormat>) -> Result<Box<dyn CaptureLine>> {
        self.check_available()?;
        let format = format.copied().unwrap_or(self.format);
        if !self.is_supported(&LineRequest::capture(format)) {
            return Err(RackError::LineUnsupported {
                format: format.to_string(),
            });
        }

        self.state.capture_opens.fetch_add(1, Ordering::AcqRel);
        debug!("memory capture line opened ({})", format);
        Ok(Box::new(MemoryCapture {
            format,
            state: Arc::clone(&self.state),
            running: false,
            release: self.track_open(),
        }))
    }

    fn open_playback(&self, format: &AudioFormat) -> Result<Box<dyn PlaybackLine>> {
        self.check_available()?;
        let request = LineRequest {
            kind: LineKind::Playback,
            format: *format,
        };
        if !self.is_supported(&request) {
            return Err(RackError::LineUnsupported {
                format: format.to_string(),
            });
        }

        self.state.playback_opens.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryPlayback {
            format: *format,
            state: Arc::clone(&self.state),
            release: self.track_open(),
        }))
    }
}

struct MemoryCapture {
    format: AudioFormat,
    state: Arc<HostState>,
    running: bool,
    release: LineRelease,
}

impl CaptureLine for MemoryCapture {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8], stop: &StopSignal) -> Result<ReadOutcome> {
        if self.release.is_released() {
            return Err(RackError::DeviceUnavailable {
                reason: "capture line is closed".to_string(),
            });
        }

        loop {
            if stop.is_raised() || !self.running || self.release.is_released() {
                return Ok(ReadOutcome::Interrupted);
            }

            {
                let mut blocks = lock(&self.state.blocks);
                if let Some(mut block) = blocks.pop_front() {
                    let n = block.len().min(buffer.len());
                    buffer[..n].copy_from_slice(&block[..n]);
                    if n < block.len() {
                        blocks.push_front(block.split_off(n));
                    }
                    return Ok(ReadOutcome::Data(n));
                }
            }

            if self.state.end_of_stream.load(Ordering::Acquire) {
                return Ok(ReadOutcome::EndOfStream);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.running = false;
        self.release.release()
    }

    fn release_handle(&self) -> LineRelease {
        self.release.clone()
    }
}

struct MemoryPlayback {
    format: AudioFormat,
    state: Arc<HostState>,
    release: LineRelease,
}

impl PlaybackLine for MemoryPlayback {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        if self.release.is_released() {
            return Err(RackError::DeviceUnavailable {
                reason: "playback line is closed".to_string(),
            });
        }
        lock(&self.state.recorded).extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.release.release()
    }

    fn release_handle(&self) -> LineRelease {
        self.release.clone()
    }
}
