//! Device subsystem interface
//!
//! An [`AudioHost`] hands out capture and playback lines for a format. Lines
//! are moved onto the pipeline worker while it runs, so they only need to be
//! `Send`. Blocking reads take the run's [`StopSignal`] and must return
//! [`ReadOutcome::Interrupted`] soon after it is raised.
//!
//! Every line also hands out a [`LineRelease`], which frees the device from
//! any thread, including while the worker is still blocked on the line.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::format::AudioFormat;
use crate::error::Result;

/// Cooperative cancellation flag shared between the pipeline and its lines
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

type ReleaseAction = Box<dyn FnOnce() -> Result<()> + Send>;

struct ReleaseInner {
    released: AtomicBool,
    action: Mutex<Option<ReleaseAction>>,
}

/// Idempotent, thread-safe release of one line's device
///
/// Clones share the same action, which runs at most once.
#[derive(Clone)]
pub struct LineRelease(Arc<ReleaseInner>);

impl LineRelease {
    pub fn new(action: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        Self(Arc::new(ReleaseInner {
            released: AtomicBool::new(false),
            action: Mutex::new(Some(Box::new(action))),
        }))
    }

    /// Run the release action unless it already ran
    ///
    /// # Errors
    /// Whatever the action returns on its first run.
    pub fn release(&self) -> Result<()> {
        self.0.released.store(true, Ordering::Release);
        let action = self
            .0
            .action
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match action {
            Some(action) => action(),
            None => Ok(()),
        }
    }

    pub fn is_released(&self) -> bool {
        self.0.released.load(Ordering::Acquire)
    }
}

impl fmt::Debug for LineRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineRelease")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Result of one blocking read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were written to the front of the buffer
    Data(usize),
    /// The source is exhausted
    EndOfStream,
    /// The stop signal was raised while waiting
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Capture,
    Playback,
}

/// Description of a line the pipeline wants to open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRequest {
    pub kind: LineKind,
    pub format: AudioFormat,
}

impl LineRequest {
    pub fn capture(format: AudioFormat) -> Self {
        Self {
            kind: LineKind::Capture,
            format,
        }
    }

    pub fn playback(format: AudioFormat) -> Self {
        Self {
            kind: LineKind::Playback,
            format,
        }
    }
}

/// Source of captured audio
pub trait CaptureLine: Send {
    fn format(&self) -> AudioFormat;

    fn start(&mut self) -> Result<()>;

    /// Block until some bytes are available, the source ends, or `stop` is raised
    fn read(&mut self, buffer: &mut [u8], stop: &StopSignal) -> Result<ReadOutcome>;

    fn stop(&mut self) -> Result<()>;

    /// Release the device; closing twice is a no-op
    fn close(&mut self) -> Result<()>;

    /// Handle that performs `close`'s release from another thread
    fn release_handle(&self) -> LineRelease;
}

/// Sink for processed audio
pub trait PlaybackLine: Send {
    fn format(&self) -> AudioFormat;

    fn start(&mut self) -> Result<()>;

    /// Write a block, returning the number of bytes accepted
    fn write(&mut self, bytes: &[u8]) -> Result<usize>;

    fn stop(&mut self) -> Result<()>;

    /// Release the device; closing twice is a no-op
    fn close(&mut self) -> Result<()>;

    /// Handle that performs `close`'s release from another thread
    fn release_handle(&self) -> LineRelease;
}

/// Audio device subsystem
pub trait AudioHost: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a line of this kind and format can be opened
    fn is_supported(&self, request: &LineRequest) -> bool;

    /// Open a capture line; `None` asks for the device's default format
    fn open_capture(&self, format: Option<&AudioFormat>) -> Result<Box<dyn CaptureLine>>;

    fn open_playback(&self, format: &AudioFormat) -> Result<Box<dyn PlaybackLine>>;
}
