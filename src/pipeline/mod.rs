//! Real-time Pipeline
//!
//! Owns an [`AudioHost`], the line format and one worker thread per run. The
//! worker reads a block from the capture line, decodes it, runs the shared
//! rack over it, encodes it back to the same byte length and writes it to the
//! playback line (duplex mode) or discards it.
//!
//! Lifecycle is Idle → Running → Idle. Cancellation is cooperative: `stop`
//! raises the run's [`StopSignal`], waits up to the grace period for the
//! worker and detaches it with a warning if it does not exit in time. A
//! detached worker's lines are released through their [`LineRelease`]
//! handles before `stop` returns.

pub mod device;
pub mod format;
pub mod memory;
pub mod wav;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

pub use device::{
    AudioHost, CaptureLine, LineKind, LineRelease, LineRequest, PlaybackLine, ReadOutcome,
    StopSignal,
};
pub use format::AudioFormat;
pub use memory::MemoryHost;
pub use wav::WavHost;
pub use worker::PipelineStats;

use crate::codec::SampleCodec;
use crate::error::{RackError, Result};
use crate::rack::SharedRack;
use worker::{Lines, RunContext, StatCounters};

/// Shortest accepted block duration
pub const MIN_BLOCK_MS: u64 = 15;
/// Longest accepted block duration
pub const MAX_BLOCK_MS: u64 = 50;

const WORKER_THREAD_NAME: &str = "audiorack-pipeline";
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Configuration
// ============================================================================

/// Pipeline settings, stored alongside presets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Duration of one capture block in milliseconds
    pub block_ms: u64,
    /// How long `stop` waits for the worker before detaching it
    pub grace_ms: u64,
    /// Write processed blocks to a playback line
    pub duplex: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            block_ms: 20,
            grace_ms: 500,
            duplex: true,
        }
    }
}

impl PipelineConfig {
    pub fn block_duration(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_BLOCK_MS..=MAX_BLOCK_MS).contains(&self.block_ms) {
            return Err(RackError::invalid_parameter(
                "block_ms",
                self.block_ms as f64,
                format!("{}..={} ms", MIN_BLOCK_MS, MAX_BLOCK_MS),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Run State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
}

/// Why the last worker stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// `stop` was called
    Stopped,
    /// The capture line ran out of data
    EndOfStream,
    /// A device or effect error aborted the loop
    Failed(String),
}

/// State shared with the worker thread
#[derive(Debug, Default)]
pub(crate) struct Shared {
    running: AtomicBool,
    generation: AtomicU64,
    stats: StatCounters,
    last_exit: Mutex<Option<WorkerExit>>,
}

impl Shared {
    /// Mark a new run as started and return its generation
    fn begin_run(&self) -> u64 {
        let mut last_exit = lock(&self.last_exit);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *last_exit = None;
        self.stats.clear();
        self.running.store(true, Ordering::Release);
        generation
    }

    /// Record how a run ended; stale generations are ignored
    pub(crate) fn finish_run(&self, generation: u64, exit: WorkerExit) {
        let mut last_exit = lock(&self.last_exit);
        if self.generation.load(Ordering::Acquire) != generation {
            debug!("Ignoring exit of detached worker (run {})", generation);
            return;
        }
        *last_exit = Some(exit);
        self.running.store(false, Ordering::Release);
    }

    /// Retire a run whose worker will not report back
    fn abandon_run(&self, generation: u64, exit: WorkerExit) {
        let mut last_exit = lock(&self.last_exit);
        if self
            .generation
            .compare_exchange(generation, generation + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            *last_exit = Some(exit);
            self.running.store(false, Ordering::Release);
        }
    }
}

struct Worker {
    handle: JoinHandle<()>,
    stop: StopSignal,
    done: Receiver<()>,
    releases: Vec<LineRelease>,
    generation: u64,
}

impl Worker {
    /// Signal the worker, then join it or detach it after `grace`
    ///
    /// Either way the run's lines are closed when this returns.
    fn retire(self, grace: Duration, shared: &Shared) {
        self.stop.raise();
        match self.done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    error!("Pipeline worker panicked");
                    shared.abandon_run(
                        self.generation,
                        WorkerExit::Failed("worker panicked".to_string()),
                    );
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Pipeline worker did not exit within {:?}; detaching it",
                    grace
                );
                for release in &self.releases {
                    if let Err(e) = release.release() {
                        warn!("Failed to release line of detached worker: {}", e);
                    }
                }
                shared.abandon_run(self.generation, WorkerExit::Stopped);
            }
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Capture → rack → playback pipeline
pub struct Pipeline {
    host: Arc<dyn AudioHost>,
    rack: SharedRack,
    format: AudioFormat,
    config: PipelineConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl Pipeline {
    /// Create a pipeline bound to the host's default capture format
    ///
    /// The format is discovered by opening a capture line without a format
    /// constraint, reading its format and closing it again.
    ///
    /// # Errors
    /// * `InvalidParameter` - if the block duration is out of range
    /// * `DeviceUnavailable` - if no capture line can be opened
    /// * `UnsupportedFormat` - if the codec cannot handle the device format
    pub fn new(host: Arc<dyn AudioHost>, rack: SharedRack, config: PipelineConfig) -> Result<Self> {
        let mut probe = host.open_capture(None)?;
        let format = probe.format();
        if let Err(e) = probe.close() {
            warn!("Failed to close probe line: {}", e);
        }
        debug!("Discovered default format on {}: {}", host.name(), format);
        Self::with_format(host, rack, format, config)
    }

    /// Create a pipeline for an explicit line format
    pub fn with_format(
        host: Arc<dyn AudioHost>,
        rack: SharedRack,
        format: AudioFormat,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        format.validate()?;
        Ok(Self {
            host,
            rack,
            format,
            config,
            shared: Arc::new(Shared::default()),
            worker: Mutex::new(None),
        })
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Handle to the rack the worker processes
    pub fn rack(&self) -> &SharedRack {
        &self.rack
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn state(&self) -> PipelineState {
        if self.is_running() {
            PipelineState::Running
        } else {
            PipelineState::Idle
        }
    }

    /// Counters of the current or most recent run
    pub fn stats(&self) -> PipelineStats {
        self.shared.stats.snapshot()
    }

    /// How the most recent run ended, `None` while running or before any run
    pub fn last_exit(&self) -> Option<WorkerExit> {
        lock(&self.shared.last_exit).clone()
    }

    /// Bytes in one capture block
    pub fn block_bytes(&self) -> usize {
        self.format.block_bytes(self.config.block_duration())
    }

    /// Acquire the lines and spawn the worker; a no-op while running
    ///
    /// # Errors
    /// * `LineUnsupported` - if the host refuses a line in this format
    /// * `DeviceUnavailable` - if a line cannot be opened
    ///
    /// On error every acquired line is released and the pipeline stays Idle.
    pub fn start(&self) -> Result<()> {
        let mut slot = lock(&self.worker);
        if self.is_running() {
            match slot.as_ref() {
                Some(worker) if worker.handle.is_finished() => {}
                _ => {
                    debug!("Pipeline already running");
                    return Ok(());
                }
            }
        }
        if let Some(previous) = slot.take() {
            previous.retire(self.config.grace_period(), &self.shared);
        }

        let lines = self.acquire_lines()?;
        let generation = self.shared.begin_run();
        match self.spawn_worker(lines, generation) {
            Ok(worker) => {
                *slot = Some(worker);
                info!(
                    "Pipeline started on {} ({}, {} byte blocks)",
                    self.host.name(),
                    self.format,
                    self.block_bytes()
                );
                Ok(())
            }
            Err(e) => {
                self.shared.abandon_run(
                    generation,
                    WorkerExit::Failed(format!("worker spawn failed: {}", e)),
                );
                Err(e)
            }
        }
    }

    /// Stop the worker and release the lines; a no-op while Idle
    pub fn stop(&self) {
        let mut slot = lock(&self.worker);
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);
        if let Some(worker) = slot.take() {
            worker.retire(self.config.grace_period(), &self.shared);
        }
        if was_running {
            info!("Pipeline stopped");
        }
    }

    /// Block until the worker exits on its own, or until `timeout` elapses
    ///
    /// Returns `true` if the pipeline is Idle.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let started = Instant::now();
        while self.is_running() {
            if timeout.map_or(false, |t| started.elapsed() >= t) {
                return false;
            }
            thread::sleep(WAIT_POLL_INTERVAL);
        }
        true
    }

    fn acquire_lines(&self) -> Result<Lines> {
        let request = LineRequest::capture(self.format);
        if !self.host.is_supported(&request) {
            return Err(RackError::LineUnsupported {
                format: self.format.to_string(),
            });
        }
        let capture = self.host.open_capture(Some(&self.format))?;
        // dropping `lines` on any later error closes what was opened
        let mut lines = Lines::new(capture, None);
        lines.capture.start()?;

        if self.config.duplex {
            if !self.host.is_supported(&LineRequest::playback(self.format)) {
                return Err(RackError::LineUnsupported {
                    format: self.format.to_string(),
                });
            }
            let playback = lines.playback.insert(self.host.open_playback(&self.format)?);
            playback.start()?;
        }
        Ok(lines)
    }

    fn spawn_worker(&self, lines: Lines, generation: u64) -> Result<Worker> {
        let codec = SampleCodec::new(self.format.sample_spec())?;
        let releases = lines.release_handles();
        let stop = StopSignal::new();
        let (done_tx, done_rx) = channel::bounded(1);

        let ctx = RunContext {
            rack: self.rack.clone(),
            codec,
            block_bytes: self.block_bytes(),
            stop: stop.clone(),
            shared: Arc::clone(&self.shared),
            generation,
        };

        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                worker::run(lines, ctx);
                let _ = done_tx.send(());
            })?;

        Ok(Worker {
            handle,
            stop,
            done: done_rx,
            releases,
            generation,
        })
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::Band;
    use crate::effects::{
        BalancerParams, ChannelBalancer, EffectModule, EffectRuntime, Platform, StreamLayout,
    };
    use crate::filter::{DesignedFilter, FilterKind};
    use crate::rack::FilterRack;

    fn format() -> AudioFormat {
        AudioFormat::pcm16(8000, 1)
    }

    fn pipeline(host: &MemoryHost, rack: SharedRack) -> Pipeline {
        Pipeline::new(Arc::new(host.clone()), rack, PipelineConfig::default()).unwrap()
    }

    fn ramp(len: usize) -> Vec<f64> {
        (0..len).map(|i| (i as f64 / len as f64) - 0.5).collect()
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let config: PipelineConfig = serde_json::from_str("{\"duplex\": false}").unwrap();
        assert_eq!(config.block_ms, 20);
        assert_eq!(config.grace_ms, 500);
        assert!(!config.duplex);

        let bad = PipelineConfig {
            block_ms: 5,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(RackError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_new_discovers_format_and_releases_probe() {
        let host = MemoryHost::new(format());
        let pipeline = pipeline(&host, SharedRack::default());
        assert_eq!(pipeline.format(), format());
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert_eq!(host.capture_opens(), 1);
        assert_eq!(host.open_lines(), 0);
        // 20 ms at 8 kHz mono 16-bit
        assert_eq!(pipeline.block_bytes(), 320);
    }

    #[test]
    fn test_start_twice_opens_one_line() {
        let host = MemoryHost::new(format());
        let pipeline = pipeline(&host, SharedRack::default());

        pipeline.start().unwrap();
        pipeline.start().unwrap();
        assert!(pipeline.is_running());
        // probe + one run
        assert_eq!(host.capture_opens(), 2);
        assert_eq!(host.playback_opens(), 1);

        pipeline.stop();
        assert!(!pipeline.is_running());
        assert_eq!(host.open_lines(), 0);
        assert_eq!(pipeline.last_exit(), Some(WorkerExit::Stopped));
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let host = MemoryHost::new(format());
        let pipeline = pipeline(&host, SharedRack::default());
        pipeline.stop();
        pipeline.stop();
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert_eq!(pipeline.last_exit(), None);
    }

    #[test]
    fn test_passthrough_with_empty_rack() {
        let host = MemoryHost::new(format());
        let input = ramp(400);
        host.push_samples(&input).unwrap();
        host.finish();

        let pipeline = pipeline(&host, SharedRack::default());
        pipeline.start().unwrap();
        assert!(pipeline.wait(Some(Duration::from_secs(5))));

        assert_eq!(pipeline.last_exit(), Some(WorkerExit::EndOfStream));
        assert_eq!(host.recorded().len(), 800);
        let output = host.recorded_samples().unwrap();
        for (a, b) in input.iter().zip(&output) {
            assert!((a - b).abs() < 1.0 / 32768.0 + 1e-12);
        }
        // 800 bytes in 320-byte blocks
        assert_eq!(pipeline.stats().blocks, 3);
        assert_eq!(pipeline.stats().bytes, 800);
        assert_eq!(host.open_lines(), 0);
    }

    #[test]
    fn test_output_matches_rack_applied_offline() {
        let make = || {
            DesignedFilter::with_band(
                FilterKind::Butterworth,
                4,
                8000.0,
                None,
                Band::Lowpass { cutoff: 500.0 },
            )
            .unwrap()
        };
        let input: Vec<f64> = (0..320)
            .map(|i| 0.4 * (i as f64 * 0.9).sin())
            .collect();

        let host = MemoryHost::new(format());
        host.push_samples(&input).unwrap();
        host.finish();

        let mut rack = FilterRack::new();
        rack.push(make());
        let pipeline = pipeline(&host, SharedRack::new(rack));
        pipeline.start().unwrap();
        assert!(pipeline.wait(Some(Duration::from_secs(5))));

        // the decoded 16-bit input, filtered offline
        let mut expected = crate::codec::decode(
            &crate::codec::encode(&input, 640, &format().sample_spec()).unwrap(),
            640,
            &format().sample_spec(),
        )
        .unwrap();
        make().process(&mut expected);

        let output = host.recorded_samples().unwrap();
        assert_eq!(output.len(), expected.len());
        for (a, b) in expected.iter().zip(&output) {
            assert!((a - b).abs() <= 1.0 / 32768.0 + 1e-9);
        }
    }

    #[test]
    fn test_effect_error_fails_run() {
        let runtime = EffectRuntime::load(Platform::new("linux", "x86_64").unwrap());
        let layout = StreamLayout::new(1, 16, 8000.0).unwrap();
        let balancer = ChannelBalancer::new(&runtime, layout, BalancerParams::default()).unwrap();
        let mut rack = FilterRack::new();
        rack.push(Box::new(balancer) as Box<dyn EffectModule>);

        let host = MemoryHost::new(format());
        host.push_samples(&ramp(160)).unwrap();

        let pipeline = pipeline(&host, SharedRack::new(rack));
        pipeline.start().unwrap();
        assert!(pipeline.wait(Some(Duration::from_secs(5))));

        assert!(matches!(pipeline.last_exit(), Some(WorkerExit::Failed(_))));
        assert!(host.recorded().is_empty());
        assert_eq!(host.open_lines(), 0);
    }

    #[test]
    fn test_stop_interrupts_blocked_read() {
        let host = MemoryHost::new(format());
        let pipeline = pipeline(&host, SharedRack::default());
        pipeline.start().unwrap();
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        pipeline.stop();
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(pipeline.last_exit(), Some(WorkerExit::Stopped));
        assert_eq!(host.open_lines(), 0);
    }

    #[test]
    fn test_restart_after_end_of_stream() {
        let host = MemoryHost::new(format());
        host.finish();
        let pipeline = pipeline(&host, SharedRack::default());

        pipeline.start().unwrap();
        assert!(pipeline.wait(Some(Duration::from_secs(5))));
        pipeline.start().unwrap();
        assert!(pipeline.wait(Some(Duration::from_secs(5))));
        assert_eq!(host.capture_opens(), 3);
        assert_eq!(pipeline.last_exit(), Some(WorkerExit::EndOfStream));
    }

    #[test]
    fn test_capture_only_mode() {
        let host = MemoryHost::new(format());
        host.push_samples(&ramp(160)).unwrap();
        host.finish();
        let config = PipelineConfig {
            duplex: false,
            ..PipelineConfig::default()
        };
        let pipeline =
            Pipeline::new(Arc::new(host.clone()), SharedRack::default(), config).unwrap();
        pipeline.start().unwrap();
        assert!(pipeline.wait(Some(Duration::from_secs(5))));

        assert_eq!(host.playback_opens(), 0);
        assert!(host.recorded().is_empty());
        assert_eq!(pipeline.stats().blocks, 1);
    }

    #[test]
    fn test_unsupported_format_and_unavailable_device() {
        let host = MemoryHost::new(format());
        let other = Pipeline::with_format(
            Arc::new(host.clone()),
            SharedRack::default(),
            AudioFormat::pcm16(44100, 2),
            PipelineConfig::default(),
        )
        .unwrap();
        assert!(matches!(
            other.start(),
            Err(RackError::LineUnsupported { .. })
        ));
        assert!(!other.is_running());

        let pipeline = pipeline(&host, SharedRack::default());
        host.set_unavailable(true);
        assert!(matches!(
            pipeline.start(),
            Err(RackError::DeviceUnavailable { .. })
        ));
        assert!(!pipeline.is_running());
        assert_eq!(host.open_lines(), 0);
    }

    #[test]
    fn test_drop_stops_pipeline() {
        let host = MemoryHost::new(format());
        {
            let pipeline = pipeline(&host, SharedRack::default());
            pipeline.start().unwrap();
            assert_eq!(host.open_lines(), 2);
        }
        assert_eq!(host.open_lines(), 0);
    }

    // A capture line that ignores the stop signal for a while
    #[derive(Default)]
    struct StubbornHost {
        open: Arc<AtomicU64>,
    }

    struct StubbornLine {
        release: LineRelease,
    }

    impl CaptureLine for StubbornLine {
        fn format(&self) -> AudioFormat {
            format()
        }
        fn start(&mut self) -> Result<()> {
            Ok(())
        }
        fn read(&mut self, buffer: &mut [u8], _stop: &StopSignal) -> Result<ReadOutcome> {
            thread::sleep(Duration::from_millis(300));
            Ok(ReadOutcome::Data(buffer.len()))
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

    impl AudioHost for StubbornHost {
        fn name(&self) -> &str {
            "stubborn"
        }
        fn is_supported(&self, request: &LineRequest) -> bool {
            request.kind == LineKind::Capture
        }
        fn open_capture(&self, _format: Option<&AudioFormat>) -> Result<Box<dyn CaptureLine>> {
            self.open.fetch_add(1, Ordering::AcqRel);
            let open = Arc::clone(&self.open);
            let release = LineRelease::new(move || {
                open.fetch_sub(1, Ordering::AcqRel);
                Ok(())
            });
            Ok(Box::new(StubbornLine { release }))
        }
        fn open_playback(&self, format: &AudioFormat) -> Result<Box<dyn PlaybackLine>> {
            Err(RackError::LineUnsupported {
                format: format.to_string(),
            })
        }
    }

    #[test]
    fn test_stubborn_worker_is_detached() {
        let config = PipelineConfig {
            grace_ms: 20,
            duplex: false,
            ..PipelineConfig::default()
        };
        let host = Arc::new(StubbornHost::default());
        let pipeline = Pipeline::new(host.clone(), SharedRack::default(), config).unwrap();
        pipeline.start().unwrap();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(host.open.load(Ordering::Acquire), 1);

        let started = Instant::now();
        pipeline.stop();
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(!pipeline.is_running());
        assert_eq!(pipeline.last_exit(), Some(WorkerExit::Stopped));
        // released even though the worker is still inside its read
        assert_eq!(host.open.load(Ordering::Acquire), 0);

        // the late worker must not clobber a new run
        pipeline.start().unwrap();
        assert_eq!(host.open.load(Ordering::Acquire), 1);
        thread::sleep(Duration::from_millis(400));
        assert!(pipeline.is_running());
        assert_eq!(host.open.load(Ordering::Acquire), 1);
        pipeline.stop();
        assert_eq!(host.open.load(Ordering::Acquire), 0);
    }
}
