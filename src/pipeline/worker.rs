//! Pipeline worker: the capture → decode → rack → encode → playback loop

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use log::{debug, error, warn};

use super::device::{CaptureLine, LineRelease, PlaybackLine, ReadOutcome, StopSignal};
use super::{Shared, WorkerExit};
use crate::codec::SampleCodec;
use crate::rack::SharedRack;

// ============================================================================
// Run Statistics
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    blocks: AtomicU64,
    bytes: AtomicU64,
    empty_reads: AtomicU64,
}

impl StatCounters {
    pub(crate) fn clear(&self) {
        self.blocks.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
        self.empty_reads.store(0, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            blocks: self.blocks.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            empty_reads: self.empty_reads.load(Ordering::Relaxed),
        }
    }
}

/// Counters for the current (or last) run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Blocks that went through the rack
    pub blocks: u64,
    /// Captured bytes processed
    pub bytes: u64,
    /// Reads that returned no data
    pub empty_reads: u64,
}

// ============================================================================
// Device Lines
// ============================================================================

/// Lines owned by one run; closed exactly once, by `shutdown` or on drop
pub(crate) struct Lines {
    pub(crate) capture: Box<dyn CaptureLine>,
    pub(crate) playback: Option<Box<dyn PlaybackLine>>,
    released: bool,
}

impl Lines {
    pub(crate) fn new(
        capture: Box<dyn CaptureLine>,
        playback: Option<Box<dyn PlaybackLine>>,
    ) -> Self {
        Self {
            capture,
            playback,
            released: false,
        }
    }

    /// Release handles for every line, capture first
    pub(crate) fn release_handles(&self) -> Vec<LineRelease> {
        std::iter::once(self.capture.release_handle())
            .chain(self.playback.as_ref().map(|p| p.release_handle()))
            .collect()
    }

    pub(crate) fn shutdown(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Err(e) = self.capture.stop() {
            warn!("Failed to stop capture line: {}", e);
        }
        if let Err(e) = self.capture.close() {
            warn!("Failed to close capture line: {}", e);
        }
        if let Some(playback) = self.playback.as_mut() {
            if let Err(e) = playback.stop() {
                warn!("Failed to stop playback line: {}", e);
            }
            if let Err(e) = playback.close() {
                warn!("Failed to close playback line: {}", e);
            }
        }
    }
}

impl Drop for Lines {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Processing Loop
// ============================================================================

pub(crate) struct RunContext {
    pub(crate) rack: SharedRack,
    pub(crate) codec: SampleCodec,
    pub(crate) block_bytes: usize,
    pub(crate) stop: StopSignal,
    pub(crate) shared: Arc<Shared>,
    pub(crate) generation: u64,
}

/// Worker thread body
pub(crate) fn run(mut lines: Lines, ctx: RunContext) {
    let exit = process_blocks(&mut lines, &ctx);
    lines.shutdown();

    match &exit {
        WorkerExit::Failed(reason) => error!("Pipeline worker failed: {}", reason),
        other => debug!("Pipeline worker exited: {:?}", other),
    }
    ctx.shared.finish_run(ctx.generation, exit);
}

fn process_blocks(lines: &mut Lines, ctx: &RunContext) -> WorkerExit {
    let stats = &ctx.shared.stats;
    let mut bytes = vec![0u8; ctx.block_bytes];
    let mut samples = Vec::with_capacity(ctx.block_bytes / ctx.codec.bytes_per_sample());
    let mut out = Vec::with_capacity(ctx.block_bytes);

    loop {
        if ctx.stop.is_raised() {
            return WorkerExit::Stopped;
        }

        let n = match lines.capture.read(&mut bytes, &ctx.stop) {
            Ok(ReadOutcome::Data(0)) => {
                stats.empty_reads.fetch_add(1, Ordering::Relaxed);
                thread::yield_now();
                continue;
            }
            Ok(ReadOutcome::Data(n)) => n.min(bytes.len()),
            Ok(ReadOutcome::EndOfStream) => return WorkerExit::EndOfStream,
            Ok(ReadOutcome::Interrupted) => return WorkerExit::Stopped,
            Err(e) => return WorkerExit::Failed(e.to_string()),
        };

        ctx.codec.decode_into(&bytes[..n], &mut samples);
        {
            let mut rack = ctx.rack.lock();
            if !rack.is_empty() {
                if let Err(e) = rack.process_data(&mut samples) {
                    return WorkerExit::Failed(e.to_string());
                }
            }
        }

        ctx.codec.encode_into(&samples, n, &mut out);
        // a trailing partial sample is passed through as silence
        out.resize(n, 0);

        if let Some(playback) = lines.playback.as_mut() {
            let mut written = 0;
            while written < out.len() {
                match playback.write(&out[written..]) {
                    Ok(0) => {
                        return WorkerExit::Failed("playback line accepted no bytes".to_string())
                    }
                    Ok(count) => written += count,
                    Err(e) => return WorkerExit::Failed(e.to_string()),
                }
            }
        }

        stats.blocks.fetch_add(1, Ordering::Relaxed);
        stats.bytes.fetch_add(n as u64, Ordering::Relaxed);
    }
}
