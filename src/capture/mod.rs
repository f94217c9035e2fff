//! Capture side: frame sources and the thread that feeds the frame slot

mod test_pattern;

pub use test_pattern::TestPatternSource;

use crate::encoder::{AspectRatio, FrameEncoder};
use crate::frame::{FrameSlot, RawFrame};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("frame source error: {0}")]
    Source(String),

    #[error("frame source has no more frames")]
    Exhausted,

    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Anything that can hand out raw frames: a camera, a file, a generator.
///
/// Called from the capture thread only, so implementations may block.
pub trait FrameSource: Send + 'static {
    fn next_frame(&mut self) -> Result<RawFrame, CaptureError>;

    fn name(&self) -> &str {
        "frame-source"
    }
}

/// Statistics for capture
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub frames_published: u64,
    pub encode_failures: u64,
    pub source_errors: u64,
}

#[derive(Debug, Default)]
struct CaptureCounters {
    frames_captured: AtomicU64,
    frames_published: AtomicU64,
    encode_failures: AtomicU64,
    source_errors: AtomicU64,
}

/// Encodes frames and stores them in the slot.
///
/// Encoding failures leave the previous frame in place; the caller is never
/// made to wait on readers.
#[derive(Clone)]
pub struct FramePublisher {
    slot: FrameSlot,
    encoder: FrameEncoder,
    aspect_ratio: Option<AspectRatio>,
    counters: Arc<CaptureCounters>,
}

impl FramePublisher {
    pub fn new(slot: FrameSlot, encoder: FrameEncoder, aspect_ratio: Option<AspectRatio>) -> Self {
        Self {
            slot,
            encoder,
            aspect_ratio,
            counters: Arc::new(CaptureCounters::default()),
        }
    }

    /// Encode `raw` and make it the current frame. Returns whether the slot
    /// was updated.
    pub fn push_frame(&self, raw: &RawFrame) -> bool {
        match self.encoder.encode(raw, self.aspect_ratio) {
            Ok(jpeg) => {
                self.slot.set(jpeg);
                self.counters.frames_published.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                let failures = self.counters.encode_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures % 100 == 1 {
                    warn!(error = %e, failures = %failures, "Dropping frame that failed to encode");
                } else {
                    debug!(error = %e, "Dropping frame that failed to encode");
                }
                false
            }
        }
    }

    /// Publish an already encoded JPEG as is
    pub fn push_jpeg(&self, jpeg: Bytes) -> bool {
        if !jpeg.starts_with(&JPEG_SOI) {
            self.counters.encode_failures.fetch_add(1, Ordering::Relaxed);
            debug!(len = %jpeg.len(), "Rejecting frame without JPEG start marker");
            return false;
        }

        self.slot.set(jpeg);
        self.counters.frames_published.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn slot(&self) -> &FrameSlot {
        &self.slot
    }

    pub fn get_stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.counters.frames_captured.load(Ordering::Relaxed),
            frames_published: self.counters.frames_published.load(Ordering::Relaxed),
            encode_failures: self.counters.encode_failures.load(Ordering::Relaxed),
            source_errors: self.counters.source_errors.load(Ordering::Relaxed),
        }
    }
}

/// Runs a `FrameSource` on a dedicated thread at a fixed cadence
pub struct CaptureWorker {
    publisher: FramePublisher,
    is_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CaptureWorker {
    pub fn spawn<S: FrameSource>(
        mut source: S,
        publisher: FramePublisher,
        interval: Duration,
    ) -> Result<Self, CaptureError> {
        let is_running = Arc::new(AtomicBool::new(true));

        info!(
            source = %source.name(),
            interval_ms = %interval.as_millis(),
            "Starting capture"
        );

        let thread_running = Arc::clone(&is_running);
        let thread_publisher = publisher.clone();
        let thread = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || capture_loop(&mut source, &thread_publisher, interval, &thread_running))?;

        Ok(Self {
            publisher,
            is_running,
            thread: Some(thread),
        })
    }

    /// Signal the thread and wait for it to finish its current frame
    pub fn stop(&mut self) {
        self.is_running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Capture thread panicked");
            }

            let stats = self.get_stats();
            info!(
                frames = %stats.frames_captured,
                published = %stats.frames_published,
                failures = %stats.encode_failures,
                "Capture stopped"
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    pub fn get_stats(&self) -> CaptureStats {
        self.publisher.get_stats()
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop<S: FrameSource>(
    source: &mut S,
    publisher: &FramePublisher,
    interval: Duration,
    is_running: &AtomicBool,
) {
    let counters = &publisher.counters;
    let mut next_tick = Instant::now();

    while is_running.load(Ordering::Relaxed) {
        match source.next_frame() {
            Ok(frame) => {
                counters.frames_captured.fetch_add(1, Ordering::Relaxed);
                publisher.push_frame(&frame);
            }
            Err(CaptureError::Exhausted) => {
                info!(source = %source.name(), "Frame source exhausted");
                break;
            }
            Err(e) => {
                counters.source_errors.fetch_add(1, Ordering::Relaxed);
                warn!(source = %source.name(), error = %e, "Failed to capture frame");
            }
        }

        // Keep a steady cadence; if a frame overran its slot, restart the
        // schedule instead of bursting to catch up.
        next_tick += interval;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        } else {
            next_tick = now;
        }
    }

    is_running.store(false, Ordering::Relaxed);
}
