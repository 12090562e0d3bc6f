//! Progress observation and cooperative cancellation for extraction runs.
//!
//! A [`ProgressCallback`] receives [`ProgressInfo`] snapshots while frames are
//! being decoded or captured. A [`CancellationToken`] stops a run at the next
//! sample or frame boundary.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use framegrab::{ExtractionSession, FrameError, ProgressCallback, ProgressInfo};
//!
//! struct Percent;
//!
//! impl ProgressCallback for Percent {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         if let Some(done) = info.percentage {
//!             eprintln!("{:?}: {done:.0}%", info.operation);
//!         }
//!     }
//! }
//!
//! # async fn example() -> Result<(), FrameError> {
//! let session = ExtractionSession::open("clip.mp4")?;
//! let frames = session.extract_all_frames(Some(Arc::new(Percent))).await?;
//! eprintln!("{} frames held", frames.len());
//! # Ok(())
//! # }
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

/// Which stage of the engine produced a [`ProgressInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OperationType {
    /// Reading duration, dimensions and frame rate.
    MetadataProbe,
    /// Feeding demuxed samples to the stream decoder.
    PipelineDecode,
    /// Stepping a playback surface one frame position at a time.
    SequentialSeek,
    /// Capturing frames at caller-chosen times.
    Snapshot,
}

/// Point-in-time view of a running extraction.
///
/// Pipeline decoding emits one of these every
/// [`batch_size`](crate::ExtractOptions::with_batch_size) frames. The seek
/// path emits one every 30 frame positions and on the last position.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub operation: OperationType,
    /// Frames or samples handled so far.
    pub current: u64,
    /// Expected number of frames or samples, when known up front.
    pub total: Option<u64>,
    /// `current / total` in percent, capped at 100.
    pub percentage: Option<f32>,
    pub elapsed: Duration,
    /// Linear projection from the throughput observed so far.
    pub estimated_remaining: Option<Duration>,
    pub current_frame: Option<u64>,
    /// Media position in seconds.
    pub current_time: Option<f64>,
}

/// Receives [`ProgressInfo`] snapshots.
///
/// Callbacks run on blocking worker threads as well as on async tasks, so
/// implementors must be `Send + Sync`. A callback cannot stop a run; cancel a
/// [`CancellationToken`] for that.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, info: &ProgressInfo);
}

/// Callback used when the caller supplies none.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Shared stop flag checked by every extraction loop.
///
/// Clones observe the same flag, so one clone can be handed to another
/// thread or task and cancelled from there.
///
/// ```
/// use framegrab::CancellationToken;
///
/// let token = CancellationToken::new();
/// let handle = token.clone();
/// handle.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Turns per-frame events into throttled [`ProgressInfo`] reports.
pub(crate) struct ProgressTracker {
    sink: Arc<dyn ProgressCallback>,
    operation: OperationType,
    total: Option<u64>,
    processed: u64,
    every: u64,
    pending: u64,
    started: Instant,
}

impl ProgressTracker {
    pub(crate) fn new(
        sink: Arc<dyn ProgressCallback>,
        operation: OperationType,
        total: Option<u64>,
        every: u64,
    ) -> Self {
        Self {
            sink,
            operation,
            total,
            processed: 0,
            every: every.max(1),
            pending: 0,
            started: Instant::now(),
        }
    }

    /// Count one finished item; reports once `every` items have piled up.
    pub(crate) fn advance(&mut self, frame_index: Option<u64>, time: Option<f64>) {
        self.processed += 1;
        self.pending += 1;
        if self.pending >= self.every {
            self.pending = 0;
            self.emit(frame_index, time);
        }
    }

    /// Jump to `processed` and report regardless of the batch cadence.
    pub(crate) fn report_at(&mut self, processed: u64, frame_index: u64, time: f64) {
        self.processed = processed;
        self.pending = 0;
        self.emit(Some(frame_index), Some(time));
    }

    pub(crate) fn finish(&mut self) {
        self.emit(None, None);
    }

    fn emit(&self, current_frame: Option<u64>, current_time: Option<f64>) {
        let elapsed = self.started.elapsed();
        let expected = self.total.filter(|&total| total > 0);

        let percentage =
            expected.map(|total| (self.processed as f32 * 100.0 / total as f32).min(100.0));
        let estimated_remaining = expected.filter(|_| self.processed > 0).map(|total| {
            let left = total.saturating_sub(self.processed);
            elapsed.mul_f64(left as f64 / self.processed as f64)
        });

        self.sink.on_progress(&ProgressInfo {
            operation: self.operation,
            current: self.processed,
            total: self.total,
            percentage,
            elapsed,
            estimated_remaining,
            current_frame,
            current_time,
        });
    }
}
