//! Sequential seek extraction.
//!
//! The fallback path: one playback element, positioned at each frame time in
//! turn and snapshotted. It is strictly sequential because a playback
//! element only has one position.
//!
//! A failed frame costs at most the per-frame timeout and, unless the run is
//! strict, is skipped and summarised at the end.

use std::sync::Arc;
use std::time::Duration;

use crate::configuration::ExtractOptions;
use crate::error::FrameError;
use crate::metadata::VideoMetadata;
use crate::playback::{Playback, is_black_frame};
use crate::progress::{OperationType, ProgressCallback, ProgressTracker};
use crate::store::ExtractedFrame;

/// Progress is reported every this many frames, and on the last one.
const PROGRESS_EVERY: u64 = 30;

/// Failed indices listed in the completion summary.
const FAILED_INDICES_SHOWN: usize = 10;

/// Upfront frame buffer reservation; the position count comes from
/// container metadata and is not trusted for sizing.
const INITIAL_FRAME_CAPACITY: u64 = 1024;

/// Step back after a black capture on the first attempt.
const BLACK_FRAME_STEP: f64 = 0.1;

/// Step back on later attempts and after capture errors.
const RETRY_STEP: f64 = 0.05;

/// What a sequential run produced.
#[derive(Debug)]
pub struct SeekOutcome {
    /// Frames in strictly increasing time order.
    pub frames: Vec<ExtractedFrame>,
    /// Frame positions the run visited.
    pub expected: u64,
    /// Frame indices that failed and were skipped.
    pub failed_indices: Vec<u64>,
}

/// Seek-and-snapshot extraction over a [`Playback`].
pub struct SequentialSeek {
    options: ExtractOptions,
    progress: Arc<dyn ProgressCallback>,
}

impl SequentialSeek {
    /// An extractor reporting to the progress callback configured in
    /// `options`.
    pub fn new(options: ExtractOptions) -> Self {
        let progress = Arc::clone(&options.progress);
        Self { options, progress }
    }

    /// Report to `progress` instead of the configured callback.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Visit `ceil(duration * fps)` positions (capped by `max_frames`) at
    /// `min(i / fps, duration - 0.01)` and snapshot each.
    ///
    /// Blocks the calling thread.
    ///
    /// # Errors
    ///
    /// - [`FrameError::InvalidFrameRate`] for a non-positive rate.
    /// - [`FrameError::FrameCapture`] on the first failure when
    ///   `skip_failed_frames` is off.
    /// - [`FrameError::NoFramesExtracted`] when every position failed.
    /// - [`FrameError::Cancelled`] when the cancellation token fires.
    pub fn extract_all(
        &self,
        playback: &mut dyn Playback,
        metadata: &VideoMetadata,
    ) -> Result<SeekOutcome, FrameError> {
        if !metadata.fps.is_finite() || metadata.fps <= 0.0 {
            return Err(FrameError::InvalidFrameRate(metadata.fps));
        }

        let total = match self.options.max_frames {
            Some(limit) => metadata.total_frames.min(limit),
            None => metadata.total_frames,
        };
        let interval = metadata.frame_interval();
        let last_time = metadata.last_frame_time();
        let timeout = self.options.frame_timeout;

        let mut tracker = ProgressTracker::new(
            Arc::clone(&self.progress),
            OperationType::SequentialSeek,
            Some(total),
            1,
        );
        let mut frames: Vec<ExtractedFrame> =
            Vec::with_capacity(total.min(INITIAL_FRAME_CAPACITY) as usize);
        let mut failed_indices = Vec::new();

        log::debug!(
            "Sequential extraction of {total} frames at {:.4}s intervals, {:?} per frame",
            interval,
            timeout
        );

        for index in 0..total {
            if self.options.is_cancelled() {
                return Err(FrameError::Cancelled);
            }

            let time = (index as f64 * interval).min(last_time);
            match capture_frame(playback, time, timeout) {
                Ok(image) => {
                    if frames.last().is_some_and(|previous| time <= previous.time) {
                        log::debug!("Frame {index} repeats time {time:.4}s, skipping");
                    } else {
                        frames.push(ExtractedFrame { time, image });
                    }
                }
                Err(error) => {
                    log::warn!("Frame extraction failed for frame {index} at {time:.3}s: {error}");
                    failed_indices.push(index);
                    if !self.options.skip_failed_frames {
                        return Err(FrameError::FrameCapture {
                            index,
                            time,
                            reason: error.to_string(),
                        });
                    }
                }
            }

            if index % PROGRESS_EVERY == 0 || index + 1 == total {
                tracker.report_at(index + 1, index, time);
            }
        }

        if !failed_indices.is_empty() {
            summarize_failures(frames.len(), total, &failed_indices);
        }
        if frames.is_empty() {
            return Err(FrameError::NoFramesExtracted);
        }

        Ok(SeekOutcome {
            frames,
            expected: total,
            failed_indices,
        })
    }
}

fn summarize_failures(extracted: usize, total: u64, failed: &[u64]) {
    let success_rate = (total - failed.len() as u64) as f64 / total as f64 * 100.0;
    log::info!(
        "Frame extraction completed: {extracted}/{total} frames extracted ({success_rate:.1}% success rate)"
    );
    let shown: Vec<String> = failed
        .iter()
        .take(FAILED_INDICES_SHOWN)
        .map(u64::to_string)
        .collect();
    let more = if failed.len() > FAILED_INDICES_SHOWN { "..." } else { "" };
    log::warn!(
        "Failed frames: {} (indices: {}{more})",
        failed.len(),
        shown.join(", ")
    );
}

/// Position `playback` at `time` and snapshot it.
pub fn capture_frame(
    playback: &mut dyn Playback,
    time: f64,
    timeout: Duration,
) -> Result<image::DynamicImage, FrameError> {
    playback.seek(time, timeout)?;
    playback.snapshot()
}

/// Capture a single frame at `time`, stepping back past black frames.
///
/// A capture whose average luma falls below `black_threshold` is retried
/// `0.1 s` earlier, then in `0.05 s` steps, never before `0`. Once
/// `max_attempts` is used up or time reaches `0`, the last capture is
/// returned however dark it is. A failed capture is retried `0.05 s` earlier
/// while attempts remain and time stays positive.
///
/// The returned frame carries the time it was actually captured at.
pub fn capture_frame_with_retry(
    playback: &mut dyn Playback,
    time: f64,
    timeout: Duration,
    black_threshold: f64,
    max_attempts: u32,
) -> Result<ExtractedFrame, FrameError> {
    let max_attempts = max_attempts.max(1);
    let mut current = time.max(0.0);
    let mut attempt = 1;

    loop {
        match capture_frame(playback, current, timeout) {
            Ok(image) => {
                if !is_black_frame(&image, black_threshold)
                    || attempt >= max_attempts
                    || current <= 0.0
                {
                    return Ok(ExtractedFrame {
                        time: current,
                        image,
                    });
                }
                let step = if attempt == 1 {
                    BLACK_FRAME_STEP
                } else {
                    RETRY_STEP
                };
                let retry_at = (current - step).max(0.0);
                log::warn!("Black frame at {current:.3}s, retrying at {retry_at:.3}s");
                current = retry_at;
            }
            Err(error) => {
                let retry_at = (current - RETRY_STEP).max(0.0);
                if attempt >= max_attempts || retry_at <= 0.0 {
                    return Err(error);
                }
                log::warn!("Frame capture failed at {current:.3}s ({error}), retrying at {retry_at:.3}s");
                current = retry_at;
            }
        }
        attempt += 1;
    }
}
