//! Knobs for an [`ExtractionSession`](crate::ExtractionSession).
//!
//! Everything a run needs beyond the media itself lives in [`ExtractOptions`]:
//! timeouts, strategy choice, failure policy, image output and the observers
//! attached to the run.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use framegrab::{ExtractOptions, PixelFormat, StrategyPreference};
//!
//! let options = ExtractOptions::new()
//!     .with_strategy(StrategyPreference::SeekOnly)
//!     .with_frame_timeout(Duration::from_secs(5))
//!     .with_pixel_format(PixelFormat::Gray8)
//!     .with_resolution(Some(320), None)
//!     .with_skip_failed_frames(false);
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use ffmpeg_next::format::Pixel;

use crate::pipeline::{IndexSpacing, TimestampStrategy};
use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback};

/// How long the seek path waits for one frame before giving up on it.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_millis(3000);

/// Wall-clock ceiling for a whole pipeline decode.
pub const DEFAULT_PIPELINE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default average-luma threshold below which a capture counts as black.
pub const DEFAULT_BLACK_FRAME_THRESHOLD: f64 = 30.0;

/// Layout of the images held in [`ExtractedFrame`](crate::ExtractedFrame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    #[default]
    Rgb8,
    /// Opaque RGBA.
    Rgba8,
    /// Luma only.
    Gray8,
}

impl PixelFormat {
    pub(crate) fn to_ffmpeg_pixel(self) -> Pixel {
        match self {
            PixelFormat::Rgb8 => Pixel::RGB24,
            PixelFormat::Rgba8 => Pixel::RGBA,
            PixelFormat::Gray8 => Pixel::GRAY8,
        }
    }

    /// Stride of one pixel in a packed buffer.
    pub(crate) fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Shape of every image a run produces.
///
/// Unset dimensions follow the video. With exactly one dimension set and
/// `maintain_aspect_ratio` on, the other is scaled to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutputOptions {
    /// Channel layout of every output image.
    pub pixel_format: PixelFormat,
    /// Output width in pixels; `None` follows the video.
    pub width: Option<u32>,
    /// Output height in pixels; `None` follows the video.
    pub height: Option<u32>,
    /// Derive the missing dimension from the source aspect ratio when only
    /// one is set.
    pub maintain_aspect_ratio: bool,
}

impl Default for FrameOutputOptions {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Rgb8,
            width: None,
            height: None,
            maintain_aspect_ratio: true,
        }
    }
}

impl FrameOutputOptions {
    /// `(width, height)` of the output for a `source_width` x `source_height` video.
    pub fn resolve_dimensions(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        let scaled = |length: u32, numerator: u32, denominator: u32| {
            ((length as f64 * numerator as f64 / denominator as f64).round() as u32).max(1)
        };
        let keep_aspect = self.maintain_aspect_ratio;

        match (self.width, self.height) {
            (None, None) => (source_width, source_height),
            (Some(width), Some(height)) => (width, height),
            (Some(width), None) if keep_aspect && source_width > 0 => {
                (width, scaled(source_height, width, source_width))
            }
            (None, Some(height)) if keep_aspect && source_height > 0 => {
                (scaled(source_width, height, source_height), height)
            }
            (Some(width), None) => (width, source_height),
            (None, Some(height)) => (source_width, height),
        }
    }
}

/// Which extraction strategy a session may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyPreference {
    /// Use pipeline decoding when the backend supports it, and fall back to
    /// sequential seeking when it fails. This is the default.
    #[default]
    Auto,
    /// Pipeline decoding only. Failures surface instead of falling back.
    PipelineOnly,
    /// Sequential seeking only.
    SeekOnly,
}

/// Per-session run settings.
///
/// Out of the box a session picks its strategy automatically, skips frames
/// that fail, waits 3 s per seek and 60 s per pipeline decode, and spaces
/// frames evenly by index.
#[derive(Clone)]
pub struct ExtractOptions {
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) session_cancellation: Option<CancellationToken>,
    pub(crate) batch_size: u64,
    pub(crate) frame_output: FrameOutputOptions,
    pub(crate) skip_failed_frames: bool,
    pub(crate) max_frames: Option<u64>,
    pub(crate) frame_timeout: Duration,
    pub(crate) pipeline_timeout: Duration,
    pub(crate) strategy: StrategyPreference,
    pub(crate) timestamp_strategy: Arc<dyn TimestampStrategy>,
    pub(crate) channel_capacity: usize,
    pub(crate) black_frame_threshold: f64,
    pub(crate) max_snapshot_retries: u32,
}

impl Debug for ExtractOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ExtractOptions")
            .field("has_cancellation", &self.cancellation.is_some())
            .field("batch_size", &self.batch_size)
            .field("frame_output", &self.frame_output)
            .field("skip_failed_frames", &self.skip_failed_frames)
            .field("max_frames", &self.max_frames)
            .field("frame_timeout", &self.frame_timeout)
            .field("pipeline_timeout", &self.pipeline_timeout)
            .field("strategy", &self.strategy)
            .field("timestamp_strategy", &self.timestamp_strategy.name())
            .field("channel_capacity", &self.channel_capacity)
            .finish_non_exhaustive()
    }
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractOptions {
    /// Defaults: automatic strategy, skip failed frames, batch size 1,
    /// RGB output at source resolution, 3 s per seek, 60 s per pipeline
    /// decode, index-spaced timestamps, a channel of 8 images, black-frame
    /// threshold 30 with 3 snapshot attempts.
    pub fn new() -> Self {
        Self {
            progress: Arc::new(NoOpProgress),
            cancellation: None,
            session_cancellation: None,
            batch_size: 1,
            frame_output: FrameOutputOptions::default(),
            skip_failed_frames: true,
            max_frames: None,
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
            pipeline_timeout: DEFAULT_PIPELINE_TIMEOUT,
            strategy: StrategyPreference::Auto,
            timestamp_strategy: Arc::new(IndexSpacing),
            channel_capacity: 8,
            black_frame_threshold: DEFAULT_BLACK_FRAME_THRESHOLD,
            max_snapshot_retries: 3,
        }
    }

    /// Observer used when a call does not bring its own.
    ///
    /// A callback handed to
    /// [`extract_all_frames`](crate::ExtractionSession::extract_all_frames)
    /// wins over this one.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Runs stop with [`FrameError::Cancelled`](crate::FrameError::Cancelled)
    /// at the next sample or frame once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Pipeline decoding reports progress once per `size` frames (at least 1).
    #[must_use]
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Output channel layout. Defaults to [`PixelFormat::Rgb8`].
    #[must_use]
    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.frame_output.pixel_format = format;
        self
    }

    /// `None` keeps the video's own value for that dimension.
    #[must_use]
    pub fn with_resolution(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.frame_output.width = width;
        self.frame_output.height = height;
        self
    }

    /// Replace pixel format, dimensions and aspect handling in one go.
    #[must_use]
    pub fn with_frame_output(mut self, output: FrameOutputOptions) -> Self {
        self.frame_output = output;
        self
    }

    /// Choose whether failed samples and frames are skipped (the default)
    /// or abort the run on the first failure.
    #[must_use]
    pub fn with_skip_failed_frames(mut self, skip: bool) -> Self {
        self.skip_failed_frames = skip;
        self
    }

    /// Limit extraction to the first `max_frames` frames.
    ///
    /// The demuxer then only resolves that many samples. `None` or `0`
    /// removes the limit.
    #[must_use]
    pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
        self.max_frames = max_frames.filter(|&n| n > 0);
        self
    }

    /// Set the per-frame timeout used by the sequential seek path.
    #[must_use]
    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    /// Set the global decode pipeline timeout.
    ///
    /// The timeout is advisory: a partial result is accepted when at least
    /// one frame was decoded.
    #[must_use]
    pub fn with_pipeline_timeout(mut self, timeout: Duration) -> Self {
        self.pipeline_timeout = timeout;
        self
    }

    /// Restrict or force the extraction strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: StrategyPreference) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replace how decoded images are placed on the timeline.
    ///
    /// Defaults to [`IndexSpacing`].
    #[must_use]
    pub fn with_timestamp_strategy(mut self, strategy: Arc<dyn TimestampStrategy>) -> Self {
        self.timestamp_strategy = strategy;
        self
    }

    /// Set the capacity of the decoder → collector channel. Minimum 1.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Set the average-luma threshold used by the black-frame guard.
    #[must_use]
    pub fn with_black_frame_threshold(mut self, threshold: f64) -> Self {
        self.black_frame_threshold = threshold;
        self
    }

    /// Set how many attempts a single snapshot may take. Minimum 1.
    #[must_use]
    pub fn with_max_snapshot_retries(mut self, retries: u32) -> Self {
        self.max_snapshot_retries = retries.max(1);
        self
    }

    /// Bind a run to the session that started it, leaving the caller's own
    /// token untouched.
    pub(crate) fn bound_to_session(mut self, token: CancellationToken) -> Self {
        self.session_cancellation = Some(token);
        self
    }

    /// Returns `true` if cancellation has been requested by the caller or by
    /// the owning session.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .iter()
            .chain(self.session_cancellation.iter())
            .any(CancellationToken::is_cancelled)
    }
}
