//! Video metadata types.
//!
//! [`VideoMetadata`] is produced once per session by the
//! [`MetadataProbe`](crate::MetadataProbe) and cached for the lifetime of
//! the [`ExtractionSession`](crate::ExtractionSession).

/// Frame rate assumed when neither the container nor frame delivery yields one.
pub const DEFAULT_FRAME_RATE: f64 = 30.0;

/// Where the frame rate in [`VideoMetadata`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRateSource {
    /// The container states an exact constant rate.
    Container,
    /// Averaged from consecutive frame-delivery timestamps.
    Estimated,
    /// Neither was available; [`DEFAULT_FRAME_RATE`] was used.
    Default,
}

/// Metadata for a video source.
///
/// `total_frames` is always derived as `ceil(duration * fps)` and never read
/// from the container.
///
/// # Example
///
/// ```
/// use framegrab::{FrameRateSource, VideoMetadata};
///
/// let metadata = VideoMetadata::new(10.0, 640, 360, 30.0, FrameRateSource::Container);
/// assert_eq!(metadata.total_frames, 300);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct VideoMetadata {
    /// Duration in seconds. Always positive and finite.
    pub duration: f64,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frames per second, rounded to two decimals.
    pub fps: f64,
    /// `ceil(duration * fps)`.
    pub total_frames: u64,
    /// Provenance of `fps`.
    pub frame_rate_source: FrameRateSource,
}

impl VideoMetadata {
    /// Build metadata, rounding `fps` to two decimals and deriving
    /// `total_frames`.
    pub fn new(
        duration: f64,
        width: u32,
        height: u32,
        fps: f64,
        frame_rate_source: FrameRateSource,
    ) -> Self {
        let fps = round_frame_rate(fps);
        Self {
            duration,
            width,
            height,
            fps,
            total_frames: frame_count(duration, fps),
            frame_rate_source,
        }
    }

    /// Time between consecutive frames in seconds.
    pub fn frame_interval(&self) -> f64 {
        1.0 / self.fps
    }

    /// The last addressable display time, `max(0, duration - 0.01)`.
    pub fn last_frame_time(&self) -> f64 {
        (self.duration - 0.01).max(0.0)
    }
}

pub(crate) fn round_frame_rate(fps: f64) -> f64 {
    (fps * 100.0).round() / 100.0
}

pub(crate) fn frame_count(duration: f64, fps: f64) -> u64 {
    if !(duration.is_finite() && fps.is_finite()) || duration <= 0.0 || fps <= 0.0 {
        return 0;
    }
    (duration * fps).ceil() as u64
}
