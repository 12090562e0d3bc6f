//! Metadata probing.
//!
//! [`MetadataProbe`] reads duration and dimensions from a playback element
//! and settles on a frame rate: the container's stated rate when it is
//! exact, otherwise an average over the first few frame deliveries,
//! otherwise [`DEFAULT_FRAME_RATE`].
//!
//! # Example
//!
//! ```no_run
//! use framegrab::MetadataProbe;
//!
//! let metadata = MetadataProbe::probe_file("input.mp4")?;
//! println!(
//!     "{:.2}s, {}x{} @ {} fps ({} frames)",
//!     metadata.duration, metadata.width, metadata.height, metadata.fps, metadata.total_frames
//! );
//! # Ok::<(), framegrab::FrameError>(())
//! ```

use std::path::Path;

use crate::configuration::FrameOutputOptions;
use crate::error::FrameError;
use crate::metadata::{DEFAULT_FRAME_RATE, FrameRateSource, VideoMetadata};
use crate::playback::{FfmpegPlayback, Playback};

/// Frame deliveries sampled when estimating the frame rate.
const DELIVERY_SAMPLES: usize = 10;

/// Derives [`VideoMetadata`] from a playback element.
pub struct MetadataProbe;

impl MetadataProbe {
    /// Probe an opened playback element.
    ///
    /// `source_name` only labels errors.
    ///
    /// # Errors
    ///
    /// [`FrameError::MediaOpen`] when the reported duration is zero, negative
    /// or not finite.
    pub fn probe(
        playback: &mut dyn Playback,
        source_name: &str,
    ) -> Result<VideoMetadata, FrameError> {
        let duration = playback.duration();
        if !duration.is_finite() || duration <= 0.0 {
            return Err(FrameError::MediaOpen {
                source_name: source_name.to_string(),
                reason: format!("unusable duration {duration}"),
            });
        }
        let (width, height) = playback.dimensions();

        let (fps, frame_rate_source) = match playback.stated_frame_rate() {
            Some(rate) if rate.is_finite() && rate > 0.0 => (rate, FrameRateSource::Container),
            _ => match estimate_frame_rate(playback) {
                Some(rate) => (rate, FrameRateSource::Estimated),
                None => (DEFAULT_FRAME_RATE, FrameRateSource::Default),
            },
        };

        let metadata = VideoMetadata::new(duration, width, height, fps, frame_rate_source);
        log::info!(
            "Probed {source_name}: {:.3}s, {}x{}, {} fps ({:?}), {} frames",
            metadata.duration,
            metadata.width,
            metadata.height,
            metadata.fps,
            metadata.frame_rate_source,
            metadata.total_frames
        );
        Ok(metadata)
    }

    /// Open `path` with FFmpeg and probe it.
    ///
    /// # Errors
    ///
    /// [`FrameError::MediaOpen`] if the file cannot be opened or reports no
    /// usable duration.
    pub fn probe_file<P: AsRef<Path>>(path: P) -> Result<VideoMetadata, FrameError> {
        let path = path.as_ref();
        let mut playback = FfmpegPlayback::open(path, &FrameOutputOptions::default())?;
        Self::probe(&mut playback, &path.display().to_string())
    }
}

/// Running average of the inter-frame deltas over up to
/// [`DELIVERY_SAMPLES`] deliveries. The first rate seeds the average.
fn estimate_frame_rate(playback: &mut dyn Playback) -> Option<f64> {
    let mut last_time: Option<f64> = None;
    let mut average: Option<f64> = None;
    let mut samples = 0u32;

    for _ in 0..DELIVERY_SAMPLES {
        let time = match playback.next_frame_delivery() {
            Ok(Some(time)) => time,
            Ok(None) => break,
            Err(error) => {
                log::debug!("Frame delivery sampling stopped: {error}");
                break;
            }
        };

        if let Some(previous) = last_time {
            let delta = time - previous;
            if delta > 0.0 {
                let rate = 1.0 / delta;
                average = Some(match average {
                    Some(fps) => (fps * samples as f64 + rate) / (samples as f64 + 1.0),
                    None => rate,
                });
                samples += 1;
            }
        }
        last_time = Some(time);
    }

    average.filter(|fps| fps.is_finite() && *fps > 0.0)
}
