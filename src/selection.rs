//! Frame selection.
//!
//! Pure functions that derive a subset of an already-populated
//! [`FrameStore`]. [`FrameSelection`] bundles them behind one value so a
//! caller (or the CLI) can pick a method at runtime.
//!
//! # Example
//!
//! ```no_run
//! use framegrab::{ExtractionSession, FrameError, FrameSelection};
//!
//! # async fn example() -> Result<(), FrameError> {
//! let session = ExtractionSession::open("input.mp4")?;
//! let store = session.extract_all_frames(None).await?;
//! let every_fifth = FrameSelection::EveryNth(5).apply(&store)?;
//! println!("kept {} of {}", every_fifth.len(), store.len());
//! # Ok(())
//! # }
//! ```

use crate::error::FrameError;
use crate::store::{ExtractedFrame, FrameStore};

/// Lower bound on how many frames [`approximate_even_sampling`] picks.
const EVEN_SAMPLING_MIN: usize = 10;

/// Frames per picked sample in [`approximate_even_sampling`].
const EVEN_SAMPLING_DIVISOR: usize = 30;

/// A frame selection method.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameSelection {
    /// Every frame in the store.
    All,
    /// Frames whose index is divisible by `n`.
    EveryNth(u64),
    /// Greedily keep frames at least this many seconds apart.
    IntervalSeconds(f64),
    /// Resample to a target frame rate.
    TargetFps(f64),
    /// Evenly spaced frames, `max(10, ceil(len / 30))` of them.
    ///
    /// This is a fixed-count spread, not scene-change or keyframe detection.
    EvenSampling,
}

impl FrameSelection {
    /// Run the selection against `store`.
    pub fn apply<'a>(&self, store: &'a FrameStore) -> Result<Vec<&'a ExtractedFrame>, FrameError> {
        match *self {
            FrameSelection::All => Ok(store.iter().collect()),
            FrameSelection::EveryNth(n) => every_nth(store, n),
            FrameSelection::IntervalSeconds(interval) => fixed_interval(store, interval),
            FrameSelection::TargetFps(fps) => target_fps(store, fps),
            FrameSelection::EvenSampling => Ok(approximate_even_sampling(store)),
        }
    }
}

/// Keep frames whose zero-based index is divisible by `n`.
///
/// # Errors
///
/// [`FrameError::InvalidInterval`] when `n` is zero.
pub fn every_nth(store: &FrameStore, n: u64) -> Result<Vec<&ExtractedFrame>, FrameError> {
    if n == 0 {
        return Err(FrameError::InvalidInterval);
    }
    Ok(store
        .iter()
        .enumerate()
        .filter(|(index, _)| *index as u64 % n == 0)
        .map(|(_, frame)| frame)
        .collect())
}

/// Keep the next frame at least `interval` seconds after the last kept one.
///
/// The first frame is always kept.
///
/// # Errors
///
/// [`FrameError::InvalidInterval`] when `interval` is not a positive finite
/// number.
pub fn fixed_interval(
    store: &FrameStore,
    interval: f64,
) -> Result<Vec<&ExtractedFrame>, FrameError> {
    if !interval.is_finite() || interval <= 0.0 {
        return Err(FrameError::InvalidInterval);
    }

    let mut last_kept = -interval;
    Ok(store
        .iter()
        .filter(|frame| {
            if frame.time - last_kept >= interval {
                last_kept = frame.time;
                true
            } else {
                false
            }
        })
        .collect())
}

/// Resample the store to `fps` frames per second of source duration.
///
/// Picks `ceil(duration * fps)` frames at `floor(i * len / desired)`. When
/// the store holds no more frames than that, every frame is returned.
///
/// # Errors
///
/// [`FrameError::InvalidFrameRate`] when `fps` is not a positive finite
/// number.
pub fn target_fps(store: &FrameStore, fps: f64) -> Result<Vec<&ExtractedFrame>, FrameError> {
    if !fps.is_finite() || fps <= 0.0 {
        return Err(FrameError::InvalidFrameRate(fps));
    }
    let desired = (store.metadata().duration * fps).ceil().max(1.0) as usize;
    Ok(evenly_spaced(store.frames(), desired))
}

/// Pick `max(10, ceil(len / 30))` evenly spaced frames.
pub fn approximate_even_sampling(store: &FrameStore) -> Vec<&ExtractedFrame> {
    let count = EVEN_SAMPLING_MIN.max(store.len().div_ceil(EVEN_SAMPLING_DIVISOR));
    evenly_spaced(store.frames(), count)
}

fn evenly_spaced(frames: &[ExtractedFrame], count: usize) -> Vec<&ExtractedFrame> {
    if frames.len() <= count {
        return frames.iter().collect();
    }
    let step = frames.len() as f64 / count as f64;
    (0..count)
        .map(|i| (i as f64 * step).floor() as usize)
        .filter(|&index| index < frames.len())
        .map(|index| &frames[index])
        .collect()
}

/// Evenly spread snapshot times across `duration`.
///
/// One point lands mid-video. Otherwise the first point is `0`, the last is
/// `max(0, duration - 0.01)` and the rest are spaced `duration / (count - 1)`
/// apart.
///
/// ```
/// let points = framegrab::calculate_time_points(10.0, 3);
/// assert_eq!(points.len(), 3);
/// assert_eq!(points[..2], [0.0, 5.0]);
/// assert!((points[2] - 9.99).abs() < 1e-9);
/// ```
pub fn calculate_time_points(duration: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![duration / 2.0],
        _ => {
            let interval = duration / (count - 1) as f64;
            let mut points = Vec::with_capacity(count);
            points.push(0.0);
            points.extend((1..count - 1).map(|i| i as f64 * interval));
            points.push((duration - 0.01).max(0.0));
            points
        }
    }
}
