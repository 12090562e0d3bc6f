//! The frame store and its queries.
//!
//! A [`FrameStore`] is the immutable, time-ordered result of one extraction
//! run. Sessions hand it out as an `Arc<FrameStore>`; every decoded bitmap
//! is released together when the last handle is dropped.

use std::slice::Iter;

use image::DynamicImage;

use crate::error::FrameError;
use crate::metadata::VideoMetadata;
use crate::strategy::ExtractionStrategy;

/// One decoded frame placed on the timeline.
#[derive(Debug, Clone)]
pub struct ExtractedFrame {
    /// Display time in seconds, in `[0, duration)`.
    pub time: f64,
    /// The owned decoded bitmap.
    pub image: DynamicImage,
}

/// How an extraction run went, reported alongside the frames.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionReport {
    /// Frames the run set out to produce.
    pub expected: u64,
    /// Frames that ended up in the store.
    pub extracted: u64,
    /// Sample or frame indices that failed and were skipped.
    pub failed_indices: Vec<u64>,
    /// The strategy that produced the frames.
    pub strategy: ExtractionStrategy,
    /// `true` when pipeline decoding failed and sequential seeking took over.
    pub fell_back: bool,
}

impl ExtractionReport {
    /// Number of failed indices.
    pub fn failed(&self) -> usize {
        self.failed_indices.len()
    }

    /// Extracted frames as a percentage of expected frames.
    pub fn success_rate(&self) -> f64 {
        if self.expected == 0 {
            return 0.0;
        }
        self.extracted as f64 / self.expected as f64 * 100.0
    }
}

/// Immutable, strictly time-ordered frames from one extraction session.
#[derive(Debug)]
pub struct FrameStore {
    frames: Vec<ExtractedFrame>,
    metadata: VideoMetadata,
    report: ExtractionReport,
}

impl FrameStore {
    /// Build a store.
    ///
    /// Frames are sorted by time; a frame sharing its predecessor's time is
    /// dropped so the order stays strict.
    pub fn new(
        mut frames: Vec<ExtractedFrame>,
        metadata: VideoMetadata,
        report: ExtractionReport,
    ) -> Self {
        frames.sort_by(|a, b| a.time.total_cmp(&b.time));
        frames.dedup_by(|later, earlier| later.time <= earlier.time);
        Self {
            frames,
            metadata,
            report,
        }
    }

    /// Metadata of the source the frames came from.
    pub fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    /// Counts and strategy of the run that built this store.
    pub fn report(&self) -> &ExtractionReport {
        &self.report
    }

    /// All frames in time order.
    pub fn frames(&self) -> &[ExtractedFrame] {
        &self.frames
    }

    /// Iterate over frames in time order.
    pub fn iter(&self) -> Iter<'_, ExtractedFrame> {
        self.frames.iter()
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` when no frame was extracted.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The frame whose time is closest to `target`.
    ///
    /// Binary search narrows to the two neighbours of `target`; the later
    /// neighbour only wins when it is strictly closer.
    ///
    /// # Errors
    ///
    /// [`FrameError::EmptyStore`] if the store holds no frames.
    pub fn nearest_to(&self, target: f64) -> Result<&ExtractedFrame, FrameError> {
        if self.frames.is_empty() {
            return Err(FrameError::EmptyStore);
        }

        let upper = self.frames.partition_point(|frame| frame.time < target);
        if upper == 0 {
            return Ok(&self.frames[0]);
        }
        if upper == self.frames.len() {
            return Ok(&self.frames[upper - 1]);
        }

        let before = &self.frames[upper - 1];
        let after = &self.frames[upper];
        if (after.time - target).abs() < (before.time - target).abs() {
            Ok(after)
        } else {
            Ok(before)
        }
    }

    /// Frames with `start <= time <= end`, in order.
    pub fn range(&self, start: f64, end: f64) -> Vec<&ExtractedFrame> {
        self.frames
            .iter()
            .filter(|frame| frame.time >= start && frame.time <= end)
            .collect()
    }

    /// Up to `count` frames spread evenly over the store.
    ///
    /// Returns every frame when the store holds `count` or fewer; otherwise
    /// picks index `floor(i * len / count)` for each `i < count`.
    pub fn thumbnails(&self, count: usize) -> Vec<&ExtractedFrame> {
        if self.frames.len() <= count {
            return self.frames.iter().collect();
        }
        let step = self.frames.len() as f64 / count as f64;
        (0..count)
            .map(|i| &self.frames[((i as f64 * step).floor() as usize).min(self.frames.len() - 1)])
            .collect()
    }

    /// The final frame.
    ///
    /// # Errors
    ///
    /// [`FrameError::EmptyStore`] if the store holds no frames.
    pub fn last(&self) -> Result<&ExtractedFrame, FrameError> {
        self.frames.last().ok_or(FrameError::EmptyStore)
    }
}

impl<'a> IntoIterator for &'a FrameStore {
    type Item = &'a ExtractedFrame;
    type IntoIter = Iter<'a, ExtractedFrame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}
