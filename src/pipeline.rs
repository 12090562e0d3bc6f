//! The decode pipeline.
//!
//! Samples are fed to a [`StreamDecoder`] in decode order on a blocking
//! worker thread. Decoded images travel back over a bounded channel to an
//! async collector, which drops re-delivered tags, stops at the expected
//! count, end of stream or the global deadline, sorts by tag and places each
//! image on the timeline through a [`TimestampStrategy`].
//!
//! Dropping the collector (for example because its task was aborted) closes
//! the channel, and the worker stops at its next send.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc::{Sender, channel};
use tokio::time::{Instant, timeout_at};

use crate::configuration::ExtractOptions;
use crate::decoder::{DecodedImage, StreamDecoder};
use crate::demux::{CodedSample, TrackInfo};
use crate::error::FrameError;
use crate::metadata::VideoMetadata;
use crate::progress::{OperationType, ProgressCallback, ProgressTracker};
use crate::store::ExtractedFrame;

/// Track timing used to place decoded images on the timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackTiming {
    /// Frames per second.
    pub fps: f64,
    /// Duration in seconds.
    pub duration: f64,
    /// Ticks per second of the sample timestamp tags.
    pub timescale: u32,
}

impl TrackTiming {
    /// Timing from the demuxed track, with probed metadata filling in a
    /// missing duration or rate.
    pub fn from_track(track: &TrackInfo, metadata: &VideoMetadata) -> Self {
        let duration = match track.duration_seconds() {
            d if d > 0.0 => d,
            _ => metadata.duration,
        };
        let fps = track
            .frame_rate()
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(metadata.fps);
        Self {
            fps,
            duration,
            timescale: track.timescale,
        }
    }

    fn last_time(&self) -> f64 {
        (self.duration - 0.01).max(0.0)
    }
}

/// Places the `rank`-th image (in tag order) on the timeline.
pub trait TimestampStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Display time in seconds for the image at `rank` carrying `tag`.
    fn place(&self, rank: usize, tag: i64, timing: &TrackTiming) -> f64;
}

/// `time = min(rank / fps, duration - 0.01)`.
///
/// Assumes constant frame spacing and ignores composition timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexSpacing;

impl TimestampStrategy for IndexSpacing {
    fn name(&self) -> &'static str {
        "index-spacing"
    }

    fn place(&self, rank: usize, _tag: i64, timing: &TrackTiming) -> f64 {
        (rank as f64 / timing.fps).min(timing.last_time())
    }
}

/// `time = tag / timescale`, clamped into `[0, duration)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositionTime;

impl TimestampStrategy for CompositionTime {
    fn name(&self) -> &'static str {
        "composition-time"
    }

    fn place(&self, _rank: usize, tag: i64, timing: &TrackTiming) -> f64 {
        crate::conversion::ticks_to_seconds(tag, timing.timescale).clamp(0.0, timing.last_time())
    }
}

/// What the pipeline produced.
#[derive(Debug)]
pub struct PipelineOutput {
    /// Frames in strictly increasing time order.
    pub frames: Vec<ExtractedFrame>,
    /// Samples submitted to the decoder.
    pub expected: u64,
    /// Indices of samples the decoder rejected.
    pub failed_samples: Vec<u64>,
    /// `true` when the global deadline cut the run short.
    pub timed_out: bool,
}

enum PipelineEvent {
    Image(DecodedImage),
    SampleFailed { index: u64, reason: String },
    Fatal(FrameError),
}

/// Decodes a batch of samples into timeline-placed frames.
pub struct DecodePipeline {
    options: ExtractOptions,
    progress: Arc<dyn ProgressCallback>,
}

impl DecodePipeline {
    /// A pipeline reporting to the progress callback configured in `options`.
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

    /// Decode `samples` and place the results on the timeline.
    ///
    /// `open_decoder` runs on the worker thread, so decoders need not be
    /// [`Send`].
    ///
    /// # Errors
    ///
    /// - [`FrameError::DecoderInit`] if `open_decoder` fails.
    /// - [`FrameError::Decode`] on the first rejected sample when
    ///   `skip_failed_frames` is off.
    /// - [`FrameError::PipelineTimeout`] if the deadline passes before any
    ///   frame arrives.
    /// - [`FrameError::NoFramesExtracted`] if the decoder finished without
    ///   producing a frame.
    /// - [`FrameError::Cancelled`] when the cancellation token fires.
    pub async fn decode_all<F>(
        &self,
        open_decoder: F,
        samples: Vec<CodedSample>,
        timing: TrackTiming,
    ) -> Result<PipelineOutput, FrameError>
    where
        F: FnOnce() -> Result<Box<dyn StreamDecoder>, FrameError> + Send + 'static,
    {
        let expected = samples.len() as u64;
        if expected == 0 {
            return Err(FrameError::NoFramesExtracted);
        }

        let deadline = Instant::now() + self.options.pipeline_timeout;
        let (sender, mut receiver) = channel(self.options.channel_capacity);
        let options = self.options.clone();
        tokio::task::spawn_blocking(move || feed_decoder(open_decoder, samples, &options, &sender));

        let mut tracker = ProgressTracker::new(
            Arc::clone(&self.progress),
            OperationType::PipelineDecode,
            Some(expected),
            self.options.batch_size,
        );
        let mut seen = HashSet::new();
        let mut decoded: Vec<DecodedImage> = Vec::new();
        let mut failed_samples = Vec::new();
        let mut timed_out = false;

        while (decoded.len() as u64) < expected {
            match timeout_at(deadline, receiver.recv()).await {
                Err(_) => {
                    timed_out = true;
                    break;
                }
                Ok(None) => break,
                Ok(Some(PipelineEvent::Image(image))) => {
                    if !seen.insert(image.timestamp) {
                        log::warn!("Duplicate frame tag {}, skipping", image.timestamp);
                        continue;
                    }
                    decoded.push(image);
                    tracker.advance(Some(decoded.len() as u64 - 1), None);
                }
                Ok(Some(PipelineEvent::SampleFailed { index, reason })) => {
                    log::warn!("Failed to decode sample {index}: {reason}");
                    failed_samples.push(index);
                }
                Ok(Some(PipelineEvent::Fatal(error))) => return Err(error),
            }
        }
        drop(receiver);

        if timed_out {
            if decoded.is_empty() {
                return Err(FrameError::PipelineTimeout(self.options.pipeline_timeout));
            }
            log::warn!(
                "Decode pipeline timed out after {:?}; keeping {} of {} frames",
                self.options.pipeline_timeout,
                decoded.len(),
                expected
            );
        }
        if decoded.is_empty() {
            return Err(FrameError::NoFramesExtracted);
        }

        let frames = place_frames(decoded, &timing, self.options.timestamp_strategy.as_ref());
        tracker.finish();

        log::info!(
            "Decoded {} frames from {} samples ({} failed, {} placement)",
            frames.len(),
            expected,
            failed_samples.len(),
            self.options.timestamp_strategy.name()
        );

        Ok(PipelineOutput {
            frames,
            expected,
            failed_samples,
            timed_out,
        })
    }
}

/// Sort by tag and assign display times, dropping any image that would not
/// land strictly after its predecessor.
fn place_frames(
    mut decoded: Vec<DecodedImage>,
    timing: &TrackTiming,
    strategy: &dyn TimestampStrategy,
) -> Vec<ExtractedFrame> {
    decoded.sort_by_key(|image| image.timestamp);

    let mut frames: Vec<ExtractedFrame> = Vec::with_capacity(decoded.len());
    for (rank, image) in decoded.into_iter().enumerate() {
        let time = strategy.place(rank, image.timestamp, timing);
        if frames.last().is_some_and(|previous| time <= previous.time) {
            log::debug!("Dropping frame {rank}: time {time:.4}s does not advance");
            continue;
        }
        frames.push(ExtractedFrame {
            time,
            image: image.image,
        });
    }
    frames
}

/// Worker half: runs on a blocking thread until the samples are exhausted,
/// a fatal error occurs, or the collector hangs up.
fn feed_decoder<F>(
    open_decoder: F,
    samples: Vec<CodedSample>,
    options: &ExtractOptions,
    sender: &Sender<PipelineEvent>,
) where
    F: FnOnce() -> Result<Box<dyn StreamDecoder>, FrameError>,
{
    let mut decoder = match open_decoder() {
        Ok(decoder) => decoder,
        Err(error) => {
            let _ = sender.blocking_send(PipelineEvent::Fatal(error));
            return;
        }
    };

    for sample in &samples {
        if sender.is_closed() {
            log::debug!("Collector gone, stopping decode at sample {}", sample.index);
            return;
        }
        if options.is_cancelled() {
            let _ = sender.blocking_send(PipelineEvent::Fatal(FrameError::Cancelled));
            return;
        }

        let event_batch: Vec<PipelineEvent> = match decoder.decode(sample) {
            Ok(images) => images.into_iter().map(PipelineEvent::Image).collect(),
            Err(error) if options.skip_failed_frames => vec![PipelineEvent::SampleFailed {
                index: sample.index,
                reason: error.to_string(),
            }],
            Err(error) => vec![PipelineEvent::Fatal(error)],
        };
        for event in event_batch {
            let fatal = matches!(event, PipelineEvent::Fatal(_));
            if sender.blocking_send(event).is_err() || fatal {
                return;
            }
        }
    }

    match decoder.flush() {
        Ok(images) => {
            for image in images {
                if sender.blocking_send(PipelineEvent::Image(image)).is_err() {
                    return;
                }
            }
        }
        Err(error) if options.skip_failed_frames => {
            log::debug!("Decoder flush failed: {error}");
        }
        Err(error) => {
            let _ = sender.blocking_send(PipelineEvent::Fatal(error));
        }
    }
}
