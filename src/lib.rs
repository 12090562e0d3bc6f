//! # framegrab
//!
//! Extract every frame of a video as an ordered sequence of owned images,
//! then slice it into snapshots, thumbnails and N-sample subsets.
//!
//! `framegrab` demuxes MP4 containers itself and feeds the coded samples
//! through a streaming decoder. When that pipeline is unavailable or fails,
//! it falls back to seeking a playback element frame by frame. Decoding is
//! powered by FFmpeg via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate; frames are
//! returned as [`image::DynamicImage`] values.
//!
//! ## Quick Start
//!
//! ### Extract All Frames
//!
//! ```no_run
//! use framegrab::{ExtractionSession, FrameError};
//!
//! # async fn example() -> Result<(), FrameError> {
//! let session = ExtractionSession::open("input.mp4")?;
//! let store = session.extract_all_frames(None).await?;
//! println!("{} frames via {}", store.len(), store.report().strategy);
//!
//! let frame = store.nearest_to(2.0)?;
//! frame.image.save("two_seconds.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Select a Subset
//!
//! ```no_run
//! use framegrab::{ExtractionSession, FrameError, FrameSelection};
//!
//! # async fn example() -> Result<(), FrameError> {
//! let session = ExtractionSession::open("input.mp4")?;
//!
//! // Resample to 5 fps
//! let frames = session.select(FrameSelection::TargetFps(5.0)).await?;
//!
//! // Twelve evenly spaced thumbnails from the same cached store
//! let store = session.extract_all_frames(None).await?;
//! let thumbnails = store.thumbnails(12);
//! # Ok(())
//! # }
//! ```
//!
//! ### Single Snapshots
//!
//! ```no_run
//! use framegrab::{ExtractionSession, FrameError};
//!
//! # async fn example() -> Result<(), FrameError> {
//! let session = ExtractionSession::open("input.mp4")?;
//! let poster = session.snapshot_at(3.5).await?;
//! poster.image.save("poster.jpg")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **MP4 demuxing** - box tree parsing, codec configuration records and
//!   sample tables, without going through FFmpeg's demuxer
//! - **Pipeline decoding** - samples decoded on a blocking worker and
//!   collected over a bounded channel, with pluggable timestamp placement
//! - **Seek fallback** - per-frame timeouts, failure summaries and a strict
//!   mode
//! - **Memoized sessions** - one run per source, shared by concurrent callers
//! - **Queries** - nearest frame, time range, thumbnails, last frame
//! - **Selection** - every Nth, fixed interval, target FPS, even sampling
//! - **Black-frame guard** for single snapshots
//! - **Progress & cancellation** - cooperative callbacks and
//!   `CancellationToken`
//! - **Configurable output** - pixel format (RGB8, RGBA8, GRAY8) and target
//!   resolution with aspect ratio preservation
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system.

pub mod backend;
pub mod configuration;
mod conversion;
pub mod decoder;
pub mod demux;
pub mod error;
pub mod ffmpeg;
pub mod metadata;
pub mod pipeline;
pub mod playback;
pub mod probe;
pub mod progress;
mod sample_table;
pub mod seek;
pub mod selection;
pub mod session;
pub mod source;
pub mod store;
pub mod strategy;

pub use backend::{FfmpegBackend, MediaBackend};
pub use configuration::{
    DEFAULT_BLACK_FRAME_THRESHOLD, DEFAULT_FRAME_TIMEOUT, DEFAULT_PIPELINE_TIMEOUT, ExtractOptions,
    FrameOutputOptions, PixelFormat, StrategyPreference,
};
pub use decoder::{DecodedImage, DecoderConfig, FfmpegDecoder, StreamDecoder};
pub use demux::{CodedSample, Mp4Demuxer, TrackInfo};
pub use error::FrameError;
pub use ffmpeg::{FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};
pub use metadata::{DEFAULT_FRAME_RATE, FrameRateSource, VideoMetadata};
pub use pipeline::{
    CompositionTime, DecodePipeline, IndexSpacing, PipelineOutput, TimestampStrategy, TrackTiming,
};
pub use playback::{FfmpegPlayback, Playback, average_luma, is_black_frame};
pub use probe::MetadataProbe;
pub use progress::{CancellationToken, OperationType, ProgressCallback, ProgressInfo};
pub use seek::{SeekOutcome, SequentialSeek, capture_frame, capture_frame_with_retry};
pub use selection::{
    FrameSelection, approximate_even_sampling, calculate_time_points, every_nth, fixed_interval,
    target_fps,
};
pub use session::{ExtractionSession, SessionState};
pub use source::VideoSource;
pub use store::{ExtractedFrame, ExtractionReport, FrameStore};
pub use strategy::ExtractionStrategy;
