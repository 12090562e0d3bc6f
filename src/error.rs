//! Error types for the `framegrab` crate.
//!
//! This module defines [`FrameError`], the unified error type returned by all
//! fallible operations in the crate. Errors carry enough context (source
//! locator, frame index, timestamps, upstream messages) to diagnose a failed
//! extraction without additional logging at the call site.

use std::{io::Error as IoError, sync::Arc, time::Duration};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

/// The unified error type for all `framegrab` operations.
///
/// Container and decoder errors ([`NoVideoTrack`](FrameError::NoVideoTrack),
/// [`CodecConfig`](FrameError::CodecConfig),
/// [`DecoderInit`](FrameError::DecoderInit), [`Decode`](FrameError::Decode),
/// [`PipelineTimeout`](FrameError::PipelineTimeout)) are normally absorbed by
/// the session, which falls back to sequential seeking. Callers mostly see
/// [`MediaOpen`](FrameError::MediaOpen),
/// [`ExtractionFailed`](FrameError::ExtractionFailed) and query errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FrameError {
    /// The video source could not be opened or reported no usable duration.
    #[error("Failed to open media source {source_name}: {reason}")]
    MediaOpen {
        /// Display name of the source (path or in-memory label).
        source_name: String,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The container does not contain a video track.
    #[error("No video track found in container")]
    NoVideoTrack,

    /// The codec configuration record could not be extracted.
    #[error("Failed to extract codec configuration: {0}")]
    CodecConfig(String),

    /// The container box structure is malformed.
    #[error("Invalid container: {0}")]
    InvalidContainer(String),

    /// The stream decoder could not be created or configured.
    #[error("Failed to initialise decoder: {0}")]
    DecoderInit(String),

    /// A coded sample could not be decoded.
    #[error("Failed to decode sample: {0}")]
    Decode(String),

    /// The decode pipeline hit its global timeout without producing a frame.
    #[error("Decode pipeline timed out after {0:?} with no frames")]
    PipelineTimeout(Duration),

    /// A playback element did not reach the requested position in time.
    #[error("Frame extraction timed out at {time:.3}s after {timeout:?}")]
    FrameTimeout {
        /// Requested position in seconds.
        time: f64,
        /// Per-frame timeout that elapsed.
        timeout: Duration,
    },

    /// A frame could not be captured during sequential extraction.
    #[error("Failed to extract frame {index} at {time:.3}s: {reason}")]
    FrameCapture {
        /// Zero-based frame index.
        index: u64,
        /// Requested position in seconds.
        time: f64,
        /// Underlying failure.
        reason: String,
    },

    /// A query was issued against a store holding no frames.
    #[error("Frame store is empty")]
    EmptyStore,

    /// Every extraction strategy finished without producing a frame.
    #[error("No frames could be extracted from the source")]
    NoFramesExtracted,

    /// An interval or step value of zero (or a negative interval) was provided.
    #[error("Interval must be greater than zero")]
    InvalidInterval,

    /// A frame rate that is zero, negative or not finite was provided.
    #[error("Invalid frame rate: {0}")]
    InvalidFrameRate(f64),

    /// A full extraction run failed. Shared between coalesced callers.
    #[error("Frame extraction failed: {0}")]
    ExtractionFailed(Arc<FrameError>),

    /// The operation was cancelled, either through a
    /// [`CancellationToken`](crate::CancellationToken) or by disposing the
    /// session.
    #[error("Operation cancelled")]
    Cancelled,

    /// A blocking worker thread panicked or was torn down.
    #[error("Extraction worker failed: {0}")]
    WorkerFailed(String),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading the source or writing output.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate during frame conversion.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),
}

impl FrameError {
    /// Returns `true` for failures of the primary decode path that should be
    /// answered by falling back to sequential seeking.
    pub fn is_pipeline_failure(&self) -> bool {
        matches!(
            self,
            FrameError::NoVideoTrack
                | FrameError::CodecConfig(_)
                | FrameError::InvalidContainer(_)
                | FrameError::DecoderInit(_)
                | FrameError::Decode(_)
                | FrameError::PipelineTimeout(_)
                | FrameError::NoFramesExtracted
                | FrameError::WorkerFailed(_)
                | FrameError::FfmpegError(_)
                | FrameError::IoError(_)
        )
    }

    /// Walk through [`ExtractionFailed`](FrameError::ExtractionFailed)
    /// wrappers to the underlying error.
    pub fn root_cause(&self) -> &FrameError {
        match self {
            FrameError::ExtractionFailed(inner) => inner.root_cause(),
            other => other,
        }
    }
}

impl From<tokio::task::JoinError> for FrameError {
    fn from(error: tokio::task::JoinError) -> Self {
        if error.is_cancelled() {
            FrameError::Cancelled
        } else {
            FrameError::WorkerFailed(error.to_string())
        }
    }
}

impl From<FfmpegError> for FrameError {
    fn from(error: FfmpegError) -> Self {
        FrameError::FfmpegError(error.to_string())
    }
}
