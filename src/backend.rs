//! Media backends.
//!
//! A [`MediaBackend`] is the platform capability layer a session runs on: it
//! opens [`Playback`] elements and creates [`StreamDecoder`]s. Both are
//! created on the blocking worker that uses them.
//!
//! [`FfmpegBackend`] is the default. Alternative backends can be injected
//! with [`ExtractionSession::with_backend`](crate::ExtractionSession::with_backend).

use std::path::Path;

use crate::configuration::FrameOutputOptions;
use crate::decoder::{DecoderConfig, FfmpegDecoder, StreamDecoder};
use crate::error::FrameError;
use crate::playback::{FfmpegPlayback, Playback};

/// Opens playback elements and stream decoders.
pub trait MediaBackend: Send + Sync {
    /// Open a seekable playback element over the file at `path`.
    fn open_playback(
        &self,
        path: &Path,
        output: &FrameOutputOptions,
    ) -> Result<Box<dyn Playback>, FrameError>;

    /// Whether [`create_decoder`](MediaBackend::create_decoder) is usable at
    /// all. Checked once when a session picks its extraction strategy.
    fn supports_pipeline_decode(&self) -> bool;

    /// Create a stream decoder configured for `config`.
    fn create_decoder(
        &self,
        config: &DecoderConfig,
        output: &FrameOutputOptions,
    ) -> Result<Box<dyn StreamDecoder>, FrameError>;
}

/// [`MediaBackend`] on the linked FFmpeg libraries.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegBackend;

impl MediaBackend for FfmpegBackend {
    fn open_playback(
        &self,
        path: &Path,
        output: &FrameOutputOptions,
    ) -> Result<Box<dyn Playback>, FrameError> {
        Ok(Box::new(FfmpegPlayback::open(path, output)?))
    }

    fn supports_pipeline_decode(&self) -> bool {
        match crate::ffmpeg::initialize() {
            Ok(()) => true,
            Err(error) => {
                log::warn!("FFmpeg unavailable for pipeline decoding: {error}");
                false
            }
        }
    }

    fn create_decoder(
        &self,
        config: &DecoderConfig,
        output: &FrameOutputOptions,
    ) -> Result<Box<dyn StreamDecoder>, FrameError> {
        Ok(Box::new(FfmpegDecoder::new(config, output)?))
    }
}
