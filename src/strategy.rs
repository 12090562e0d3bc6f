//! Extraction strategy dispatch.
//!
//! A session settles on an [`ExtractionStrategy`] once, from the caller's
//! [`StrategyPreference`] and the backend's capability probe. A pipeline run
//! that fails as a whole is retried through sequential seeking unless the
//! caller pinned the pipeline.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::MediaBackend;
use crate::configuration::{ExtractOptions, StrategyPreference};
use crate::decoder::DecoderConfig;
use crate::demux::Mp4Demuxer;
use crate::error::FrameError;
use crate::metadata::VideoMetadata;
use crate::pipeline::{DecodePipeline, TrackTiming};
use crate::progress::ProgressCallback;
use crate::seek::SequentialSeek;
use crate::source::VideoSource;
use crate::store::{ExtractionReport, FrameStore};

/// How frames are pulled out of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractionStrategy {
    /// Demux coded samples and decode them in one streaming pass.
    PipelineDecode,
    /// Seek a playback element to each frame time and snapshot it.
    SequentialSeek,
}

impl ExtractionStrategy {
    /// Pick a strategy for a preference and a backend capability.
    ///
    /// ```
    /// use framegrab::{ExtractionStrategy, StrategyPreference};
    ///
    /// assert_eq!(
    ///     ExtractionStrategy::select(StrategyPreference::Auto, false),
    ///     ExtractionStrategy::SequentialSeek
    /// );
    /// assert_eq!(
    ///     ExtractionStrategy::select(StrategyPreference::Auto, true),
    ///     ExtractionStrategy::PipelineDecode
    /// );
    /// ```
    pub fn select(preference: StrategyPreference, pipeline_capable: bool) -> Self {
        match preference {
            StrategyPreference::SeekOnly => ExtractionStrategy::SequentialSeek,
            StrategyPreference::PipelineOnly => {
                if !pipeline_capable {
                    log::warn!("Pipeline decoding forced on a backend that reports no support");
                }
                ExtractionStrategy::PipelineDecode
            }
            StrategyPreference::Auto if pipeline_capable => ExtractionStrategy::PipelineDecode,
            StrategyPreference::Auto => ExtractionStrategy::SequentialSeek,
        }
    }

    /// Short name for logs and reports.
    pub fn name(self) -> &'static str {
        match self {
            ExtractionStrategy::PipelineDecode => "pipeline-decode",
            ExtractionStrategy::SequentialSeek => "sequential-seek",
        }
    }
}

impl Display for ExtractionStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// Everything one full extraction needs, moved into the session's task.
pub(crate) struct ExtractionRun {
    pub(crate) backend: Arc<dyn MediaBackend>,
    pub(crate) source: VideoSource,
    pub(crate) locator: PathBuf,
    pub(crate) metadata: VideoMetadata,
    pub(crate) options: ExtractOptions,
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) strategy: ExtractionStrategy,
}

impl ExtractionRun {
    /// Run the chosen strategy, falling back from the pipeline to
    /// sequential seeking when allowed.
    pub(crate) async fn execute(self) -> Result<FrameStore, FrameError> {
        log::info!(
            "Extracting frames from {} using {}",
            self.source.display_name(),
            self.strategy
        );

        if self.strategy == ExtractionStrategy::PipelineDecode {
            match self.run_pipeline().await {
                Ok(store) => return Ok(store),
                Err(error)
                    if error.is_pipeline_failure()
                        && self.options.strategy != StrategyPreference::PipelineOnly =>
                {
                    log::warn!("Pipeline decoding failed, falling back to sequential seeking: {error}");
                    return self.run_sequential(true).await;
                }
                Err(error) => return Err(error),
            }
        }

        self.run_sequential(false).await
    }

    async fn run_pipeline(&self) -> Result<FrameStore, FrameError> {
        let source = self.source.clone();
        let limit = self.options.max_frames.map(|k| k as usize);
        let (track, samples) = tokio::task::spawn_blocking(move || {
            let bytes = source.bytes()?;
            Mp4Demuxer::demux(&bytes, limit)
        })
        .await??;

        let timing = TrackTiming::from_track(&track, &self.metadata);
        let config = DecoderConfig::from(&track);
        let backend = Arc::clone(&self.backend);
        let output = self.options.frame_output;

        let pipeline = DecodePipeline::new(self.options.clone()).with_progress(Arc::clone(&self.progress));
        let result = pipeline
            .decode_all(
                move || backend.create_decoder(&config, &output),
                samples,
                timing,
            )
            .await?;

        let report = ExtractionReport {
            expected: result.expected,
            extracted: result.frames.len() as u64,
            failed_indices: result.failed_samples,
            strategy: ExtractionStrategy::PipelineDecode,
            fell_back: false,
        };
        Ok(FrameStore::new(result.frames, self.metadata.clone(), report))
    }

    async fn run_sequential(self, fell_back: bool) -> Result<FrameStore, FrameError> {
        let ExtractionRun {
            backend,
            locator,
            metadata,
            options,
            progress,
            ..
        } = self;

        tokio::task::spawn_blocking(move || {
            let mut playback = backend.open_playback(&locator, &options.frame_output)?;
            let outcome = SequentialSeek::new(options)
                .with_progress(progress)
                .extract_all(playback.as_mut(), &metadata)?;

            let report = ExtractionReport {
                expected: outcome.expected,
                extracted: outcome.frames.len() as u64,
                failed_indices: outcome.failed_indices,
                strategy: ExtractionStrategy::SequentialSeek,
                fell_back,
            };
            Ok(FrameStore::new(outcome.frames, metadata, report))
        })
        .await?
    }
}
