//! Memoizing extraction sessions.
//!
//! [`ExtractionSession`] is the main entry point. It owns one video source
//! and runs a full extraction at most once: overlapping
//! [`extract_all_frames`](ExtractionSession::extract_all_frames) calls await
//! the same in-flight run, later calls get the cached [`FrameStore`], and a
//! failed run is retried by the next call.
//!
//! # Example
//!
//! ```no_run
//! use framegrab::{ExtractionSession, FrameError, FrameSelection};
//!
//! # async fn example() -> Result<(), FrameError> {
//! let session = ExtractionSession::open("input.mp4")?;
//! let metadata = session.probe_metadata().await?;
//! println!("{:.2}s @ {} fps", metadata.duration, metadata.fps);
//!
//! let store = session.extract_all_frames(None).await?;
//! let frame = store.nearest_to(1.5)?;
//! frame.image.save("at_1_5s.png")?;
//!
//! let every_second = session.select(FrameSelection::IntervalSeconds(1.0)).await?;
//! println!("{} frames, one per second", every_second.len());
//!
//! session.dispose();
//! # Ok(())
//! # }
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::mem;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::{FfmpegBackend, MediaBackend};
use crate::configuration::{ExtractOptions, FrameOutputOptions};
use crate::error::FrameError;
use crate::metadata::VideoMetadata;
use crate::probe::MetadataProbe;
use crate::progress::{CancellationToken, OperationType, ProgressCallback, ProgressTracker};
use crate::seek::capture_frame_with_retry;
use crate::selection::{FrameSelection, calculate_time_points};
use crate::source::{TempLocator, VideoSource};
use crate::store::{ExtractedFrame, FrameStore};
use crate::strategy::{ExtractionRun, ExtractionStrategy};

type RunResult = Result<Arc<FrameStore>, Arc<FrameError>>;

/// Observable lifecycle of a session's full extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No extraction has run, or the session was disposed.
    Idle,
    /// A run is in flight.
    Extracting,
    /// The frame store is cached.
    Ready,
    /// The last run failed; the next call starts a new one.
    Failed,
}

enum RunState {
    Idle,
    Extracting {
        receiver: watch::Receiver<Option<RunResult>>,
        cancellation: CancellationToken,
        task: JoinHandle<()>,
    },
    Ready(Arc<FrameStore>),
    Failed(Arc<FrameError>),
}

struct Shared {
    state: RunState,
    metadata: Option<VideoMetadata>,
    locator: Option<Arc<TempLocator>>,
    strategy: Option<ExtractionStrategy>,
    /// Bumped by `dispose`; results from an older generation are dropped.
    generation: u64,
}

/// One video source and everything extracted from it.
pub struct ExtractionSession {
    source: VideoSource,
    backend: Arc<dyn MediaBackend>,
    options: ExtractOptions,
    shared: Arc<Mutex<Shared>>,
}

impl Debug for ExtractionSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ExtractionSession")
            .field("source", &self.source)
            .field("options", &self.options)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ExtractionSession {
    /// Create a session for a video file.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::MediaOpen`] if the file does not exist or is not
    /// a regular file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FrameError> {
        let path = path.as_ref();
        let is_file = std::fs::metadata(path).map(|m| m.is_file()).map_err(|error| {
            FrameError::MediaOpen {
                source_name: path.display().to_string(),
                reason: error.to_string(),
            }
        })?;
        if !is_file {
            return Err(FrameError::MediaOpen {
                source_name: path.display().to_string(),
                reason: "not a regular file".to_string(),
            });
        }
        Ok(Self::from_source(VideoSource::from_path(path)))
    }

    /// Create a session for any [`VideoSource`].
    pub fn from_source(source: VideoSource) -> Self {
        Self {
            source,
            backend: Arc::new(FfmpegBackend),
            options: ExtractOptions::default(),
            shared: Arc::new(Mutex::new(Shared {
                state: RunState::Idle,
                metadata: None,
                locator: None,
                strategy: None,
                generation: 0,
            })),
        }
    }

    /// Create a session for container bytes held in memory.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>, mime_hint: Option<String>) -> Self {
        Self::from_source(VideoSource::from_bytes(bytes, mime_hint))
    }

    /// Run on a different media backend.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn MediaBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Replace the extraction options.
    #[must_use]
    pub fn with_options(mut self, options: ExtractOptions) -> Self {
        self.options = options;
        self
    }

    /// The source this session extracts from.
    pub fn source(&self) -> &VideoSource {
        &self.source
    }

    /// The options runs are started with.
    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    /// Where the full extraction currently stands.
    pub fn state(&self) -> SessionState {
        match lock(&self.shared).state {
            RunState::Idle => SessionState::Idle,
            RunState::Extracting { .. } => SessionState::Extracting,
            RunState::Ready(_) => SessionState::Ready,
            RunState::Failed(_) => SessionState::Failed,
        }
    }

    /// Metadata from an earlier probe, if any.
    pub fn cached_metadata(&self) -> Option<VideoMetadata> {
        lock(&self.shared).metadata.clone()
    }

    /// The strategy chosen for this session, once a run has started.
    pub fn strategy(&self) -> Option<ExtractionStrategy> {
        lock(&self.shared).strategy
    }

    /// Probe duration, dimensions and frame rate. Cached after the first
    /// success.
    ///
    /// # Errors
    ///
    /// [`FrameError::MediaOpen`] when the source cannot be opened or reports
    /// no usable duration.
    pub async fn probe_metadata(&self) -> Result<VideoMetadata, FrameError> {
        let (metadata, _) = probe_cached(
            &self.shared,
            &self.source,
            &self.backend,
            self.options.frame_output,
            Arc::clone(&self.options.progress),
        )
        .await?;
        Ok(metadata)
    }

    /// Extract every frame, or return the cached store.
    ///
    /// `progress` overrides the configured callback for a run this call
    /// starts, and receives a single 100% report when the store is already
    /// cached. A call that joins an in-flight run keeps that run's callback.
    ///
    /// # Errors
    ///
    /// - [`FrameError::ExtractionFailed`] wrapping the cause when the run
    ///   failed. Every caller that awaited the run sees the same `Arc`.
    /// - [`FrameError::Cancelled`] when the run was cancelled or the session
    ///   disposed.
    pub async fn extract_all_frames(
        &self,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> Result<Arc<FrameStore>, FrameError> {
        let mut receiver = {
            let mut shared = lock(&self.shared);
            match &shared.state {
                RunState::Ready(store) => {
                    let store = Arc::clone(store);
                    drop(shared);
                    if let Some(progress) = progress {
                        report_cached(&store, progress);
                    }
                    return Ok(store);
                }
                RunState::Extracting { receiver, .. } => {
                    log::debug!("Joining in-flight extraction of {}", self.source);
                    receiver.clone()
                }
                RunState::Idle | RunState::Failed(_) => self.start_run(&mut shared, progress),
            }
        };

        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        match outcome {
            Some(Ok(store)) => Ok(store),
            Some(Err(error)) if matches!(*error, FrameError::Cancelled) => {
                Err(FrameError::Cancelled)
            }
            Some(Err(error)) => Err(FrameError::ExtractionFailed(error)),
            None => Err(FrameError::Cancelled),
        }
    }

    /// Extract (or reuse) every frame and apply `selection`.
    ///
    /// The returned frames are copies; use [`FrameSelection::apply`] on the
    /// store from [`extract_all_frames`](Self::extract_all_frames) to borrow
    /// instead.
    pub async fn select(&self, selection: FrameSelection) -> Result<Vec<ExtractedFrame>, FrameError> {
        let store = self.extract_all_frames(None).await?;
        let selected = selection.apply(&store)?;
        Ok(selected.into_iter().cloned().collect())
    }

    /// Capture one frame at `time` through the black-frame guard.
    ///
    /// Independent of the full extraction: it opens its own playback element
    /// and never touches the frame store.
    ///
    /// # Errors
    ///
    /// [`FrameError::MediaOpen`] if probing fails, or the last capture error
    /// once retries are used up.
    pub async fn snapshot_at(&self, time: f64) -> Result<ExtractedFrame, FrameError> {
        let (metadata, locator) = probe_cached(
            &self.shared,
            &self.source,
            &self.backend,
            self.options.frame_output,
            Arc::clone(&self.options.progress),
        )
        .await?;
        let time = time.clamp(0.0, metadata.last_frame_time());
        let backend = Arc::clone(&self.backend);
        let options = self.options.clone();

        tokio::task::spawn_blocking(move || {
            let mut playback = backend.open_playback(locator.path(), &options.frame_output)?;
            capture_frame_with_retry(
                playback.as_mut(),
                time,
                options.frame_timeout,
                options.black_frame_threshold,
                options.max_snapshot_retries,
            )
        })
        .await?
    }

    /// Capture `count` frames spread over the whole video, first and last
    /// included, each through the black-frame guard.
    ///
    /// Failed captures are skipped unless `skip_failed_frames` is off.
    pub async fn snapshots(&self, count: usize) -> Result<Vec<ExtractedFrame>, FrameError> {
        let (metadata, locator) = probe_cached(
            &self.shared,
            &self.source,
            &self.backend,
            self.options.frame_output,
            Arc::clone(&self.options.progress),
        )
        .await?;
        let times = calculate_time_points(metadata.duration, count);
        if times.is_empty() {
            return Ok(Vec::new());
        }
        let backend = Arc::clone(&self.backend);
        let options = self.options.clone();

        tokio::task::spawn_blocking(move || {
            let mut playback = backend.open_playback(locator.path(), &options.frame_output)?;
            let mut tracker = ProgressTracker::new(
                Arc::clone(&options.progress),
                OperationType::Snapshot,
                Some(times.len() as u64),
                1,
            );
            let mut frames = Vec::with_capacity(times.len());

            for (index, &time) in times.iter().enumerate() {
                if options.is_cancelled() {
                    return Err(FrameError::Cancelled);
                }
                match capture_frame_with_retry(
                    playback.as_mut(),
                    time,
                    options.frame_timeout,
                    options.black_frame_threshold,
                    options.max_snapshot_retries,
                ) {
                    Ok(frame) => frames.push(frame),
                    Err(error) if options.skip_failed_frames => {
                        log::warn!("Snapshot {index} at {time:.3}s failed: {error}");
                    }
                    Err(error) => {
                        return Err(FrameError::FrameCapture {
                            index: index as u64,
                            time,
                            reason: error.to_string(),
                        });
                    }
                }
                tracker.advance(Some(index as u64), Some(time));
            }

            if frames.is_empty() {
                return Err(FrameError::NoFramesExtracted);
            }
            Ok(frames)
        })
        .await?
    }

    /// Cancel any in-flight run and drop every cached result.
    ///
    /// Stores already handed out stay valid until their last handle is
    /// dropped. The temporary file behind an in-memory source is removed
    /// once no worker still holds it. The session remains usable and the
    /// next call starts from scratch.
    pub fn dispose(&self) {
        let mut shared = lock(&self.shared);
        shared.generation += 1;
        if let RunState::Extracting {
            cancellation, task, ..
        } = mem::replace(&mut shared.state, RunState::Idle)
        {
            log::debug!("Cancelling in-flight extraction of {}", self.source);
            cancellation.cancel();
            task.abort();
        }
        shared.state = RunState::Idle;
        shared.metadata = None;
        shared.locator = None;
        shared.strategy = None;
    }

    fn start_run(
        &self,
        shared: &mut Shared,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> watch::Receiver<Option<RunResult>> {
        let generation = shared.generation;
        let (sender, receiver) = watch::channel(None);
        let cancellation = CancellationToken::new();
        let options = self.options.clone().bound_to_session(cancellation.clone());
        let progress = progress.unwrap_or_else(|| Arc::clone(&self.options.progress));

        let task = tokio::spawn(run_extraction(
            Arc::clone(&self.shared),
            self.source.clone(),
            Arc::clone(&self.backend),
            options,
            progress,
            generation,
            sender,
        ));

        shared.state = RunState::Extracting {
            receiver: receiver.clone(),
            cancellation,
            task,
        };
        receiver
    }
}

impl Drop for ExtractionSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A memoized hit still tells the caller the work is complete.
fn report_cached(store: &FrameStore, progress: Arc<dyn ProgressCallback>) {
    let operation = match store.report().strategy {
        ExtractionStrategy::PipelineDecode => OperationType::PipelineDecode,
        ExtractionStrategy::SequentialSeek => OperationType::SequentialSeek,
    };
    let total = store.len() as u64;
    let mut tracker = ProgressTracker::new(progress, operation, Some(total), 1);
    match store.frames().last() {
        Some(last) => tracker.report_at(total, total - 1, last.time),
        None => tracker.finish(),
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The spawned half of a full extraction: runs, records the outcome if the
/// session was not disposed meanwhile, and wakes every waiter.
async fn run_extraction(
    shared: Arc<Mutex<Shared>>,
    source: VideoSource,
    backend: Arc<dyn MediaBackend>,
    options: ExtractOptions,
    progress: Arc<dyn ProgressCallback>,
    generation: u64,
    sender: watch::Sender<Option<RunResult>>,
) {
    let outcome: RunResult = extract(&shared, source, backend, options, progress)
        .await
        .map(Arc::new)
        .map_err(Arc::new);

    let outcome = {
        let mut guard = lock(&shared);
        if guard.generation == generation {
            guard.state = match &outcome {
                Ok(store) => RunState::Ready(Arc::clone(store)),
                Err(error) => RunState::Failed(Arc::clone(error)),
            };
            outcome
        } else {
            log::debug!("Discarding extraction result from a disposed session");
            Err(Arc::new(FrameError::Cancelled))
        }
    };

    match &outcome {
        Ok(store) => log::info!(
            "Extraction finished: {} frames via {}{}",
            store.len(),
            store.report().strategy,
            if store.report().fell_back { " (fallback)" } else { "" }
        ),
        Err(error) => log::warn!("Extraction failed: {error}"),
    }
    let _ = sender.send(Some(outcome));
}

async fn extract(
    shared: &Arc<Mutex<Shared>>,
    source: VideoSource,
    backend: Arc<dyn MediaBackend>,
    options: ExtractOptions,
    progress: Arc<dyn ProgressCallback>,
) -> Result<FrameStore, FrameError> {
    let (metadata, locator) = probe_cached(
        shared,
        &source,
        &backend,
        options.frame_output,
        Arc::clone(&progress),
    )
    .await?;
    if options.is_cancelled() {
        return Err(FrameError::Cancelled);
    }

    let cached = lock(shared).strategy;
    let strategy = match cached {
        Some(strategy) => strategy,
        None => {
            let strategy =
                ExtractionStrategy::select(options.strategy, backend.supports_pipeline_decode());
            lock(shared).strategy.get_or_insert(strategy);
            strategy
        }
    };

    let run = ExtractionRun {
        backend,
        source,
        locator: locator.path().to_path_buf(),
        metadata,
        options,
        progress,
        strategy,
    };
    let store = run.execute().await;
    // The temporary file must outlive every worker that opened it.
    drop(locator);
    store
}

/// Probe metadata once per session generation, materializing the source
/// locator on the way.
async fn probe_cached(
    shared: &Arc<Mutex<Shared>>,
    source: &VideoSource,
    backend: &Arc<dyn MediaBackend>,
    output: FrameOutputOptions,
    progress: Arc<dyn ProgressCallback>,
) -> Result<(VideoMetadata, Arc<TempLocator>), FrameError> {
    let (generation, existing_locator) = {
        let guard = lock(shared);
        if let (Some(metadata), Some(locator)) = (&guard.metadata, &guard.locator) {
            return Ok((metadata.clone(), Arc::clone(locator)));
        }
        (guard.generation, guard.locator.clone())
    };

    let source = source.clone();
    let backend = Arc::clone(backend);
    let (metadata, locator) = tokio::task::spawn_blocking(move || {
        let locator = match existing_locator {
            Some(locator) => locator,
            None => Arc::new(source.locate()?),
        };
        let mut tracker = ProgressTracker::new(progress, OperationType::MetadataProbe, Some(1), 1);
        let mut playback = backend.open_playback(locator.path(), &output)?;
        let metadata = MetadataProbe::probe(playback.as_mut(), &source.display_name())?;
        tracker.advance(None, None);
        Ok::<_, FrameError>((metadata, locator))
    })
    .await??;

    let mut guard = lock(shared);
    if guard.generation != generation {
        return Ok((metadata, locator));
    }
    let locator = Arc::clone(guard.locator.get_or_insert(locator));
    let metadata = guard.metadata.get_or_insert(metadata).clone();
    Ok((metadata, locator))
}

