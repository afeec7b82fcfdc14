//! Frame extraction runs.
//!
//! [`FrameExtractor`] is the controller for the extraction pipeline. A run
//! opens a media source, samples it on a fixed time grid, captures one JPEG
//! [`Frame`] per timestamp and, concurrently, recovers the first subtitle
//! track as WebVTT. Frames become visible as soon as they are captured,
//! both through the getters and through [`ExtractionEvent`]s.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use framecast::{FfmpegOpener, FrameExtractor, RunOutcome};
//!
//! # async fn example() -> Result<(), framecast::FramecastError> {
//! let extractor = FrameExtractor::new(FfmpegOpener::new());
//! let outcome = extractor.start(Some(Path::new("input.mp4")), 5.0).await?;
//! assert_eq!(outcome, RunOutcome::Completed);
//!
//! for frame in extractor.frames() {
//!     println!("{:?}: {} bytes", frame.timestamp(), frame.image().len());
//! }
//! if let Some(subtitles) = extractor.subtitles() {
//!     println!("{}", subtitles.as_str());
//! }
//! # Ok(())
//! # }
//! ```

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    path::Path,
    pin::pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::sync::Mutex as AsyncMutex;

use crate::{
    capture::{CaptureSurface, EncodedImage},
    configuration::ExtractionOptions,
    error::FramecastError,
    events::{EventStream, Subscribers},
    progress::{CancellationToken, OperationType, ProgressTracker, RunOutcome},
    source::{MediaOpener, MediaSource, TextTrack},
    subtitle::{SubtitlePayload, extract_subtitles},
    time_grid::{MIN_INTERVAL_SECS, time_grid},
};

/// One captured still image and the source timestamp it was taken at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    image: EncodedImage,
    timestamp: Duration,
}

impl Frame {
    /// Pair an encoded image with its source timestamp.
    pub fn new(image: EncodedImage, timestamp: Duration) -> Self {
        Self { image, timestamp }
    }

    /// The encoded image.
    pub fn image(&self) -> &EncodedImage {
        &self.image
    }

    /// Position in the source the frame was captured at.
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }
}

/// Lifecycle of an extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionPhase {
    /// No run has started, or the controller was reset.
    #[default]
    Idle,
    /// A run is in progress.
    Running,
    /// The last run sampled every timestamp.
    Completed,
    /// The last run was cancelled; frames captured before that are kept.
    Cancelled,
    /// The last run hit a fatal error; see [`FrameExtractor::error`].
    Failed,
}

impl ExtractionPhase {
    /// Whether this phase ends a run.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            ExtractionPhase::Completed | ExtractionPhase::Cancelled | ExtractionPhase::Failed
        )
    }
}

/// A change in a [`FrameExtractor`]'s run state.
#[derive(Debug, Clone)]
pub enum ExtractionEvent {
    /// The source was opened and the time grid computed.
    Started {
        /// Number of frames the run will capture if it is not cancelled.
        total_frames: usize,
        /// Duration of the source.
        duration: Duration,
    },
    /// A frame was captured and appended.
    Frame {
        /// Position of the frame in the result sequence.
        index: usize,
        /// The captured frame.
        frame: Frame,
    },
    /// Overall progress changed.
    Progress(f32),
    /// Subtitle cues were recovered.
    Subtitles(SubtitlePayload),
    /// The run reached a terminal phase.
    Finished {
        /// The terminal phase.
        phase: ExtractionPhase,
        /// The fatal error message, for [`ExtractionPhase::Failed`].
        error: Option<String>,
    },
    /// The controller was reset and all run state cleared.
    Reset,
}

/// A consistent copy of a [`FrameExtractor`]'s run state.
#[derive(Debug, Clone)]
pub struct ExtractionSnapshot {
    /// Current phase.
    pub phase: ExtractionPhase,
    /// Progress in `0.0..=100.0`.
    pub progress: f32,
    /// Frames captured so far, in timestamp order.
    pub frames: Vec<Frame>,
    /// Recovered subtitles, if any.
    pub subtitles: Option<SubtitlePayload>,
    /// Last error message, if any.
    pub error: Option<String>,
}

struct RunState {
    run_id: u64,
    phase: ExtractionPhase,
    progress: f32,
    frames: Vec<Frame>,
    subtitles: Option<SubtitlePayload>,
    error: Option<String>,
    token: CancellationToken,
}

impl RunState {
    fn new() -> Self {
        Self {
            run_id: 0,
            phase: ExtractionPhase::Idle,
            progress: 0.0,
            frames: Vec::new(),
            subtitles: None,
            error: None,
            token: CancellationToken::new(),
        }
    }

    fn clear(&mut self) {
        self.progress = 0.0;
        self.frames.clear();
        self.subtitles = None;
        self.error = None;
    }
}

/// Controller for frame extraction runs.
///
/// Cheap to clone: clones share the same run state, so one clone can
/// [`reset`](FrameExtractor::reset) a run another clone is driving. At most
/// one run is active at a time.
pub struct FrameExtractor<O> {
    opener: Arc<O>,
    options: ExtractionOptions,
    state: Arc<Mutex<RunState>>,
    lane: Arc<AsyncMutex<()>>,
    events: Arc<Subscribers<ExtractionEvent>>,
}

impl<O> Clone for FrameExtractor<O> {
    fn clone(&self) -> Self {
        Self {
            opener: Arc::clone(&self.opener),
            options: self.options.clone(),
            state: Arc::clone(&self.state),
            lane: Arc::clone(&self.lane),
            events: Arc::clone(&self.events),
        }
    }
}

impl<O> Debug for FrameExtractor<O> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let state = self.lock_state();
        f.debug_struct("FrameExtractor")
            .field("options", &self.options)
            .field("phase", &state.phase)
            .field("progress", &state.progress)
            .field("frames", &state.frames.len())
            .finish_non_exhaustive()
    }
}

impl<O: MediaOpener> FrameExtractor<O> {
    /// Create a controller with default options.
    pub fn new(opener: O) -> Self {
        Self::with_options(opener, ExtractionOptions::new())
    }

    /// Create a controller with the given options.
    pub fn with_options(opener: O, options: ExtractionOptions) -> Self {
        Self {
            opener: Arc::new(opener),
            options,
            state: Arc::new(Mutex::new(RunState::new())),
            lane: Arc::new(AsyncMutex::new(())),
            events: Arc::new(Subscribers::new()),
        }
    }

    /// Run an extraction over `path`, sampling every `interval_secs`.
    ///
    /// Resolves when the run ends. Returns [`RunOutcome::Skipped`] without
    /// doing anything if a run is already active, and
    /// [`RunOutcome::Cancelled`] if the run was cancelled or reset before
    /// it finished.
    ///
    /// # Errors
    ///
    /// - [`FramecastError::InvalidInput`] if `path` is `None` or the
    ///   interval is not positive. No run is started.
    /// - [`FramecastError::MediaLoad`] if the source cannot be opened.
    /// - [`FramecastError::CaptureSurface`] if the source has no usable
    ///   picture dimensions.
    /// - Any decode or encode error raised while capturing.
    ///
    /// Fatal errors are also recorded as the run's [`error`](Self::error);
    /// progress is still forced to 100 and frames captured before the
    /// failure are kept.
    pub async fn start(
        &self,
        path: Option<&Path>,
        interval_secs: f64,
    ) -> Result<RunOutcome, FramecastError> {
        let path = match validate_request(path, interval_secs) {
            Ok(path) => path,
            Err(error) => {
                self.record_rejection(&error);
                return Err(error);
            }
        };

        let Some((run_id, token)) = self.claim() else {
            log::debug!("Extraction already running; ignoring start request");
            return Ok(RunOutcome::Skipped);
        };

        // A superseded run may still hold its source; wait for it to let go.
        let _lane = self.lane.lock().await;
        if !self.is_current(run_id) {
            return Ok(RunOutcome::Cancelled);
        }

        log::info!(
            "Extracting frames from {} every {interval_secs}s",
            path.display()
        );

        let mut tracker = ProgressTracker::new(
            Arc::clone(&self.options.progress),
            OperationType::FrameExtraction,
            0,
        );
        let result = self
            .execute(run_id, &token, path, interval_secs, &mut tracker)
            .await;
        self.conclude(run_id, result, &mut tracker)
    }

    async fn execute(
        &self,
        run_id: u64,
        token: &CancellationToken,
        path: &Path,
        interval_secs: f64,
        tracker: &mut ProgressTracker,
    ) -> Result<RunOutcome, FramecastError> {
        let source = self
            .opener
            .open(path)
            .await
            .map_err(|error| match error {
                FramecastError::MediaLoad { .. } => error,
                other => FramecastError::MediaLoad {
                    path: path.to_path_buf(),
                    reason: other.to_string(),
                },
            })?;

        if token.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }

        let metadata = source.metadata().clone();
        let duration_secs = metadata.duration.as_secs_f64();
        if !duration_secs.is_finite() || duration_secs <= 0.0 {
            return Err(FramecastError::MediaLoad {
                path: path.to_path_buf(),
                reason: "media reports no duration".to_string(),
            });
        }

        let surface =
            CaptureSurface::acquire(metadata.width, metadata.height, self.options.jpeg_quality)?;
        let grid = time_grid(duration_secs, interval_secs)?;
        tracker.set_total(grid.len() as u64);

        log::debug!(
            "Source is {}x{}, {:.3}s; sampling {} frame(s)",
            metadata.width,
            metadata.height,
            duration_secs,
            grid.len(),
        );
        self.with_current(run_id, |_, events| {
            events.emit(ExtractionEvent::Started {
                total_frames: grid.len(),
                duration: metadata.duration,
            });
        });

        let tracks = if self.options.subtitles {
            source.text_tracks()
        } else {
            Vec::new()
        };

        let mut subtitles = pin!(self.collect_subtitles(run_id, token, tracks));
        let mut frames = pin!(self.capture_frames(
            run_id,
            token,
            source,
            surface,
            grid,
            duration_secs,
            tracker,
        ));

        let mut subtitles_done = false;
        let outcome = loop {
            tokio::select! {
                outcome = &mut frames => break outcome,
                () = &mut subtitles, if !subtitles_done => subtitles_done = true,
            }
        };

        if matches!(outcome, Ok(RunOutcome::Completed)) && !subtitles_done {
            subtitles.await;
        }

        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn capture_frames(
        &self,
        run_id: u64,
        token: &CancellationToken,
        mut source: O::Source,
        surface: CaptureSurface,
        grid: Vec<Duration>,
        duration_secs: f64,
        tracker: &mut ProgressTracker,
    ) -> Result<RunOutcome, FramecastError> {
        for (index, timestamp) in grid.into_iter().enumerate() {
            if token.is_cancelled() {
                log::debug!("Extraction cancelled after {index} frame(s)");
                return Ok(RunOutcome::Cancelled);
            }

            source.seek(timestamp).await?;
            let image = surface.capture(&source)?;

            if !self.is_current(run_id) {
                return Ok(RunOutcome::Cancelled);
            }

            let percentage = tracker.advance(
                (timestamp.as_secs_f64() / duration_secs * 100.0) as f32,
                Some(timestamp),
            );
            let frame = Frame::new(image, timestamp);
            let appended = self.with_current(run_id, |state, events| {
                state.frames.push(frame.clone());
                state.progress = percentage;
                events.emit(ExtractionEvent::Frame { index, frame });
                events.emit(ExtractionEvent::Progress(percentage));
            });
            if !appended {
                return Ok(RunOutcome::Cancelled);
            }
        }

        Ok(RunOutcome::Completed)
    }

    async fn collect_subtitles(
        &self,
        run_id: u64,
        token: &CancellationToken,
        tracks: Vec<TextTrack>,
    ) {
        let Some(payload) = extract_subtitles(&tracks, &self.options.settle, token).await else {
            return;
        };

        self.with_current(run_id, |state, events| {
            log::debug!("Adopting {} subtitle cue(s)", payload.cue_count());
            state.subtitles = Some(payload.clone());
            events.emit(ExtractionEvent::Subtitles(payload));
        });
    }

    fn conclude(
        &self,
        run_id: u64,
        result: Result<RunOutcome, FramecastError>,
        tracker: &mut ProgressTracker,
    ) -> Result<RunOutcome, FramecastError> {
        if !self.is_current(run_id) {
            log::debug!("Extraction run {run_id} was superseded");
            return Ok(RunOutcome::Cancelled);
        }

        match result {
            Ok(RunOutcome::Completed) => {
                let progress = tracker.finish();
                self.with_current(run_id, |state, events| {
                    log::info!("Extraction finished with {} frame(s)", state.frames.len());
                    state.progress = progress;
                    state.phase = ExtractionPhase::Completed;
                    events.emit(ExtractionEvent::Progress(progress));
                    events.emit(ExtractionEvent::Finished {
                        phase: ExtractionPhase::Completed,
                        error: None,
                    });
                });
                Ok(RunOutcome::Completed)
            }
            Ok(_) => {
                self.with_current(run_id, |state, events| {
                    log::info!("Extraction cancelled with {} frame(s)", state.frames.len());
                    state.phase = ExtractionPhase::Cancelled;
                    events.emit(ExtractionEvent::Finished {
                        phase: ExtractionPhase::Cancelled,
                        error: None,
                    });
                });
                Ok(RunOutcome::Cancelled)
            }
            Err(error) => {
                let progress = tracker.finish();
                let message = error.to_string();
                let recorded = self.with_current(run_id, |state, events| {
                    log::warn!("Extraction failed: {message}");
                    state.progress = progress;
                    state.phase = ExtractionPhase::Failed;
                    state.error = Some(message.clone());
                    events.emit(ExtractionEvent::Progress(progress));
                    events.emit(ExtractionEvent::Finished {
                        phase: ExtractionPhase::Failed,
                        error: Some(message.clone()),
                    });
                });
                if recorded {
                    Err(error)
                } else {
                    Ok(RunOutcome::Cancelled)
                }
            }
        }
    }
}

impl<O> FrameExtractor<O> {
    /// Cancel the active run, keeping whatever it captured.
    ///
    /// The run stops at its next check, before the following seek, and
    /// ends in [`ExtractionPhase::Cancelled`].
    pub fn cancel(&self) {
        self.lock_state().token.cancel();
    }

    /// Cancel the active run and clear all run state.
    ///
    /// The run's source is released as soon as the run observes the
    /// cancellation. A run started afterwards waits for that release
    /// before opening its own source.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        state.token.cancel();
        state.token = CancellationToken::new();
        state.run_id += 1;
        state.clear();
        state.phase = ExtractionPhase::Idle;
        self.events.emit(ExtractionEvent::Reset);
    }

    /// Subscribe to run events from now on.
    pub fn subscribe(&self) -> EventStream<ExtractionEvent> {
        self.events.subscribe()
    }

    /// Current phase.
    pub fn phase(&self) -> ExtractionPhase {
        self.lock_state().phase
    }

    /// Whether a run is active.
    pub fn is_running(&self) -> bool {
        self.phase() == ExtractionPhase::Running
    }

    /// Progress of the current or last run, in `0.0..=100.0`.
    pub fn progress(&self) -> f32 {
        self.lock_state().progress
    }

    /// Frames captured so far.
    pub fn frames(&self) -> Vec<Frame> {
        self.lock_state().frames.clone()
    }

    /// Subtitles recovered by the current or last run.
    pub fn subtitles(&self) -> Option<SubtitlePayload> {
        self.lock_state().subtitles.clone()
    }

    /// The last recorded error message.
    pub fn error(&self) -> Option<String> {
        self.lock_state().error.clone()
    }

    /// A consistent copy of the whole run state.
    pub fn snapshot(&self) -> ExtractionSnapshot {
        let state = self.lock_state();
        ExtractionSnapshot {
            phase: state.phase,
            progress: state.progress,
            frames: state.frames.clone(),
            subtitles: state.subtitles.clone(),
            error: state.error.clone(),
        }
    }

    /// The options this controller was created with.
    pub fn options(&self) -> &ExtractionOptions {
        &self.options
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self) -> Option<(u64, CancellationToken)> {
        let mut state = self.lock_state();
        if state.phase == ExtractionPhase::Running {
            return None;
        }

        state.run_id += 1;
        state.token = CancellationToken::new();
        state.clear();
        state.phase = ExtractionPhase::Running;
        Some((state.run_id, state.token.clone()))
    }

    fn is_current(&self, run_id: u64) -> bool {
        self.lock_state().run_id == run_id
    }

    /// Apply `update` if `run_id` is still the current run.
    fn with_current(
        &self,
        run_id: u64,
        update: impl FnOnce(&mut RunState, &Subscribers<ExtractionEvent>),
    ) -> bool {
        let mut state = self.lock_state();
        if state.run_id != run_id {
            return false;
        }
        update(&mut state, &self.events);
        true
    }

    fn record_rejection(&self, error: &FramecastError) {
        let mut state = self.lock_state();
        if state.phase != ExtractionPhase::Running {
            state.error = Some(error.to_string());
        }
    }
}

fn validate_request(path: Option<&Path>, interval_secs: f64) -> Result<&Path, FramecastError> {
    let path = path.ok_or_else(|| FramecastError::InvalidInput("no input file".to_string()))?;
    if !interval_secs.is_finite() || interval_secs < MIN_INTERVAL_SECS {
        return Err(FramecastError::InvalidInput(format!(
            "interval must be at least {MIN_INTERVAL_SECS} seconds, got {interval_secs}"
        )));
    }
    Ok(path)
}
