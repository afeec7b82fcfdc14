//! Clip generation runs.
//!
//! [`ClipGenerator`] is the controller for the generation pipeline. A run
//! turns every input [`Frame`] into a [`GenerationItem`] and processes the
//! items one by one, in input order: describe the frame, generate a clip
//! from the caption, record the result. A failure on one item is recorded
//! on that item and the run moves on.
//!
//! # Example
//!
//! ```no_run
//! use framecast::{ClipGenerator, CredentialStore, Frame, GeminiClient, ItemStatus};
//!
//! # async fn example(frames: Vec<Frame>) -> Result<(), framecast::FramecastError> {
//! let credentials = CredentialStore::from_env();
//! let client = GeminiClient::new(credentials.clone());
//! let generator = ClipGenerator::new(client.clone(), client, credentials);
//!
//! generator.start(&frames).await?;
//! for item in generator.items() {
//!     match item.status {
//!         ItemStatus::Complete => println!("clip at {:?}", item.artifact),
//!         ItemStatus::Error => println!("failed: {:?}", item.error),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    configuration::GenerationOptions,
    describe::describe_frame,
    error::FramecastError,
    events::{EventStream, Subscribers},
    extraction::Frame,
    generate::{ArtifactInfo, ClipArtifact, generate_clip},
    progress::{CancellationToken, OperationType, ProgressTracker, RunOutcome},
    retry::retry_step,
    services::{Authorizer, ImageDescriber, VideoGenerator},
};

/// Per-item state.
///
/// Items only ever move forward:
/// `Pending → Describing → Generating → Complete`, with `Error` reachable
/// from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemStatus {
    /// Waiting to be processed.
    Pending,
    /// The frame is being captioned.
    Describing,
    /// A clip is being generated from the caption.
    Generating,
    /// The clip is ready.
    Complete,
    /// A step failed; see [`GenerationItem::error`].
    Error,
}

impl ItemStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Complete | ItemStatus::Error)
    }

    /// Whether moving from `self` to `next` keeps the status monotonic.
    pub fn can_advance_to(self, next: ItemStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    fn rank(self) -> u8 {
        match self {
            ItemStatus::Pending => 0,
            ItemStatus::Describing => 1,
            ItemStatus::Generating => 2,
            ItemStatus::Complete | ItemStatus::Error => 3,
        }
    }
}

/// One frame's journey through the generation pipeline.
#[derive(Debug, Clone)]
pub struct GenerationItem {
    /// The input frame.
    pub frame: Frame,
    /// The caption, once the frame has been described.
    pub description: Option<String>,
    /// The generated clip, once complete.
    pub artifact: Option<ArtifactInfo>,
    /// Current status.
    pub status: ItemStatus,
    /// Failure message for [`ItemStatus::Error`].
    pub error: Option<String>,
}

impl GenerationItem {
    fn pending(frame: Frame) -> Self {
        Self {
            frame,
            description: None,
            artifact: None,
            status: ItemStatus::Pending,
            error: None,
        }
    }
}

/// Lifecycle of a generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationPhase {
    /// No run has started, or the controller was reset.
    #[default]
    Idle,
    /// Items are being processed.
    Generating,
    /// Every item reached a terminal status.
    Completed,
    /// The run was cancelled before every item was processed.
    Cancelled,
    /// Authorization failed; no item was processed.
    Failed,
}

/// A change in a [`ClipGenerator`]'s run state.
#[derive(Debug, Clone)]
pub enum GenerationEvent {
    /// Authorization succeeded and one pending item was created per frame.
    Started {
        /// Number of items in the run.
        total_items: usize,
    },
    /// An item changed.
    Item {
        /// Position of the item.
        index: usize,
        /// The item after the change.
        item: GenerationItem,
    },
    /// Overall progress changed.
    Progress(f32),
    /// The run reached a terminal phase.
    Finished {
        /// The terminal phase.
        phase: GenerationPhase,
        /// The run-level error message, for [`GenerationPhase::Failed`].
        error: Option<String>,
    },
    /// The controller was reset; every item and clip was released.
    Reset,
}

struct ItemRecord {
    item: GenerationItem,
    clip: Option<ClipArtifact>,
}

impl ItemRecord {
    fn advance(&mut self, status: ItemStatus) -> bool {
        if !self.item.status.can_advance_to(status) {
            log::warn!(
                "Ignoring item transition {:?} -> {:?}",
                self.item.status,
                status
            );
            return false;
        }
        self.item.status = status;
        true
    }
}

struct RunState {
    run_id: u64,
    phase: GenerationPhase,
    progress: f32,
    items: Vec<ItemRecord>,
    error: Option<String>,
    /// Stops the run before its next item.
    token: CancellationToken,
    /// Abandons the item in flight. Only a reset triggers it.
    abort: CancellationToken,
}

/// Controller for clip generation runs.
///
/// Cheap to clone: clones share the same run state. At most one run is
/// active at a time. Generated clips are owned by the controller and
/// deleted when the run is reset or superseded by a new run.
pub struct ClipGenerator<D, V, A> {
    describer: Arc<D>,
    generator: Arc<V>,
    authorizer: Arc<A>,
    options: GenerationOptions,
    state: Arc<Mutex<RunState>>,
    events: Arc<Subscribers<GenerationEvent>>,
}

impl<D, V, A> Clone for ClipGenerator<D, V, A> {
    fn clone(&self) -> Self {
        Self {
            describer: Arc::clone(&self.describer),
            generator: Arc::clone(&self.generator),
            authorizer: Arc::clone(&self.authorizer),
            options: self.options.clone(),
            state: Arc::clone(&self.state),
            events: Arc::clone(&self.events),
        }
    }
}

impl<D, V, A> Debug for ClipGenerator<D, V, A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let state = self.lock_state();
        f.debug_struct("ClipGenerator")
            .field("options", &self.options)
            .field("phase", &state.phase)
            .field("progress", &state.progress)
            .field("items", &state.items.len())
            .finish_non_exhaustive()
    }
}

impl<D, V, A> ClipGenerator<D, V, A>
where
    D: ImageDescriber,
    V: VideoGenerator,
    A: Authorizer,
{
    /// Create a controller with default options.
    pub fn new(describer: D, generator: V, authorizer: A) -> Self {
        Self::with_options(describer, generator, authorizer, GenerationOptions::new())
    }

    /// Create a controller with the given options.
    pub fn with_options(
        describer: D,
        generator: V,
        authorizer: A,
        options: GenerationOptions,
    ) -> Self {
        Self {
            describer: Arc::new(describer),
            generator: Arc::new(generator),
            authorizer: Arc::new(authorizer),
            options,
            state: Arc::new(Mutex::new(RunState {
                run_id: 0,
                phase: GenerationPhase::Idle,
                progress: 0.0,
                items: Vec::new(),
                error: None,
                token: CancellationToken::new(),
                abort: CancellationToken::new(),
            })),
            events: Arc::new(Subscribers::new()),
        }
    }

    /// Generate one clip per frame.
    ///
    /// Resolves when every item has been processed or the run is reset.
    /// Returns [`RunOutcome::Skipped`] without doing anything if `frames` is
    /// empty or a run is already active.
    ///
    /// # Errors
    ///
    /// Returns [`FramecastError::Authorization`] if no credential is
    /// available even after prompting for one. Items from a previous run
    /// are kept in that case. Per-item failures are never returned; they
    /// are recorded on the item.
    pub async fn start(&self, frames: &[Frame]) -> Result<RunOutcome, FramecastError> {
        if frames.is_empty() {
            log::debug!("No frames to generate from; ignoring start request");
            return Ok(RunOutcome::Skipped);
        }

        let Some((run_id, token, abort)) = self.claim() else {
            log::debug!("Generation already running; ignoring start request");
            return Ok(RunOutcome::Skipped);
        };

        if let Err(error) = self.authorize().await {
            let message = error.to_string();
            let recorded = self.with_current(run_id, |state, events| {
                log::warn!("Generation aborted: {message}");
                state.phase = GenerationPhase::Failed;
                state.error = Some(message.clone());
                state.progress = 100.0;
                events.emit(GenerationEvent::Progress(100.0));
                events.emit(GenerationEvent::Finished {
                    phase: GenerationPhase::Failed,
                    error: Some(message.clone()),
                });
            });
            return if recorded {
                Err(error)
            } else {
                Ok(RunOutcome::Cancelled)
            };
        }

        let initialized = self.with_current(run_id, |state, events| {
            // Dropping the previous records deletes their clips.
            state.items = frames
                .iter()
                .cloned()
                .map(|frame| ItemRecord {
                    item: GenerationItem::pending(frame),
                    clip: None,
                })
                .collect();
            state.progress = 0.0;
            events.emit(GenerationEvent::Started {
                total_items: state.items.len(),
            });
            for (index, record) in state.items.iter().enumerate() {
                events.emit(GenerationEvent::Item {
                    index,
                    item: record.item.clone(),
                });
            }
        });
        if !initialized {
            return Ok(RunOutcome::Cancelled);
        }

        log::info!("Generating clips for {} frame(s)", frames.len());
        let mut tracker = ProgressTracker::new(
            Arc::clone(&self.options.progress),
            OperationType::ClipGeneration,
            frames.len() as u64,
        );

        let total = frames.len();
        for (index, frame) in frames.iter().enumerate() {
            if token.is_cancelled() {
                log::debug!("Generation cancelled after {index} item(s)");
                return Ok(self.conclude(run_id, RunOutcome::Cancelled, &mut tracker));
            }

            if !self.process_item(run_id, &abort, index, frame).await {
                return Ok(self.conclude(run_id, RunOutcome::Cancelled, &mut tracker));
            }

            let percentage = tracker.advance((index + 1) as f32 / total as f32 * 100.0, None);
            let current = self.with_current(run_id, |state, events| {
                state.progress = percentage;
                events.emit(GenerationEvent::Progress(percentage));
            });
            if !current {
                return Ok(RunOutcome::Cancelled);
            }
        }

        Ok(self.conclude(run_id, RunOutcome::Completed, &mut tracker))
    }

    /// Drive one item to a terminal status. Returns `false` if the run was
    /// superseded along the way.
    async fn process_item(
        &self,
        run_id: u64,
        abort: &CancellationToken,
        index: usize,
        frame: &Frame,
    ) -> bool {
        if !self.update_item(run_id, index, |record| {
            record.advance(ItemStatus::Describing);
        }) {
            return false;
        }

        let caption = retry_step(&self.options.retry, "describe", abort, || {
            describe_frame(self.describer.as_ref(), frame, &self.options.instruction)
        })
        .await;

        let caption = match caption {
            Ok(caption) => caption,
            Err(error) => return self.fail_item(run_id, index, &error),
        };
        log::debug!("Item {index} caption: {caption}");

        if !self.update_item(run_id, index, |record| {
            record.item.description = Some(caption.clone());
            record.advance(ItemStatus::Generating);
        }) {
            return false;
        }

        let clip = retry_step(&self.options.retry, "generate", abort, || {
            generate_clip(self.generator.as_ref(), &caption, &self.options, abort)
        })
        .await;

        match clip {
            Ok(clip) => self.update_item(run_id, index, |record| {
                if record.advance(ItemStatus::Complete) {
                    record.item.artifact = Some(clip.info());
                    record.clip = Some(clip);
                }
            }),
            Err(error) => self.fail_item(run_id, index, &error),
        }
    }

    fn fail_item(&self, run_id: u64, index: usize, error: &FramecastError) -> bool {
        if matches!(error, FramecastError::Cancelled) {
            return false;
        }

        log::warn!("Item {index} failed: {error}");
        let message = error.to_string();
        self.update_item(run_id, index, |record| {
            if record.advance(ItemStatus::Error) {
                record.item.error = Some(message);
            }
        })
    }

    async fn authorize(&self) -> Result<(), FramecastError> {
        if self.authorizer.has_credential().await.map_err(into_auth_error)? {
            return Ok(());
        }

        log::info!("No credential available; prompting for one");
        self.authorizer
            .select_credential()
            .await
            .map_err(into_auth_error)?;

        if self.authorizer.has_credential().await.map_err(into_auth_error)? {
            Ok(())
        } else {
            Err(FramecastError::Authorization(
                "no credential was selected".to_string(),
            ))
        }
    }

    fn conclude(
        &self,
        run_id: u64,
        outcome: RunOutcome,
        tracker: &mut ProgressTracker,
    ) -> RunOutcome {
        if !self.is_current(run_id) {
            return RunOutcome::Cancelled;
        }

        let phase = match outcome {
            RunOutcome::Completed => GenerationPhase::Completed,
            _ => GenerationPhase::Cancelled,
        };
        let progress = tracker.finish();

        let current = self.with_current(run_id, |state, events| {
            let failed = state
                .items
                .iter()
                .filter(|record| record.item.status == ItemStatus::Error)
                .count();
            log::info!(
                "Generation {phase:?}: {} item(s), {failed} failed",
                state.items.len()
            );
            state.phase = phase;
            state.progress = progress;
            events.emit(GenerationEvent::Progress(progress));
            events.emit(GenerationEvent::Finished { phase, error: None });
        });

        if current { outcome } else { RunOutcome::Cancelled }
    }
}

impl<D, V, A> ClipGenerator<D, V, A> {
    /// Cancel the active run, keeping the items processed so far.
    ///
    /// The item in flight still runs to a terminal status; the run stops
    /// before the next one and later items stay pending.
    pub fn cancel(&self) {
        self.lock_state().token.cancel();
    }

    /// Cancel the active run, delete every generated clip and clear all
    /// items.
    pub fn reset(&self) {
        let released = {
            let mut state = self.lock_state();
            state.token.cancel();
            state.abort.cancel();
            state.token = CancellationToken::new();
            state.abort = CancellationToken::new();
            state.run_id += 1;
            state.phase = GenerationPhase::Idle;
            state.progress = 0.0;
            state.error = None;
            self.events.emit(GenerationEvent::Reset);
            std::mem::take(&mut state.items)
        };
        log::debug!("Released {} generation item(s)", released.len());
    }

    /// Subscribe to run events from now on.
    pub fn subscribe(&self) -> EventStream<GenerationEvent> {
        self.events.subscribe()
    }

    /// Current phase.
    pub fn phase(&self) -> GenerationPhase {
        self.lock_state().phase
    }

    /// Whether a run is active.
    pub fn is_running(&self) -> bool {
        self.phase() == GenerationPhase::Generating
    }

    /// Progress of the current or last run, in `0.0..=100.0`.
    pub fn progress(&self) -> f32 {
        self.lock_state().progress
    }

    /// The items of the current or last run, in input order.
    pub fn items(&self) -> Vec<GenerationItem> {
        self.lock_state()
            .items
            .iter()
            .map(|record| record.item.clone())
            .collect()
    }

    /// The run-level error message, if the last run failed.
    pub fn error(&self) -> Option<String> {
        self.lock_state().error.clone()
    }

    /// Copy the clip of item `index` to `destination`.
    ///
    /// Returns `Ok(None)` if the item has no clip.
    pub fn save_clip(
        &self,
        index: usize,
        destination: &std::path::Path,
    ) -> Result<Option<u64>, FramecastError> {
        let state = self.lock_state();
        match state.items.get(index).and_then(|record| record.clip.as_ref()) {
            Some(clip) => clip.copy_to(destination).map(Some),
            None => Ok(None),
        }
    }

    /// The options this controller was created with.
    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self) -> Option<(u64, CancellationToken, CancellationToken)> {
        let mut state = self.lock_state();
        if state.phase == GenerationPhase::Generating {
            return None;
        }

        state.run_id += 1;
        state.token = CancellationToken::new();
        state.abort = CancellationToken::new();
        state.phase = GenerationPhase::Generating;
        state.error = None;
        Some((state.run_id, state.token.clone(), state.abort.clone()))
    }

    fn is_current(&self, run_id: u64) -> bool {
        self.lock_state().run_id == run_id
    }

    fn with_current(
        &self,
        run_id: u64,
        update: impl FnOnce(&mut RunState, &Subscribers<GenerationEvent>),
    ) -> bool {
        let mut state = self.lock_state();
        if state.run_id != run_id {
            return false;
        }
        update(&mut state, &self.events);
        true
    }

    fn update_item(
        &self,
        run_id: u64,
        index: usize,
        update: impl FnOnce(&mut ItemRecord),
    ) -> bool {
        self.with_current(run_id, |state, events| {
            if let Some(record) = state.items.get_mut(index) {
                update(record);
                events.emit(GenerationEvent::Item {
                    index,
                    item: record.item.clone(),
                });
            }
        })
    }
}

fn into_auth_error(error: FramecastError) -> FramecastError {
    match error {
        FramecastError::Authorization(_) => error,
        other => FramecastError::Authorization(other.to_string()),
    }
}
