//! Progress reporting and cancellation support.
//!
//! This module provides [`ProgressCallback`] for monitoring run progress,
//! [`CancellationToken`] for cooperative cancellation, and [`ProgressInfo`]
//! for detailed progress snapshots.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use framecast::{ExtractionOptions, ProgressCallback, ProgressInfo};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("[{:?}] {:.1}% complete", info.operation, info.percentage);
//!     }
//! }
//!
//! let options = ExtractionOptions::new().with_progress(Arc::new(PrintProgress));
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

/// The kind of run currently in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OperationType {
    /// Seeking and capturing still frames.
    FrameExtraction,
    /// Describing frames and generating clips from them.
    ClipGeneration,
}

/// A snapshot of run progress.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// What kind of work is being performed.
    pub operation: OperationType,
    /// How many units (frames / items) have been processed so far.
    pub current: u64,
    /// Total units expected.
    pub total: u64,
    /// Completion percentage (0.0 – 100.0). Never decreases within a run.
    pub percentage: f32,
    /// Wall-clock time elapsed since the run started.
    pub elapsed: Duration,
    /// Estimated time remaining, based on current throughput.
    pub estimated_remaining: Option<Duration>,
    /// The source timestamp of the unit just processed (frames only).
    pub current_timestamp: Option<Duration>,
}

/// Trait for receiving progress updates during a run.
///
/// Implementations must be [`Send`] and [`Sync`] so a single callback can be
/// shared between controllers.
///
/// Progress callbacks are **infallible**: they observe but cannot halt
/// the run. Use [`CancellationToken`] or the controller's `reset` for that.
pub trait ProgressCallback: Send + Sync {
    /// Called after every processed unit and once when the run finishes.
    fn on_progress(&self, info: &ProgressInfo);
}

/// A no-op implementation that discards all progress notifications.
///
/// This is the default when no callback is configured.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clone this token and share it; call [`cancel`](CancellationToken::cancel)
/// from anywhere to request cancellation. Run loops check
/// [`is_cancelled`](CancellationToken::is_cancelled) before each unit of work.
///
/// # Example
///
/// ```
/// use framecast::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation.
    ///
    /// All clones of this token will observe the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// How a call to a controller's `start` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every unit of work was processed.
    Completed,
    /// The run was reset or superseded before it finished.
    Cancelled,
    /// Nothing was started: a run was already active or there was no work.
    Skipped,
}

/// Internal helper that keeps a run's percentage monotonic and emits callbacks.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    operation: OperationType,
    total: u64,
    current: u64,
    percentage: f32,
    start_time: Instant,
}

impl ProgressTracker {
    pub(crate) fn new(
        callback: Arc<dyn ProgressCallback>,
        operation: OperationType,
        total: u64,
    ) -> Self {
        Self {
            callback,
            operation,
            total,
            current: 0,
            percentage: 0.0,
            start_time: Instant::now(),
        }
    }

    /// Record one completed unit at `percentage` and fire the callback.
    ///
    /// Returns the percentage actually reported, which is clamped to
    /// `[previous, 100]`.
    pub(crate) fn advance(&mut self, percentage: f32, timestamp: Option<Duration>) -> f32 {
        self.current += 1;
        self.percentage = clamp_percentage(percentage).max(self.percentage);
        self.report(timestamp);
        self.percentage
    }

    /// Set the expected number of units once it is known.
    pub(crate) fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    /// The last reported percentage.
    pub(crate) fn percentage(&self) -> f32 {
        self.percentage
    }

    /// Force the percentage to 100 and emit a final report.
    pub(crate) fn finish(&mut self) -> f32 {
        self.percentage = 100.0;
        self.report(None);
        self.percentage
    }

    fn report(&self, timestamp: Option<Duration>) {
        let elapsed = self.start_time.elapsed();

        let estimated_remaining = if self.current > 0 && self.current <= self.total {
            let remaining = self.total - self.current;
            let per_item = elapsed / self.current as u32;
            Some(per_item * remaining as u32)
        } else {
            None
        };

        let info = ProgressInfo {
            operation: self.operation,
            current: self.current,
            total: self.total,
            percentage: self.percentage,
            elapsed,
            estimated_remaining,
            current_timestamp: timestamp,
        };

        self.callback.on_progress(&info);
    }
}

fn clamp_percentage(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}
