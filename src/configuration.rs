//! Run configuration.
//!
//! [`ExtractionOptions`] and [`GenerationOptions`] are builders that thread
//! progress callbacks, timing policies, and service parameters through the
//! two controllers without polluting every `start` signature.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use framecast::{
//!     ExtractionOptions, GenerationOptions, ProgressCallback, ProgressInfo, RetryPolicy,
//!     SettlePolicy,
//! };
//!
//! struct LogProgress;
//! impl ProgressCallback for LogProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("{:?}: {:.0}%", info.operation, info.percentage);
//!     }
//! }
//!
//! let extraction = ExtractionOptions::new()
//!     .with_progress(Arc::new(LogProgress))
//!     .with_jpeg_quality(85)
//!     .with_settle_policy(SettlePolicy::fixed(Duration::from_secs(1)));
//!
//! let generation = GenerationOptions::new()
//!     .with_poll_interval(Duration::from_secs(5))
//!     .with_max_poll_attempts(120)
//!     .with_retry(RetryPolicy::new(2));
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::progress::{NoOpProgress, ProgressCallback};
use crate::retry::RetryPolicy;
use crate::services::GenerationParams;

/// Instruction sent with every frame to the image-understanding service.
pub const DEFAULT_INSTRUCTION: &str = "Describe this scene vividly and in detail in one short \
sentence. The description will be used as the prompt for generating an 8-10 second video.";

/// Default JPEG quality for captured frames.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Default cadence for polling a video-generation job.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// How long to wait for a text track's cues to be populated.
///
/// Cue parsing runs in the background once a track is activated and offers
/// no deterministic "ready" signal for every backend, so the extractor waits
/// according to one of these policies before reading the cue list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlePolicy {
    /// Sleep once for the given delay, then read whatever is there.
    Fixed(Duration),
    /// Re-read the cue list every `interval`. Resolve as soon as the loader
    /// reports completion, or two consecutive reads see the same non-zero
    /// cue count, or `timeout` elapses.
    Poll {
        /// Delay between two reads of the cue list.
        interval: Duration,
        /// Upper bound on the total wait.
        timeout: Duration,
    },
}

impl SettlePolicy {
    /// A single fixed delay.
    pub fn fixed(delay: Duration) -> Self {
        SettlePolicy::Fixed(delay)
    }

    /// Poll with a stabilization rule. A zero interval is raised to 1 ms.
    pub fn poll(interval: Duration, timeout: Duration) -> Self {
        SettlePolicy::Poll {
            interval: interval.max(Duration::from_millis(1)),
            timeout,
        }
    }
}

impl Default for SettlePolicy {
    fn default() -> Self {
        SettlePolicy::poll(Duration::from_millis(250), Duration::from_secs(10))
    }
}

/// Configuration for frame extraction runs.
///
/// All fields have sensible defaults; a default-constructed value captures
/// JPEG frames at quality 90 and extracts subtitles with the polling settle
/// policy.
#[derive(Clone)]
pub struct ExtractionOptions {
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) jpeg_quality: u8,
    pub(crate) settle: SettlePolicy,
    pub(crate) subtitles: bool,
}

impl Debug for ExtractionOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ExtractionOptions")
            .field("jpeg_quality", &self.jpeg_quality)
            .field("settle", &self.settle)
            .field("subtitles", &self.subtitles)
            .finish_non_exhaustive()
    }
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            progress: Arc::new(NoOpProgress),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            settle: SettlePolicy::default(),
            subtitles: true,
        }
    }

    /// Attach a progress callback, invoked after every captured frame.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Set the JPEG quality for captured frames. Clamped to `1..=100`.
    #[must_use]
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Set how long to wait for subtitle cues.
    #[must_use]
    pub fn with_settle_policy(mut self, policy: SettlePolicy) -> Self {
        self.settle = policy;
        self
    }

    /// Enable or disable subtitle extraction. Enabled by default.
    #[must_use]
    pub fn with_subtitles(mut self, enabled: bool) -> Self {
        self.subtitles = enabled;
        self
    }

    /// The configured JPEG quality.
    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    /// The configured settle policy.
    pub fn settle_policy(&self) -> SettlePolicy {
        self.settle
    }
}

/// Configuration for clip generation runs.
///
/// Defaults mirror the behaviour of the hosted service integration: one
/// 720p 16:9 video per frame, a 10 second poll cadence with no attempt cap,
/// and no retries.
#[derive(Clone)]
pub struct GenerationOptions {
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) instruction: String,
    pub(crate) params: GenerationParams,
    pub(crate) poll_interval: Duration,
    pub(crate) max_poll_attempts: Option<u32>,
    pub(crate) retry: RetryPolicy,
    pub(crate) artifact_dir: Option<PathBuf>,
}

impl Debug for GenerationOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("GenerationOptions")
            .field("params", &self.params)
            .field("poll_interval", &self.poll_interval)
            .field("max_poll_attempts", &self.max_poll_attempts)
            .field("retry", &self.retry)
            .field("artifact_dir", &self.artifact_dir)
            .finish_non_exhaustive()
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            progress: Arc::new(NoOpProgress),
            instruction: DEFAULT_INSTRUCTION.to_string(),
            params: GenerationParams::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: None,
            retry: RetryPolicy::none(),
            artifact_dir: None,
        }
    }

    /// Attach a progress callback, invoked after every processed item.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Replace the instruction sent alongside each frame.
    #[must_use]
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    /// Replace the video-generation parameters.
    #[must_use]
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Set the job polling cadence. Clamped to a minimum of 1 ms.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Cap the number of status polls per job. Without a cap a stuck job is
    /// polled until the run is reset.
    #[must_use]
    pub fn with_max_poll_attempts(mut self, attempts: u32) -> Self {
        self.max_poll_attempts = Some(attempts.max(1));
        self
    }

    /// Retry failed description and generation steps with backoff.
    ///
    /// A generation retry submits a new job.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Directory in which downloaded clips are materialized.
    ///
    /// Defaults to the system temporary directory.
    #[must_use]
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    /// The instruction sent with each frame.
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// The configured poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// The configured poll cap, if any.
    pub fn max_poll_attempts(&self) -> Option<u32> {
        self.max_poll_attempts
    }

    /// The video-generation parameters.
    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// The retry policy for per-item steps.
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}
