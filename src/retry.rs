//! Bounded retry with exponential backoff for per-item service calls.
//!
//! The generation pipeline does not retry by default: a failed description
//! or generation step marks the item as errored and the run moves on. A
//! [`RetryPolicy`] with `max_retries > 0` re-attempts the failing step after
//! a doubling delay before giving up.
//!
//! The generation step is retried as a whole: a retry after a failed poll,
//! an exceeded poll cap or a failed download submits a new job rather than
//! resuming the old one.

use std::future::Future;
use std::time::Duration;

use crate::error::FramecastError;
use crate::progress::CancellationToken;

/// Retry behaviour for one step of the generation pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries (not counting the first attempt).
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each following retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// A policy allowing `max_retries` retries with a 2 s base delay.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Set the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before retry number `retry` (0-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, the policy is exhausted, or `token`
/// is cancelled.
///
/// Cancellation and fatal errors are never retried.
pub(crate) async fn retry_step<T, F, Fut>(
    policy: &RetryPolicy,
    step_name: &str,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T, FramecastError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FramecastError>>,
{
    let mut retry = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if retry > 0 {
                    log::info!("{step_name} succeeded after {retry} retr(ies)");
                }
                return Ok(value);
            }
            Err(error) => {
                let retryable = !error.is_fatal() && !matches!(error, FramecastError::Cancelled);
                if !retryable || retry >= policy.max_retries || token.is_cancelled() {
                    return Err(error);
                }

                let delay = policy.delay_for_retry(retry);
                log::warn!(
                    "{step_name} failed (attempt {}/{}), retrying in {:?}: {error}",
                    retry + 1,
                    policy.max_retries + 1,
                    delay,
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
        }
    }
}
