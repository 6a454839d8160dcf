//! Bounded retry with exponential backoff
//!
//! Attempt `i` (zero-based) that fails with a retryable error is followed by
//! a wait of `base_delay * 2^i` before attempt `i + 1`. Cancellation wins over
//! everything: it is checked after each failure and raced against each wait.

use super::LlmError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Upper bound on a server-supplied `Retry-After`
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    /// Zero falls back to `DEFAULT_MAX_RETRIES`
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: if max_retries == 0 {
                DEFAULT_MAX_RETRIES
            } else {
                max_retries
            },
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Wait inserted after failed attempt `attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
    }

    /// Run `operation` until it succeeds, fails permanently, is cancelled, or
    /// runs out of attempts.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if cancel.is_cancelled() || error.is_cancelled() {
                return Err(LlmError::cancelled());
            }

            if !error.is_retryable() {
                tracing::debug!(attempt, error = %error, "Not retrying");
                return Err(error);
            }

            if attempt + 1 < self.max_retries {
                let delay = self.delay_for(attempt, &error);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = self.max_retries,
                    delay_ms = %delay.as_millis(),
                    error = %error,
                    "Request failed, retrying"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(LlmError::cancelled()),
                    () = tokio::time::sleep(delay) => {}
                }
            }

            last_error = Some(error);
        }

        let last = last_error.unwrap_or_else(|| LlmError::unknown("no attempts were made"));
        Err(LlmError::retries_exhausted(self.max_retries, last))
    }

    fn delay_for(&self, attempt: u32, error: &LlmError) -> Duration {
        let backoff = self.backoff(attempt);
        match error.retry_after {
            Some(hint) => backoff.max(hint.min(MAX_RETRY_AFTER)),
            None => backoff,
        }
    }
}
