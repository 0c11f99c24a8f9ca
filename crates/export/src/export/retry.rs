//! Bounded, fixed-delay retry of the search/write loop.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::ExportJobConfig;
use crate::error::{ExportError, ExportResult};

/// Decides whether a failed attempt of the export loop is retried.
///
/// Only destination connectivity failures are retried. The policy allows
/// `max_retries` retries after the first attempt and waits the same delay
/// before each of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy.
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Creates the policy configured for a worker.
    pub fn from_config(config: &ExportJobConfig) -> Self {
        Self::new(config.max_retry_count, config.retry_delay)
    }

    /// Returns the number of retries allowed after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the delay between attempts.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Returns true if `attempt` (1-based) failed with an error that should
    /// be retried.
    pub fn should_retry(&self, attempt: u32, error: &ExportError) -> bool {
        error.is_retryable() && attempt <= self.max_retries
    }

    /// Logs the failed attempt and waits the retry delay.
    ///
    /// # Errors
    ///
    /// * `ExportError::Cancelled` - if `cancel` fires while waiting
    pub async fn backoff(
        &self,
        attempt: u32,
        error: &ExportError,
        cancel: &CancellationToken,
    ) -> ExportResult<()> {
        warn!(
            attempt = attempt,
            max_retries = self.max_retries,
            delay_ms = self.delay.as_millis() as u64,
            error = %error,
            "Export attempt failed, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => Err(ExportError::Cancelled),
            _ = tokio::time::sleep(self.delay) => Ok(()),
        }
    }
}
