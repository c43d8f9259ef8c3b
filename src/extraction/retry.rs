//! Retry policy around a single logical extraction call.

use std::future::Future;
use std::time::Duration;

use super::ExtractionError;

/// Linear-backoff retry discipline for rate-limited extraction calls.
///
/// A [`ExtractionError::QuotaExceeded`] failure is re-attempted after a delay
/// of `backoff_unit × attempt_number`, up to `max_attempts` total attempts;
/// the final attempt's failure propagates. A fatal failure aborts immediately
/// without consuming the remaining attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_unit: Duration,
}

impl RetryPolicy {
    /// Production attempt budget.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    /// Production backoff unit; attempt `n` waits `n` units.
    pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(60);

    /// Build a policy with an explicit attempt budget and backoff unit.
    ///
    /// Tests pass a zero or near-zero unit to avoid real sleeps.
    pub fn new(max_attempts: u32, backoff_unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_unit,
        }
    }

    /// Drive `operation` to success or a terminal failure.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, ExtractionError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ExtractionError>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff_unit * attempt;
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "Retryable extraction failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS, Self::DEFAULT_BACKOFF_UNIT)
    }
}
