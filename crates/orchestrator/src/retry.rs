//! Bounded retry with exponential backoff, and per-call timeouts.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(4, Duration::from_millis(500), Duration::from_secs(30))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (0-based), doubling up to the cap.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff_for(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Bound a collaborator call; an elapsed deadline becomes [`OrchestratorError::Timeout`].
pub async fn with_timeout<T, E, Fut>(operation: &str, limit: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<OrchestratorError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(OrchestratorError::timeout(operation, limit)),
    }
}
