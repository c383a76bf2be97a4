//! Bounded retry for timed-out upstream calls.
//!
//! Only deadline failures are retried. HTTP status errors and network
//! failures surface immediately so the orchestrator can classify them.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::error::TransportError;

/// Fixed retry count with linear backoff (`delay * attempt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.delay.saturating_mul(attempt)
    }
}

/// Run `operation`, retrying it while it fails with a timeout.
pub async fn retry_on_timeout<F, Fut, T>(policy: RetryPolicy, operation: F) -> Result<T, TransportError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if err.is_timeout() => {
                attempt += 1;
                if attempt > policy.retries {
                    error!(
                        retries = policy.retries,
                        error = %err,
                        "Timeout retries exhausted, giving up"
                    );
                    return Err(err);
                }

                let delay = policy.backoff(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Upstream call timed out, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
