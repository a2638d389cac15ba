use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{EavError, Result};

/// Bounded select-then-insert retry loop for get-or-create.
///
/// Concurrent first-time creation of the same key makes one of the inserts
/// fail on the store's uniqueness constraint; running the whole attempt
/// again selects the row the other caller created. Only store failures are
/// retried, anything else (validation, strict not-found) ends the loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(4, Duration::ZERO)
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
    pub async fn run<T, F, Fut>(&self, what: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last = None;
        for tries in 1..=self.attempts {
            match attempt().await {
                Ok(found) => return Ok(found),
                Err(err) if err.is_retryable() => {
                    warn!(what, attempt = tries, error = %err, "get-or-create attempt failed");
                    last = Some(err);
                    if tries < self.attempts && !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff * tries).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Err(EavError::RetriesExhausted {
            what: what.to_string(),
            attempts: self.attempts,
            source: Box::new(
                last.unwrap_or_else(|| EavError::Invariant("retry loop ran no attempts".into())),
            ),
        })
    }
}
