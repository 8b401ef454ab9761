//! Per-call timeouts and bounded exponential backoff for external calls

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use crate::error::{Error, Result};

/// Timeout and retry settings applied to one class of external call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration, timeout: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
            timeout,
        }
    }

    /// Single attempt with a deadline
    pub fn no_retry(timeout: Duration) -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO, timeout)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Backoff before retry number `attempt + 1`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `operation` under the deadline, retrying retriable failures.
    ///
    /// Non-retriable errors and the last failure are returned unchanged.
    pub async fn run<F, Fut, T>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let result = match timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(operation, self.timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        "{} failed: {}, retrying in {:?}",
                        operation,
                        e,
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            2,
            Duration::from_millis(500),
            Duration::from_secs(8),
            Duration::from_secs(60),
        )
    }
}
