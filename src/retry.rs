//! Bounded retry with exponential backoff for service calls.
//!
//! Network errors, timeouts, 429/5xx and malformed bodies are usually
//! transient. Attempt `n` (0-based) waits `backoff * 2^(n-1)` before
//! running: with the defaults (3 attempts, 500 ms) that is 0 → 500 ms → 1 s.
//! Definitive errors return immediately.

use crate::error::ServiceError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// How many times to try a call and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Delay before attempt `attempt` (0-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.backoff
                .saturating_mul(2u32.saturating_pow(attempt - 1))
        }
    }

    /// Run `op` until it succeeds, fails definitively, or attempts run out.
    ///
    /// `label` only feeds the retry log line.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                sleep(delay).await;
            }

            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    warn!(
                        "{}: attempt {}/{} failed — {}; retrying in {:?}",
                        label,
                        attempt + 1,
                        attempts,
                        e,
                        self.delay_before(attempt + 1)
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
