//! Process-wide rate limiter for outbound service calls.
//!
//! The service allows a fixed number of requests per rolling minute per API
//! key, across submissions and status checks alike. A single [`RateLimiter`]
//! is built at startup, shared via `Arc` by the submitter and the poller, and
//! closed at shutdown.
//!
//! The limiter keeps the timestamps of recent grants. A caller that would
//! exceed the budget sleeps until the oldest grant leaves the window.

use crate::error::ServiceError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Sliding-window limiter: at most `capacity` grants per `window`.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    grants: Mutex<VecDeque<Instant>>,
    closed: AtomicBool,
}

impl RateLimiter {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            window,
            grants: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            closed: AtomicBool::new(false),
        }
    }

    /// `n` calls per 60 seconds.
    pub fn per_minute(n: usize) -> Self {
        Self::new(n, Duration::from_secs(60))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait for a slot, then consume it.
    pub async fn acquire(&self) -> Result<(), ServiceError> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ServiceError::LimiterClosed);
            }

            let wait = {
                let mut grants = self.grants.lock().await;
                let now = Instant::now();
                while let Some(&oldest) = grants.front() {
                    if now.duration_since(oldest) >= self.window {
                        grants.pop_front();
                    } else {
                        break;
                    }
                }

                if grants.len() < self.capacity {
                    grants.push_back(now);
                    return Ok(());
                }

                // Full: the front entry is the next to expire.
                match grants.front() {
                    Some(&oldest) => (oldest + self.window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            debug!("Rate limit reached; waiting {:?}", wait);
            sleep(wait).await;
        }
    }

    /// Grants currently counted against the window.
    pub async fn in_window(&self) -> usize {
        let grants = self.grants.lock().await;
        let now = Instant::now();
        grants
            .iter()
            .filter(|&&t| now.duration_since(t) < self.window)
            .count()
    }

    /// Refuse further grants and forget recorded ones.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.grants.lock().await.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
