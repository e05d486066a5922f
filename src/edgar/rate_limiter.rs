// src/edgar/rate_limiter.rs
//! Request throttling and retry-with-backoff for every outbound fetch.
//!
//! One `RateLimiter` is constructed per process (or per group of runs that
//! must share the archive's budget) and handed to every `EdgarClient` inside
//! an `Arc`. The only shared state is the instant of the last acquisition,
//! guarded by an async mutex so concurrent pipelines stay under the limit.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Instant};

use crate::config::{FetchConfig, DEFAULT_BACKOFF_CAP, DEFAULT_MIN_REQUEST_INTERVAL};
use crate::utils::error::FetchError;

pub struct RateLimiter {
    min_interval: Duration,
    last_acquired: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        RateLimiter {
            min_interval,
            last_acquired: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until `min_interval` has passed since the previous acquisition.
    /// The lock is held while sleeping so waiters are released one interval apart.
    pub async fn acquire(&self) {
        let mut last = self.last_acquired.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            if ready_at > Instant::now() {
                tracing::trace!("Throttling request for {:?}", ready_at - Instant::now());
                sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_REQUEST_INTERVAL)
    }
}

/// Bounded retry with exponential backoff: `base_delay * 2^(attempt-1)`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay,
            max_delay: DEFAULT_BACKOFF_CAP,
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_retry_attempts,
            base_delay: config.backoff_base,
            max_delay: config.backoff_cap,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_attempts` is used up. The closure receives the attempt number.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, FetchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "Attempt {}/{} failed ({}); retrying in {:?}",
                        attempt, max_attempts, err, delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        tracing::error!("Giving up after {} attempts: {}", attempt, err);
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::new(""))
    }
}
