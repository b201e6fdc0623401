//! Retry loop for throttled upstream calls.
//!
//! Only HTTP 429 is recovered locally. Every retry is a fresh task on the
//! shared [`RateLimiter`], so it re-queues behind higher-priority work and
//! re-observes spacing like any other call. A cooldown longer than
//! `max_retry_after` is not waited out: the limiter holds off for the ceiling
//! and the call fails with [`GovernorError::ThrottledExceeded`].

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::GovernorConfig;
use crate::error::{GovernorError, GovernorResult};
use crate::limiter::RateLimiter;

/// Outcome of a single upstream attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    Done(T),
    /// The upstream answered 429; `retry_after` is its cooldown hint, if any.
    Throttled { retry_after: Option<Duration> },
}

#[derive(Clone)]
pub struct BackoffController {
    limiter: RateLimiter,
    max_retries: u32,
    default_retry_after: Duration,
    max_retry_after: Duration,
}

impl BackoffController {
    pub fn new(limiter: RateLimiter, config: &GovernorConfig) -> Self {
        Self {
            limiter,
            max_retries: config.max_retries.max(1),
            default_retry_after: config.default_retry_after(),
            max_retry_after: config.max_retry_after(),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Runs `attempt_fn` through the limiter until it succeeds, fails with a
    /// non-throttling error, or has been throttled `max_retries` times.
    pub async fn call_with_backoff<T, F, Fut>(&self, priority: i32, attempt_fn: F) -> GovernorResult<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Clone + Send + 'static,
        Fut: Future<Output = GovernorResult<Attempt<T>>> + Send + 'static,
    {
        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            let attempt = attempt_fn.clone();
            let outcome = self.limiter.submit(priority, move || attempt()).await?;

            let retry_after = match outcome {
                Attempt::Done(value) => return Ok(value),
                Attempt::Throttled { retry_after } => retry_after,
            };

            let requested = retry_after.unwrap_or(self.default_retry_after);
            if requested > self.max_retry_after {
                self.limiter.hold_off(self.max_retry_after);
                warn!(
                    attempts,
                    ?requested,
                    max_retry_after = ?self.max_retry_after,
                    "upstream cooldown exceeds the ceiling; giving up"
                );
                return Err(GovernorError::ThrottledExceeded {
                    retry_after: self.max_retry_after,
                    attempts,
                });
            }

            let cooldown = requested;
            // The quota is shared, so everyone waits out the cooldown.
            self.limiter.hold_off(cooldown);

            if attempts >= self.max_retries {
                warn!(attempts, ?cooldown, "upstream throttling outlasted the retry budget");
                return Err(GovernorError::ThrottledExceeded {
                    retry_after: cooldown,
                    attempts,
                });
            }

            warn!(
                attempt = attempts,
                max_retries = self.max_retries,
                ?cooldown,
                hinted = retry_after.is_some(),
                "upstream throttled; retrying after cooldown"
            );
            tokio::time::sleep(cooldown).await;
        }
    }
}
