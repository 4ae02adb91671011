//! Request-rate limiting.
//!
//! One [`RateLimiter`] is shared by all executions of a client. Two
//! admission strategies are available:
//!
//! - **Token bucket**: capacity `max_requests`, refilled continuously at
//!   `max_requests / time_window` tokens per second. Refill is computed
//!   lazily from elapsed time; there is no background task.
//! - **Semaphore window**: at most `max_requests` admissions per rolling
//!   `time_window`. Each permit is returned by a timer `time_window` after
//!   acquisition, not when the request finishes, so the bound is
//!   requests-per-window rather than concurrent requests.
//!
//! `acquire` never drops a caller; it suspends until admission is permitted
//! and reports how long it waited.

use crate::config::{RateLimitConfig, RateLimitMode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

enum Inner {
    Bucket(Mutex<Bucket>),
    Window(Arc<Semaphore>),
}

/// Admission control shared across the executions of one client.
pub struct RateLimiter {
    max_requests: u32,
    time_window: Duration,
    inner: Inner,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_requests", &self.max_requests)
            .field("time_window", &self.time_window)
            .field(
                "mode",
                &match self.inner {
                    Inner::Bucket(_) => RateLimitMode::TokenBucket,
                    Inner::Window(_) => RateLimitMode::Semaphore,
                },
            )
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter from configuration.
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        match config.mode {
            RateLimitMode::TokenBucket => {
                Self::token_bucket(config.max_requests, config.time_window)
            }
            RateLimitMode::Semaphore => Self::semaphore(config.max_requests, config.time_window),
        }
    }

    /// Token-bucket limiter: `max_requests` per `time_window`, refilled
    /// continuously.
    ///
    /// The bucket starts empty and paces from the first request, so a cold
    /// burst cannot exceed the windowed rate; an idle limiter accumulates
    /// up to `max_requests` tokens of burst allowance.
    #[must_use]
    pub fn token_bucket(max_requests: u32, time_window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            max_requests,
            time_window: time_window.max(Duration::from_millis(1)),
            inner: Inner::Bucket(Mutex::new(Bucket {
                tokens: 0.0,
                last_refill: Instant::now(),
            })),
        }
    }

    /// Rolling-window limiter: at most `max_requests` admissions within any
    /// `time_window`, enforced by timed permit return.
    #[must_use]
    pub fn semaphore(max_requests: u32, time_window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            max_requests,
            time_window: time_window.max(Duration::from_millis(1)),
            inner: Inner::Window(Arc::new(Semaphore::new(max_requests as usize))),
        }
    }

    /// Configured capacity.
    #[must_use]
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Configured window.
    #[must_use]
    pub fn time_window(&self) -> Duration {
        self.time_window
    }

    /// Suspend until admission is permitted; returns the time spent waiting.
    ///
    /// Safe under arbitrary concurrent callers: bucket state is only read
    /// and consumed under one lock, so two callers can never spend the same
    /// token. Admission order among waiters is not FIFO, but every waiter is
    /// re-evaluated on each refill, so none starves.
    pub async fn acquire(&self) -> Duration {
        let started = Instant::now();
        match &self.inner {
            Inner::Bucket(bucket) => {
                let rate = f64::from(self.max_requests) / self.time_window.as_secs_f64();
                loop {
                    // Refill lazily, take a token if one exists, otherwise
                    // compute the exact wait until the next token and re-check
                    // after sleeping. The lock is not held across the sleep.
                    let wait = {
                        let mut bucket = bucket.lock().await;
                        let now = Instant::now();
                        let elapsed = now.duration_since(bucket.last_refill);
                        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * rate)
                            .min(f64::from(self.max_requests));
                        bucket.last_refill = now;

                        if bucket.tokens >= 1.0 {
                            bucket.tokens -= 1.0;
                            return started.elapsed();
                        }
                        // Refill rounding can leave tokens at 0.999…; the
                        // residual wait then truncates to zero nanoseconds
                        // and the loop would spin. Always sleep a little.
                        Duration::from_secs_f64((1.0 - bucket.tokens) / rate)
                            .max(Duration::from_millis(1))
                    };
                    sleep(wait).await;
                }
            }
            Inner::Window(semaphore) => {
                let permit = Arc::clone(semaphore)
                    .acquire_owned()
                    .await
                    .expect("rate limiter semaphore is never closed");
                // The permit comes back on a timer, not on request
                // completion; there is no manual release to misuse.
                permit.forget();
                let semaphore = Arc::clone(semaphore);
                let window = self.time_window;
                tokio::spawn(async move {
                    sleep(window).await;
                    semaphore.add_permits(1);
                });
                started.elapsed()
            }
        }
    }
}
