//! Client configuration.
//!
//! [`ClientConfig`] carries every recognized option: base URL, per-attempt
//! timeout, retry count, backoff shape, rate limiting, retryability, and the
//! overall deadline. [`RetryCondition`] is the injected classification of
//! which failures are worth retrying; the retry loop itself never hardcodes
//! that decision.

use crate::backoff::{BackoffMode, BackoffParameters};
use crate::error::TransportError;
use std::collections::BTreeSet;
use std::time::Duration;

/// Rate limiter admission strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitMode {
    /// Continuously refilled token bucket.
    #[default]
    TokenBucket,
    /// Fixed number of admissions per rolling window.
    Semaphore,
}

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Admissions allowed per window.
    pub max_requests: u32,
    /// Window length.
    pub time_window: Duration,
    /// Admission strategy.
    pub mode: RateLimitMode,
}

impl RateLimitConfig {
    /// `max_requests` per second, token-bucket mode.
    #[must_use]
    pub fn per_second(max_requests: u32) -> Self {
        Self {
            max_requests,
            time_window: Duration::from_secs(1),
            mode: RateLimitMode::TokenBucket,
        }
    }

    /// Set the admission strategy.
    #[must_use]
    pub fn mode(mut self, mode: RateLimitMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Which failures are retryable.
///
/// Consulted once per failed attempt by the retry loop. Timeouts are always
/// retryable; HTTP failures retry when their status is in the configured
/// set; network failures retry unless disabled; protocol failures never
/// retry. A custom predicate, when set, replaces all of the above.
#[derive(Debug, Clone)]
pub struct RetryCondition {
    /// HTTP status codes worth retrying.
    pub status_codes: BTreeSet<u16>,
    /// Whether connection-level failures are retryable.
    pub retry_network: bool,
    /// Custom predicate overriding the built-in classification.
    pub custom: Option<fn(&TransportError) -> bool>,
}

impl Default for RetryCondition {
    fn default() -> Self {
        Self {
            status_codes: [429, 500, 502, 503, 504].into_iter().collect(),
            retry_network: true,
            custom: None,
        }
    }
}

impl RetryCondition {
    /// Create the default condition.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the retryable status-code set.
    #[must_use]
    pub fn status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.status_codes = codes.into_iter().collect();
        self
    }

    /// Add status codes to the retryable set.
    #[must_use]
    pub fn on_status(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.status_codes.extend(codes);
        self
    }

    /// Treat connection-level failures as non-retryable.
    #[must_use]
    pub fn no_network_retry(mut self) -> Self {
        self.retry_network = false;
        self
    }

    /// Replace the classification with a custom predicate.
    #[must_use]
    pub fn with_custom(mut self, predicate: fn(&TransportError) -> bool) -> Self {
        self.custom = Some(predicate);
        self
    }

    /// Whether the given failure should be retried.
    #[must_use]
    pub fn should_retry(&self, error: &TransportError) -> bool {
        if let Some(predicate) = self.custom {
            return predicate(error);
        }
        match error {
            TransportError::Timeout => true,
            TransportError::Network(_) => self.retry_network,
            TransportError::Protocol(_) => false,
            TransportError::Http { status, .. } => self.status_codes.contains(status),
        }
    }
}

/// Configuration for a [`Client`](crate::client::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL joined with relative request paths.
    pub base_url: Option<String>,
    /// Default per-attempt timeout.
    pub timeout: Duration,
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Backoff growth mode.
    pub backoff_mode: BackoffMode,
    /// Backoff delay parameters.
    pub backoff: BackoffParameters,
    /// Rate limiting; `None` disables it.
    pub rate_limit: Option<RateLimitConfig>,
    /// Retryability classification.
    pub retry_on: RetryCondition,
    /// Default overall deadline per execution; `None` means unbounded.
    pub overall_deadline: Option<Duration>,
    /// Headers applied to every request, overridable per request.
    pub default_headers: Vec<(String, String)>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_mode: BackoffMode::Exponential,
            backoff: BackoffParameters::default(),
            rate_limit: None,
            retry_on: RetryCondition::default(),
            overall_deadline: None,
            default_headers: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Create a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the default per-attempt timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum number of retries.
    #[must_use]
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the backoff mode.
    #[must_use]
    pub fn backoff_mode(mut self, mode: BackoffMode) -> Self {
        self.backoff_mode = mode;
        self
    }

    /// Set the base backoff delay.
    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.backoff.base_delay = delay;
        self
    }

    /// Set the backoff delay cap.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.backoff.max_delay = delay;
        self
    }

    /// Set the exponential multiplier.
    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.backoff.multiplier = multiplier;
        self
    }

    /// Set the jitter fraction.
    #[must_use]
    pub fn jitter_fraction(mut self, jitter: f64) -> Self {
        self.backoff.jitter_fraction = jitter;
        self
    }

    /// Use exponential backoff with the given bounds.
    #[must_use]
    pub fn exponential(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_mode = BackoffMode::Exponential;
        self.backoff.base_delay = base;
        self.backoff.max_delay = max;
        self
    }

    /// Use linear backoff with the given bounds.
    #[must_use]
    pub fn linear(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_mode = BackoffMode::Linear;
        self.backoff.base_delay = base;
        self.backoff.max_delay = max;
        self
    }

    /// Limit to `requests_per_second` using a token bucket.
    #[must_use]
    pub fn rate_limit(mut self, requests_per_second: u32) -> Self {
        self.rate_limit = Some(RateLimitConfig::per_second(requests_per_second));
        self
    }

    /// Set a full rate limit configuration.
    #[must_use]
    pub fn rate_limit_config(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    /// Set the retryability classification.
    #[must_use]
    pub fn retry_on(mut self, condition: RetryCondition) -> Self {
        self.retry_on = condition;
        self
    }

    /// Replace the retryable status-code set.
    #[must_use]
    pub fn retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_on.status_codes = codes.into_iter().collect();
        self
    }

    /// Set the default overall deadline per execution.
    #[must_use]
    pub fn overall_deadline(mut self, deadline: Duration) -> Self {
        self.overall_deadline = Some(deadline);
        self
    }

    /// Add a header sent with every request.
    #[must_use]
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Sensible defaults for calling model APIs: 3 retries, exponential
    /// backoff with jitter, the standard retryable status set.
    #[must_use]
    pub fn for_api() -> Self {
        Self::new()
            .max_retries(3)
            .exponential(Duration::from_millis(500), Duration::from_secs(60))
            .jitter_fraction(0.1)
    }

    /// A config that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new().max_retries(0)
    }
}
