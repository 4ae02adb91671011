//! Backoff delay computation.
//!
//! [`BackoffParameters::delay`] is a pure function of the attempt index and
//! the parameters, apart from the jitter draw; [`BackoffParameters::delay_with_rng`]
//! takes the random source explicitly so tests can seed it.

use rand::Rng;
use std::time::Duration;

/// How the delay grows with the attempt index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffMode {
    /// `base_delay * multiplier^(attempt - 1)`, capped.
    #[default]
    Exponential,
    /// `base_delay * attempt`, capped.
    Linear,
}

/// Parameters for backoff delay computation.
#[derive(Debug, Clone)]
pub struct BackoffParameters {
    /// Delay before the second attempt (exponential) or the per-attempt
    /// increment (linear).
    pub base_delay: Duration,
    /// Growth factor per attempt in exponential mode.
    pub multiplier: f64,
    /// Upper bound on any computed delay, jitter included.
    pub max_delay: Duration,
    /// Jitter fraction in `[0.0, 1.0]`; the final delay is scaled by a
    /// uniform draw from `1 ± jitter_fraction`.
    pub jitter_fraction: f64,
}

impl Default for BackoffParameters {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter_fraction: 0.1,
        }
    }
}

impl BackoffParameters {
    /// Create parameters with the default multiplier and jitter.
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Delay to apply after the failure of `attempt` (1-based), before the
    /// next attempt.
    #[must_use]
    pub fn delay(&self, mode: BackoffMode, attempt: u32) -> Duration {
        self.delay_with_rng(mode, attempt, &mut rand::thread_rng())
    }

    /// Same as [`delay`](Self::delay) with an explicit random source.
    ///
    /// Identical `(mode, attempt)` inputs and an identically seeded `rng`
    /// always produce the same value.
    pub fn delay_with_rng<R: Rng>(&self, mode: BackoffMode, attempt: u32, rng: &mut R) -> Duration {
        let attempt = attempt.max(1);
        let raw = match mode {
            BackoffMode::Exponential => {
                self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1)
            }
            BackoffMode::Linear => self.base_delay.as_secs_f64() * f64::from(attempt),
        };
        let cap = self.max_delay.as_secs_f64();
        let capped = raw.min(cap);
        let jittered = if self.jitter_fraction > 0.0 {
            capped * (1.0 + self.jitter_fraction * rng.gen_range(-1.0..1.0))
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.clamp(0.0, cap))
    }
}
