//! Structured execution events.
//!
//! The retry loop emits one [`RequestEvent`] at each state transition,
//! synchronously, so events within one execution are strictly ordered. Sinks
//! are pure recorders: [`EventSink::emit`] is fire-and-forget and must never
//! fail back into the control path.

use crate::request::FailureClass;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

/// Convert a duration to milliseconds, rounded to two decimals.
pub(crate) fn millis(d: Duration) -> f64 {
    (d.as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

/// One structured event in the life of an execution.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RequestEvent {
    /// An attempt is about to call the transport.
    AttemptStarted {
        /// Execution correlation id.
        request_id: String,
        /// 1-based attempt index.
        attempt: u32,
        /// HTTP method.
        method: String,
        /// Target URL.
        url: String,
    },
    /// The transport returned a usable response.
    AttemptSucceeded {
        /// Execution correlation id.
        request_id: String,
        /// 1-based attempt index.
        attempt: u32,
        /// HTTP status code.
        status: u16,
        /// Transport-call latency in milliseconds.
        latency_ms: f64,
    },
    /// The attempt failed.
    AttemptFailed {
        /// Execution correlation id.
        request_id: String,
        /// 1-based attempt index.
        attempt: u32,
        /// Failure classification.
        class: String,
        /// Error message.
        error: String,
        /// Transport-call latency in milliseconds.
        latency_ms: f64,
    },
    /// A retry was scheduled after a retryable failure.
    RetryScheduled {
        /// Execution correlation id.
        request_id: String,
        /// Index of the attempt that just failed.
        attempt: u32,
        /// Maximum number of attempts for this execution.
        max_attempts: u32,
        /// Delay before the next attempt, in milliseconds.
        delay_ms: f64,
        /// The error that triggered the retry.
        error: String,
    },
    /// The rate limiter held the execution before an attempt.
    RateLimitWait {
        /// Execution correlation id.
        request_id: String,
        /// Time spent waiting for admission, in milliseconds.
        wait_ms: f64,
    },
    /// The execution reached a terminal state.
    ExecutionCompleted {
        /// Execution correlation id.
        request_id: String,
        /// Number of attempts made.
        attempts: u32,
        /// Total wall-clock time in milliseconds, waits included.
        total_ms: f64,
        /// Terminal outcome: `success`, `retries_exhausted`,
        /// `deadline_exceeded`, or `aborted`.
        outcome: String,
    },
    /// The execution future was dropped mid-flight.
    ExecutionAborted {
        /// Execution correlation id.
        request_id: String,
        /// Attempt that was in progress when the execution was cancelled.
        attempt: u32,
    },
}

impl RequestEvent {
    /// The correlation id this event belongs to.
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::AttemptStarted { request_id, .. }
            | Self::AttemptSucceeded { request_id, .. }
            | Self::AttemptFailed { request_id, .. }
            | Self::RetryScheduled { request_id, .. }
            | Self::RateLimitWait { request_id, .. }
            | Self::ExecutionCompleted { request_id, .. }
            | Self::ExecutionAborted { request_id, .. } => request_id,
        }
    }
}

/// Label used in events and logs for a failure class.
pub(crate) fn class_label(class: FailureClass) -> String {
    match class {
        FailureClass::Timeout => "timeout".into(),
        FailureClass::Network => "network".into(),
        FailureClass::Protocol => "protocol".into(),
        FailureClass::Http(status) => format!("http_{status}"),
    }
}

/// Destination for [`RequestEvent`]s.
///
/// Implementations must not panic and must not block: emission happens
/// inline on the retry loop's control path.
pub trait EventSink: Send + Sync {
    /// Record one event.
    fn emit(&self, event: &RequestEvent);
}

/// Default sink: forwards every event to `tracing` with structured fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &RequestEvent) {
        match event {
            RequestEvent::AttemptStarted {
                request_id,
                attempt,
                method,
                url,
            } => {
                tracing::debug!(%request_id, attempt, %method, %url, "attempt started");
            }
            RequestEvent::AttemptSucceeded {
                request_id,
                attempt,
                status,
                latency_ms,
            } => {
                tracing::info!(%request_id, attempt, status, latency_ms, "attempt succeeded");
            }
            RequestEvent::AttemptFailed {
                request_id,
                attempt,
                class,
                error,
                latency_ms,
            } => {
                tracing::warn!(%request_id, attempt, %class, %error, latency_ms, "attempt failed");
            }
            RequestEvent::RetryScheduled {
                request_id,
                attempt,
                max_attempts,
                delay_ms,
                error,
            } => {
                tracing::warn!(
                    %request_id,
                    attempt,
                    max_attempts,
                    delay_ms,
                    %error,
                    "retry scheduled"
                );
            }
            RequestEvent::RateLimitWait {
                request_id,
                wait_ms,
            } => {
                tracing::debug!(%request_id, wait_ms, "rate limited");
            }
            RequestEvent::ExecutionCompleted {
                request_id,
                attempts,
                total_ms,
                outcome,
            } => {
                tracing::info!(%request_id, attempts, total_ms, %outcome, "execution completed");
            }
            RequestEvent::ExecutionAborted {
                request_id,
                attempt,
            } => {
                tracing::warn!(%request_id, attempt, "execution aborted");
            }
        }
    }
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &RequestEvent) {}
}

/// Sink that buffers events in memory, for tests and inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<RequestEvent>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events.
    pub fn events(&self) -> Vec<RequestEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Drain the recorded events.
    pub fn take(&self) -> Vec<RequestEvent> {
        self.events
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &RequestEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
