//! Request and execution records.
//!
//! [`RequestSpec`] is the immutable description handed to the transport;
//! [`AttemptRecord`] and [`ExecutionReport`] are the per-execution accounting
//! that every terminal outcome carries.

use crate::transport::Response;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use std::time::Duration;
use uuid::Uuid;

/// Generate a unique request identifier.
///
/// Returns `req_` followed by 12 hex characters; the id correlates every
/// event and record belonging to one execution.
#[must_use]
pub fn generate_request_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("req_{}", &id[..12])
}

/// A fully resolved outbound request.
///
/// Built once per call (usually through [`Client`](crate::client::Client))
/// and never mutated while the retry loop runs.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// HTTP method.
    pub method: Method,
    /// Absolute target URL.
    pub url: Url,
    /// Request headers, defaults already merged.
    pub headers: HeaderMap,
    /// JSON body, if any.
    pub body: Option<serde_json::Value>,
    /// Per-attempt timeout override; falls back to the client default.
    pub timeout: Option<Duration>,
    /// Overall deadline override for the whole execution.
    pub deadline: Option<Duration>,
}

impl RequestSpec {
    /// Create a spec with no headers, body, or overrides.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            deadline: None,
        }
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Override the per-attempt timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set an overall deadline for the execution.
    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Per-attempt timeout elapsed.
    Timeout,
    /// Connection-level failure.
    Network,
    /// Response could not be used.
    Protocol,
    /// Non-success HTTP status.
    Http(u16),
}

/// Outcome of a single attempt.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// The transport returned a usable response.
    Succeeded {
        /// HTTP status code.
        status: u16,
    },
    /// The attempt failed.
    Failed {
        /// Failure classification.
        class: FailureClass,
        /// Error message.
        message: String,
    },
}

impl AttemptOutcome {
    /// Whether this attempt succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Record of one attempt within an execution.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// 1-based attempt index.
    pub attempt: u32,
    /// Wall-clock start of the transport call.
    pub started_at: DateTime<Utc>,
    /// Duration of the transport call only; limiter and backoff waits are
    /// recorded separately.
    pub latency: Duration,
    /// Backoff delay applied before this attempt (zero for the first).
    pub delay_before: Duration,
    /// What happened.
    pub outcome: AttemptOutcome,
}

/// Frozen accounting for one execution, success or failure.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Identifier correlating all events and records of this execution.
    pub request_id: String,
    /// Every attempt, in order, indices `1..=n`.
    pub attempts: Vec<AttemptRecord>,
    /// Wall-clock duration of the whole execution, waits included.
    pub total_elapsed: Duration,
    /// Total time spent waiting on the rate limiter.
    pub rate_limit_wait: Duration,
}

impl ExecutionReport {
    /// Create an empty report for the given execution id.
    #[must_use]
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            attempts: Vec::new(),
            total_elapsed: Duration::ZERO,
            rate_limit_wait: Duration::ZERO,
        }
    }

    /// Number of attempts made.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// Total backoff delay slept across all attempts.
    #[must_use]
    pub fn total_backoff(&self) -> Duration {
        self.attempts.iter().map(|a| a.delay_before).sum()
    }

    /// Time spent inside the transport, excluding limiter and backoff waits.
    #[must_use]
    pub fn working_time(&self) -> Duration {
        self.attempts.iter().map(|a| a.latency).sum()
    }
}

/// Successful execution: the response plus its attempt history.
#[derive(Debug)]
pub struct Execution {
    /// The final, successful response.
    pub response: Response,
    /// Full attempt history.
    pub report: ExecutionReport,
}
