//! Error types for resilient-http.
//!
//! Two layers: [`TransportError`] is what a single attempt can fail with,
//! [`ClientError`] is what an execution resolves to after the retry loop has
//! made its final decision. Callers never see a partial state: every terminal
//! failure carries the full [`ExecutionReport`] so "how many attempts, what
//! failed, how long total" is always answerable.

use crate::request::ExecutionReport;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single transport attempt.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The attempt exceeded its per-attempt timeout.
    #[error("request timed out")]
    Timeout,

    /// Connection-level failure (DNS, TCP, TLS, reset).
    #[error("network error: {0}")]
    Network(String),

    /// The exchange completed but the response could not be used
    /// (body read failure, malformed payload).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered with a non-success status code.
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` header, if the server sent one.
        retry_after: Option<Duration>,
    },
}

impl TransportError {
    /// Create an HTTP status error without a `Retry-After` hint.
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    /// Create a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// The HTTP status, if this failure carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The server's suggested wait before retrying, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Terminal outcome of a failed execution.
///
/// Every variant that follows at least one attempt carries the frozen
/// [`ExecutionReport`]; [`ClientError::Validation`] is raised before the
/// first attempt and carries none.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request was malformed and was never attempted.
    #[error("invalid request: {0}")]
    Validation(String),

    /// All `max_retries + 1` attempts failed with retryable errors.
    #[error("retries exhausted after {} attempts: {last}", .report.attempts.len())]
    RetriesExhausted {
        /// The error of the final attempt.
        last: TransportError,
        /// Full attempt history.
        report: ExecutionReport,
    },

    /// The overall deadline ran out before the attempts did.
    #[error("deadline exceeded after {} attempts", .report.attempts.len())]
    DeadlineExceeded {
        /// The most recent attempt error, if any attempt completed.
        last: Option<TransportError>,
        /// Full attempt history.
        report: ExecutionReport,
    },

    /// A non-retryable failure ended the execution on the attempt it
    /// occurred.
    #[error("request aborted: {last}")]
    Aborted {
        /// The error that ended the execution.
        last: TransportError,
        /// Full attempt history.
        report: ExecutionReport,
    },
}

impl ClientError {
    /// The attempt history, when at least one attempt ran.
    pub fn report(&self) -> Option<&ExecutionReport> {
        match self {
            Self::Validation(_) => None,
            Self::RetriesExhausted { report, .. }
            | Self::DeadlineExceeded { report, .. }
            | Self::Aborted { report, .. } => Some(report),
        }
    }

    /// The last transport error observed, if any.
    pub fn last_error(&self) -> Option<&TransportError> {
        match self {
            Self::Validation(_) => None,
            Self::RetriesExhausted { last, .. } | Self::Aborted { last, .. } => Some(last),
            Self::DeadlineExceeded { last, .. } => last.as_ref(),
        }
    }
}
