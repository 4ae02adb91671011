//! # resilient-http
//!
//! A resilient outbound-request layer for HTTP-based (notably AI-model)
//! APIs: bounded request rate, retry with jittered backoff, per-attempt
//! timeouts, an overall deadline, and structured per-attempt accounting.
//!
//! ## Core Concepts
//!
//! - **[`Client`]**: construct once, share across concurrent executions
//! - **[`ClientConfig`]**: timeouts, retries, backoff, rate limit, deadline
//! - **[`RateLimiter`]**: token-bucket or rolling-window admission
//! - **[`BackoffParameters`]**: exponential/linear delay with jitter and cap
//! - **[`RetryCondition`]**: injected classification of retryable failures
//! - **[`RetryController`]**: the attempt loop itself
//! - **[`EventSink`]**: structured [`RequestEvent`] recording per transition
//!
//! Every execution resolves to a terminal outcome carrying its full
//! [`ExecutionReport`]: how many attempts ran, what each one did, and how
//! long was spent working versus waiting.
//!
//! ## Example
//!
//! ```ignore
//! use resilient_http::{Client, ClientConfig};
//! use std::time::Duration;
//!
//! let client = Client::new(
//!     ClientConfig::for_api()
//!         .base_url("https://api.example.com")
//!         .rate_limit(10)
//!         .overall_deadline(Duration::from_secs(120)),
//! )?;
//!
//! let execution = client
//!     .post("/v1/chat", &serde_json::json!({"input": "hello"}))
//!     .await?;
//!
//! let answer: serde_json::Value = execution.response.json()?;
//! client.close().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod limiter;
pub mod request;
pub mod retry;
pub mod transport;

// Re-exports
pub use backoff::{BackoffMode, BackoffParameters};
pub use client::{Client, ClientBuilder, RequestBuilder};
pub use config::{ClientConfig, RateLimitConfig, RateLimitMode, RetryCondition};
pub use error::{ClientError, TransportError};
pub use events::{EventSink, MemorySink, NullSink, RequestEvent, TracingSink};
pub use limiter::RateLimiter;
pub use request::{
    AttemptOutcome, AttemptRecord, Execution, ExecutionReport, FailureClass, RequestSpec,
};
pub use retry::RetryController;
pub use transport::{HttpTransport, Response, Transport};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{
        BackoffMode, Client, ClientConfig, ClientError, Execution, RateLimitMode, RetryCondition,
    };
}
