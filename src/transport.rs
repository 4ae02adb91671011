//! The transport capability.
//!
//! The retry loop only requires the narrow [`Transport`] contract: send one
//! request, return a usable [`Response`] or a classified
//! [`TransportError`]. Connection pooling, TLS, and serialization live
//! entirely behind [`HttpTransport`].

use crate::error::TransportError;
use crate::request::{FailureClass, RequestSpec};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// A usable (2xx) HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Response body text.
    pub body: String,
}

impl Response {
    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_str(&self.body)
            .map_err(|e| TransportError::Protocol(format!("invalid JSON body: {e}")))
    }

    /// The body text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.body
    }
}

/// One transport-level try at fulfilling a request.
///
/// Implementations must be cancel-safe: the retry loop drops the in-flight
/// future when the per-attempt timeout elapses.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request once.
    async fn send(&self, spec: &RequestSpec) -> Result<Response, TransportError>;
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Network(err.to_string())
        } else if err.is_decode() || err.is_body() {
            TransportError::Protocol(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

impl TransportError {
    /// Classification of this failure for attempt records and events.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Timeout => FailureClass::Timeout,
            Self::Network(_) => FailureClass::Network,
            Self::Protocol(_) => FailureClass::Protocol,
            Self::Http { status, .. } => FailureClass::Http(*status),
        }
    }
}

/// HTTP transport over a pooled `reqwest` client.
///
/// The client carries no global timeout; the retry loop enforces the
/// per-attempt timeout so a timed-out attempt is abandoned rather than
/// leaking into the next one.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport with a fresh pooled client.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Protocol(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing `reqwest` client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, spec: &RequestSpec) -> Result<Response, TransportError> {
        let mut request = self
            .client
            .request(spec.method.clone(), spec.url.clone())
            .headers(spec.headers.clone());
        if let Some(body) = &spec.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(TransportError::from)?;
        let status = response.status().as_u16();

        if response.status().is_success() {
            let body = response.text().await.map_err(TransportError::from)?;
            return Ok(Response { status, body });
        }

        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Http {
            status,
            body,
            retry_after,
        })
    }
}

/// Parse a `Retry-After` header given in seconds.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
