//! The client: the externally callable request executor.
//!
//! A [`Client`] owns one transport, one optional [`RateLimiter`] shared by
//! all of its executions, and one event sink. Each call composes admission,
//! per-attempt timeout, retry with backoff, and event emission into a single
//! operation that always resolves to a terminal [`Execution`] or
//! [`ClientError`].
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
//!         .timeout(Duration::from_secs(10))
//!         .rate_limit(10),
//! )?;
//!
//! let execution = client.get("/v1/models").await?;
//! println!("{} after {} attempts", execution.response.status, execution.report.attempt_count());
//! client.close().await;
//! ```

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::{EventSink, TracingSink};
use crate::limiter::RateLimiter;
use crate::request::{Execution, RequestSpec};
use crate::retry::RetryController;
use crate::transport::{HttpTransport, Transport};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Build the absolute target URL for a request path.
///
/// Absolute URLs pass through untouched; relative paths are joined onto the
/// base URL with slash normalization.
pub(crate) fn join_url(base: Option<&str>, path: &str) -> Result<Url, ClientError> {
    if path.starts_with("http://") || path.starts_with("https://") {
        return Url::parse(path)
            .map_err(|e| ClientError::Validation(format!("invalid url {path:?}: {e}")));
    }
    let base = base
        .ok_or_else(|| ClientError::Validation(format!("relative path {path:?} needs a base_url")))?;
    let full = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
    Url::parse(&full).map_err(|e| ClientError::Validation(format!("invalid url {full:?}: {e}")))
}

/// Resilient HTTP client for AI-model APIs.
///
/// Construct with [`Client::new`] or [`Client::builder`], use for any number
/// of concurrent executions, and end the scope with [`Client::close`] (or by
/// dropping), which releases the pooled transport resources.
pub struct Client {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    limiter: Option<RateLimiter>,
    sink: Arc<dyn EventSink>,
    default_headers: HeaderMap,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client over the default HTTP transport.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::builder().config(config).build()
    }

    /// Create a builder, for injecting a custom transport or event sink.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start building a request.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder<'_> {
        let spec = join_url(self.config.base_url.as_deref(), path).map(|url| {
            let mut spec = RequestSpec::new(method, url);
            spec.headers = self.default_headers.clone();
            spec
        });
        RequestBuilder { client: self, spec }
    }

    /// Execute a fully built request through the retry loop.
    pub async fn execute(&self, spec: RequestSpec) -> Result<Execution, ClientError> {
        RetryController::new(
            self.transport.as_ref(),
            &self.config.retry_on,
            &self.config.backoff,
            self.config.backoff_mode,
        )
        .max_retries(self.config.max_retries)
        .attempt_timeout(self.config.timeout)
        .overall_deadline(self.config.overall_deadline)
        .limiter(self.limiter.as_ref())
        .sink(self.sink.as_ref())
        .run(&spec)
        .await
    }

    /// Execute a GET request.
    pub async fn get(&self, path: &str) -> Result<Execution, ClientError> {
        self.request(Method::GET, path).send().await
    }

    /// Execute a POST request with a JSON body.
    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<Execution, ClientError> {
        self.request(Method::POST, path).json(body).send().await
    }

    /// Execute a PUT request with a JSON body.
    pub async fn put<B: Serialize>(&self, path: &str, body: &B) -> Result<Execution, ClientError> {
        self.request(Method::PUT, path).json(body).send().await
    }

    /// Execute a PATCH request with a JSON body.
    pub async fn patch<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Execution, ClientError> {
        self.request(Method::PATCH, path).json(body).send().await
    }

    /// Execute a DELETE request.
    pub async fn delete(&self, path: &str) -> Result<Execution, ClientError> {
        self.request(Method::DELETE, path).send().await
    }

    /// End the client's scope, releasing transport resources.
    ///
    /// Dropping the client has the same effect; `close` makes the end of the
    /// usage scope explicit.
    pub async fn close(self) {}
}

/// Builder for [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl ClientBuilder {
    /// Set the configuration.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the HTTP transport, e.g. with a mock in tests.
    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Replace the default tracing event sink.
    #[must_use]
    pub fn sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Build the client, validating default headers.
    pub fn build(self) -> Result<Client, ClientError> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in &self.config.default_headers {
            let name: HeaderName = name
                .parse()
                .map_err(|_| ClientError::Validation(format!("invalid header name {name:?}")))?;
            let value: HeaderValue = value
                .parse()
                .map_err(|_| ClientError::Validation(format!("invalid value for header {name}")))?;
            default_headers.insert(name, value);
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                HttpTransport::new().map_err(|e| ClientError::Validation(e.to_string()))?,
            ),
        };
        let limiter = self.config.rate_limit.as_ref().map(RateLimiter::new);
        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingSink));

        Ok(Client {
            config: self.config,
            transport,
            limiter,
            sink,
            default_headers,
        })
    }
}

/// Per-request builder returned by [`Client::request`].
///
/// Validation failures (bad URL, bad header, unserializable body) are
/// deferred and surface from [`send`](RequestBuilder::send) as
/// [`ClientError::Validation`], before any attempt runs.
pub struct RequestBuilder<'a> {
    client: &'a Client,
    spec: Result<RequestSpec, ClientError>,
}

impl RequestBuilder<'_> {
    /// Add a header, overriding any default of the same name.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.spec = self.spec.and_then(|mut spec| {
            let name: HeaderName = name
                .parse()
                .map_err(|_| ClientError::Validation(format!("invalid header name {name:?}")))?;
            let value: HeaderValue = value
                .parse()
                .map_err(|_| ClientError::Validation(format!("invalid value for header {name}")))?;
            spec.headers.insert(name, value);
            Ok(spec)
        });
        self
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn json<B: Serialize>(mut self, body: &B) -> Self {
        self.spec = self.spec.and_then(|spec| {
            let body = serde_json::to_value(body)
                .map_err(|e| ClientError::Validation(format!("unserializable body: {e}")))?;
            Ok(spec.json(body))
        });
        self
    }

    /// Override the per-attempt timeout for this request.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.spec = self.spec.map(|spec| spec.timeout(timeout));
        self
    }

    /// Set an overall deadline for this execution.
    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.spec = self.spec.map(|spec| spec.deadline(deadline));
        self
    }

    /// Execute the request.
    pub async fn send(self) -> Result<Execution, ClientError> {
        self.client.execute(self.spec?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::Response;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CaptureTransport {
        seen: Mutex<Vec<RequestSpec>>,
    }

    impl CaptureTransport {
        fn new() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for CaptureTransport {
        async fn send(&self, spec: &RequestSpec) -> Result<Response, TransportError> {
            self.seen.lock().unwrap().push(spec.clone());
            Ok(Response {
                status: 200,
                body: "{}".into(),
            })
        }
    }

    #[test]
    fn test_join_url() {
        let url = join_url(Some("https://api.example.com/"), "/v1/chat").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/chat");

        let url = join_url(Some("https://api.example.com"), "v1/chat").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/chat");

        // Absolute URLs bypass the base.
        let url = join_url(Some("https://api.example.com"), "https://other.example.com/x").unwrap();
        assert_eq!(url.host_str(), Some("other.example.com"));

        assert!(matches!(
            join_url(None, "/v1/chat"),
            Err(ClientError::Validation(_))
        ));
    }

    #[test]
    fn test_invalid_default_header_is_rejected() {
        let result = Client::new(ClientConfig::new().default_header("bad header", "v"));
        assert!(matches!(result, Err(ClientError::Validation(_))));
    }

    #[tokio::test]
    async fn test_default_headers_merge_and_override() {
        let transport = Arc::new(CaptureTransport::new());
        let client = Client::builder()
            .config(
                ClientConfig::new()
                    .base_url("https://api.example.com")
                    .default_header("x-api-key", "secret")
                    .default_header("x-trace", "default"),
            )
            .transport(SharedTransport(Arc::clone(&transport)))
            .build()
            .unwrap();

        client
            .request(Method::GET, "/v1/models")
            .header("x-trace", "override")
            .send()
            .await
            .unwrap();

        let seen = transport.seen.lock().unwrap();
        let headers = &seen[0].headers;
        assert_eq!(headers.get("x-api-key").unwrap(), "secret");
        assert_eq!(headers.get("x-trace").unwrap(), "override");
    }

    #[tokio::test]
    async fn test_invalid_request_header_fails_before_any_attempt() {
        let transport = Arc::new(CaptureTransport::new());
        let client = Client::builder()
            .config(ClientConfig::new().base_url("https://api.example.com"))
            .transport(SharedTransport(Arc::clone(&transport)))
            .build()
            .unwrap();

        let err = client
            .request(Method::GET, "/x")
            .header("bad header", "v")
            .send()
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_post_serializes_json_body() {
        let transport = Arc::new(CaptureTransport::new());
        let client = Client::builder()
            .config(ClientConfig::new().base_url("https://api.example.com"))
            .transport(SharedTransport(Arc::clone(&transport)))
            .build()
            .unwrap();

        let execution = client
            .post("/v1/chat", &serde_json::json!({"model": "m", "input": "hi"}))
            .await
            .unwrap();
        assert_eq!(execution.response.status, 200);
        assert_eq!(execution.report.attempt_count(), 1);

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].method, Method::POST);
        assert_eq!(seen[0].body.as_ref().unwrap()["model"], "m");
    }

    /// Adapter so a test can keep a handle to the transport it injects.
    struct SharedTransport(Arc<CaptureTransport>);

    #[async_trait]
    impl Transport for SharedTransport {
        async fn send(&self, spec: &RequestSpec) -> Result<Response, TransportError> {
            self.0.send(spec).await
        }
    }
}
