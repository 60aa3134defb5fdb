//! Outbound request model and builder.

use crate::pool::{TaskHandle, WorkerPool};
use crate::{HttpClient, HttpClientError, Response, Result};
use bytes::Bytes;
use courier_core::CorrelationContext;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use std::time::Duration;
use url::Url;

/// A fully built outbound request.
///
/// Cheap to clone: the body is reference counted, so every attempt sends the
/// same bytes.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute target URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Option<Bytes>,
    /// Per-attempt timeout; the client default applies when unset.
    pub timeout: Option<Duration>,
    /// Explicit idempotency; route rules and the method decide when unset.
    pub idempotent: Option<bool>,
    /// Treat a 2xx response whose body is not JSON as a protocol error.
    pub expect_json: bool,
    /// Correlation context to send under; the active one is used when unset.
    pub correlation: Option<CorrelationContext>,
}

impl OutboundRequest {
    /// Create a request with no headers or body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            idempotent: None,
            expect_json: false,
            correlation: None,
        }
    }

    /// Parse `url` and create a request.
    pub fn parse(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| HttpClientError::InvalidUrl(e.to_string()))?;
        Ok(Self::new(method, url))
    }

    /// Set a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Mark the request idempotent or not.
    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = Some(idempotent);
        self
    }

    /// Require a JSON body on success.
    pub fn with_expect_json(mut self) -> Self {
        self.expect_json = true;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send under an explicit correlation context.
    pub fn with_correlation(mut self, ctx: CorrelationContext) -> Self {
        self.correlation = Some(ctx);
        self
    }

    /// Get a header value as text.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }
}

/// HTTP request builder.
pub struct RequestBuilder<'a> {
    client: &'a HttpClient,
    method: Method,
    url: String,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    idempotent: Option<bool>,
    expect_json: bool,
    correlation: Option<CorrelationContext>,
    error: Option<HttpClientError>,
}

impl<'a> RequestBuilder<'a> {
    /// Create a new request builder.
    pub(crate) fn new(client: &'a HttpClient, method: Method, url: String) -> Self {
        Self {
            client,
            method,
            url,
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
            idempotent: None,
            expect_json: false,
            correlation: None,
            error: None,
        }
    }

    /// Add a header to the request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => {
                self.error.get_or_insert(HttpClientError::RequestBuild(format!(
                    "invalid header {name}"
                )));
            }
        }
        self
    }

    /// Add multiple headers to the request.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add multiple query parameters.
    pub fn queries<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in params {
            self.query.push((k.into(), v.into()));
        }
        self
    }

    /// Set the request body as raw bytes.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the request body as text.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.body = Some(Bytes::from(text.into()));
        self
    }

    /// Set the request body as JSON.
    pub fn json<T: Serialize>(mut self, json: &T) -> Self {
        match serde_json::to_vec(json) {
            Ok(bytes) => {
                self.headers.insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                self.body = Some(Bytes::from(bytes));
            }
            Err(e) => {
                self.error
                    .get_or_insert(HttpClientError::RequestBuild(format!("JSON body: {e}")));
            }
        }
        self
    }

    /// Set the request body as form data.
    pub fn form<T: Serialize>(mut self, form: &T) -> Self {
        match serde_urlencoded::to_string(form) {
            Ok(encoded) => {
                self.headers.insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded"),
                );
                self.body = Some(Bytes::from(encoded));
            }
            Err(e) => {
                self.error
                    .get_or_insert(HttpClientError::RequestBuild(format!("form body: {e}")));
            }
        }
        self
    }

    /// Set a custom per-attempt timeout for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Declare whether the request is safe to execute more than once.
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = Some(idempotent);
        self
    }

    /// Treat a successful response without a JSON body as a protocol error.
    pub fn expect_json(mut self) -> Self {
        self.expect_json = true;
        self
    }

    /// Send under an explicit correlation context.
    pub fn correlation(mut self, ctx: CorrelationContext) -> Self {
        self.correlation = Some(ctx);
        self
    }

    /// Set bearer authentication.
    pub fn bearer_auth(self, token: impl Into<String>) -> Self {
        self.header("Authorization", format!("Bearer {}", token.into()))
    }

    /// Set basic authentication.
    pub fn basic_auth(
        self,
        username: impl Into<String>,
        password: Option<impl Into<String>>,
    ) -> Self {
        use base64::Engine;
        let credentials = match password {
            Some(p) => format!("{}:{}", username.into(), p.into()),
            None => format!("{}:", username.into()),
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        self.header("Authorization", format!("Basic {}", encoded))
    }

    /// Build the URL with query parameters.
    fn build_url(&self) -> Result<Url> {
        let mut url = if let Some(base) = &self.client.config().base_url {
            let base = Url::parse(base).map_err(|e| HttpClientError::InvalidUrl(e.to_string()))?;
            base.join(&self.url)
                .map_err(|e| HttpClientError::InvalidUrl(e.to_string()))?
        } else {
            Url::parse(&self.url).map_err(|e| HttpClientError::InvalidUrl(e.to_string()))?
        };

        if !self.query.is_empty() {
            let mut query_pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                query_pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// Build the request without sending it.
    pub fn build(mut self) -> Result<OutboundRequest> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }

        let url = self.build_url()?;
        let mut headers = HeaderMap::new();

        for (name, value) in &self.client.config().default_headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| HttpClientError::RequestBuild(e.to_string()))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| HttpClientError::RequestBuild(e.to_string()))?;
            headers.insert(name, value);
        }
        headers.extend(self.headers);

        Ok(OutboundRequest {
            method: self.method,
            url,
            headers,
            body: self.body,
            timeout: self.timeout,
            idempotent: self.idempotent,
            expect_json: self.expect_json,
            correlation: self.correlation,
        })
    }

    /// Send the request, retrying per the client's policy.
    pub async fn send(self) -> Result<Response> {
        let client = self.client;
        let request = self.build()?;
        client
            .executor()
            .execute(request, client.config().request_deadline)
            .await
    }

    /// Send the request on the calling thread, blocking through backoff.
    ///
    /// Must not be called from within an async runtime when the client uses
    /// the reqwest transport.
    pub fn send_blocking(self) -> Result<Response> {
        let client = self.client;
        let request = self.build()?;
        client
            .executor()
            .execute_blocking(request, client.config().request_deadline)
    }

    /// Hand the request to a worker pool.
    pub fn submit(self, pool: &WorkerPool) -> Result<TaskHandle<Response>> {
        let client = self.client;
        let request = self.build()?;
        client
            .executor()
            .submit(pool, request, client.config().request_deadline)
    }
}
