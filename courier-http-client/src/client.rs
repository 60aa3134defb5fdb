//! HTTP client implementation.

use http::Method;
use std::sync::Arc;

use crate::{
    AuditPipeline, HttpClientConfig, RequestBuilder, RequestExecutor, Result, RetryHook,
    TransportAdapter, transport::ReqwestTransport,
};

/// HTTP client with classified failures, safe retries and correlation.
#[derive(Clone, Debug)]
pub struct HttpClient {
    executor: RequestExecutor,
}

impl HttpClient {
    /// Create a new HTTP client backed by reqwest.
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a client over any transport.
    pub fn with_transport(config: HttpClientConfig, transport: Arc<dyn TransportAdapter>) -> Self {
        Self {
            executor: RequestExecutor::new(transport, config),
        }
    }

    /// Create a new HTTP client with default configuration.
    pub fn default_client() -> Result<Self> {
        Self::new(HttpClientConfig::default())
    }

    /// Record every logical call on `audit`.
    pub fn with_audit(mut self, audit: AuditPipeline) -> Self {
        self.executor = self.executor.with_audit(audit);
        self
    }

    /// Add a retry hook.
    pub fn with_hook(mut self, hook: impl RetryHook + 'static) -> Self {
        self.executor = self.executor.with_hook(hook);
        self
    }

    /// Add a retry hook shared with other clients.
    pub fn with_shared_hook(mut self, hook: Arc<dyn RetryHook>) -> Self {
        self.executor = self.executor.with_shared_hook(hook);
        self
    }

    /// Get the executor behind this client.
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Get the client configuration.
    pub fn config(&self) -> &HttpClientConfig {
        self.executor.config()
    }

    /// Create a GET request builder.
    pub fn get(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::GET, url.into())
    }

    /// Create a POST request builder.
    pub fn post(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::POST, url.into())
    }

    /// Create a PUT request builder.
    pub fn put(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::PUT, url.into())
    }

    /// Create a PATCH request builder.
    pub fn patch(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::PATCH, url.into())
    }

    /// Create a DELETE request builder.
    pub fn delete(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::DELETE, url.into())
    }

    /// Create a HEAD request builder.
    pub fn head(&self, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::HEAD, url.into())
    }

    /// Create a request builder with a custom method.
    pub fn request(&self, method: Method, url: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method, url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ScriptedTransport, Step};
    use crate::{HttpClientError, RetryConfig};
    use std::time::Duration;

    fn scripted(config: HttpClientConfig, transport: ScriptedTransport) -> (HttpClient, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        (HttpClient::with_transport(config, transport.clone()), transport)
    }

    #[test]
    fn test_client_creation() {
        let client = HttpClient::default_client().unwrap();
        assert!(client.config().gzip);
        assert!(client.config().brotli);
    }

    #[test]
    fn test_client_with_config() {
        let config = HttpClientConfig::builder()
            .timeout(Duration::from_secs(60))
            .base_url("https://api.example.com")
            .build();

        let client = HttpClient::new(config).unwrap();
        assert_eq!(client.config().timeout, Duration::from_secs(60));
        assert_eq!(
            client.config().base_url.as_deref(),
            Some("https://api.example.com")
        );
    }

    #[test]
    fn test_builder_assembles_request() {
        let config = HttpClientConfig::builder()
            .base_url("https://api.example.com/v1/")
            .default_header("x-tenant", "acme")
            .build();
        let (client, _) = scripted(config, ScriptedTransport::new());

        let request = client
            .post("orders")
            .query("dry_run", "true")
            .json(&serde_json::json!({"item": "widget"}))
            .bearer_auth("t0k3n")
            .idempotent(true)
            .build()
            .unwrap();

        assert_eq!(
            request.url.as_str(),
            "https://api.example.com/v1/orders?dry_run=true"
        );
        assert_eq!(request.header("x-tenant"), Some("acme"));
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.header("authorization"), Some("Bearer t0k3n"));
        assert_eq!(request.idempotent, Some(true));
        assert_eq!(request.body.as_deref(), Some(&br#"{"item":"widget"}"#[..]));
    }

    #[test]
    fn test_invalid_header_fails_build() {
        let (client, _) = scripted(HttpClientConfig::default(), ScriptedTransport::new());
        let err = client
            .get("http://svc.local/")
            .header("bad header", "x")
            .build()
            .unwrap_err();
        assert!(matches!(err, HttpClientError::RequestBuild(_)));

        let err = client.get("not a url").build().unwrap_err();
        assert!(matches!(err, HttpClientError::InvalidUrl(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_uses_policy() {
        let config = HttpClientConfig::builder()
            .retry(RetryConfig::exponential(2, Duration::from_millis(50)))
            .build();
        let (client, transport) = scripted(
            config,
            ScriptedTransport::new()
                .then(Step::status(503))
                .then(Step::json(200, &serde_json::json!({"id": 1}))),
        );

        let response = client.get("http://svc.local/items/1").send().await.unwrap();
        let body: serde_json::Value = response.json().unwrap();

        assert_eq!(body["id"], 1);
        assert_eq!(response.attempts(), 2);
        assert_eq!(transport.request_count(), 2);
    }

    #[test]
    fn test_send_blocking() {
        let (client, transport) = scripted(
            HttpClientConfig::default(),
            ScriptedTransport::new().then(Step::ok("pong")),
        );

        let response = client.get("http://svc.local/ping").send_blocking().unwrap();
        assert_eq!(response.text().unwrap(), "pong");
        assert_eq!(
            transport.requests()[0].header("x-correlation-id"),
            Some(response.correlation_id())
        );
    }
}
