//! HTTP client configuration.

use crate::request::OutboundRequest;
use crate::retry::RetryConfig;
use http::{HeaderName, Method};
use std::time::Duration;

/// Idempotency override for a group of routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteIdempotency {
    /// Method the rule applies to; any method when unset.
    pub method: Option<Method>,
    /// URL path prefix the rule applies to.
    pub path_prefix: String,
    /// Whether matching requests may be retried on ambiguous failures.
    pub idempotent: bool,
}

impl RouteIdempotency {
    /// Create a rule for every method under `path_prefix`.
    pub fn new(path_prefix: impl Into<String>, idempotent: bool) -> Self {
        Self {
            method: None,
            path_prefix: path_prefix.into(),
            idempotent,
        }
    }

    /// Restrict the rule to one method.
    pub fn for_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    fn matches(&self, request: &OutboundRequest) -> bool {
        self.method.as_ref().is_none_or(|m| *m == request.method)
            && request.url.path().starts_with(&self.path_prefix)
    }
}

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL for all requests.
    pub base_url: Option<String>,
    /// Default per-attempt timeout.
    pub timeout: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Overall deadline for a logical call, backoff included.
    pub request_deadline: Duration,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// How long idle pooled connections are kept.
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections per host.
    pub pool_max_idle_per_host: usize,
    /// Default headers for all requests.
    pub default_headers: Vec<(String, String)>,
    /// User agent string.
    pub user_agent: String,
    /// Enable gzip compression.
    pub gzip: bool,
    /// Enable brotli compression.
    pub brotli: bool,
    /// Follow redirects.
    pub follow_redirects: bool,
    /// Maximum redirects to follow.
    pub max_redirects: usize,
    /// Header carrying the correlation id.
    pub correlation_header: HeaderName,
    /// Per-route idempotency rules, first match wins.
    pub idempotent_routes: Vec<RouteIdempotency>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            request_deadline: Duration::from_secs(60),
            retry: RetryConfig::default(),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
            default_headers: Vec::new(),
            user_agent: format!("courier-http-client/{}", env!("CARGO_PKG_VERSION")),
            gzip: true,
            brotli: true,
            follow_redirects: true,
            max_redirects: 10,
            correlation_header: HeaderName::from_static("x-correlation-id"),
            idempotent_routes: Vec::new(),
        }
    }
}

impl HttpClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfigBuilder::default()
    }

    /// Whether `request` may be retried after an ambiguous failure.
    ///
    /// The request's own flag wins, then the first matching route rule, then
    /// the method: GET, HEAD, OPTIONS, PUT, DELETE and TRACE are idempotent.
    pub fn is_idempotent(&self, request: &OutboundRequest) -> bool {
        if let Some(explicit) = request.idempotent {
            return explicit;
        }

        if let Some(rule) = self.idempotent_routes.iter().find(|r| r.matches(request)) {
            return rule.idempotent;
        }

        matches!(
            request.method,
            Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE | Method::TRACE
        )
    }
}

/// Builder for HTTP client configuration.
#[derive(Debug, Default)]
pub struct HttpClientConfigBuilder {
    config: HttpClientConfig,
}

impl HttpClientConfigBuilder {
    /// Set the base URL for all requests.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the default per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the overall deadline of a logical call.
    pub fn request_deadline(mut self, deadline: Duration) -> Self {
        self.config.request_deadline = deadline;
        self
    }

    /// Set retry configuration.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.config.retry = config;
        self
    }

    /// Set the connection pool idle timeout.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    /// Set the maximum idle connections per host.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Add a default header for all requests.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Enable or disable gzip compression.
    pub fn gzip(mut self, enable: bool) -> Self {
        self.config.gzip = enable;
        self
    }

    /// Enable or disable brotli compression.
    pub fn brotli(mut self, enable: bool) -> Self {
        self.config.brotli = enable;
        self
    }

    /// Enable or disable following redirects.
    pub fn follow_redirects(mut self, enable: bool) -> Self {
        self.config.follow_redirects = enable;
        self
    }

    /// Set the maximum number of redirects to follow.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Set the correlation header name.
    pub fn correlation_header(mut self, name: HeaderName) -> Self {
        self.config.correlation_header = name;
        self
    }

    /// Add a per-route idempotency rule.
    pub fn idempotent_route(mut self, rule: RouteIdempotency) -> Self {
        self.config.idempotent_routes.push(rule);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> HttpClientConfig {
        self.config
    }
}
