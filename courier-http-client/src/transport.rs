//! Transport boundary.
//!
//! The executor talks to the network only through [`TransportAdapter`]. One
//! adapter serves both execution regimes: [`send`](TransportAdapter::send)
//! blocks the calling thread, [`send_async`](TransportAdapter::send_async)
//! suspends. Both take a per-call timeout.

use crate::config::HttpClientConfig;
use crate::error::TransportError;
use crate::request::OutboundRequest;
use crate::{HttpClientError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use url::Url;

/// Raw response as seen by the transport, before classification.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Full response body.
    pub body: Bytes,
    /// Final URL, after redirects.
    pub url: Url,
}

/// Pluggable HTTP engine.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Perform one physical call on the current thread.
    fn send(
        &self,
        request: &OutboundRequest,
        timeout: Duration,
    ) -> std::result::Result<TransportResponse, TransportError>;

    /// Perform one physical call without blocking the thread.
    ///
    /// Dropping the returned future abandons the call.
    async fn send_async(
        &self,
        request: &OutboundRequest,
        timeout: Duration,
    ) -> std::result::Result<TransportResponse, TransportError>;
}

// ============================================================================
// reqwest
// ============================================================================

#[derive(Debug, Clone)]
struct EngineSettings {
    connect_timeout: Duration,
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
    user_agent: String,
    gzip: bool,
    brotli: bool,
    follow_redirects: bool,
    max_redirects: usize,
}

impl EngineSettings {
    fn redirect_policy(&self) -> reqwest::redirect::Policy {
        if self.follow_redirects {
            reqwest::redirect::Policy::limited(self.max_redirects)
        } else {
            reqwest::redirect::Policy::none()
        }
    }

    fn async_client(&self) -> std::result::Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .user_agent(&self.user_agent)
            .gzip(self.gzip)
            .brotli(self.brotli)
            .redirect(self.redirect_policy())
            .build()
    }

    fn blocking_client(&self) -> std::result::Result<reqwest::blocking::Client, reqwest::Error> {
        reqwest::blocking::Client::builder()
            .timeout(None::<Duration>)
            .connect_timeout(self.connect_timeout)
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .user_agent(&self.user_agent)
            .gzip(self.gzip)
            .brotli(self.brotli)
            .redirect(self.redirect_policy())
            .build()
    }
}

/// Transport backed by reqwest.
///
/// The async client is built eagerly. The blocking client is built on first
/// blocking use, so async-only callers never start its background runtime.
pub struct ReqwestTransport {
    client: reqwest::Client,
    blocking: OnceCell<reqwest::blocking::Client>,
    settings: EngineSettings,
}

impl ReqwestTransport {
    /// Build a transport from the connection settings in `config`.
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        let settings = EngineSettings {
            connect_timeout: config.connect_timeout,
            pool_idle_timeout: config.pool_idle_timeout,
            pool_max_idle_per_host: config.pool_max_idle_per_host,
            user_agent: config.user_agent.clone(),
            gzip: config.gzip,
            brotli: config.brotli,
            follow_redirects: config.follow_redirects,
            max_redirects: config.max_redirects,
        };

        let client = settings
            .async_client()
            .map_err(|e| HttpClientError::RequestBuild(describe(&e)))?;

        Ok(Self {
            client,
            blocking: OnceCell::new(),
            settings,
        })
    }

    /// Get the underlying async reqwest client.
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }
}

/// Flatten a reqwest error and its sources into one message.
fn describe(e: &reqwest::Error) -> String {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// What reqwest reports about a failure. A connect timeout sets both
/// `connect` and `timeout`.
#[derive(Debug, Clone, Copy, Default)]
struct ErrorFlags {
    connect: bool,
    timeout: bool,
    decode: bool,
    builder: bool,
}

impl ErrorFlags {
    fn of(e: &reqwest::Error) -> Self {
        Self {
            connect: e.is_connect(),
            timeout: e.is_timeout(),
            decode: e.is_decode() || e.is_body(),
            builder: e.is_builder(),
        }
    }

    fn into_error(self, message: String) -> TransportError {
        match self {
            Self { timeout: true, connect: true, .. } => TransportError::connect_timeout(message),
            Self { timeout: true, .. } => TransportError::timeout(message),
            Self { connect: true, .. } => TransportError::connect(message),
            Self { decode: true, .. } => TransportError::protocol(message),
            Self { builder, .. } => TransportError::other(message, !builder),
        }
    }
}

fn map_error(e: reqwest::Error) -> TransportError {
    ErrorFlags::of(&e).into_error(describe(&e))
}

#[async_trait]
impl TransportAdapter for ReqwestTransport {
    fn send(
        &self,
        request: &OutboundRequest,
        timeout: Duration,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let client = self
            .blocking
            .get_or_try_init(|| self.settings.blocking_client())
            .map_err(|e| TransportError::other(describe(&e), false))?;

        let mut builder = client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .timeout(timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().map_err(map_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().map_err(map_error)?;

        Ok(TransportResponse {
            status,
            headers,
            body,
            url,
        })
    }

    async fn send_async(
        &self,
        request: &OutboundRequest,
        timeout: Duration,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .timeout(timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(map_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await.map_err(map_error)?;

        Ok(TransportResponse {
            status,
            headers,
            body,
            url,
        })
    }
}

// ============================================================================
// Scripted
// ============================================================================

#[derive(Debug, Clone)]
enum Reply {
    Response {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    Error(TransportError),
}

/// One scripted transport outcome.
#[derive(Debug, Clone)]
pub struct Step {
    delay: Duration,
    reply: Reply,
}

impl Step {
    /// Respond with `status` and an empty body.
    pub fn status(status: u16) -> Self {
        Self {
            delay: Duration::ZERO,
            reply: Reply::Response {
                status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                headers: HeaderMap::new(),
                body: Bytes::new(),
            },
        }
    }

    /// Respond 200 with `body`.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::status(200).body(body)
    }

    /// Respond with `status` and a JSON body.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::status(status)
            .header("content-type", "application/json")
            .body(value.to_string())
    }

    /// Fail with a transport error.
    pub fn fail(error: TransportError) -> Self {
        Self {
            delay: Duration::ZERO,
            reply: Reply::Error(error),
        }
    }

    /// Set the response body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        if let Reply::Response { body: b, .. } = &mut self.reply {
            *b = body.into();
        }
        self
    }

    /// Add a response header. Invalid names or values are ignored.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let Reply::Response { headers, .. } = &mut self.reply
            && let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name),
                HeaderValue::try_from(value),
            )
        {
            headers.insert(name, value);
        }
        self
    }

    /// Take `delay` to produce the outcome.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A request as seen by a [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct SeenRequest {
    /// HTTP method.
    pub method: Method,
    /// Target URL.
    pub url: Url,
    /// Headers, correlation header included.
    pub headers: HeaderMap,
    /// Body.
    pub body: Option<Bytes>,
}

impl SeenRequest {
    /// Get a header value as text.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }
}

type Responder = dyn Fn(&OutboundRequest) -> Step + Send + Sync;

/// In-memory transport that replays scripted outcomes.
///
/// Steps are consumed in order; once the script runs out, the responder is
/// asked, and without one every call answers 200. Every request is recorded.
///
/// A step slower than the call's timeout waits out the timeout and then fails
/// with [`TransportError::Timeout`], as a real engine would.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    responder: Option<Box<Responder>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedTransport {
    /// Create an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    pub fn then(self, step: Step) -> Self {
        self.script.lock().push_back(step);
        self
    }

    /// Append `step` `times` times.
    pub fn then_repeat(self, step: Step, times: usize) -> Self {
        {
            let mut script = self.script.lock();
            for _ in 0..times {
                script.push_back(step.clone());
            }
        }
        self
    }

    /// Answer with `responder` once the script is exhausted.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&OutboundRequest) -> Step + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Append a step to a shared transport.
    pub fn push(&self, step: Step) {
        self.script.lock().push_back(step);
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().clone()
    }

    /// Number of requests seen so far.
    pub fn request_count(&self) -> usize {
        self.seen.lock().len()
    }

    fn next(&self, request: &OutboundRequest) -> Step {
        self.seen.lock().push(SeenRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        });

        let scripted = self.script.lock().pop_front();
        match (scripted, &self.responder) {
            (Some(step), _) => step,
            (None, Some(responder)) => responder(request),
            (None, None) => Step::status(200),
        }
    }

    /// How long to wait, and what to return afterwards.
    fn resolve(
        step: Step,
        request: &OutboundRequest,
        timeout: Duration,
    ) -> (Duration, std::result::Result<TransportResponse, TransportError>) {
        if step.delay > timeout {
            return (
                timeout,
                Err(TransportError::timeout(format!(
                    "no response within {timeout:?}"
                ))),
            );
        }

        let result = match step.reply {
            Reply::Response {
                status,
                headers,
                body,
            } => Ok(TransportResponse {
                status,
                headers,
                body,
                url: request.url.clone(),
            }),
            Reply::Error(e) => Err(e),
        };
        (step.delay, result)
    }
}

#[async_trait]
impl TransportAdapter for ScriptedTransport {
    fn send(
        &self,
        request: &OutboundRequest,
        timeout: Duration,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let (wait, result) = Self::resolve(self.next(request), request, timeout);
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        result
    }

    async fn send_async(
        &self,
        request: &OutboundRequest,
        timeout: Duration,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let (wait, result) = Self::resolve(self.next(request), request, timeout);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> OutboundRequest {
        OutboundRequest::parse(Method::GET, "http://svc.local/items").unwrap()
    }

    #[test]
    fn test_script_order_then_default() {
        let transport = ScriptedTransport::new()
            .then(Step::status(503))
            .then(Step::fail(TransportError::connect("refused")));

        let timeout = Duration::from_secs(1);
        let first = transport.send(&request(), timeout).unwrap();
        assert_eq!(first.status, StatusCode::SERVICE_UNAVAILABLE);

        let second = transport.send(&request(), timeout).unwrap_err();
        assert_eq!(second, TransportError::connect("refused"));

        let third = transport.send(&request(), timeout).unwrap();
        assert_eq!(third.status, StatusCode::OK);
        assert_eq!(transport.request_count(), 3);
    }

    #[test]
    fn test_responder_sees_request() {
        let transport = ScriptedTransport::new().with_responder(|req| Step::ok(req.url.path().to_string()));

        let response = transport.send(&request(), Duration::from_secs(1)).unwrap();
        assert_eq!(response.body, Bytes::from_static(b"/items"));

        let response =
            tokio_test::block_on(transport.send_async(&request(), Duration::from_secs(1))).unwrap();
        assert_eq!(response.body, Bytes::from_static(b"/items"));
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_step_times_out() {
        let transport = ScriptedTransport::new().then(Step::ok("late").delayed(Duration::from_secs(5)));

        let start = tokio::time::Instant::now();
        let err = transport
            .send_async(&request(), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Timeout { .. }));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn test_error_flags_mapping() {
        let connect_timeout = ErrorFlags {
            connect: true,
            timeout: true,
            ..Default::default()
        };
        let err = connect_timeout.into_error("operation timed out".into());
        assert_eq!(err, TransportError::connect_timeout("operation timed out"));
        assert!(!err.request_sent());

        let read_timeout = ErrorFlags {
            timeout: true,
            ..Default::default()
        };
        assert_eq!(
            read_timeout.into_error("read".into()),
            TransportError::timeout("read")
        );

        let refused = ErrorFlags {
            connect: true,
            ..Default::default()
        };
        assert_eq!(refused.into_error("refused".into()), TransportError::connect("refused"));

        let builder = ErrorFlags {
            builder: true,
            ..Default::default()
        };
        assert!(!builder.into_error("bad".into()).request_sent());
    }

    #[test]
    fn test_step_json_headers() {
        let step = Step::json(201, &serde_json::json!({"id": 7}))
            .header("retry-after", "3");
        let transport = ScriptedTransport::new().then(step);

        let response = transport.send(&request(), Duration::from_secs(1)).unwrap();
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.headers["content-type"], "application/json");
        assert_eq!(response.headers["retry-after"], "3");
        assert_eq!(response.body, Bytes::from_static(br#"{"id":7}"#));
    }
}
