//! Request executor.
//!
//! Runs one logical call as a strictly sequential series of physical
//! attempts. One retry state machine is shared by both
//! execution regimes; only the way time passes differs:
//!
//! - [`RequestExecutor::execute`] suspends on tokio timers and abandons an
//!   attempt that outlives its timeout by dropping the transport future.
//! - [`RequestExecutor::execute_blocking`] owns the calling thread and sleeps
//!   through backoff.
//! - [`RequestExecutor::submit`] hands a blocking execution to a
//!   [`WorkerPool`], carrying the correlation context across.
//!
//! Either way the correlation id is fixed before the first attempt, sent on
//! every attempt, echoed on the response, and stamped on the audit event.

use crate::classify::{RawOutcome, classify};
use crate::config::HttpClientConfig;
use crate::error::{ExecutionFailure, TransportError};
use crate::hooks::{AttemptInfo, RetryHook};
use crate::pool::{TaskHandle, WorkerPool};
use crate::request::OutboundRequest;
use crate::retry::{decide_with_retry_after, is_safe_to_retry, parse_retry_after};
use crate::transport::{TransportAdapter, TransportResponse};
use crate::{HttpClientError, Response, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use courier_audit::{AttemptOutcome, AuditEvent, AuditPipeline, CallAttempt};
use courier_core::{CorrelationContext, FailureKind, propagation};
use http::{HeaderValue, Method, StatusCode};
use serde::de::IgnoredAny;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{Instrument, debug, error, warn};

/// Executes logical calls against a [`TransportAdapter`].
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn TransportAdapter>,
    config: Arc<HttpClientConfig>,
    audit: AuditPipeline,
    hooks: Vec<Arc<dyn RetryHook>>,
}

impl RequestExecutor {
    /// Create an executor with auditing disabled.
    pub fn new(transport: Arc<dyn TransportAdapter>, config: HttpClientConfig) -> Self {
        Self {
            transport,
            config: Arc::new(config),
            audit: AuditPipeline::disabled(),
            hooks: Vec::new(),
        }
    }

    /// Record one audit event per logical call on `audit`.
    pub fn with_audit(mut self, audit: AuditPipeline) -> Self {
        self.audit = audit;
        self
    }

    /// Add a retry hook. Hooks run in the order they were added.
    pub fn with_hook(mut self, hook: impl RetryHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Add a shared retry hook.
    pub fn with_shared_hook(mut self, hook: Arc<dyn RetryHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Get the client configuration.
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Get the audit pipeline.
    pub fn audit(&self) -> &AuditPipeline {
        &self.audit
    }

    /// Get the transport.
    pub fn transport(&self) -> &Arc<dyn TransportAdapter> {
        &self.transport
    }

    /// Execute `request`, retrying per policy, within `deadline`.
    pub async fn execute(&self, request: OutboundRequest, deadline: Duration) -> Result<Response> {
        let (request, ctx) = self.prepare(request)?;
        let span = courier_log::outbound_span(
            ctx.correlation_id(),
            request.method.as_str(),
            request.url.as_str(),
        );
        let mut call = CallLoop::new(self, request, ctx.clone(), deadline);

        let run = async move {
            let start = tokio::time::Instant::now();
            let mut attempt = 1;
            loop {
                let timeout = match call.begin(attempt, start.elapsed()) {
                    ControlFlow::Continue(timeout) => timeout,
                    ControlFlow::Break(result) => return result,
                };

                let started_at = Utc::now();
                let attempt_start = tokio::time::Instant::now();
                let result = match tokio::time::timeout(
                    timeout,
                    self.transport.send_async(&call.request, timeout),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::timeout(format!(
                        "no response within {timeout:?}"
                    ))),
                };

                let elapsed = attempt_start.elapsed();
                match call.finish(attempt, started_at, elapsed, start.elapsed(), result) {
                    ControlFlow::Continue(delay) => tokio::time::sleep(delay).await,
                    ControlFlow::Break(result) => return result,
                }
                attempt += 1;
            }
        };

        propagation::scope(ctx, run).instrument(span).await
    }

    /// Execute `request` on the calling thread, sleeping through backoff.
    ///
    /// The correlation context is installed on this thread for the duration
    /// of the call and removed on every exit path.
    pub fn execute_blocking(&self, request: OutboundRequest, deadline: Duration) -> Result<Response> {
        let (request, ctx) = self.prepare(request)?;
        let span = courier_log::outbound_span(
            ctx.correlation_id(),
            request.method.as_str(),
            request.url.as_str(),
        );
        let _entered = span.enter();
        let _guard = propagation::enter(&ctx);

        let mut call = CallLoop::new(self, request, ctx, deadline);
        let start = std::time::Instant::now();
        let mut attempt = 1;
        loop {
            let timeout = match call.begin(attempt, start.elapsed()) {
                ControlFlow::Continue(timeout) => timeout,
                ControlFlow::Break(result) => return result,
            };

            let started_at = Utc::now();
            let attempt_start = std::time::Instant::now();
            let result = self.transport.send(&call.request, timeout);

            let elapsed = attempt_start.elapsed();
            match call.finish(attempt, started_at, elapsed, start.elapsed(), result) {
                ControlFlow::Continue(delay) => std::thread::sleep(delay),
                ControlFlow::Break(result) => return result,
            }
            attempt += 1;
        }
    }

    /// Queue a blocking execution of `request` on `pool`.
    ///
    /// The correlation context active now is the one the call runs under.
    pub fn submit(
        &self,
        pool: &WorkerPool,
        request: OutboundRequest,
        deadline: Duration,
    ) -> Result<TaskHandle<Response>> {
        let executor = self.clone();
        pool.submit_fallible(move || executor.execute_blocking(request, deadline))
    }

    /// Fix the correlation context and stamp its header on the request.
    ///
    /// An explicit context wins, then a correlation header already on the
    /// request, then the active context; otherwise a new id is generated.
    fn prepare(&self, mut request: OutboundRequest) -> Result<(OutboundRequest, CorrelationContext)> {
        let header = &self.config.correlation_header;
        let ctx = request
            .correlation
            .take()
            .or_else(|| {
                request
                    .header(header.as_str())
                    .filter(|id| !id.trim().is_empty())
                    .map(|id| CorrelationContext::with_id(id.trim()))
            })
            .or_else(propagation::current)
            .unwrap_or_else(CorrelationContext::new);

        let value = HeaderValue::from_str(ctx.correlation_id()).map_err(|e| {
            HttpClientError::RequestBuild(format!("invalid correlation id: {e}"))
        })?;
        request.headers.insert(header.clone(), value);

        Ok((request, ctx))
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("config", &self.config)
            .field("audit", &self.audit)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// A failed attempt, classified.
struct Failure {
    kind: FailureKind,
    message: String,
    status: Option<u16>,
    retry_after: Option<Duration>,
    request_sent: bool,
    body: Option<Bytes>,
}

/// Retry state of one logical call.
struct CallLoop<'a> {
    executor: &'a RequestExecutor,
    request: OutboundRequest,
    ctx: CorrelationContext,
    idempotent: bool,
    deadline: Duration,
    attempts: Vec<CallAttempt>,
    last_error: Option<String>,
    last_status: Option<u16>,
}

impl<'a> CallLoop<'a> {
    fn new(
        executor: &'a RequestExecutor,
        request: OutboundRequest,
        ctx: CorrelationContext,
        deadline: Duration,
    ) -> Self {
        let idempotent = executor.config.is_idempotent(&request);
        Self {
            executor,
            request,
            ctx,
            idempotent,
            deadline,
            attempts: Vec::new(),
            last_error: None,
            last_status: None,
        }
    }

    fn info(&self, attempt: u32) -> AttemptInfo<'_> {
        AttemptInfo {
            attempt,
            method: &self.request.method,
            url: &self.request.url,
            correlation_id: self.ctx.correlation_id(),
        }
    }

    /// Gate attempt `attempt`. Continues with its timeout.
    fn begin(&mut self, attempt: u32, elapsed: Duration) -> ControlFlow<Result<Response>, Duration> {
        let remaining = self.deadline.saturating_sub(elapsed);
        if remaining.is_zero() {
            let message = format!(
                "deadline of {:?} exceeded before attempt {attempt}",
                self.deadline
            );
            return ControlFlow::Break(self.fail(
                FailureKind::Timeout,
                attempt - 1,
                message,
                elapsed,
                None,
            ));
        }

        let executor = self.executor;
        let veto = executor
            .hooks
            .iter()
            .find_map(|hook| hook.before_attempt(&self.info(attempt)).err());
        if let Some(veto) = veto {
            return ControlFlow::Break(self.reject(attempt, veto.0, elapsed));
        }

        let timeout = self
            .request
            .timeout
            .unwrap_or(executor.config.timeout)
            .min(remaining);
        debug!(attempt, timeout_ms = timeout.as_millis() as u64, "Sending attempt");
        ControlFlow::Continue(timeout)
    }

    /// Account for attempt `attempt`. Continues with the backoff delay.
    fn finish(
        &mut self,
        attempt: u32,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        total: Duration,
        result: std::result::Result<TransportResponse, TransportError>,
    ) -> ControlFlow<Result<Response>, Duration> {
        let failure = match result {
            Ok(response) if response.status.as_u16() < 400 => {
                if self.is_malformed(&response) {
                    Failure {
                        kind: classify(&RawOutcome::MalformedBody),
                        message: "response body is not valid JSON".to_string(),
                        status: Some(response.status.as_u16()),
                        retry_after: None,
                        request_sent: true,
                        body: Some(response.body),
                    }
                } else {
                    let response = self.succeed(attempt, started_at, elapsed, total, response);
                    return ControlFlow::Break(Ok(response));
                }
            }
            Ok(response) => {
                let status = response.status.as_u16();
                let retry_after = response
                    .headers
                    .get(http::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| parse_retry_after(v, SystemTime::now()));
                Failure {
                    kind: classify(&RawOutcome::Status(status)),
                    message: format!("HTTP {}", response.status),
                    status: Some(status),
                    retry_after,
                    request_sent: true,
                    body: Some(response.body),
                }
            }
            Err(e) => Failure {
                kind: classify(&RawOutcome::Transport(&e)),
                message: e.to_string(),
                status: None,
                retry_after: None,
                request_sent: e.request_sent(),
                body: None,
            },
        };

        let executor = self.executor;
        let outcome = AttemptOutcome::Failed(failure.kind);
        self.push_attempt(
            attempt,
            started_at,
            elapsed,
            outcome,
            failure.status,
            Some(failure.message.clone()),
        );
        for hook in &executor.hooks {
            hook.after_attempt(&self.info(attempt), &outcome, elapsed);
        }
        self.last_error = Some(failure.message.clone());
        self.last_status = failure.status;

        debug!(
            attempt,
            kind = %failure.kind,
            status = failure.status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Attempt failed"
        );

        let mut decision = decide_with_retry_after(
            failure.kind,
            attempt,
            &executor.config.retry,
            failure.retry_after,
        );
        if decision.should_retry
            && !is_safe_to_retry(failure.kind, self.idempotent, failure.request_sent)
        {
            debug!(attempt, kind = %failure.kind, "Not retrying non-idempotent request");
            decision.should_retry = false;
        }

        if !decision.should_retry {
            return ControlFlow::Break(self.fail(
                failure.kind,
                attempt,
                failure.message,
                total,
                failure.body,
            ));
        }

        if total.saturating_add(decision.delay) >= self.deadline {
            let message = format!(
                "deadline of {:?} would pass during {:?} backoff; last error: {}",
                self.deadline, decision.delay, failure.message
            );
            return ControlFlow::Break(self.fail(
                FailureKind::Timeout,
                attempt,
                message,
                total,
                failure.body,
            ));
        }

        for hook in &executor.hooks {
            hook.on_retry(&self.info(attempt), failure.kind, &decision);
        }
        warn!(
            attempt,
            kind = %failure.kind,
            status = failure.status,
            delay_ms = decision.delay.as_millis() as u64,
            "Retrying request"
        );
        ControlFlow::Continue(decision.delay)
    }

    fn is_malformed(&self, response: &TransportResponse) -> bool {
        self.request.expect_json
            && self.request.method != Method::HEAD
            && response.status != StatusCode::NO_CONTENT
            && serde_json::from_slice::<IgnoredAny>(&response.body).is_err()
    }

    fn push_attempt(
        &mut self,
        attempt: u32,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        outcome: AttemptOutcome,
        http_status: Option<u16>,
        error: Option<String>,
    ) {
        self.attempts.push(CallAttempt {
            attempt_number: attempt,
            correlation_id: Some(self.ctx.correlation_id().to_string()),
            method: self.request.method.to_string(),
            uri: self.request.url.to_string(),
            started_at,
            duration_ms: elapsed.as_millis() as u64,
            outcome,
            http_status,
            error,
        });
    }

    fn succeed(
        &mut self,
        attempt: u32,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        total: Duration,
        mut response: TransportResponse,
    ) -> Response {
        let executor = self.executor;
        let status = response.status.as_u16();
        self.push_attempt(attempt, started_at, elapsed, AttemptOutcome::Success, Some(status), None);
        for hook in &executor.hooks {
            hook.after_attempt(&self.info(attempt), &AttemptOutcome::Success, elapsed);
        }

        debug!(attempt, status, elapsed_ms = elapsed.as_millis() as u64, "Attempt succeeded");

        let header = &executor.config.correlation_header;
        if !response.headers.contains_key(header)
            && let Ok(value) = HeaderValue::from_str(self.ctx.correlation_id())
        {
            response.headers.insert(header.clone(), value);
        }

        self.audit(AttemptOutcome::Success, Some(status), None, Some(response.body.clone()), total);
        Response::from_transport(response, self.ctx.correlation_id().to_string(), attempt)
    }

    fn fail(
        &mut self,
        kind: FailureKind,
        attempts: u32,
        message: String,
        total: Duration,
        body: Option<Bytes>,
    ) -> Result<Response> {
        if kind == FailureKind::ClientError {
            warn!(kind = %kind, attempts, error = %message, "Request failed");
        } else {
            error!(kind = %kind, attempts, error = %message, "Request failed");
        }

        let status = self.last_status;
        self.audit(AttemptOutcome::Failed(kind), status, Some(&message), body, total);

        Err(HttpClientError::Failed(ExecutionFailure {
            kind,
            attempts,
            last_error: message,
            status,
            correlation_id: Some(self.ctx.correlation_id().to_string()),
        }))
    }

    fn reject(&mut self, attempt: u32, reason: String, total: Duration) -> Result<Response> {
        warn!(attempt, reason = %reason, "Attempt vetoed");
        self.push_attempt(
            attempt,
            Utc::now(),
            Duration::ZERO,
            AttemptOutcome::Rejected,
            None,
            Some(reason.clone()),
        );
        self.audit(AttemptOutcome::Rejected, self.last_status, Some(&reason), None, total);
        Err(HttpClientError::Rejected { reason })
    }

    fn audit(
        &mut self,
        outcome: AttemptOutcome,
        status: Option<u16>,
        error: Option<&str>,
        response_body: Option<Bytes>,
        total: Duration,
    ) {
        let pipeline = &self.executor.audit;
        if !pipeline.is_enabled() {
            return;
        }

        let mut event = AuditEvent::new(self.request.method.as_str(), self.request.url.as_str())
            .correlation_id(self.ctx.correlation_id())
            .attempts(std::mem::take(&mut self.attempts))
            .final_outcome(outcome)
            .total_duration_ms(total.as_millis() as u64);
        if let Some(status) = status {
            event = event.status_code(status);
        }
        if let Some(error) = error {
            event = event.error(error);
        }
        if let Some(body) = &self.request.body {
            event = event.with_request_body(body.clone());
        }
        if let Some(body) = response_body {
            event = event.with_response_body(body);
        }

        pipeline.record(event);
    }
}
