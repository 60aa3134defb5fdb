//! Inbound correlation middleware.
//!
//! [`CorrelationLayer`] is a `tower` layer for servers built on `http` types.
//! It reads the correlation header from the inbound request, generating a new
//! id when the header is missing or blank, exposes the resulting
//! [`CorrelationContext`] through request extensions and the task-local slot,
//! and echoes the id back on the response under the same header name.
//!
//! ```rust,ignore
//! use courier_core::CorrelationLayer;
//! use tower::ServiceBuilder;
//!
//! let service = ServiceBuilder::new()
//!     .layer(CorrelationLayer::new())
//!     .service(my_handler);
//! ```

use crate::correlation::headers;
use crate::{CorrelationContext, propagation};
use futures::future::BoxFuture;
use http::{HeaderName, HeaderValue, Request, Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;

/// Layer that installs a correlation context around every inbound request.
#[derive(Debug, Clone)]
pub struct CorrelationLayer {
    header: HeaderName,
}

impl CorrelationLayer {
    /// Use the standard `X-Correlation-ID` header.
    pub fn new() -> Self {
        Self {
            header: HeaderName::from_static("x-correlation-id"),
        }
    }

    /// Use a custom header name.
    pub fn with_header(header: HeaderName) -> Self {
        Self { header }
    }

    /// The header this layer reads and echoes.
    pub fn header(&self) -> &HeaderName {
        &self.header
    }
}

impl Default for CorrelationLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for CorrelationLayer {
    type Service = CorrelationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationService {
            inner,
            header: self.header.clone(),
        }
    }
}

/// Service produced by [`CorrelationLayer`].
#[derive(Debug, Clone)]
pub struct CorrelationService<S> {
    inner: S,
    header: HeaderName,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CorrelationService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let incoming = req
            .headers()
            .get(&self.header)
            .or_else(|| req.headers().get(headers::REQUEST_ID))
            .and_then(|v| v.to_str().ok());
        let ctx = CorrelationContext::ensure(incoming);

        let span = courier_log::inbound_span(
            ctx.correlation_id(),
            req.method().as_str(),
            req.uri().path(),
        );

        req.extensions_mut().insert(ctx.clone());

        // Call the inner service inside the scope so anything it does eagerly
        // in `call` already sees the context.
        let fut = {
            let _guard = propagation::enter(&ctx);
            self.inner.call(req)
        };

        let header = self.header.clone();
        let echo = HeaderValue::from_str(ctx.correlation_id()).ok();

        Box::pin(
            async move {
                let mut response = propagation::scope(ctx, fut).await?;
                if let Some(value) = echo {
                    response.headers_mut().insert(header, value);
                }
                Ok(response)
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::fmt::Write as _;
    use std::sync::{Arc, Mutex};
    use tower::{ServiceExt, service_fn};
    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Clone, Default)]
    struct SpanRecorder(Arc<Mutex<Vec<String>>>);

    struct FieldText(String);

    impl Visit for FieldText {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            let _ = write!(self.0, " {}={:?}", field.name(), value);
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for SpanRecorder {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _id: &tracing::span::Id,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut text = FieldText(attrs.metadata().name().to_string());
            attrs.record(&mut text);
            self.0.lock().unwrap().push(text.0);
        }
    }

    async fn echo_current(_req: Request<()>) -> Result<Response<String>, Infallible> {
        let id = propagation::current()
            .map(|c| c.correlation_id().to_string())
            .unwrap_or_default();
        Ok(Response::new(id))
    }

    #[tokio::test]
    async fn test_inherits_inbound_header() {
        let svc = CorrelationLayer::new().layer(service_fn(echo_current));
        let req = Request::builder()
            .header("X-Correlation-ID", "abc-123")
            .body(())
            .unwrap();

        let res = svc.oneshot(req).await.unwrap();

        assert_eq!(res.body(), "abc-123");
        assert_eq!(res.headers()["x-correlation-id"], "abc-123");
    }

    #[tokio::test]
    async fn test_generates_when_missing() {
        let svc = CorrelationLayer::new().layer(service_fn(echo_current));
        let res = svc.oneshot(Request::new(())).await.unwrap();

        let echoed = res.headers()["x-correlation-id"].to_str().unwrap();
        assert!(uuid::Uuid::parse_str(echoed).is_ok());
        assert_eq!(res.body(), echoed);
    }

    #[tokio::test]
    async fn test_context_in_extensions() {
        let svc = CorrelationLayer::new().layer(service_fn(|req: Request<()>| async move {
            let id = req
                .extensions()
                .get::<CorrelationContext>()
                .map(|c| c.correlation_id().to_string())
                .unwrap_or_default();
            Ok::<_, Infallible>(Response::new(id))
        }));
        let req = Request::builder()
            .header("X-Request-ID", "from-request-id")
            .body(())
            .unwrap();

        let res = svc.oneshot(req).await.unwrap();
        assert_eq!(res.body(), "from-request-id");
    }

    #[tokio::test]
    async fn test_scope_torn_down_after_response() {
        let svc = CorrelationLayer::new().layer(service_fn(echo_current));
        let req = Request::builder()
            .header("X-Correlation-ID", "short-lived")
            .body(())
            .unwrap();

        svc.oneshot(req).await.unwrap();
        assert!(propagation::current().is_none());
    }

    #[tokio::test]
    async fn test_inbound_span_recorded() {
        let recorder = SpanRecorder::default();
        let subscriber = tracing_subscriber::registry().with(recorder.clone());
        let _default = tracing::subscriber::set_default(subscriber);

        let svc = CorrelationLayer::new().layer(service_fn(echo_current));
        let req = Request::builder()
            .method("POST")
            .uri("/orders/7?debug=1")
            .header("X-Correlation-ID", "span-id")
            .body(())
            .unwrap();
        svc.oneshot(req).await.unwrap();

        let spans = recorder.0.lock().unwrap().clone();
        assert_eq!(
            spans,
            vec!["inbound correlation_id=span-id method=POST path=/orders/7".to_string()]
        );
    }

    #[tokio::test]
    async fn test_custom_header() {
        let layer = CorrelationLayer::with_header(HeaderName::from_static("x-trace"));
        let svc = layer.layer(service_fn(echo_current));
        let req = Request::builder().header("x-trace", "t-1").body(()).unwrap();

        let res = svc.oneshot(req).await.unwrap();
        assert_eq!(res.headers()["x-trace"], "t-1");
        assert!(res.headers().get("x-correlation-id").is_none());
    }
}
