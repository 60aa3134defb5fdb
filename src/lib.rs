// Courier - resilient outbound request execution for Rust
//
// This library classifies outbound call failures into a small taxonomy, retries
// only when it is safe to, carries one correlation id across every hop and
// thread, and writes one redacted audit record per logical call.

mod bootstrap;
mod settings;

pub use bootstrap::{Courier, CourierBuilder, CourierError};
pub use settings::{
    FileFormat, HttpClientSettings, PoolSettings, RetrySettings, RouteSettings, Settings,
    SettingsError,
};

// Re-export member crates
pub use courier_audit;
pub use courier_core;
pub use courier_http_client;
pub use courier_log;

pub use courier_audit::{AuditConfig, AuditEvent, AuditPipeline, AuditSink, MemorySink};
pub use courier_core::{CorrelationContext, CorrelationLayer, FailureKind, propagation};
pub use courier_http_client::{
    HttpClient, HttpClientConfig, HttpClientError, OutboundRequest, RequestExecutor, Response,
    RetryConfig, RetryHook, TaskHandle, TransportAdapter, WorkerPool,
};

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        AuditConfig, AuditPipeline, CorrelationContext, Courier, FailureKind, HttpClient,
        HttpClientConfig, HttpClientError, OutboundRequest, Response, RetryConfig, Settings,
        propagation,
    };
}
