//! # Courier HTTP Client
//!
//! Outbound HTTP calls that fail in a small, stable set of ways and retry
//! only when it is safe to.
//!
//! ## Features
//!
//! - **Failure taxonomy**: every failure is classified into one [`FailureKind`]
//! - **Bounded backoff**: exponential delays, capped, honouring `Retry-After`
//! - **Retry safety**: ambiguous failures of non-idempotent requests are never retried
//! - **Deadlines**: one overall deadline per logical call, backoff included
//! - **Correlation**: one id per call, sent on every attempt and echoed back
//! - **Audit**: one redacted record per call, written off the request path
//! - **Three regimes**: async, blocking, and worker-pool handoff share one retry loop
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use courier_http_client::{HttpClient, HttpClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HttpClient::new(HttpClientConfig::default())?;
//!
//!     let response = client
//!         .get("https://api.example.com/users")
//!         .send()
//!         .await?;
//!
//!     println!("Status: {} ({})", response.status(), response.correlation_id());
//!     Ok(())
//! }
//! ```
//!
//! ## Retries and Idempotency
//!
//! ```rust,no_run
//! use courier_http_client::{HttpClient, HttpClientConfig, RetryConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HttpClientConfig::builder()
//!         .timeout(Duration::from_secs(5))
//!         .request_deadline(Duration::from_secs(20))
//!         .retry(RetryConfig::exponential(4, Duration::from_millis(200)))
//!         .build();
//!
//!     let client = HttpClient::new(config)?;
//!
//!     // POST is not retried after a timeout unless declared idempotent.
//!     let response = client
//!         .post("https://api.example.com/orders")
//!         .header("Idempotency-Key", "order-42")
//!         .idempotent(true)
//!         .json(&serde_json::json!({"item": "widget", "quantity": 5}))
//!         .send()
//!         .await?;
//!
//!     println!("Took {} attempt(s)", response.attempts());
//!     Ok(())
//! }
//! ```

mod classify;
mod client;
mod config;
mod error;
mod executor;
mod hooks;
mod pool;
mod request;
mod response;
mod retry;
mod transport;

pub use classify::{RawOutcome, classify};
pub use client::HttpClient;
pub use config::{HttpClientConfig, HttpClientConfigBuilder, RouteIdempotency};
pub use error::{ExecutionFailure, HttpClientError, Result, TransportError};
pub use executor::RequestExecutor;
pub use hooks::{AttemptInfo, LoggingHook, RetryHook, Veto};
pub use pool::{PoolConfig, PoolStats, TaskHandle, WorkerPool};
pub use request::{OutboundRequest, RequestBuilder};
pub use response::Response;
pub use retry::{
    RetryConfig, RetryDecision, decide, decide_with_retry_after, is_safe_to_retry,
    parse_retry_after,
};
pub use transport::{
    ReqwestTransport, ScriptedTransport, SeenRequest, Step, TransportAdapter, TransportResponse,
};

// Re-export common types
pub use bytes::Bytes;
pub use courier_audit::{AttemptOutcome, AuditPipeline};
pub use courier_core::{CorrelationContext, FailureKind};
pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
pub use url::Url;

/// Prelude for common imports.
///
/// ```
/// use courier_http_client::prelude::*;
/// ```
pub mod prelude {
    pub use crate::client::HttpClient;
    pub use crate::config::{HttpClientConfig, HttpClientConfigBuilder, RouteIdempotency};
    pub use crate::error::{ExecutionFailure, HttpClientError, Result};
    pub use crate::hooks::{LoggingHook, RetryHook};
    pub use crate::pool::{PoolConfig, WorkerPool};
    pub use crate::request::RequestBuilder;
    pub use crate::response::Response;
    pub use crate::retry::RetryConfig;
    pub use courier_core::{CorrelationContext, FailureKind};
    pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
}
