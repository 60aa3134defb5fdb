//! Wiring the subsystem together from [`Settings`].

use crate::settings::{Settings, SettingsError};
use courier_audit::{AuditPipeline, AuditSink};
use courier_http_client::{
    HttpClient, HttpClientError, OutboundRequest, Response, RetryHook, TaskHandle,
    TransportAdapter, WorkerPool,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised while starting Courier.
#[derive(Debug, Error)]
pub enum CourierError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Client(#[from] HttpClientError),

    #[error("Failed to start worker pool: {0}")]
    Pool(#[source] std::io::Error),
}

/// A configured client, audit pipeline and worker pool.
///
/// ```no_run
/// use courier::{Courier, Settings};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let settings = Settings::load("courier.toml")?.apply_process_env()?;
///     let courier = Courier::builder(settings).with_logging().build()?;
///
///     let response = courier
///         .client()
///         .get("https://api.example.com/health")
///         .send()
///         .await?;
///     println!("{} {}", response.status(), response.correlation_id());
///
///     courier.shutdown().await;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Courier {
    settings: Settings,
    client: HttpClient,
    audit: AuditPipeline,
    pool: Arc<WorkerPool>,
}

impl Courier {
    pub fn builder(settings: Settings) -> CourierBuilder {
        CourierBuilder::new(settings)
    }

    /// Build with the reqwest transport and the default audit sink.
    pub fn from_settings(settings: Settings) -> Result<Self, CourierError> {
        Self::builder(settings).build()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn audit(&self) -> &AuditPipeline {
        &self.audit
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Hand `request` to the worker pool under the configured deadline.
    ///
    /// The correlation context active on the calling thread travels with it.
    pub fn submit(&self, request: OutboundRequest) -> Result<TaskHandle<Response>, HttpClientError> {
        let deadline = self.client.config().request_deadline;
        self.client.executor().submit(&self.pool, request, deadline)
    }

    /// Drain the pool, then flush the audit pipeline.
    pub async fn shutdown(&self) {
        let pool = self.pool.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || pool.shutdown()).await {
            warn!(error = %e, "Worker pool shutdown task failed");
        }
        self.audit.flush().await;
        info!(stats = ?self.audit.stats(), "Courier stopped");
    }

    /// [`shutdown`](Self::shutdown) for code running outside a runtime.
    pub fn shutdown_blocking(&self) {
        self.pool.shutdown();
        self.audit.flush_blocking();
        info!(stats = ?self.audit.stats(), "Courier stopped");
    }
}

/// Builder for [`Courier`].
pub struct CourierBuilder {
    settings: Settings,
    sink: Option<Arc<dyn AuditSink>>,
    transport: Option<Arc<dyn TransportAdapter>>,
    hooks: Vec<Arc<dyn RetryHook>>,
    logging: bool,
}

impl CourierBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            sink: None,
            transport: None,
            hooks: Vec::new(),
            logging: false,
        }
    }

    /// Deliver audit events to `sink` instead of the log.
    pub fn sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Send through `transport` instead of reqwest.
    pub fn transport(mut self, transport: Arc<dyn TransportAdapter>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn hook(mut self, hook: impl RetryHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Install the global subscriber from the `logging` section.
    pub fn with_logging(mut self) -> Self {
        self.logging = true;
        self
    }

    pub fn build(self) -> Result<Courier, CourierError> {
        let settings = self.settings;
        settings.validate()?;

        if self.logging
            && let Err(e) = courier_log::try_init(&settings.logging)
        {
            debug!(error = %e, "Subscriber already installed");
        }

        let config = settings.http_client_config()?;
        let mut client = match self.transport {
            Some(transport) => HttpClient::with_transport(config, transport),
            None => HttpClient::new(config)?,
        };

        let mut audit = AuditPipeline::builder().config(&settings.audit);
        if let Some(sink) = self.sink {
            audit = audit.shared_sink(sink);
        }
        let audit = audit.spawn();

        client = client.with_audit(audit.clone());
        for hook in self.hooks {
            client = client.with_shared_hook(hook);
        }

        let pool = WorkerPool::new(settings.pool_config()).map_err(CourierError::Pool)?;

        info!(
            workers = settings.pool.workers,
            max_attempts = settings.retry.max_attempts,
            audit = audit.is_enabled(),
            "Courier started"
        );

        Ok(Courier {
            settings,
            client,
            audit,
            pool: Arc::new(pool),
        })
    }
}
