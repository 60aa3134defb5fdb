//! Non-blocking audit pipeline
//!
//! [`AuditPipeline::record`] hands an event to a bounded queue and returns
//! immediately. A background worker redacts the bodies, writes the event to
//! the sink, and absorbs every failure: the caller never waits on the sink and
//! never sees an audit error.

use crate::config::AuditConfig;
use crate::masking::{MaskingConfig, RedactionError, Redactor};
use crate::sink::{AuditSink, AuditSinkError, TracingSink};
use crate::AuditEvent;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

enum Command {
    Record(Box<AuditEvent>),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    written: AtomicU64,
    degraded: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time pipeline counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuditStats {
    /// Events accepted onto the queue
    pub accepted: u64,
    /// Events the sink acknowledged
    pub written: u64,
    /// Events written without bodies
    pub degraded: u64,
    /// Events lost to a full queue, a closed pipeline or a failing sink
    pub dropped: u64,
}

/// Handle to a running audit pipeline
///
/// Cheap to clone; every clone feeds the same worker.
#[derive(Clone)]
pub struct AuditPipeline {
    tx: Option<mpsc::Sender<Command>>,
    counters: Arc<Counters>,
}

impl AuditPipeline {
    /// Create a new pipeline builder
    ///
    /// # Examples
    ///
    /// ```
    /// use courier_audit::*;
    ///
    /// # async fn example() {
    /// let sink = MemorySink::new();
    /// let pipeline = AuditPipeline::builder()
    ///     .sink(sink.clone())
    ///     .capacity(64)
    ///     .spawn();
    ///
    /// pipeline.record(AuditEvent::new("GET", "https://api.example.com/users"));
    /// pipeline.flush().await;
    /// assert_eq!(sink.get_events().await.len(), 1);
    /// # }
    /// ```
    pub fn builder() -> AuditPipelineBuilder {
        AuditPipelineBuilder::new()
    }

    /// A pipeline that discards everything
    pub fn disabled() -> Self {
        Self {
            tx: None,
            counters: Arc::default(),
        }
    }

    /// Whether events are being recorded
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue an event for redaction and delivery
    ///
    /// Never blocks and never fails. A full or closed queue drops the event
    /// with a warning.
    pub fn record(&self, event: AuditEvent) {
        let Some(tx) = &self.tx else {
            return;
        };

        match tx.try_send(Command::Record(Box::new(event))) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(Command::Record(event))) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    correlation_id = event.correlation_id.as_deref().unwrap_or("-"),
                    "Audit queue full, dropping event"
                );
            }
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Audit pipeline closed, dropping event");
            }
        }
    }

    /// Wait until every event queued before this call has been handled and
    /// the sink flushed
    pub async fn flush(&self) {
        let Some(tx) = &self.tx else {
            return;
        };

        let (ack, done) = oneshot::channel();
        if tx.send(Command::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// [`flush`](Self::flush) for blocking code
    ///
    /// Must not be called from within an async runtime.
    pub fn flush_blocking(&self) {
        let Some(tx) = &self.tx else {
            return;
        };

        let (ack, done) = oneshot::channel();
        if tx.blocking_send(Command::Flush(ack)).is_ok() {
            let _ = done.blocking_recv();
        }
    }

    /// Current counters
    pub fn stats(&self) -> AuditStats {
        AuditStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            degraded: self.counters.degraded.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for AuditPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditPipeline")
            .field("enabled", &self.is_enabled())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Audit pipeline builder
pub struct AuditPipelineBuilder {
    sink: Option<Arc<dyn AuditSink>>,
    masking: MaskingConfig,
    capacity: usize,
    enabled: bool,
    capture_request: bool,
    capture_response: bool,
}

impl AuditPipelineBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            sink: None,
            masking: MaskingConfig::default(),
            capacity: crate::config::DEFAULT_QUEUE_CAPACITY,
            enabled: true,
            capture_request: true,
            capture_response: true,
        }
    }

    /// Apply an [`AuditConfig`]
    pub fn config(mut self, config: &AuditConfig) -> Self {
        self.masking = config.masking();
        self.capacity = config.queue_capacity;
        self.enabled = config.enabled;
        self.capture_request = config.log_request_body;
        self.capture_response = config.log_response_body;
        self
    }

    /// Set the sink (defaults to [`TracingSink`])
    pub fn sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Set a shared sink
    pub fn shared_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set masking configuration
    pub fn masking(mut self, config: MaskingConfig) -> Self {
        self.masking = config;
        self
    }

    /// Set queue capacity (at least 1)
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Enable or disable the pipeline
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Capture request bodies
    pub fn capture_request_body(mut self, capture: bool) -> Self {
        self.capture_request = capture;
        self
    }

    /// Capture response bodies
    pub fn capture_response_body(mut self, capture: bool) -> Self {
        self.capture_response = capture;
        self
    }

    fn into_parts(self) -> Option<(AuditPipeline, Worker, mpsc::Receiver<Command>)> {
        if !self.enabled {
            return None;
        }

        let (tx, rx) = mpsc::channel(self.capacity.max(1));
        let counters = Arc::new(Counters::default());
        let worker = Worker {
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
            redactor: Redactor::new(self.masking),
            capture_request: self.capture_request,
            capture_response: self.capture_response,
            counters: counters.clone(),
        };

        Some((
            AuditPipeline {
                tx: Some(tx),
                counters,
            },
            worker,
            rx,
        ))
    }

    /// Start the worker on the given runtime
    pub fn spawn_on(self, handle: &Handle) -> AuditPipeline {
        let Some((pipeline, worker, rx)) = self.into_parts() else {
            return AuditPipeline::disabled();
        };
        handle.spawn(worker.run(rx));
        pipeline
    }

    /// Start the worker on the current runtime, or on a dedicated thread
    /// when called outside one
    pub fn spawn(self) -> AuditPipeline {
        if let Ok(handle) = Handle::try_current() {
            return self.spawn_on(&handle);
        }

        let Some((pipeline, worker, rx)) = self.into_parts() else {
            return AuditPipeline::disabled();
        };

        let started = std::thread::Builder::new()
            .name("courier-audit".to_string())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt.block_on(worker.run(rx)),
                    Err(e) => tracing::warn!(error = %e, "Audit runtime failed to start"),
                }
            });

        if let Err(e) = started {
            tracing::warn!(error = %e, "Audit worker thread failed to start");
        }
        pipeline
    }
}

impl Default for AuditPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Worker {
    sink: Arc<dyn AuditSink>,
    redactor: Redactor,
    capture_request: bool,
    capture_response: bool,
    counters: Arc<Counters>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<Command>) {
        tracing::debug!("Audit worker started");

        while let Some(command) = rx.recv().await {
            match command {
                Command::Record(event) => self.deliver(*event).await,
                Command::Flush(ack) => {
                    if let Err(e) = self.sink.flush().await {
                        tracing::warn!(error = %e, "Audit sink flush failed");
                    }
                    let _ = ack.send(());
                }
            }
        }

        if let Err(e) = self.sink.flush().await {
            tracing::warn!(error = %e, "Audit sink flush failed on shutdown");
        }
        tracing::debug!("Audit worker stopped");
    }

    fn summarize(&self, body: Option<Bytes>, capture: bool) -> Result<Option<String>, RedactionError> {
        match body {
            Some(body) if capture => self.redactor.summarize(&body).map(Some),
            _ => Ok(None),
        }
    }

    async fn deliver(&self, mut event: AuditEvent) {
        event.uri = self.redactor.mask_uri(&event.uri);
        for attempt in &mut event.attempts {
            attempt.uri = self.redactor.mask_uri(&attempt.uri);
        }

        let (request, response) = event.take_bodies();

        let summaries = self
            .summarize(request, self.capture_request)
            .and_then(|req| Ok((req, self.summarize(response, self.capture_response)?)));

        match summaries {
            Ok((req, res)) => {
                event.request_summary = req;
                event.response_summary = res;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Redaction failed, emitting degraded audit record");
                event.degrade(e.to_string());
            }
        }

        let result = match self.sink.write(&event).await {
            Err(AuditSinkError::Serialization(e)) if !event.is_degraded() => {
                event.degrade(format!("serialization failed: {e}"));
                self.sink.write(&event).await
            }
            other => other,
        };

        match result {
            Ok(()) => {
                self.counters.written.fetch_add(1, Ordering::Relaxed);
                if event.is_degraded() {
                    self.counters.degraded.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %e,
                    correlation_id = event.correlation_id.as_deref().unwrap_or("-"),
                    "Audit sink write failed, dropping event"
                );
            }
        }
    }
}
