//! Audit sinks

use crate::AuditEvent;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Destination for finished audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Write one audit event
    async fn write(&self, event: &AuditEvent) -> Result<(), AuditSinkError>;

    /// Flush any pending writes
    async fn flush(&self) -> Result<(), AuditSinkError> {
        Ok(())
    }
}

#[async_trait]
impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    async fn write(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        (**self).write(event).await
    }

    async fn flush(&self) -> Result<(), AuditSinkError> {
        (**self).flush().await
    }
}

/// Audit sink errors
#[derive(Debug, thiserror::Error)]
pub enum AuditSinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Sink error: {0}")]
    Other(String),
}

/// File sink
///
/// Appends audit events to a file, one JSON object per line.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    /// Create a new file sink
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use courier_audit::*;
    ///
    /// let sink = FileSink::new("audit.log");
    /// ```
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AuditSink for FileSink {
    async fn write(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        let json = event.to_json()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        Ok(())
    }
}

/// Memory sink for testing
///
/// Stores audit events in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<tokio::sync::Mutex<Vec<AuditEvent>>>,
}

impl MemorySink {
    /// Create a new memory sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all events
    pub async fn get_events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }

    /// Get all events from blocking code
    pub fn blocking_events(&self) -> Vec<AuditEvent> {
        self.events.blocking_lock().clone()
    }

    /// Clear all events
    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    async fn write(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// Log-stream sink
///
/// Emits one structured `tracing` record per event under the
/// `courier::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditSink for TracingSink {
    async fn write(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        let attempts = serde_json::to_string(&event.attempts)?;
        let outcome = serde_json::to_string(&event.final_outcome)?;

        tracing::info!(
            target: "courier::audit",
            event_id = %event.id,
            correlation_id = event.correlation_id.as_deref().unwrap_or("-"),
            method = %event.method,
            uri = %event.uri,
            status = event.status_code,
            final_outcome = %outcome,
            attempt_count = event.attempts.len(),
            attempts = %attempts,
            total_duration_ms = event.total_duration_ms,
            request = event.request_summary.as_deref(),
            response = event.response_summary.as_deref(),
            error = event.error.as_deref(),
            degraded = event.degraded.as_deref(),
            "Outbound call audited"
        );
        Ok(())
    }
}

/// Fan-out sink
///
/// Writes to every inner sink in order and stops at the first failure.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl MultiSink {
    /// Create a new multi-sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    pub fn with_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

#[async_trait]
impl AuditSink for MultiSink {
    async fn write(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        for sink in &self.sinks {
            sink.write(event).await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), AuditSinkError> {
        for sink in &self.sinks {
            sink.flush().await?;
        }
        Ok(())
    }
}
