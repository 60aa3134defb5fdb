//! Audit event structures and types

use bytes::Bytes;
use chrono::{DateTime, Utc};
use courier_core::FailureKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of one physical attempt, or of the whole logical call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The attempt produced a usable response
    Success,
    /// The attempt failed and was classified
    Failed(FailureKind),
    /// The call was refused before or between attempts (saturated pool, vetoed retry)
    Rejected,
}

impl AttemptOutcome {
    /// Whether this is [`AttemptOutcome::Success`]
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }

    /// The failure kind, if any
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            AttemptOutcome::Failed(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// One physical attempt of a logical call
///
/// Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallAttempt {
    /// 1-based attempt number
    pub attempt_number: u32,

    /// Correlation id the attempt was sent with
    pub correlation_id: Option<String>,

    /// HTTP method
    pub method: String,

    /// Target URI
    pub uri: String,

    /// When the attempt started
    pub started_at: DateTime<Utc>,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,

    /// Outcome
    pub outcome: AttemptOutcome,

    /// HTTP status, when a response was received
    pub http_status: Option<u16>,

    /// Underlying error message, for failed attempts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Audit record for one logical call
///
/// Built by the executor once the call finishes and handed to an
/// [`AuditPipeline`](crate::AuditPipeline). Raw bodies attached with
/// [`with_request_body`](Self::with_request_body) and
/// [`with_response_body`](Self::with_response_body) never reach a sink; the
/// pipeline replaces them with redacted summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: String,

    /// Timestamp when the call finished
    pub timestamp: DateTime<Utc>,

    /// Correlation id of the logical call
    pub correlation_id: Option<String>,

    /// HTTP method
    pub method: String,

    /// Target URI
    pub uri: String,

    /// Every attempt, in order
    pub attempts: Vec<CallAttempt>,

    /// Outcome of the logical call
    pub final_outcome: AttemptOutcome,

    /// Final HTTP status, if any
    pub status_code: Option<u16>,

    /// Redacted, length-capped request body
    pub request_summary: Option<String>,

    /// Redacted, length-capped response body
    pub response_summary: Option<String>,

    /// Total duration in milliseconds, backoff included
    pub total_duration_ms: u64,

    /// Terminal error message (if applicable)
    pub error: Option<String>,

    /// Set when the record was emitted without bodies because redaction or
    /// serialization failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,

    #[serde(skip)]
    raw_request: Option<Bytes>,

    #[serde(skip)]
    raw_response: Option<Bytes>,
}

impl AuditEvent {
    /// Create a new audit event
    ///
    /// # Examples
    ///
    /// ```
    /// use courier_audit::*;
    ///
    /// let event = AuditEvent::new("GET", "https://api.example.com/users")
    ///     .correlation_id("abc-123")
    ///     .final_outcome(AttemptOutcome::Success)
    ///     .status_code(200);
    /// assert_eq!(event.correlation_id.as_deref(), Some("abc-123"));
    /// ```
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            correlation_id: None,
            method: method.into(),
            uri: uri.into(),
            attempts: Vec::new(),
            final_outcome: AttemptOutcome::Success,
            status_code: None,
            request_summary: None,
            response_summary: None,
            total_duration_ms: 0,
            error: None,
            degraded: None,
            raw_request: None,
            raw_response: None,
        }
    }

    /// Set correlation id
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the attempt sequence
    pub fn attempts(mut self, attempts: Vec<CallAttempt>) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set final outcome
    pub fn final_outcome(mut self, outcome: AttemptOutcome) -> Self {
        self.final_outcome = outcome;
        self
    }

    /// Set HTTP status code
    pub fn status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Set total duration
    pub fn total_duration_ms(mut self, duration: u64) -> Self {
        self.total_duration_ms = duration;
        self
    }

    /// Set error message
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach the raw request body for redaction
    pub fn with_request_body(mut self, body: Bytes) -> Self {
        self.raw_request = Some(body);
        self
    }

    /// Attach the raw response body for redaction
    pub fn with_response_body(mut self, body: Bytes) -> Self {
        self.raw_response = Some(body);
        self
    }

    /// Detach the raw bodies
    pub fn take_bodies(&mut self) -> (Option<Bytes>, Option<Bytes>) {
        (self.raw_request.take(), self.raw_response.take())
    }

    /// Strip both summaries and record why
    pub fn degrade(&mut self, reason: impl Into<String>) {
        self.request_summary = None;
        self.response_summary = None;
        self.raw_request = None;
        self.raw_response = None;
        self.degraded = Some(reason.into());
    }

    /// Whether this is a degraded record
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    /// Number of physical attempts
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(n: u32, outcome: AttemptOutcome) -> CallAttempt {
        CallAttempt {
            attempt_number: n,
            correlation_id: Some("abc".to_string()),
            method: "GET".to_string(),
            uri: "http://svc/x".to_string(),
            started_at: Utc::now(),
            duration_ms: 3,
            outcome,
            http_status: Some(503),
            error: None,
        }
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(AttemptOutcome::Failed(FailureKind::ServerError)).unwrap();
        assert_eq!(json, serde_json::json!({"result": "failed", "kind": "server_error"}));

        let json = serde_json::to_value(AttemptOutcome::Success).unwrap();
        assert_eq!(json, serde_json::json!({"result": "success"}));
    }

    #[test]
    fn test_raw_bodies_never_serialized() {
        let event = AuditEvent::new("POST", "http://svc/login")
            .with_request_body(Bytes::from_static(b"password=hunter2"));

        let json = event.to_json().unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_degrade_strips_bodies() {
        let mut event = AuditEvent::new("GET", "http://svc/x")
            .attempts(vec![
                attempt(1, AttemptOutcome::Failed(FailureKind::ServerError)),
                attempt(2, AttemptOutcome::Success),
            ])
            .with_response_body(Bytes::from_static(b"{}"));
        event.request_summary = Some("summary".to_string());

        event.degrade("body is not UTF-8 text");

        assert!(event.is_degraded());
        assert!(event.request_summary.is_none());
        assert_eq!(event.take_bodies(), (None, None));
        assert_eq!(event.attempt_count(), 2);
    }
}
