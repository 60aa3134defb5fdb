//! HTTP client error types.

use courier_core::FailureKind;
use thiserror::Error;

/// Result type for HTTP client operations.
pub type Result<T> = std::result::Result<T, HttpClientError>;

/// Terminal outcome of a logical call that did not produce a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} after {attempts} attempt(s): {last_error}")]
pub struct ExecutionFailure {
    /// Classified kind of the last failure.
    pub kind: FailureKind,
    /// Physical attempts made.
    pub attempts: u32,
    /// Message of the last underlying error.
    pub last_error: String,
    /// HTTP status of the last attempt, if a response was received.
    pub status: Option<u16>,
    /// Correlation id of the call.
    pub correlation_id: Option<String>,
}

impl ExecutionFailure {
    /// HTTP status to answer with when this failure surfaces from a handler.
    pub fn status_hint(&self) -> u16 {
        self.kind.status_hint()
    }

    /// Application error code for this failure.
    pub fn error_code(&self) -> &'static str {
        self.kind.error_code()
    }
}

/// HTTP client errors.
#[derive(Debug, Error)]
pub enum HttpClientError {
    /// The call failed with a classified kind, after retries where allowed.
    #[error("Request failed: {0}")]
    Failed(#[from] ExecutionFailure),

    /// The call was refused without (further) attempts.
    #[error("Request rejected: {reason}")]
    Rejected {
        /// Why the call was refused.
        reason: String,
    },

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Request building error.
    #[error("Failed to build request: {0}")]
    RequestBuild(String),

    /// Decoding a successful response body failed.
    #[error("Failed to decode response body: {0}")]
    Decode(String),

    /// A pool task panicked or the pool shut down before it ran.
    #[error("Worker lost: {0}")]
    WorkerLost(String),
}

impl HttpClientError {
    /// The classified kind, for executed calls.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failed(f) => Some(f.kind),
            _ => None,
        }
    }

    /// The terminal failure, for executed calls.
    pub fn failure(&self) -> Option<&ExecutionFailure> {
        match self {
            Self::Failed(f) => Some(f),
            _ => None,
        }
    }

    /// Physical attempts made (0 when the call never ran).
    pub fn attempts(&self) -> u32 {
        self.failure().map(|f| f.attempts).unwrap_or(0)
    }

    /// Check if this is a timeout failure.
    pub fn is_timeout(&self) -> bool {
        self.kind() == Some(FailureKind::Timeout)
    }

    /// Check if the call was rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Get the HTTP status code of the last attempt, if any.
    pub fn status_code(&self) -> Option<u16> {
        self.failure().and_then(|f| f.status)
    }
}

/// Failure reported by a [`TransportAdapter`](crate::TransportAdapter).
///
/// Never surfaces to callers directly; the executor classifies it first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection refused, host unreachable, DNS failure, pool exhausted.
    /// No bytes of the request reached the server.
    #[error("connect error: {message}")]
    Connect {
        /// Underlying message.
        message: String,
    },

    /// Connect, read or write deadline elapsed.
    #[error("timed out: {message}")]
    Timeout {
        /// Underlying message.
        message: String,
        /// False when the deadline hit while still connecting.
        request_sent: bool,
    },

    /// The response could not be read or decoded.
    #[error("protocol error: {message}")]
    Protocol {
        /// Underlying message.
        message: String,
    },

    /// Anything else.
    #[error("transport error: {message}")]
    Other {
        /// Underlying message.
        message: String,
        /// Whether the request may have reached the server.
        request_sent: bool,
    },
}

impl TransportError {
    /// Connect-level failure.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Timeout after the request went out.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
            request_sent: true,
        }
    }

    /// Timeout while the connection was still being established.
    pub fn connect_timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
            request_sent: false,
        }
    }

    /// Protocol failure.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Unrecognized failure.
    pub fn other(message: impl Into<String>, request_sent: bool) -> Self {
        Self::Other {
            message: message.into(),
            request_sent,
        }
    }

    /// Whether the server may have seen (part of) the request.
    ///
    /// Only connect-level failures and failures the transport reports as
    /// pre-send are known not to have reached the server.
    pub fn request_sent(&self) -> bool {
        match self {
            Self::Connect { .. } => false,
            Self::Protocol { .. } => true,
            Self::Timeout { request_sent, .. } | Self::Other { request_sent, .. } => *request_sent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_display() {
        let failure = ExecutionFailure {
            kind: FailureKind::ServerError,
            attempts: 3,
            last_error: "HTTP 503 Service Unavailable".to_string(),
            status: Some(503),
            correlation_id: Some("abc".to_string()),
        };

        assert_eq!(
            failure.to_string(),
            "server_error after 3 attempt(s): HTTP 503 Service Unavailable"
        );
        assert_eq!(failure.status_hint(), 503);
        assert_eq!(failure.error_code(), "ERR_6000");

        let err = HttpClientError::from(failure);
        assert_eq!(err.kind(), Some(FailureKind::ServerError));
        assert_eq!(err.attempts(), 3);
        assert_eq!(err.status_code(), Some(503));
    }

    #[test]
    fn test_request_sent() {
        assert!(!TransportError::connect("refused").request_sent());
        assert!(TransportError::timeout("read").request_sent());
        assert!(!TransportError::connect_timeout("connect").request_sent());
        assert!(!TransportError::other("builder", false).request_sent());
    }
}
