//! Failure taxonomy.
//!
//! Every failed outbound attempt is classified into exactly one
//! [`FailureKind`]. Callers branch on the kind, never on the transport's own
//! error type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of classified failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connect, read or write deadline elapsed.
    Timeout,
    /// Connection refused, host unreachable, DNS failure or exhausted connection pool.
    ConnectionRefused,
    /// HTTP 429.
    RateLimited,
    /// Other HTTP 4xx.
    ClientError,
    /// HTTP 5xx and 408.
    ServerError,
    /// Malformed or unparseable response.
    ProtocolError,
    /// Anything unrecognized.
    Unknown,
}

impl FailureKind {
    /// All kinds, in declaration order.
    pub const ALL: [FailureKind; 7] = [
        FailureKind::Timeout,
        FailureKind::ConnectionRefused,
        FailureKind::RateLimited,
        FailureKind::ClientError,
        FailureKind::ServerError,
        FailureKind::ProtocolError,
        FailureKind::Unknown,
    ];

    /// Whether the kind is eligible for retry at all.
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::Timeout
                | FailureKind::ConnectionRefused
                | FailureKind::RateLimited
                | FailureKind::ServerError
        )
    }

    /// Stable snake_case name, as serialized.
    pub const fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::ConnectionRefused => "connection_refused",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::ClientError => "client_error",
            FailureKind::ServerError => "server_error",
            FailureKind::ProtocolError => "protocol_error",
            FailureKind::Unknown => "unknown",
        }
    }

    /// HTTP status a server should answer with when this failure surfaces
    /// from a downstream call.
    pub const fn status_hint(self) -> u16 {
        match self {
            FailureKind::Timeout => 504,
            FailureKind::ConnectionRefused => 503,
            FailureKind::RateLimited => 429,
            FailureKind::ClientError => 502,
            FailureKind::ServerError => 503,
            FailureKind::ProtocolError => 502,
            FailureKind::Unknown => 500,
        }
    }

    /// Application error code reported alongside [`status_hint`](Self::status_hint).
    pub const fn error_code(self) -> &'static str {
        match self {
            FailureKind::Timeout => "ERR_6001",
            FailureKind::ConnectionRefused | FailureKind::ServerError => "ERR_6000",
            FailureKind::RateLimited => "ERR_1006",
            FailureKind::ClientError => "ERR_2000",
            FailureKind::ProtocolError => "ERR_6002",
            FailureKind::Unknown => "ERR_1000",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
