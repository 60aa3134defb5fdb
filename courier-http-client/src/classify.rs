//! Failure classification.
//!
//! [`classify`] maps a raw attempt outcome to exactly one [`FailureKind`].
//! It is pure and total: the same outcome always yields the same kind.

use crate::error::TransportError;
use courier_core::FailureKind;

/// What an attempt produced, before classification.
#[derive(Debug, Clone, Copy)]
pub enum RawOutcome<'a> {
    /// The transport failed.
    Transport(&'a TransportError),
    /// A response arrived with this status.
    Status(u16),
    /// A response arrived but its body could not be parsed as expected.
    MalformedBody,
}

/// Classify an outcome. First matching rule wins:
///
/// 1. connect-level transport failure → `ConnectionRefused`
/// 2. transport timeout → `Timeout`
/// 3. status 429 → `RateLimited`
/// 4. status 408, 502, 503, 504 → `ServerError`
/// 5. any other 5xx → `ServerError`
/// 6. any other 4xx → `ClientError`
/// 7. malformed body or transport protocol failure → `ProtocolError`
/// 8. anything else → `Unknown`
pub fn classify(outcome: &RawOutcome<'_>) -> FailureKind {
    match outcome {
        RawOutcome::Transport(TransportError::Connect { .. }) => FailureKind::ConnectionRefused,
        RawOutcome::Transport(TransportError::Timeout { .. }) => FailureKind::Timeout,
        RawOutcome::Status(429) => FailureKind::RateLimited,
        RawOutcome::Status(408 | 502 | 503 | 504) => FailureKind::ServerError,
        RawOutcome::Status(500..=599) => FailureKind::ServerError,
        RawOutcome::Status(400..=499) => FailureKind::ClientError,
        RawOutcome::MalformedBody | RawOutcome::Transport(TransportError::Protocol { .. }) => {
            FailureKind::ProtocolError
        }
        RawOutcome::Status(_) | RawOutcome::Transport(TransportError::Other { .. }) => {
            FailureKind::Unknown
        }
    }
}
