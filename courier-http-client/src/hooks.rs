//! Retry hooks.
//!
//! Hooks observe every attempt of a logical call and may refuse to start one.
//! A circuit breaker or a metrics recorder plugs in here without touching the
//! retry loop. Hooks are synchronous so the blocking and async executors call
//! them the same way.

use crate::retry::RetryDecision;
use courier_audit::AttemptOutcome;
use courier_core::FailureKind;
use http::Method;
use std::time::Duration;
use url::Url;

/// The attempt a hook is asked about.
#[derive(Debug, Clone, Copy)]
pub struct AttemptInfo<'a> {
    /// 1-based attempt number.
    pub attempt: u32,
    /// HTTP method.
    pub method: &'a Method,
    /// Target URL.
    pub url: &'a Url,
    /// Correlation id of the logical call.
    pub correlation_id: &'a str,
}

/// Refusal to run an attempt.
///
/// Surfaces to the caller as [`HttpClientError::Rejected`](crate::HttpClientError::Rejected).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Veto(pub String);

impl Veto {
    /// Veto with a reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Observer of the retry loop.
pub trait RetryHook: Send + Sync {
    /// Called before each attempt. Returning `Err` stops the call.
    fn before_attempt(&self, _info: &AttemptInfo<'_>) -> Result<(), Veto> {
        Ok(())
    }

    /// Called after each attempt with its outcome and duration.
    fn after_attempt(&self, _info: &AttemptInfo<'_>, _outcome: &AttemptOutcome, _elapsed: Duration) {}

    /// Called when a retry has been scheduled.
    fn on_retry(&self, _info: &AttemptInfo<'_>, _kind: FailureKind, _decision: &RetryDecision) {}
}

/// Hook that traces every attempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHook;

impl LoggingHook {
    /// Create a new logging hook.
    pub fn new() -> Self {
        Self
    }
}

impl RetryHook for LoggingHook {
    fn before_attempt(&self, info: &AttemptInfo<'_>) -> Result<(), Veto> {
        tracing::trace!(
            attempt = info.attempt,
            method = %info.method,
            url = %info.url,
            correlation_id = info.correlation_id,
            "Starting attempt"
        );
        Ok(())
    }

    fn after_attempt(&self, info: &AttemptInfo<'_>, outcome: &AttemptOutcome, elapsed: Duration) {
        tracing::trace!(
            attempt = info.attempt,
            outcome = ?outcome,
            elapsed_ms = elapsed.as_millis() as u64,
            correlation_id = info.correlation_id,
            "Attempt finished"
        );
    }

    fn on_retry(&self, info: &AttemptInfo<'_>, kind: FailureKind, decision: &RetryDecision) {
        tracing::trace!(
            attempt = info.attempt,
            kind = %kind,
            delay_ms = decision.delay.as_millis() as u64,
            correlation_id = info.correlation_id,
            "Retry scheduled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Deny;

    impl RetryHook for Deny {
        fn before_attempt(&self, info: &AttemptInfo<'_>) -> Result<(), Veto> {
            if info.attempt > 1 {
                Err(Veto::new("open"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_default_methods_allow() {
        let url = Url::parse("http://svc.local/").unwrap();
        let info = AttemptInfo {
            attempt: 1,
            method: &Method::GET,
            url: &url,
            correlation_id: "abc",
        };

        assert!(LoggingHook::new().before_attempt(&info).is_ok());
        assert!(Deny.before_attempt(&info).is_ok());
        assert_eq!(
            Deny.before_attempt(&AttemptInfo { attempt: 2, ..info }),
            Err(Veto::new("open"))
        );
    }
}
