//! Backoff policy and retry safety.
//!
//! Retry decisions are plain values: [`decide`] never sleeps, it only says
//! whether to retry and how long to wait, and each execution regime suspends
//! in its own way.

use courier_core::FailureKind;
use std::time::{Duration, SystemTime};

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of physical attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryConfig {
    /// Create a retry config with exponential backoff capped at 30 seconds.
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    /// A single attempt, never retried.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Set the delay cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay after failed attempt `attempt` (1-based):
    /// `min(base_delay * 2^(attempt - 1), max_delay)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use courier_http_client::RetryConfig;
    /// use std::time::Duration;
    ///
    /// let config = RetryConfig::exponential(10, Duration::from_millis(100))
    ///     .with_max_delay(Duration::from_millis(2000));
    /// let delays: Vec<u128> = (1..=6).map(|n| config.delay_for_attempt(n).as_millis()).collect();
    /// assert_eq!(delays, vec![100, 200, 400, 800, 1600, 2000]);
    /// ```
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Whether and when to try again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Retry the call.
    pub should_retry: bool,
    /// Wait this long first.
    pub delay: Duration,
}

impl RetryDecision {
    /// Stop retrying.
    pub const fn stop() -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
        }
    }

    /// Retry after `delay`.
    pub const fn after(delay: Duration) -> Self {
        Self {
            should_retry: true,
            delay,
        }
    }
}

/// Decide whether to retry after failed attempt `attempt`.
pub fn decide(kind: FailureKind, attempt: u32, config: &RetryConfig) -> RetryDecision {
    decide_with_retry_after(kind, attempt, config, None)
}

/// [`decide`], honouring a server-supplied `Retry-After` for `RateLimited`.
///
/// The server value only ever lengthens the wait and is not capped by
/// `max_delay`.
pub fn decide_with_retry_after(
    kind: FailureKind,
    attempt: u32,
    config: &RetryConfig,
    retry_after: Option<Duration>,
) -> RetryDecision {
    if !kind.is_retryable() || attempt >= config.max_attempts {
        return RetryDecision::stop();
    }

    let computed = config.delay_for_attempt(attempt);
    let delay = match (kind, retry_after) {
        (FailureKind::RateLimited, Some(server)) => computed.max(server),
        _ => computed,
    };

    RetryDecision::after(delay)
}

/// Whether a retry is safe given what is known about the request's side effects.
///
/// Idempotent requests may always be retried. For non-idempotent requests only
/// unambiguous failures qualify: a connection refused before any byte was
/// sent, or an explicit 429 rejection. Timeouts, server errors and unknown
/// failures may have taken effect and are never retried.
pub fn is_safe_to_retry(kind: FailureKind, idempotent: bool, request_sent: bool) -> bool {
    if idempotent {
        return true;
    }

    match kind {
        FailureKind::ConnectionRefused => !request_sent,
        FailureKind::RateLimited => true,
        _ => false,
    }
}

/// Parse a `Retry-After` value: delta seconds or an HTTP-date.
///
/// Dates in the past yield zero.
pub fn parse_retry_after(value: &str, now: SystemTime) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(now).unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RetryConfig {
        RetryConfig::exponential(3, Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(2000))
    }

    #[test]
    fn test_exponential_schedule() {
        let config = RetryConfig::exponential(10, Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(2000));

        let delays: Vec<_> = (1..=6).map(|n| config.delay_for_attempt(n)).collect();
        assert_eq!(
            delays,
            [100, 200, 400, 800, 1600, 2000].map(Duration::from_millis)
        );
    }

    #[test]
    fn test_delay_monotonic_and_overflow_safe() {
        let config = RetryConfig::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..=100 {
            let delay = config.delay_for_attempt(attempt);
            assert!(delay >= previous);
            assert!(delay <= config.max_delay);
            previous = delay;
        }
    }

    #[test]
    fn test_non_retryable_kinds_stop() {
        for kind in [
            FailureKind::ClientError,
            FailureKind::ProtocolError,
            FailureKind::Unknown,
        ] {
            assert_eq!(decide(kind, 1, &config()), RetryDecision::stop());
        }
    }

    #[test]
    fn test_retryable_kinds_continue() {
        for kind in FailureKind::ALL.into_iter().filter(|k| k.is_retryable()) {
            let decision = decide(kind, 1, &config());
            assert!(decision.should_retry);
            assert_eq!(decision.delay, Duration::from_millis(100));
        }
    }

    #[test]
    fn test_attempt_limit() {
        let config = config();
        assert!(decide(FailureKind::ServerError, 2, &config).should_retry);
        assert!(!decide(FailureKind::ServerError, 3, &config).should_retry);
        for attempt in 4..50 {
            for kind in FailureKind::ALL {
                assert!(!decide(kind, attempt, &config).should_retry);
            }
        }
    }

    #[test]
    fn test_retry_after_only_lengthens_rate_limited() {
        let config = config();

        let longer = decide_with_retry_after(
            FailureKind::RateLimited,
            1,
            &config,
            Some(Duration::from_secs(5)),
        );
        assert_eq!(longer.delay, Duration::from_secs(5));

        let shorter = decide_with_retry_after(
            FailureKind::RateLimited,
            2,
            &config,
            Some(Duration::from_millis(10)),
        );
        assert_eq!(shorter.delay, Duration::from_millis(200));

        let ignored = decide_with_retry_after(
            FailureKind::ServerError,
            1,
            &config,
            Some(Duration::from_secs(5)),
        );
        assert_eq!(ignored.delay, Duration::from_millis(100));
    }

    #[test]
    fn test_retry_safety_boundary() {
        // Idempotent: everything retryable is safe.
        assert!(is_safe_to_retry(FailureKind::Timeout, true, true));
        assert!(is_safe_to_retry(FailureKind::ServerError, true, true));

        // Non-idempotent: ambiguous outcomes are not.
        assert!(!is_safe_to_retry(FailureKind::Timeout, false, true));
        assert!(!is_safe_to_retry(FailureKind::ServerError, false, true));
        assert!(!is_safe_to_retry(FailureKind::ConnectionRefused, false, true));

        // Non-idempotent: refused before sending, or explicitly rate limited.
        assert!(is_safe_to_retry(FailureKind::ConnectionRefused, false, false));
        assert!(is_safe_to_retry(FailureKind::RateLimited, false, true));
    }

    #[test]
    fn test_parse_retry_after() {
        let now = httpdate::parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();

        assert_eq!(parse_retry_after("120", now), Some(Duration::from_secs(120)));
        assert_eq!(
            parse_retry_after("Sun, 06 Nov 1994 08:50:07 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after("Sun, 06 Nov 1994 08:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }
}
