//! Error classification and retry backoff
//!
//! Session and navigation failures are classified before retrying: transient
//! failures are retried with jittered exponential backoff, permanent ones
//! surface immediately, fatal ones abort the run.

use rand::Rng;
use std::time::Duration;

use crate::error::{AuditError, ErrorKind};

/// Retry disposition for a classified error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying: navigation timeouts, CDP disconnects, connection
    /// resets, transient launcher failures
    Transient,
    /// Retrying cannot help: HTTP 4xx (other than 408/429), malformed
    /// navigation, plugin assertions
    Permanent,
    /// The run cannot continue: out-of-memory, cancellation, base URL
    /// unreachable after the final attempt
    Fatal,
}

/// Classify an error for retry purposes.
///
/// Kind carries most of the signal; message patterns catch the transient
/// transport failures that arrive as session/navigation errors.
#[must_use]
pub fn classify(error: &AuditError) -> ErrorClass {
    match error.kind() {
        ErrorKind::Cancelled => return ErrorClass::Fatal,
        ErrorKind::Config => return ErrorClass::Permanent,
        ErrorKind::Plugin => return ErrorClass::Permanent,
        _ => {}
    }

    let msg = error.to_string().to_lowercase();

    if msg.contains("out of memory") || msg.contains("oom") {
        return ErrorClass::Fatal;
    }

    // Retryable HTTP statuses; other 4xx are permanent
    if msg.contains("408") || msg.contains("429") {
        return ErrorClass::Transient;
    }
    if let Some(status) = extract_http_status(&msg) {
        if (400..500).contains(&status) {
            return ErrorClass::Permanent;
        }
    }

    if msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("target closed")
        || msg.contains("disconnect")
        || msg.contains("connection reset")
        || msg.contains("econnreset")
        || msg.contains("etimedout")
        || msg.contains("connection refused")
        || msg.contains("websocket")
        || msg.contains("cdp")
        || msg.contains("chrome")
        || msg.contains("browser")
    {
        return ErrorClass::Transient;
    }

    match error.kind() {
        ErrorKind::Session | ErrorKind::Network | ErrorKind::Timeout => ErrorClass::Transient,
        ErrorKind::Navigation => ErrorClass::Permanent,
        _ => ErrorClass::Permanent,
    }
}

/// Pull an HTTP status code out of messages like "http 404" or "status 451"
fn extract_http_status(msg: &str) -> Option<u16> {
    for marker in ["http ", "status ", "status code "] {
        if let Some(idx) = msg.find(marker) {
            let rest = &msg[idx + marker.len()..];
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            if digits.len() == 3 {
                return digits.parse().ok();
            }
        }
    }
    None
}

/// Exponential backoff with full jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 250,
            max_delay_ms: 4_000,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry attempt (0-based): full jitter over
    /// `base * 2^attempt`, capped at `max_delay_ms`.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.max_delay_ms);
        let jittered = rand::rng().random_range(0..=exp);
        Duration::from_millis(jittered)
    }

    /// Whether another attempt is allowed after `attempt` failures
    #[must_use]
    pub fn should_retry(&self, attempt: u32, class: ErrorClass) -> bool {
        class == ErrorClass::Transient && attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_fatal() {
        assert_eq!(classify(&AuditError::Cancelled), ErrorClass::Fatal);
    }

    #[test]
    fn navigation_timeout_is_transient() {
        let err = AuditError::Navigation("navigation timed out after 30s".into());
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[test]
    fn target_closed_is_transient() {
        let err = AuditError::Session("Target closed".into());
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[test]
    fn http_404_is_permanent() {
        let err = AuditError::Navigation("document returned http 404".into());
        assert_eq!(classify(&err), ErrorClass::Permanent);
    }

    #[test]
    fn http_429_is_transient() {
        let err = AuditError::Navigation("document returned http 429".into());
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[test]
    fn plugin_assertion_is_permanent() {
        let err = AuditError::Plugin("assertion failed: selector missing".into());
        assert_eq!(classify(&err), ErrorClass::Permanent);
    }

    #[test]
    fn oom_is_fatal() {
        let err = AuditError::Session("renderer out of memory".into());
        assert_eq!(classify(&err), ErrorClass::Fatal);
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::default();
        for attempt in 0..10 {
            assert!(policy.next_delay(attempt) <= Duration::from_millis(policy.max_delay_ms));
        }
    }

    #[test]
    fn retries_stop_after_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0, ErrorClass::Transient));
        assert!(policy.should_retry(2, ErrorClass::Transient));
        assert!(!policy.should_retry(3, ErrorClass::Transient));
        assert!(!policy.should_retry(0, ErrorClass::Permanent));
        assert!(!policy.should_retry(0, ErrorClass::Fatal));
    }
}
