//! Reconnection policy with exponential backoff.

use std::time::Duration;

/// Backoff schedule for reconnect attempts.
///
/// `next_delay(n) = min(initial_delay * multiplier^n, max_delay)` for retry
/// index `n` starting at 0. The default policy retries 5 times with delays
/// of 1, 2, 4, 8, and 16 seconds.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// The delay before retry `attempt`. Negative attempts are treated
    /// as 0.
    pub fn next_delay(&self, attempt: i32) -> Duration {
        let n = attempt.max(0) as u32;
        let factor = self.multiplier.max(1.0).powi(n as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Lifecycle callbacks fired by the reconnect loop.
pub trait ReconnectHooks: Send + Sync {
    fn on_reconnecting(&self, _attempt: u32) {}
    fn on_reconnected(&self) {}
    fn on_reconnect_failed(&self, _last_error: &str) {}
}

/// The no-op hook set.
pub struct NoHooks;

impl ReconnectHooks for NoHooks {}

/// Matches the error-string heuristic for conditions worth a reconnect.
pub fn is_connection_error(message: &str) -> bool {
    let message = message.to_lowercase();
    [
        "connection",
        "closed",
        "eof",
        "broken pipe",
        "reset by peer",
        "transport",
        "cancelled",
        "deadline exceeded",
        "timed out",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delay_sequence() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (0..6).map(|n| policy.next_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 16]);
    }

    #[test]
    fn test_delays_are_nondecreasing_and_bounded() {
        let policy = ReconnectPolicy {
            max_retries: 8,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            multiplier: 3.0,
        };
        let mut previous = Duration::ZERO;
        for n in 0..policy.max_retries as i32 {
            let delay = policy.next_delay(n);
            assert!(delay >= previous);
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
    }

    #[test]
    fn test_negative_attempt_is_first_attempt() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.next_delay(-3), policy.next_delay(0));
    }

    #[test]
    fn test_should_retry_boundary() {
        let policy = ReconnectPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
    }

    #[test]
    fn test_connection_error_heuristic() {
        assert!(is_connection_error("transport closed"));
        assert!(is_connection_error("unexpected EOF"));
        assert!(is_connection_error("read: connection reset by peer"));
        assert!(is_connection_error("broken pipe"));
        assert!(!is_connection_error("tool not found: shell"));
        assert!(!is_connection_error("invalid params"));
    }
}
