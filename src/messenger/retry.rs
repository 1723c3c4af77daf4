//! Reconnect backoff for listeners.
//!
//! Exponential: the first wait is `initial`, every further wait doubles,
//! capped at `max`. There is no retry limit; a listener keeps trying until
//! the pool cancels it.

use std::time::Duration;

/// Default first wait after a dropped connection.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Default ceiling for the wait between attempts.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Backoff parameters shared by every listener in a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        // A zero initial wait would turn reconnects into a busy loop.
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Fresh schedule starting at `initial`.
    pub fn schedule(&self) -> Backoff {
        Backoff {
            policy: *self,
            next: self.initial,
            attempts: 0,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF)
    }
}

/// Per-listener backoff state
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    next: Duration,
    attempts: u32,
}

impl Backoff {
    /// Wait to apply before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.policy.max);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Back to `initial` after a connection was established.
    pub fn reset(&mut self) {
        self.next = self.policy.initial;
        self.attempts = 0;
    }

    /// Failed attempts since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_doubles_to_cap() {
        let mut backoff = BackoffPolicy::default().schedule();
        let delays: Vec<u64> = (0..9).map(|_| backoff.next_delay().as_secs()).collect();

        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
        assert_eq!(backoff.attempts(), 9);
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut backoff = BackoffPolicy::default().schedule();
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();

        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_custom_policy() {
        let policy = BackoffPolicy::new(Duration::from_millis(250), Duration::from_secs(1));
        let mut backoff = policy.schedule();

        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_policy_normalizes_bad_values() {
        let policy = BackoffPolicy::new(Duration::ZERO, Duration::ZERO);
        assert!(policy.initial > Duration::ZERO);
        assert!(policy.max >= policy.initial);

        // max below initial is raised to initial
        let policy = BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(policy.max, Duration::from_secs(10));
    }
}
