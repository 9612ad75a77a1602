// Failed-authentication lockout, keyed by client identifier.
//
// Failures are counted in a window starting at the first failure. Reaching
// the limit locks the key for one full window. Expired entries are dropped
// lazily on read and by the periodic sweep.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Failure count for one client identifier.
struct AttemptWindow {
    failures: u32,
    window_start: Instant,
    locked_until: Option<Instant>,
}

impl AttemptWindow {
    fn new(now: Instant) -> Self {
        Self {
            failures: 0,
            window_start: now,
            locked_until: None,
        }
    }

    fn is_expired(&self, now: Instant, window: Duration) -> bool {
        match self.locked_until {
            Some(until) => now >= until,
            None => now.duration_since(self.window_start) >= window,
        }
    }
}

pub struct LoginAttemptTracker {
    attempts: DashMap<String, AttemptWindow>,
    max_attempts: u32,
    window: Duration,
}

impl LoginAttemptTracker {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            attempts: DashMap::new(),
            max_attempts: max_attempts.max(1),
            window,
        }
    }

    /// True while `key` is locked out.
    pub fn is_locked(&self, key: &str) -> bool {
        let now = Instant::now();
        self.attempts
            .remove_if(key, |_, entry| entry.is_expired(now, self.window));
        self.attempts
            .get(key)
            .is_some_and(|entry| entry.locked_until.is_some_and(|until| now < until))
    }

    /// Count a failure. Returns the attempts left before lockout (0 = locked).
    pub fn record_failure(&self, key: &str) -> u32 {
        let now = Instant::now();
        let mut entry = self
            .attempts
            .entry(key.to_string())
            .or_insert_with(|| AttemptWindow::new(now));

        if entry.is_expired(now, self.window) {
            *entry = AttemptWindow::new(now);
        }
        if entry.locked_until.is_some() {
            return 0;
        }

        entry.failures += 1;
        if entry.failures >= self.max_attempts {
            entry.locked_until = Some(now + self.window);
            tracing::warn!(client = %key, failures = entry.failures, "Client locked out");
            return 0;
        }
        self.max_attempts - entry.failures
    }

    /// Forget all failures for `key` (after a successful authentication).
    pub fn reset(&self, key: &str) {
        self.attempts.remove(key);
    }

    pub fn remaining_attempts(&self, key: &str) -> u32 {
        let now = Instant::now();
        match self.attempts.get(key) {
            Some(entry) if !entry.is_expired(now, self.window) => {
                if entry.locked_until.is_some() {
                    0
                } else {
                    self.max_attempts.saturating_sub(entry.failures)
                }
            }
            _ => self.max_attempts,
        }
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.attempts.len();
        self.attempts
            .retain(|_, entry| !entry.is_expired(now, self.window));
        before.saturating_sub(self.attempts.len())
    }

    /// Lockout window, also used as the Retry-After hint.
    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn tracked(&self) -> usize {
        self.attempts.len()
    }
}

/// Background task evicting expired lockout entries.
pub async fn run_lockout_sweep(tracker: Arc<LoginAttemptTracker>, interval_seconds: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));

    loop {
        interval.tick().await;
        let removed = tracker.sweep_expired();
        if removed > 0 {
            tracing::debug!(removed, remaining = tracker.tracked(), "Lockout sweep complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locks_after_max_failures() {
        let tracker = LoginAttemptTracker::new(3, Duration::from_secs(60));

        assert!(!tracker.is_locked("10.0.0.1"));
        assert_eq!(tracker.record_failure("10.0.0.1"), 2);
        assert_eq!(tracker.record_failure("10.0.0.1"), 1);
        assert!(!tracker.is_locked("10.0.0.1"));
        assert_eq!(tracker.record_failure("10.0.0.1"), 0);
        assert!(tracker.is_locked("10.0.0.1"));
        assert_eq!(tracker.remaining_attempts("10.0.0.1"), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let tracker = LoginAttemptTracker::new(1, Duration::from_secs(60));
        tracker.record_failure("a");
        assert!(tracker.is_locked("a"));
        assert!(!tracker.is_locked("b"));
        assert_eq!(tracker.remaining_attempts("b"), 1);
    }

    #[test]
    fn test_reset_clears_failures() {
        let tracker = LoginAttemptTracker::new(2, Duration::from_secs(60));
        tracker.record_failure("a");
        assert_eq!(tracker.remaining_attempts("a"), 1);

        tracker.reset("a");
        assert_eq!(tracker.remaining_attempts("a"), 2);
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn test_lock_expires_after_window() {
        let tracker = LoginAttemptTracker::new(1, Duration::from_millis(30));
        tracker.record_failure("a");
        assert!(tracker.is_locked("a"));

        std::thread::sleep(Duration::from_millis(50));

        assert!(!tracker.is_locked("a"));
        assert_eq!(tracker.remaining_attempts("a"), 1);
    }

    #[test]
    fn test_sweep_removes_expired() {
        let tracker = LoginAttemptTracker::new(5, Duration::from_millis(20));
        tracker.record_failure("a");
        tracker.record_failure("b");
        assert_eq!(tracker.tracked(), 2);

        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(tracker.sweep_expired(), 2);
        assert_eq!(tracker.tracked(), 0);
    }
}
