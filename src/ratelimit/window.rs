//! Fixed-window counter state for a single client key.

use std::time::{Duration, Instant};

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// The request may proceed.
    Allow,
    /// The request is over the limit for the current window.
    Deny,
}

impl Decision {
    /// Whether this decision lets the request through.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Window limits shared by every key of one limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimits {
    /// Length of one window
    pub window_size: Duration,
    /// Requests allowed per window before denials start
    pub max_requests: u64,
}

impl WindowLimits {
    /// Create a new set of limits.
    pub fn new(window_size: Duration, max_requests: u64) -> Self {
        Self {
            window_size,
            max_requests,
        }
    }
}

/// Per-key state in the limiter table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowState {
    /// Requests seen in the current window, denied ones included
    count: u64,
    /// When the current window began
    window_start: Instant,
    /// When this entry was first inserted; survives window resets
    created_at: Instant,
}

impl WindowState {
    /// State for a key seen for the first time at `now`.
    pub fn first_seen(now: Instant) -> Self {
        Self {
            count: 1,
            window_start: now,
            created_at: now,
        }
    }

    /// Record a request arriving at `now` and decide on it.
    ///
    /// A request more than `window_size` after the window start opens a
    /// new window. Otherwise the count grows even when the request is
    /// denied.
    pub fn record(&mut self, now: Instant, limits: &WindowLimits) -> Decision {
        if self.window_elapsed(now, limits.window_size) {
            self.count = 1;
            self.window_start = now;
            return Decision::Allow;
        }

        self.count = self.count.saturating_add(1);
        if self.count > limits.max_requests {
            Decision::Deny
        } else {
            Decision::Allow
        }
    }

    /// Whether the window that started at `window_start` is over at `now`.
    ///
    /// A clock that went backwards counts as no time elapsed.
    pub fn window_elapsed(&self, now: Instant, window_size: Duration) -> bool {
        now.saturating_duration_since(self.window_start) > window_size
    }

    /// Whether a one-shot lifetime of `window_size` from insertion has run out.
    pub fn lifetime_elapsed(&self, now: Instant, window_size: Duration) -> bool {
        now.saturating_duration_since(self.created_at) >= window_size
    }

    /// Requests observed in the current window.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Start of the current window.
    pub fn window_start(&self) -> Instant {
        self.window_start
    }

    /// When the entry was inserted.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max: u64) -> WindowLimits {
        WindowLimits::new(Duration::from_secs(60), max)
    }

    #[test]
    fn test_first_seen_counts_one() {
        let now = Instant::now();
        let state = WindowState::first_seen(now);
        assert_eq!(state.count(), 1);
        assert_eq!(state.window_start(), now);
        assert_eq!(state.created_at(), now);
    }

    #[test]
    fn test_record_within_limit() {
        let now = Instant::now();
        let mut state = WindowState::first_seen(now);

        assert_eq!(state.record(now, &limits(3)), Decision::Allow);
        assert_eq!(state.record(now, &limits(3)), Decision::Allow);
        assert_eq!(state.count(), 3);
    }

    #[test]
    fn test_record_over_limit_keeps_counting() {
        let now = Instant::now();
        let mut state = WindowState::first_seen(now);

        assert_eq!(state.record(now, &limits(2)), Decision::Allow);
        assert_eq!(state.record(now, &limits(2)), Decision::Deny);
        assert_eq!(state.record(now, &limits(2)), Decision::Deny);
        assert_eq!(state.count(), 4);
    }

    #[test]
    fn test_record_at_exact_boundary_stays_in_window() {
        let start = Instant::now();
        let mut state = WindowState::first_seen(start);

        let decision = state.record(start + Duration::from_secs(60), &limits(1));
        assert_eq!(decision, Decision::Deny);
        assert_eq!(state.window_start(), start);
    }

    #[test]
    fn test_record_after_window_resets() {
        let start = Instant::now();
        let mut state = WindowState::first_seen(start);
        for _ in 0..5 {
            state.record(start, &limits(1));
        }

        let later = start + Duration::from_secs(60) + Duration::from_millis(1);
        assert_eq!(state.record(later, &limits(1)), Decision::Allow);
        assert_eq!(state.count(), 1);
        assert_eq!(state.window_start(), later);
        assert_eq!(state.created_at(), start);
    }

    #[test]
    fn test_zero_max_denies_after_first() {
        let now = Instant::now();
        let mut state = WindowState::first_seen(now);
        assert_eq!(state.record(now, &limits(0)), Decision::Deny);
    }

    #[test]
    fn test_backwards_clock_is_inside_window() {
        let start = Instant::now() + Duration::from_secs(10);
        let state = WindowState::first_seen(start);
        assert!(!state.window_elapsed(start - Duration::from_secs(5), Duration::from_secs(1)));
    }

    #[test]
    fn test_lifetime_elapsed() {
        let start = Instant::now();
        let state = WindowState::first_seen(start);
        let window = Duration::from_secs(60);

        assert!(!state.lifetime_elapsed(start + Duration::from_secs(59), window));
        assert!(state.lifetime_elapsed(start + window, window));
    }

    #[test]
    fn test_decision_is_allowed() {
        assert!(Decision::Allow.is_allowed());
        assert!(!Decision::Deny.is_allowed());
    }
}
