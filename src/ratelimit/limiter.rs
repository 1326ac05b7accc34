//! Core rate limiter implementation.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::clock::Clock;
use super::window::{Decision, WindowLimits, WindowState};

/// Default window length: 15 minutes.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Default number of requests allowed per window.
pub const DEFAULT_MAX_REQUESTS: u64 = 10;

/// How stale entries leave the limiter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPolicy {
    /// Entries reset when touched after their window ends and are only
    /// removed by a sweep.
    #[default]
    Lazy,
    /// Entries live exactly one window from insertion, whatever the
    /// traffic in between. A steadily active key is reset when its
    /// lifetime runs out, even mid-window.
    FixedLifetime,
}

impl std::str::FromStr for ExpiryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lazy" => Ok(ExpiryPolicy::Lazy),
            "fixed_lifetime" | "fixed-lifetime" => Ok(ExpiryPolicy::FixedLifetime),
            other => Err(format!("unknown expiry policy: {}", other)),
        }
    }
}

/// Fixed-window rate limiter keyed by client identity.
///
/// The table is owned by the limiter instance; share it with
/// `Arc<RateLimiter>`. Every check runs under the entry's shard lock, so
/// concurrent checks for one key never lose an update, and sweeps never
/// race a check.
pub struct RateLimiter {
    /// Window state indexed by client key
    table: DashMap<String, WindowState>,
    limits: WindowLimits,
    expiry: ExpiryPolicy,
}

impl RateLimiter {
    /// Create a limiter with the lazy expiry policy.
    pub fn new(window_size: Duration, max_requests: u64) -> Self {
        Self::with_expiry(window_size, max_requests, ExpiryPolicy::Lazy)
    }

    /// Create a limiter with an explicit expiry policy.
    pub fn with_expiry(window_size: Duration, max_requests: u64, expiry: ExpiryPolicy) -> Self {
        Self {
            table: DashMap::new(),
            limits: WindowLimits::new(window_size, max_requests),
            expiry,
        }
    }

    /// Record a request from `key` arriving at `now` and decide on it.
    pub fn check(&self, key: &str, now: Instant) -> Decision {
        let (decision, count) = match self.table.entry(key.to_owned()) {
            Entry::Vacant(vacant) => {
                debug!(key = %key, "Tracking new client key");
                vacant.insert(WindowState::first_seen(now));
                (Decision::Allow, 1)
            }
            Entry::Occupied(mut occupied) => {
                if self.expiry == ExpiryPolicy::FixedLifetime
                    && occupied.get().lifetime_elapsed(now, self.limits.window_size)
                {
                    debug!(key = %key, "Entry lifetime over, starting fresh");
                    occupied.insert(WindowState::first_seen(now));
                    (Decision::Allow, 1)
                } else {
                    let state = occupied.get_mut();
                    let decision = state.record(now, &self.limits);
                    (decision, state.count())
                }
            }
        };

        trace!(key = %key, count = count, decision = ?decision, "Checked rate limit");
        if decision == Decision::Deny {
            debug!(
                key = %key,
                count = count,
                limit = self.limits.max_requests,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Remove every entry the expiry policy considers stale at `now`.
    ///
    /// Returns the number of entries removed.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let window = self.limits.window_size;
        let expiry = self.expiry;
        let mut removed = 0;

        self.table.retain(|_, state| {
            let stale = match expiry {
                ExpiryPolicy::Lazy => state.window_elapsed(now, window),
                ExpiryPolicy::FixedLifetime => state.lifetime_elapsed(now, window),
            };
            if stale {
                removed += 1;
            }
            !stale
        });

        removed
    }

    /// Start a background task that evicts stale entries every `interval`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    pub fn spawn_sweeper(self: &Arc<Self>, clock: Arc<dyn Clock>, interval: Duration) -> SweeperHandle {
        assert!(!interval.is_zero(), "sweeper interval must be non-zero");
        let limiter = Arc::clone(self);
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let removed = limiter.evict_expired(clock.now());
                        if removed > 0 {
                            debug!(removed = removed, remaining = limiter.len(), "Swept expired entries");
                        }
                    }
                }
            }

            debug!("Sweeper stopped");
        });

        info!(interval_ms = interval.as_millis() as u64, "Started limiter sweeper");
        SweeperHandle {
            task,
            stop: Some(stop_tx),
        }
    }

    /// Get the stored count for `key`.
    ///
    /// Returns `None` if the key is not tracked.
    pub fn count(&self, key: &str) -> Option<u64> {
        self.table.get(key).map(|state| state.count())
    }

    /// Get a copy of the stored state for `key`.
    pub fn state(&self, key: &str) -> Option<WindowState> {
        self.table.get(key).map(|state| state.clone())
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.table.clear();
    }

    /// The window limits this limiter enforces.
    pub fn limits(&self) -> WindowLimits {
        self.limits
    }

    /// The active expiry policy.
    pub fn expiry(&self) -> ExpiryPolicy {
        self.expiry
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_REQUESTS)
    }
}

/// Handle to a running sweeper task. Dropping it aborts the task.
pub struct SweeperHandle {
    task: JoinHandle<()>,
    stop: Option<oneshot::Sender<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
    }

    /// Whether the task has already exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;

    const WINDOW: Duration = Duration::from_millis(900_000);

    fn limiter() -> RateLimiter {
        RateLimiter::new(WINDOW, 10)
    }

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = limiter();
        assert!(limiter.is_empty());
        assert_eq!(limiter.expiry(), ExpiryPolicy::Lazy);
        assert_eq!(limiter.limits().max_requests, 10);
    }

    #[test]
    fn test_first_request_allowed() {
        let limiter = limiter();
        let now = Instant::now();

        assert_eq!(limiter.check("1.2.3.4", now), Decision::Allow);
        assert_eq!(limiter.count("1.2.3.4"), Some(1));
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_requests_within_limit_allowed() {
        let limiter = limiter();
        let now = Instant::now();

        for i in 1..=10 {
            assert_eq!(limiter.check("k", now), Decision::Allow, "request {} should pass", i);
        }
        assert_eq!(limiter.count("k"), Some(10));
    }

    #[test]
    fn test_request_over_limit_denied() {
        let limiter = limiter();
        let now = Instant::now();

        for _ in 0..10 {
            limiter.check("k", now);
        }
        assert_eq!(limiter.check("k", now), Decision::Deny);
    }

    #[test]
    fn test_spread_requests_inside_window_share_count() {
        let limiter = RateLimiter::new(WINDOW, 3);
        let clock = ManualClock::new();

        for _ in 0..3 {
            assert_eq!(limiter.check("k", clock.now()), Decision::Allow);
            clock.advance(Duration::from_secs(60));
        }
        assert_eq!(limiter.check("k", clock.now()), Decision::Deny);
    }

    #[test]
    fn test_twelve_requests_then_reset() {
        let limiter = limiter();
        let clock = ManualClock::new();

        let decisions: Vec<Decision> = (0..12).map(|_| limiter.check("1.2.3.4", clock.now())).collect();
        assert!(decisions[..10].iter().all(|d| *d == Decision::Allow));
        assert!(decisions[10..].iter().all(|d| *d == Decision::Deny));
        assert_eq!(limiter.count("1.2.3.4"), Some(12));

        clock.set_elapsed(Duration::from_millis(900_001));
        assert_eq!(limiter.check("1.2.3.4", clock.now()), Decision::Allow);
        assert_eq!(limiter.count("1.2.3.4"), Some(1));
    }

    #[test]
    fn test_many_denials_do_not_delay_reset() {
        let limiter = RateLimiter::new(WINDOW, 2);
        let clock = ManualClock::new();

        for _ in 0..500 {
            limiter.check("k", clock.now());
        }
        assert_eq!(limiter.count("k"), Some(500));

        clock.set_elapsed(WINDOW + Duration::from_millis(1));
        assert_eq!(limiter.check("k", clock.now()), Decision::Allow);
        assert_eq!(limiter.count("k"), Some(1));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter();
        let now = Instant::now();

        for _ in 0..15 {
            limiter.check("k1", now);
        }
        assert_eq!(limiter.check("k1", now), Decision::Deny);
        assert_eq!(limiter.check("k2", now), Decision::Allow);
        assert_eq!(limiter.count("k2"), Some(1));
    }

    #[test]
    fn test_zero_max_requests_only_first_allowed() {
        let limiter = RateLimiter::new(WINDOW, 0);
        let now = Instant::now();

        assert_eq!(limiter.check("k", now), Decision::Allow);
        assert_eq!(limiter.check("k", now), Decision::Deny);
    }

    #[test]
    fn test_lazy_policy_keeps_active_window() {
        let limiter = RateLimiter::new(WINDOW, 100);
        let clock = ManualClock::new();

        limiter.check("k", clock.now());
        clock.set_elapsed(Duration::from_secs(600));
        limiter.check("k", clock.now());
        clock.set_elapsed(WINDOW);
        limiter.check("k", clock.now());

        assert_eq!(limiter.count("k"), Some(3));
    }

    #[test]
    fn test_fixed_lifetime_resets_active_key() {
        let limiter = RateLimiter::with_expiry(WINDOW, 100, ExpiryPolicy::FixedLifetime);
        let clock = ManualClock::new();

        limiter.check("k", clock.now());
        clock.set_elapsed(Duration::from_secs(600));
        limiter.check("k", clock.now());
        assert_eq!(limiter.count("k"), Some(2));

        clock.set_elapsed(WINDOW);
        assert_eq!(limiter.check("k", clock.now()), Decision::Allow);
        assert_eq!(limiter.count("k"), Some(1));

        let state = limiter.state("k").unwrap();
        assert_eq!(state.created_at(), clock.now());
    }

    #[test]
    fn test_fixed_lifetime_unblocks_denied_key() {
        let limiter = RateLimiter::with_expiry(WINDOW, 1, ExpiryPolicy::FixedLifetime);
        let clock = ManualClock::new();

        limiter.check("k", clock.now());
        assert_eq!(limiter.check("k", clock.now()), Decision::Deny);

        clock.set_elapsed(WINDOW);
        assert_eq!(limiter.check("k", clock.now()), Decision::Allow);
    }

    #[test]
    fn test_evict_expired_lazy() {
        let limiter = limiter();
        let clock = ManualClock::new();

        limiter.check("old", clock.now());
        clock.set_elapsed(Duration::from_secs(600));
        limiter.check("fresh", clock.now());

        clock.set_elapsed(WINDOW + Duration::from_millis(1));
        assert_eq!(limiter.evict_expired(clock.now()), 1);
        assert_eq!(limiter.count("old"), None);
        assert_eq!(limiter.count("fresh"), Some(1));
    }

    #[test]
    fn test_evict_expired_fixed_lifetime() {
        let limiter = RateLimiter::with_expiry(WINDOW, 10, ExpiryPolicy::FixedLifetime);
        let clock = ManualClock::new();

        limiter.check("k", clock.now());
        clock.set_elapsed(WINDOW - Duration::from_millis(1));
        limiter.check("k", clock.now());
        assert_eq!(limiter.evict_expired(clock.now()), 0);

        clock.set_elapsed(WINDOW);
        assert_eq!(limiter.evict_expired(clock.now()), 1);
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_clear() {
        let limiter = limiter();
        limiter.check("a", Instant::now());
        limiter.check("b", Instant::now());
        assert_eq!(limiter.len(), 2);

        limiter.clear();
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_expiry_policy_from_str() {
        assert_eq!("lazy".parse::<ExpiryPolicy>(), Ok(ExpiryPolicy::Lazy));
        assert_eq!("fixed_lifetime".parse::<ExpiryPolicy>(), Ok(ExpiryPolicy::FixedLifetime));
        assert_eq!("fixed-lifetime".parse::<ExpiryPolicy>(), Ok(ExpiryPolicy::FixedLifetime));
        assert!("sliding".parse::<ExpiryPolicy>().is_err());
    }

    #[test]
    fn test_concurrent_checks_do_not_lose_updates() {
        let limiter = Arc::new(RateLimiter::new(WINDOW, 1_000_000));
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        limiter.check("shared", now);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(limiter.count("shared"), Some(8000));
    }

    #[tokio::test]
    async fn test_sweeper_evicts_in_background() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(1), 10));
        let clock = Arc::new(ManualClock::new());

        limiter.check("k", clock.now());
        let sweeper = limiter.spawn_sweeper(clock.clone(), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(limiter.len(), 1);

        clock.advance(Duration::from_secs(2));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(limiter.is_empty());

        sweeper.shutdown().await;
    }

    #[test]
    fn test_evict_expired_counts_only_removed() {
        let limiter = limiter();
        let clock = ManualClock::new();

        limiter.check("a", clock.now());
        limiter.check("b", clock.now());
        clock.set_elapsed(WINDOW + Duration::from_millis(1));
        limiter.check("c", clock.now());

        assert_eq!(limiter.evict_expired(clock.now()), 2);
        assert_eq!(limiter.evict_expired(clock.now()), 0);
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test]
    #[should_panic(expected = "sweeper interval must be non-zero")]
    async fn test_sweeper_rejects_zero_interval() {
        let limiter = Arc::new(limiter());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());

        let _sweeper = limiter.spawn_sweeper(clock, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_sweeper_shutdown() {
        let limiter = Arc::new(limiter());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());

        let sweeper = limiter.spawn_sweeper(clock, Duration::from_millis(10));
        assert!(!sweeper.is_finished());
        sweeper.shutdown().await;
    }
}
