/* src/ratelimit.rs */

//! Fixed-window request counter keyed by client identifier.
//!
//! Each key gets a window of [`WINDOW`] starting at its first request. Once the
//! window holds `max_requests` requests, further requests are rejected until it
//! expires; the next request after expiry opens a fresh window.
//!
//! Memory is bounded by an inline sweep that runs when the cleanup interval has
//! elapsed or the table has grown past `max_entries`. The sweep drops expired
//! windows and then, if still over capacity, arbitrary entries until the table
//! is back at 90% of the cap, so the next forced sweep is some requests away.
//! An evicted key simply starts a new window.

use dashmap::DashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::extractor::UNKNOWN_KEY;

pub const WINDOW: Duration = Duration::from_secs(60);
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_REQUESTS: u32 = 60;
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Rate limiter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// When false every request is allowed and nothing is tracked.
    pub enabled: bool,
    /// Requests allowed per key per window.
    pub max_requests: u32,
    /// Length of a window.
    pub window: Duration,
    /// Minimum time between two sweeps of the table.
    pub cleanup_interval: Duration,
    /// Number of tracked keys that forces a sweep, and the cap it enforces.
    pub max_entries: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: DEFAULT_MAX_REQUESTS,
            window: WINDOW,
            cleanup_interval: CLEANUP_INTERVAL,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Seconds until the current window expires; zero when allowed.
    pub retry_after: u64,
}

impl RateLimitDecision {
    const ALLOWED: Self = Self {
        allowed: true,
        retry_after: 0,
    };

    fn rejected(retry_after: u64) -> Self {
        Self {
            allowed: false,
            retry_after,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u32,
    expires_at: Instant,
}

/// Process-wide fixed-window limiter.
///
/// Check-and-increment for a key happens under that key's shard lock, so
/// concurrent requests for one key cannot undercount.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    entries: DashMap<String, Entry>,
    last_sweep: Mutex<Instant>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count a request for `key` and decide whether it may proceed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use myip::ratelimit::{RateLimitConfig, RateLimiter};
    ///
    /// let limiter = RateLimiter::new(RateLimitConfig {
    ///     max_requests: 1,
    ///     ..RateLimitConfig::default()
    /// });
    ///
    /// assert!(limiter.check("203.0.113.7").allowed);
    /// let second = limiter.check(" 203.0.113.7 ");
    /// assert!(!second.allowed);
    /// assert!(second.retry_after > 0);
    /// ```
    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        if !self.config.enabled {
            return RateLimitDecision::ALLOWED;
        }

        let key = normalize_key(key);
        self.maybe_sweep(now);

        let mut entry = self.entries.entry(key).or_insert(Entry {
            count: 0,
            expires_at: now,
        });

        if entry.expires_at <= now {
            *entry = Entry {
                count: 1,
                expires_at: now + self.config.window,
            };
            return RateLimitDecision::ALLOWED;
        }

        if entry.count >= self.config.max_requests {
            let retry_after = ceil_secs(entry.expires_at - now);
            debug!(key = %entry.key(), retry_after, "Rate limit exceeded");
            return RateLimitDecision::rejected(retry_after);
        }

        entry.count += 1;
        RateLimitDecision::ALLOWED
    }

    /// Opportunistic cleanup on the request path. Concurrent callers skip the
    /// sweep while another one is running.
    fn maybe_sweep(&self, now: Instant) {
        let over_capacity = self.entries.len() > self.config.max_entries;

        let Ok(mut last_sweep) = self.last_sweep.try_lock() else {
            return;
        };
        if !over_capacity && now.saturating_duration_since(*last_sweep) < self.config.cleanup_interval
        {
            return;
        }
        *last_sweep = now;

        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);

        let excess = if self.entries.len() > self.config.max_entries {
            self.entries.len() - low_water_mark(self.config.max_entries)
        } else {
            0
        };
        if excess > 0 {
            let victims: Vec<String> = self
                .entries
                .iter()
                .take(excess)
                .map(|entry| entry.key().clone())
                .collect();
            for key in victims {
                self.entries.remove(&key);
            }
        }

        debug!(
            evicted = before.saturating_sub(self.entries.len()),
            remaining = self.entries.len(),
            "Swept rate limit table"
        );
    }
}

/// Trim and lower-case a key so header values differing only in whitespace or
/// case share a bucket. Empty keys map to [`UNKNOWN_KEY`].
pub fn normalize_key(key: &str) -> String {
    let key = key.trim();
    if key.is_empty() {
        UNKNOWN_KEY.to_string()
    } else {
        key.to_lowercase()
    }
}

/// Table size a capacity sweep evicts down to.
fn low_water_mark(max_entries: usize) -> usize {
    max_entries - max_entries / 10
}

fn ceil_secs(remaining: Duration) -> u64 {
    let millis = remaining.as_millis();
    u64::try_from(millis.div_ceil(1000)).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            ..RateLimitConfig::default()
        })
    }

    #[test]
    fn test_first_request_allowed() {
        let limiter = limiter(60);
        let decision = limiter.check("test-key");
        assert!(decision.allowed);
        assert_eq!(decision.retry_after, 0);
    }

    #[test]
    fn test_rejects_after_max_requests() {
        let limiter = limiter(5);
        let now = Instant::now();

        for i in 0..5 {
            assert!(limiter.check_at("203.0.113.1", now).allowed, "request {i}");
        }

        let decision = limiter.check_at("203.0.113.1", now + Duration::from_millis(100));
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, 60);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let limiter = limiter(1);
        let now = Instant::now();

        assert!(limiter.check_at("k", now).allowed);
        let decision = limiter.check_at("k", now + Duration::from_millis(59_001));
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, 1);

        let decision = limiter.check_at("k", now + Duration::from_secs(30));
        assert_eq!(decision.retry_after, 30);
    }

    #[test]
    fn test_keys_are_normalized() {
        let limiter = limiter(1);
        assert!(limiter.check("  Example-Key  ").allowed);
        assert!(!limiter.check("example-key").allowed);
        assert!(limiter.check("other-key").allowed);
    }

    #[test]
    fn test_empty_key_uses_unknown_bucket() {
        let limiter = limiter(1);
        assert!(limiter.check("   ").allowed);
        assert!(!limiter.check("UNKNOWN").allowed);
    }

    #[test]
    fn test_expired_window_starts_fresh() {
        let limiter = limiter(2);
        let now = Instant::now();

        assert!(limiter.check_at("k", now).allowed);
        assert!(limiter.check_at("k", now).allowed);
        assert!(!limiter.check_at("k", now + Duration::from_secs(59)).allowed);

        let later = now + WINDOW;
        assert!(limiter.check_at("k", later).allowed);
        assert!(limiter.check_at("k", later).allowed);
        assert!(!limiter.check_at("k", later).allowed);
    }

    #[test]
    fn test_disabled_always_allows() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            max_requests: 1,
            ..RateLimitConfig::default()
        });
        for _ in 0..10 {
            assert_eq!(limiter.check("k"), RateLimitDecision::ALLOWED);
        }
        assert!(limiter.entries.is_empty());
    }

    #[test]
    fn test_sweep_drops_expired_entries() {
        let limiter = limiter(5);
        let now = Instant::now();

        for i in 0..10 {
            limiter.check_at(&format!("10.0.0.{i}"), now);
        }
        assert_eq!(limiter.entries.len(), 10);

        limiter.check_at("fresh", now + CLEANUP_INTERVAL + WINDOW);
        assert_eq!(limiter.entries.len(), 1);
        assert!(limiter.entries.contains_key("fresh"));
    }

    #[test]
    fn test_sweep_enforces_capacity() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_entries: 4,
            ..RateLimitConfig::default()
        });
        let now = Instant::now();

        for i in 0..20 {
            limiter.check_at(&format!("client-{i}"), now);
        }
        assert!(limiter.entries.len() <= 5);
    }

    #[test]
    fn test_capacity_sweep_evicts_to_low_water_mark() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_entries: 100,
            cleanup_interval: Duration::from_secs(300),
            ..RateLimitConfig::default()
        });
        let now = Instant::now();

        for i in 0..=100 {
            limiter.check_at(&format!("client-{i}"), now);
        }
        assert_eq!(limiter.entries.len(), 101);

        // Over the cap: evict down to 90 before inserting the new key.
        limiter.check_at("trigger", now);
        assert_eq!(limiter.entries.len(), 91);
        assert!(limiter.entries.contains_key("trigger"));

        // Below the cap again, so the following keys do not sweep.
        for i in 0..9 {
            limiter.check_at(&format!("next-{i}"), now);
        }
        assert_eq!(limiter.entries.len(), 100);
    }

    #[test]
    fn test_concurrent_checks_count_exactly() {
        const THREADS: usize = 32;
        let limiter = limiter((THREADS / 2) as u32);
        let allowed = std::sync::atomic::AtomicUsize::new(0);
        let barrier = std::sync::Barrier::new(THREADS);

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    barrier.wait();
                    if limiter.check("198.51.100.77").allowed {
                        allowed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(allowed.into_inner(), THREADS / 2);
        assert!(!limiter.check("198.51.100.77").allowed);
    }

    #[test]
    fn test_sweep_waits_for_interval() {
        let limiter = RateLimiter::new(RateLimitConfig {
            cleanup_interval: Duration::from_secs(300),
            ..RateLimitConfig::default()
        });
        let now = Instant::now();

        limiter.check_at("a", now);
        limiter.check_at("b", now + WINDOW + Duration::from_secs(1));
        assert!(limiter.entries.contains_key("a"));
    }
}
