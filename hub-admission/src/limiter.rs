//! Per-key token buckets sharing one configuration.

use crate::bucket::TokenBucket;
use crate::clock::Clock;
use crate::config::LimitConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A map of lazily created token buckets, one per key.
///
/// Keys are arbitrary strings, conventionally `"<api>:<user>"`. A bucket is
/// created at full capacity on first use and lives until [`reset`](Self::reset)
/// or [`sweep_idle`](Self::sweep_idle) removes it.
#[derive(Debug)]
pub struct KeyedRateLimiter {
    config: LimitConfig,
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl KeyedRateLimiter {
    /// Create a limiter whose buckets all use `config`.
    pub fn new(config: LimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// The shared bucket configuration.
    pub fn config(&self) -> LimitConfig {
        self.config
    }

    /// Take `n` tokens from the bucket for `key`, creating it if needed.
    ///
    /// # Returns
    ///
    /// `true` if the request is admitted
    pub fn check_and_consume(&self, key: &str, n: u32) -> bool {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock();

        if let Some(bucket) = buckets.get_mut(key) {
            return bucket.try_consume(n, now);
        }

        let mut bucket = self.fresh_bucket(now);
        let admitted = bucket.try_consume(n, now);
        buckets.insert(key.to_string(), bucket);
        admitted
    }

    /// Estimated wait in seconds before `key` has a token again.
    ///
    /// Returns `None` when the key is not limited. Read-only: an unknown key is
    /// not created.
    pub fn time_until_next_token(&self, key: &str) -> Option<f64> {
        let now = self.clock.now();
        let buckets = self.buckets.lock();
        buckets.get(key)?.time_until_next_token(now)
    }

    /// Tokens currently available to `key` (full capacity for unknown keys).
    pub fn available(&self, key: &str) -> f64 {
        let now = self.clock.now();
        let buckets = self.buckets.lock();
        buckets
            .get(key)
            .map(|b| b.available_at(now))
            .unwrap_or_else(|| self.config.capacity())
    }

    /// Whether `key` could take one token now. Read-only.
    pub fn has_token(&self, key: &str) -> bool {
        self.time_until_next_token(key).is_none()
    }

    /// Forget the bucket for `key`; it is recreated full on next use.
    ///
    /// Returns whether a bucket existed.
    pub fn reset(&self, key: &str) -> bool {
        self.buckets.lock().remove(key).is_some()
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.buckets.lock().is_empty()
    }

    /// Drop buckets untouched for at least `max_idle` that have refilled to capacity.
    ///
    /// A removed bucket would be recreated exactly as it was, so this never
    /// changes an admission outcome. Returns how many buckets were removed.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let now = self.clock.now();
        let max_idle = max_idle.as_secs_f64();
        let mut buckets = self.buckets.lock();
        let before = buckets.len();

        buckets.retain(|_, bucket| now - bucket.last_refill() < max_idle || !bucket.is_full_at(now));

        before - buckets.len()
    }

    fn fresh_bucket(&self, now: f64) -> TokenBucket {
        TokenBucket::new(self.config.capacity(), self.config.refill_rate(), now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(rpm: u32, burst: u32) -> (KeyedRateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let limiter = KeyedRateLimiter::new(LimitConfig::new(rpm, burst), clock.clone());
        (limiter, clock)
    }

    #[test]
    fn test_burst_then_reject() {
        let (limiter, _clock) = limiter(60, 10);

        for _ in 0..10 {
            assert!(limiter.check_and_consume("slack:alice", 1));
        }
        assert!(!limiter.check_and_consume("slack:alice", 1));
    }

    #[test]
    fn test_keys_are_isolated() {
        let (limiter, _clock) = limiter(60, 3);

        while limiter.check_and_consume("A:user1", 1) {}

        assert!(!limiter.check_and_consume("A:user1", 1));
        assert!(limiter.check_and_consume("A:user2", 1));
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn test_refills_over_time() {
        let (limiter, clock) = limiter(60, 2);

        assert!(limiter.check_and_consume("k", 2));
        assert!(!limiter.check_and_consume("k", 1));

        clock.advance(1.0);
        assert!(limiter.check_and_consume("k", 1));
        assert!(!limiter.check_and_consume("k", 1));
    }

    #[test]
    fn test_time_until_next_token() {
        let (limiter, clock) = limiter(30, 1);

        assert_eq!(limiter.time_until_next_token("k"), None);
        assert!(limiter.check_and_consume("k", 1));

        let wait = limiter.time_until_next_token("k").unwrap();
        assert!((wait - 2.0).abs() < 1e-9);

        clock.advance(1.5);
        let wait = limiter.time_until_next_token("k").unwrap();
        assert!((wait - 0.5).abs() < 1e-9);

        clock.advance(0.5);
        assert_eq!(limiter.time_until_next_token("k"), None);
    }

    #[test]
    fn test_has_token_does_not_consume() {
        let (limiter, clock) = limiter(60, 1);

        assert!(limiter.has_token("k"));
        assert!(limiter.is_empty());
        assert!(limiter.has_token("k"));
        assert!(limiter.check_and_consume("k", 1));
        assert!(!limiter.has_token("k"));

        clock.advance(1.0);
        assert!(limiter.has_token("k"));
    }

    #[test]
    fn test_time_until_next_token_does_not_create_bucket() {
        let (limiter, _clock) = limiter(60, 1);
        assert_eq!(limiter.time_until_next_token("ghost"), None);
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_reset_restores_full_capacity() {
        let (limiter, _clock) = limiter(60, 2);

        assert!(limiter.check_and_consume("k", 2));
        assert!(!limiter.check_and_consume("k", 1));

        assert!(limiter.reset("k"));
        assert!(!limiter.reset("k"));
        assert_eq!(limiter.available("k"), 2.0);
        assert!(limiter.check_and_consume("k", 2));
    }

    #[test]
    fn test_sweep_idle_only_removes_full_buckets() {
        let (limiter, clock) = limiter(60, 10);

        assert!(limiter.check_and_consume("busy", 10));
        assert!(limiter.check_and_consume("quiet", 1));

        // After 5s "quiet" is full again, "busy" has 5 of 10 tokens.
        clock.advance(5.0);
        assert_eq!(limiter.sweep_idle(Duration::from_secs(3)), 1);
        assert_eq!(limiter.len(), 1);
        assert!((limiter.available("busy") - 5.0).abs() < 1e-9);

        assert_eq!(limiter.sweep_idle(Duration::from_secs(60)), 0);
    }
}
