//! A single lazily-refilled token bucket.
//!
//! There is no background timer: tokens are recomputed from elapsed time
//! whenever the bucket is consulted.

/// Slack allowed when comparing token counts, so that a bucket refilled for
/// exactly `1 / refill_rate` seconds admits one request.
pub(crate) const TOKEN_EPSILON: f64 = 1e-6;

/// A token bucket with a fixed capacity and refill rate.
///
/// Invariant: `0 <= tokens <= capacity` after every operation.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: f64,
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum tokens held
    /// * `refill_rate` - Tokens added per second
    /// * `now` - Current time in seconds since the epoch
    pub fn new(capacity: f64, refill_rate: f64, now: f64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_rate,
            last_refill: now,
        }
    }

    /// Maximum tokens held.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Time of the last refill computation.
    pub fn last_refill(&self) -> f64 {
        self.last_refill
    }

    /// Tokens that would be available at `now`, without mutating the bucket.
    pub fn available_at(&self, now: f64) -> f64 {
        let elapsed = (now - self.last_refill).max(0.0);
        (self.tokens + elapsed * self.refill_rate).min(self.capacity)
    }

    /// Try to take `n` tokens.
    ///
    /// Refills first. On success the tokens are removed and `true` is returned;
    /// otherwise the balance is left as refilled and `false` is returned.
    pub fn try_consume(&mut self, n: u32, now: f64) -> bool {
        self.refill(now);

        let n = f64::from(n);
        if self.tokens + TOKEN_EPSILON >= n {
            self.tokens = (self.tokens - n).max(0.0);
            true
        } else {
            false
        }
    }

    /// Estimated seconds until one token is available, or `None` if one is available now.
    pub fn time_until_next_token(&self, now: f64) -> Option<f64> {
        let available = self.available_at(now);
        if available + TOKEN_EPSILON >= 1.0 {
            None
        } else {
            Some((1.0 - available) / self.refill_rate)
        }
    }

    /// Whether the bucket is back at full capacity at `now`.
    pub fn is_full_at(&self, now: f64) -> bool {
        self.available_at(now) + TOKEN_EPSILON >= self.capacity
    }

    fn refill(&mut self, now: f64) {
        self.tokens = self.available_at(now);
        // A clock that steps backwards must not rewind the refill point.
        if now > self.last_refill {
            self.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: f64 = 1_000.0;

    #[test]
    fn test_new_bucket_is_full() {
        let bucket = TokenBucket::new(5.0, 1.0, T0);
        assert_eq!(bucket.available_at(T0), 5.0);
        assert!(bucket.is_full_at(T0));
        assert_eq!(bucket.time_until_next_token(T0), None);
    }

    #[test]
    fn test_no_elapsed_time_never_exceeds_capacity() {
        let mut bucket = TokenBucket::new(3.0, 0.5, T0);
        let mut last = bucket.available_at(T0);

        let admitted = (0..10).filter(|_| {
            let ok = bucket.try_consume(1, T0);
            let now_tokens = bucket.available_at(T0);
            assert!(now_tokens <= last);
            last = now_tokens;
            ok
        });

        assert_eq!(admitted.count(), 3);
        assert_eq!(bucket.available_at(T0), 0.0);
    }

    #[test]
    fn test_rejection_does_not_subtract() {
        let mut bucket = TokenBucket::new(2.0, 1.0, T0);
        assert!(bucket.try_consume(2, T0));
        bucket.try_consume(0, T0 + 0.5);
        assert!(!bucket.try_consume(1, T0 + 0.5));
        assert!((bucket.available_at(T0 + 0.5) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_refill_exactly_one_interval_admits() {
        // 180 rpm
        let rate = 3.0;
        let mut bucket = TokenBucket::new(20.0, rate, T0);
        assert!(bucket.try_consume(20, T0));
        assert!(!bucket.try_consume(1, T0));

        assert!(bucket.try_consume(1, T0 + 1.0 / rate));
    }

    #[test]
    fn test_refill_short_of_one_interval_rejects() {
        let rate = 6.0;
        let mut bucket = TokenBucket::new(5.0, rate, T0);
        assert!(bucket.try_consume(5, T0));

        assert!(!bucket.try_consume(1, T0 + 1.0 / rate - 1e-3));
    }

    fn drained(rate: f64) -> TokenBucket {
        let mut bucket = TokenBucket::new(1.0, rate, T0);
        assert!(bucket.try_consume(1, T0));
        bucket
    }

    #[test]
    fn test_refill_tolerance_boundary() {
        // Slack on the wait is TOKEN_EPSILON / rate seconds.
        for rate in [1.0, 3.0] {
            let interval = 1.0 / rate;

            assert!(drained(rate).try_consume(1, T0 + interval - 1e-9));
            assert!(!drained(rate).try_consume(1, T0 + interval - 1e-5));
        }
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let mut bucket = TokenBucket::new(10.0, 100.0, T0);
        assert!(bucket.try_consume(10, T0));
        assert_eq!(bucket.available_at(T0 + 3600.0), 10.0);
        assert!(bucket.try_consume(10, T0 + 3600.0));
        assert!(!bucket.try_consume(1, T0 + 3600.0));
    }

    #[test]
    fn test_time_until_next_token() {
        let mut bucket = TokenBucket::new(1.0, 0.5, T0);
        assert!(bucket.try_consume(1, T0));

        let wait = bucket.time_until_next_token(T0).unwrap();
        assert!((wait - 2.0).abs() < 1e-9);

        let wait = bucket.time_until_next_token(T0 + 1.0).unwrap();
        assert!((wait - 1.0).abs() < 1e-9);

        assert_eq!(bucket.time_until_next_token(T0 + 2.0), None);
    }

    #[test]
    fn test_clock_stepping_backwards_adds_nothing() {
        let mut bucket = TokenBucket::new(1.0, 1.0, T0);
        assert!(bucket.try_consume(1, T0));
        assert!(!bucket.try_consume(1, T0 - 100.0));
        assert_eq!(bucket.last_refill(), T0);
        assert!(bucket.try_consume(1, T0 + 1.0));
    }
}
