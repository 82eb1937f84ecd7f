use crate::config::RateLimitConfig;
use crate::rate_limit::RateLimitDecision;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-key bucket state.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// In-process token bucket, the degraded-mode fallback when the distributed
/// counter store is configured off.
///
/// Capacity is `requests + burst`; tokens refill continuously at
/// `requests / window`. Buckets are created lazily on first use of a key.
pub struct TokenBucketLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    pub fn new() -> Self {
        TokenBucketLimiter {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Takes one token for `key` if available.
    pub fn allow(&self, key: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let capacity = (config.requests + config.burst) as f64;
        let rate = config.requests as f64 / config.window().as_secs_f64();
        let now = Instant::now();

        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(capacity);
        bucket.last_refill = now;

        let limit = config.requests;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            let until_full = Duration::from_secs_f64((capacity - bucket.tokens) / rate);
            RateLimitDecision {
                allowed: true,
                // Burst headroom can leave more tokens than the nominal
                // limit; the advertised remaining never exceeds it.
                remaining: (bucket.tokens.floor() as u32).min(limit),
                limit,
                reset_at: Utc::now()
                    + chrono::Duration::from_std(until_full).unwrap_or_default(),
                retry_after: None,
            }
        } else {
            let until_next = Duration::from_secs_f64((1.0 - bucket.tokens) / rate);
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                limit,
                reset_at: Utc::now()
                    + chrono::Duration::from_std(until_next).unwrap_or_default(),
                retry_after: Some(until_next.max(Duration::from_millis(1))),
            }
        }
    }

    /// Drops buckets idle for longer than `max_idle`. Called from the
    /// background sweep so abandoned keys do not accumulate.
    pub fn prune(&self, max_idle: Duration) {
        let now = Instant::now();
        self.buckets
            .lock()
            .retain(|_, bucket| now.duration_since(bucket.last_refill) <= max_idle);
    }
}

impl Default for TokenBucketLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(requests: u32, window_secs: u64, burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            requests,
            window_secs,
            burst,
        }
    }

    #[test]
    fn first_n_allowed_then_denied_with_retry_after() {
        let limiter = TokenBucketLimiter::new();
        let config = config(5, 60, 0);

        for i in 0..5 {
            let decision = limiter.allow("k", &config);
            assert!(decision.allowed, "call {i} should be allowed");
        }
        let denied = limiter.allow("k", &config);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after.unwrap() > Duration::ZERO);
    }

    #[test]
    fn keys_are_isolated() {
        let limiter = TokenBucketLimiter::new();
        let config = config(1, 60, 0);
        assert!(limiter.allow("a", &config).allowed);
        assert!(!limiter.allow("a", &config).allowed);
        assert!(limiter.allow("b", &config).allowed);
    }

    #[test]
    fn burst_extends_capacity() {
        let limiter = TokenBucketLimiter::new();
        let config = config(2, 60, 3);
        for _ in 0..5 {
            assert!(limiter.allow("k", &config).allowed);
        }
        assert!(!limiter.allow("k", &config).allowed);
    }

    #[test]
    fn remaining_is_capped_at_the_limit() {
        let limiter = TokenBucketLimiter::new();
        let config = config(2, 60, 3);
        // A fresh bucket holds requests + burst tokens.
        let decision = limiter.allow("k", &config);
        assert!(decision.allowed);
        assert_eq!(decision.limit, 2);
        assert!(decision.remaining <= decision.limit);
    }

    #[test]
    fn tokens_refill_after_window() {
        let limiter = TokenBucketLimiter::new();
        // One-second window keeps the test fast.
        let config = config(5, 1, 0);
        for _ in 0..5 {
            assert!(limiter.allow("k", &config).allowed);
        }
        assert!(!limiter.allow("k", &config).allowed);

        std::thread::sleep(Duration::from_millis(1100));
        assert!(limiter.allow("k", &config).allowed);
    }

    #[test]
    fn prune_drops_idle_buckets() {
        let limiter = TokenBucketLimiter::new();
        let config = config(5, 60, 0);
        limiter.allow("stale", &config);
        limiter.prune(Duration::ZERO);
        // A pruned key starts from a full bucket again.
        let decision = limiter.allow("stale", &config);
        assert_eq!(decision.remaining, 4);
    }
}
