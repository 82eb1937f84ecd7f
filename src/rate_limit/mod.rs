//! Shared rate limiter: distributed fixed-window counters with a local
//! degraded-mode fallback.
//!
//! The distributed backend answers "is this key allowed one more unit of
//! work in the current window" via the counter store's atomic
//! increment-and-expire primitive; no in-process lock spans callers. When
//! the store is unreachable the limiter fails open. Fixed windows admit up
//! to 2x the configured limit across a window boundary; that is the chosen
//! policy, not a defect.

mod redis_counters;
mod resolver;
mod token_bucket;

pub use redis_counters::RedisCounters;
pub use resolver::{RateKey, RateLimitRules};
pub use token_bucket::TokenBucketLimiter;

use crate::config::RateLimitConfig;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Outcome of one rate-limit check.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
    pub reset_at: DateTime<Utc>,
    /// Present only on denial.
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    /// Value for the `X-RateLimit-Reset` header (unix seconds).
    pub fn reset_unix(&self) -> i64 {
        self.reset_at.timestamp()
    }
}

/// Counter backend selection.
pub enum Backend {
    /// Redis fixed-window counters.
    Distributed(RedisCounters),
    /// In-process token bucket, used when the store is configured off.
    Local(TokenBucketLimiter),
}

/// The limiter callers use: resolves the logical key, then consults the
/// configured backend.
pub struct RateLimiter {
    backend: Backend,
    rules: RateLimitRules,
}

impl RateLimiter {
    pub fn new(backend: Backend, rules: RateLimitRules) -> Self {
        RateLimiter { backend, rules }
    }

    /// Convenience constructor for the degraded in-process mode.
    pub fn local(rules: RateLimitRules) -> Self {
        Self::new(Backend::Local(TokenBucketLimiter::new()), rules)
    }

    /// Checks whether the request identified by `req` may proceed.
    pub async fn allow(&self, req: &RateKey<'_>) -> RateLimitDecision {
        let (key, config) = self.rules.resolve(req);
        self.allow_key(&key, &config).await
    }

    /// Checks a pre-resolved key against an explicit config.
    pub async fn allow_key(&self, key: &str, config: &RateLimitConfig) -> RateLimitDecision {
        match &self.backend {
            Backend::Distributed(store) => store.allow(key, config).await,
            Backend::Local(bucket) => bucket.allow(key, config),
        }
    }
}
