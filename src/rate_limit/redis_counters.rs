use crate::config::RateLimitConfig;
use crate::rate_limit::RateLimitDecision;
use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

/// Distributed fixed-window counters over Redis.
///
/// Counters are keyed by `(logical key, window start)`; the first increment
/// of a window sets its expiry to the window size, so idle keys vanish on
/// their own. If the store cannot be reached within the configured ceiling
/// the limiter fails open: throttling correctness is sacrificed for
/// availability.
pub struct RedisCounters {
    conn: Arc<RwLock<ConnectionManager>>,
    op_timeout: Duration,
}

impl RedisCounters {
    pub async fn new(redis_url: &str, op_timeout: Duration) -> Result<Self, anyhow::Error> {
        let client = redis::Client::open(redis_url).context("invalid redis url")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("redis connection failed")?;

        Ok(RedisCounters {
            conn: Arc::new(RwLock::new(conn)),
            op_timeout,
        })
    }

    /// Checks one unit of work against the current window.
    pub async fn allow(&self, key: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let now = Utc::now();
        let window_secs = config.window_secs as i64;
        let window_start = now.timestamp() / window_secs * window_secs;
        let window_key = format!("ratelimit:{key}:{window_start}");

        let outcome = tokio::time::timeout(
            self.op_timeout,
            self.incr_and_read(&window_key, config.window_secs),
        )
        .await;

        let (count, ttl) = match outcome {
            Ok(Ok(sample)) => sample,
            Ok(Err(e)) => {
                warn!(error = %e, key, "counter store error, failing open");
                return fail_open(config, window_start);
            }
            Err(_) => {
                warn!(key, "counter store timed out, failing open");
                return fail_open(config, window_start);
            }
        };

        let limit = config.requests;
        let allowed = count <= limit as i64;
        let remaining = (limit as i64 - count).max(0) as u32;
        let reset_at = match ttl {
            Some(ttl) => now + chrono::Duration::from_std(ttl).unwrap_or_default(),
            None => window_end(window_start, window_secs),
        };
        let retry_after = if allowed {
            None
        } else {
            Some(
                (reset_at - now)
                    .to_std()
                    .unwrap_or(Duration::from_secs(1))
                    .max(Duration::from_secs(1)),
            )
        };

        RateLimitDecision {
            allowed,
            remaining,
            limit,
            reset_at,
            retry_after,
        }
    }

    /// Atomically increments the window counter, arming the expiry on the
    /// first increment, and reads back the remaining time-to-live.
    async fn incr_and_read(
        &self,
        window_key: &str,
        window_secs: u64,
    ) -> Result<(i64, Option<Duration>), redis::RedisError> {
        let mut conn = self.conn.write().await;

        let count: i64 = conn.incr(window_key, 1i64).await?;
        if count == 1 {
            conn.expire::<_, ()>(window_key, window_secs as i64).await?;
        }
        let ttl: i64 = conn.ttl(window_key).await?;

        let ttl = if ttl > 0 {
            Some(Duration::from_secs(ttl as u64))
        } else {
            None
        };
        Ok((count, ttl))
    }
}

fn window_end(window_start: i64, window_secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(window_start + window_secs, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn fail_open(config: &RateLimitConfig, window_start: i64) -> RateLimitDecision {
    RateLimitDecision {
        allowed: true,
        remaining: config.requests,
        limit: config.requests,
        reset_at: window_end(window_start, config.window_secs as i64),
        retry_after: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_end_derives_from_truncated_start() {
        let start = 1_700_000_040; // already a multiple of 60
        let end = window_end(start, 60);
        assert_eq!(end.timestamp(), start + 60);
    }

    #[test]
    fn fail_open_allows_with_full_remaining() {
        let config = RateLimitConfig {
            requests: 7,
            window_secs: 60,
            burst: 0,
        };
        let decision = fail_open(&config, 0);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 7);
        assert!(decision.retry_after.is_none());
    }
}
