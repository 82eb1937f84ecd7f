//! Rate limiter behavior: window exhaustion, key resolution precedence,
//! and decision invariants.

use gateway_core::config::RateLimitConfig;
use gateway_core::rate_limit::{RateKey, RateLimitRules, RateLimiter};
use proptest::prelude::*;
use std::time::Duration;

fn config(requests: u32, window_secs: u64, burst: u32) -> RateLimitConfig {
    RateLimitConfig {
        requests,
        window_secs,
        burst,
    }
}

fn user_key(user_id: &str) -> RateKey<'_> {
    RateKey {
        user_id: Some(user_id),
        source_addr: None,
        route: "/api/v1/things",
    }
}

#[tokio::test]
async fn first_five_allowed_sixth_denied_with_retry_guidance() {
    let limiter = RateLimiter::local(RateLimitRules::with_default(config(5, 60, 0)));
    let key = user_key("u1");

    for i in 0..5 {
        let decision = limiter.allow(&key).await;
        assert!(decision.allowed, "call {i} should be allowed");
        assert_eq!(decision.limit, 5);
    }

    let denied = limiter.allow(&key).await;
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert!(denied.retry_after.unwrap() > Duration::ZERO);
    assert!(denied.reset_at > chrono::Utc::now());
}

#[tokio::test]
async fn per_user_override_takes_precedence() {
    let mut rules = RateLimitRules::with_default(config(100, 60, 0));
    rules.per_user.insert("vip".to_string(), config(2, 60, 0));
    rules
        .per_route
        .push(("/api/v1/*".to_string(), config(50, 60, 0)));
    let limiter = RateLimiter::local(rules);

    let key = RateKey {
        user_id: Some("vip"),
        source_addr: Some("10.0.0.1"),
        route: "/api/v1/things",
    };
    assert!(limiter.allow(&key).await.allowed);
    assert!(limiter.allow(&key).await.allowed);
    let denied = limiter.allow(&key).await;
    assert!(!denied.allowed);
    assert_eq!(denied.limit, 2);
}

#[tokio::test]
async fn addr_override_applies_when_user_has_none() {
    let mut rules = RateLimitRules::with_default(config(100, 60, 0));
    rules.per_addr.insert("10.0.0.9".to_string(), config(1, 60, 0));
    let limiter = RateLimiter::local(rules);

    let key = RateKey {
        user_id: Some("ordinary"),
        source_addr: Some("10.0.0.9"),
        route: "/api/v1/things",
    };
    assert!(limiter.allow(&key).await.allowed);
    assert!(!limiter.allow(&key).await.allowed);
}

#[tokio::test]
async fn route_pattern_with_trailing_wildcard_matches() {
    let mut rules = RateLimitRules::with_default(config(100, 60, 0));
    rules
        .per_route
        .push(("/uploads/*".to_string(), config(1, 60, 0)));
    let limiter = RateLimiter::local(rules);

    let matched = RateKey {
        user_id: Some("u1"),
        source_addr: None,
        route: "/uploads/avatar",
    };
    assert_eq!(limiter.allow(&matched).await.limit, 1);

    // A deeper path does not match a single-segment wildcard.
    let unmatched = RateKey {
        user_id: Some("u1"),
        source_addr: None,
        route: "/uploads/avatar/large",
    };
    assert_eq!(limiter.allow(&unmatched).await.limit, 100);
}

#[tokio::test]
async fn distinct_users_do_not_share_budgets() {
    let limiter = RateLimiter::local(RateLimitRules::with_default(config(1, 60, 0)));
    assert!(limiter.allow(&user_key("a")).await.allowed);
    assert!(!limiter.allow(&user_key("a")).await.allowed);
    assert!(limiter.allow(&user_key("b")).await.allowed);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// `remaining` never exceeds the configured limit and reaches zero by
    /// the time a denial is issued.
    #[test]
    fn remaining_is_bounded_by_limit(
        requests in 1u32..50,
        calls in 1usize..80,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let limiter =
                RateLimiter::local(RateLimitRules::with_default(config(requests, 3600, 0)));
            let key = user_key("prop");
            for _ in 0..calls {
                let decision = limiter.allow(&key).await;
                prop_assert!(decision.remaining <= decision.limit);
                if !decision.allowed {
                    prop_assert_eq!(decision.remaining, 0);
                    prop_assert!(decision.retry_after.is_some());
                }
            }
            Ok(())
        })?;
    }

    /// Every denial carries a positive retry hint and a future reset time.
    #[test]
    fn denials_always_carry_retry_guidance(requests in 1u32..10) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let limiter =
                RateLimiter::local(RateLimitRules::with_default(config(requests, 3600, 0)));
            let key = user_key("prop");
            for _ in 0..requests {
                limiter.allow(&key).await;
            }
            let denied = limiter.allow(&key).await;
            prop_assert!(!denied.allowed);
            prop_assert!(denied.retry_after.unwrap() > Duration::ZERO);
            prop_assert!(denied.reset_at > chrono::Utc::now());
            Ok(())
        })?;
    }
}
