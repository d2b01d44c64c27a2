//! Fixed-window rate limiting backed by the shared key-value store
//!
//! Quotas are enforced per (user, endpoint, ip) triple. Each window is a
//! separate counter key with the aligned window start baked in, so the
//! check-and-increment collapses into a single atomic `INCR`: the returned
//! count decides allow/deny and no read-then-write race exists between
//! concurrent requests.
//!
//! If the store is unreachable the limiter **fails open**: availability of
//! the API takes priority over strict quota enforcement during an outage.
//! The degradation is logged and flagged on the decision.
//!
//! Counters expire via TTL equal to the window length; they are never
//! deleted explicitly. A missed `EXPIRE` (the one non-atomic step) is
//! self-limiting because a past window's key is never incremented again.

use crate::error::Result;
use crate::store::KeyValueStore;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Key prefix for rate-limit counters
const KEY_PREFIX: &str = "rl";

/// Identity used for unauthenticated requests. A valid key component:
/// anonymous traffic is limited per endpoint + IP.
pub const ANONYMOUS: &str = "anonymous";

/// Outcome of a rate limit check
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    /// Whether the request is allowed
    pub allowed: bool,
    /// The configured limit
    pub limit: i64,
    /// Remaining quota after this request, clamped at 0
    pub remaining: i64,
    /// Unix timestamp when the current window expires
    pub reset_at: i64,
    /// Window length in seconds
    pub window_seconds: i64,
    /// True when the store was unreachable and the limiter failed open
    pub degraded: bool,
}

impl RateLimitDecision {
    /// Seconds until the window resets, measured from `now`.
    pub fn retry_after(&self, now: i64) -> i64 {
        (self.reset_at - now).max(0)
    }

    fn fail_open(limit: i64, window_seconds: i64, now: i64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_at: now + window_seconds,
            window_seconds,
            degraded: true,
        }
    }
}

/// Fixed-window rate limiter.
///
/// Constructed once at startup and shared by reference; all mutable state
/// lives in the external store.
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    limit: i64,
    window_seconds: i64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, limit: i64, window_seconds: i64) -> Self {
        debug!(limit, window_seconds, "Rate limiter initialized");
        Self {
            store,
            limit,
            window_seconds,
        }
    }

    /// The configured per-window limit.
    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// The configured window length in seconds.
    pub fn window_seconds(&self) -> i64 {
        self.window_seconds
    }

    /// Counter key for a triple within the window starting at `window_start`.
    fn key(user_id: &str, endpoint: &str, ip: &str, window_start: i64) -> String {
        format!("{KEY_PREFIX}:{user_id}:{endpoint}:{ip}:{window_start}")
    }

    /// Check the quota for a (user, endpoint, ip) triple and consume one
    /// request from it.
    ///
    /// The increment and the decision are one logical operation: the count
    /// returned by the store's atomic `INCR` is compared against the limit,
    /// so racing requests each observe a serialized view of the counter.
    pub async fn check_and_consume(
        &self,
        user_id: &str,
        endpoint: &str,
        ip: &str,
    ) -> RateLimitDecision {
        let now = unix_now();
        self.check_and_consume_at(user_id, endpoint, ip, now).await
    }

    async fn check_and_consume_at(
        &self,
        user_id: &str,
        endpoint: &str,
        ip: &str,
        now: i64,
    ) -> RateLimitDecision {
        let window_start = now - now.rem_euclid(self.window_seconds);
        let reset_at = window_start + self.window_seconds;
        let key = Self::key(user_id, endpoint, ip, window_start);

        let count = match self.store.incr(&key).await {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    user_id,
                    endpoint,
                    ip,
                    error = %e,
                    "Rate limit store unreachable, failing open"
                );
                return RateLimitDecision::fail_open(self.limit, self.window_seconds, now);
            }
        };

        if count == 1 {
            // Fresh window: bound the counter's lifetime to the window
            if let Err(e) = self
                .store
                .expire(&key, self.window_seconds as u64)
                .await
            {
                warn!(key = %key, error = %e, "Failed to set TTL on rate limit counter");
            }
        }

        let allowed = count <= self.limit;
        let remaining = (self.limit - count).max(0);

        if allowed {
            debug!(user_id, endpoint, ip, count, remaining, "Rate limit check: allowed");
        } else {
            warn!(
                user_id,
                endpoint,
                ip,
                count,
                limit = self.limit,
                reset_at,
                "Rate limit check: rejected"
            );
        }

        RateLimitDecision {
            allowed,
            limit: self.limit,
            remaining,
            reset_at,
            window_seconds: self.window_seconds,
            degraded: false,
        }
    }

    /// Store liveness, surfaced by the health endpoint.
    pub async fn store_healthy(&self) -> Result<()> {
        self.store.ping().await
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use mockall::mock;

    mock! {
        Store {}

        #[async_trait]
        impl KeyValueStore for Store {
            async fn get(&self, key: &str) -> Result<Option<String>>;
            async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;
            async fn incr(&self, key: &str) -> Result<i64>;
            async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<()>;
            async fn delete(&self, key: &str) -> Result<()>;
            async fn delete_prefix(&self, prefix: &str) -> Result<u64>;
            async fn ping(&self) -> Result<()>;
        }
    }

    struct DownStore;

    #[async_trait]
    impl KeyValueStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(Error::store_unavailable("down"))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl_seconds: u64) -> Result<()> {
            Err(Error::store_unavailable("down"))
        }
        async fn incr(&self, _key: &str) -> Result<i64> {
            Err(Error::store_unavailable("down"))
        }
        async fn expire(&self, _key: &str, _ttl_seconds: u64) -> Result<()> {
            Err(Error::store_unavailable("down"))
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            Err(Error::store_unavailable("down"))
        }
        async fn delete_prefix(&self, _prefix: &str) -> Result<u64> {
            Err(Error::store_unavailable("down"))
        }
        async fn ping(&self) -> Result<()> {
            Err(Error::store_unavailable("down"))
        }
    }

    fn limiter(limit: i64, window: i64) -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryStore::new()), limit, window)
    }

    #[tokio::test]
    async fn test_remaining_decreases_then_denies() {
        let limiter = limiter(3, 60);
        let now = 1_700_000_000;

        let first = limiter.check_and_consume_at("u1", "/orders", "10.0.0.1", now).await;
        assert!(first.allowed);
        assert_eq!(first.remaining, 2);

        let second = limiter.check_and_consume_at("u1", "/orders", "10.0.0.1", now).await;
        assert!(second.allowed);
        assert_eq!(second.remaining, 1);

        let third = limiter.check_and_consume_at("u1", "/orders", "10.0.0.1", now).await;
        assert!(third.allowed);
        assert_eq!(third.remaining, 0);

        let fourth = limiter.check_and_consume_at("u1", "/orders", "10.0.0.1", now).await;
        assert!(!fourth.allowed);
        assert_eq!(fourth.remaining, 0);
        assert!(fourth.retry_after(now) <= 60);
    }

    #[tokio::test]
    async fn test_reset_at_is_window_boundary() {
        let limiter = limiter(100, 60);
        let now = 1_699_999_980 + 13; // 13 seconds into the window

        let decision = limiter.check_and_consume_at("u1", "/orders", "10.0.0.1", now).await;
        assert_eq!(decision.reset_at, 1_700_000_040);
        assert_eq!(decision.retry_after(now), 47);
    }

    #[tokio::test]
    async fn test_fresh_window_after_reset() {
        let limiter = limiter(2, 60);
        let now = 1_700_000_000;

        for _ in 0..3 {
            limiter.check_and_consume_at("u1", "/orders", "10.0.0.1", now).await;
        }
        let denied = limiter.check_and_consume_at("u1", "/orders", "10.0.0.1", now).await;
        assert!(!denied.allowed);

        // First request after reset_at starts a new window at count 1
        let after_reset = denied.reset_at;
        let fresh = limiter
            .check_and_consume_at("u1", "/orders", "10.0.0.1", after_reset)
            .await;
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_share_quota() {
        let limiter = limiter(1, 60);
        let now = 1_700_000_000;

        assert!(limiter.check_and_consume_at("u1", "/orders", "10.0.0.1", now).await.allowed);
        assert!(!limiter.check_and_consume_at("u1", "/orders", "10.0.0.1", now).await.allowed);

        // Different user, endpoint, or IP each get their own counter
        assert!(limiter.check_and_consume_at("u2", "/orders", "10.0.0.1", now).await.allowed);
        assert!(limiter.check_and_consume_at("u1", "/stock", "10.0.0.1", now).await.allowed);
        assert!(limiter.check_and_consume_at("u1", "/orders", "10.0.0.2", now).await.allowed);
    }

    #[tokio::test]
    async fn test_anonymous_identity_is_limited() {
        let limiter = limiter(1, 60);
        let now = 1_700_000_000;

        assert!(
            limiter
                .check_and_consume_at(ANONYMOUS, "/products", "10.0.0.1", now)
                .await
                .allowed
        );
        assert!(
            !limiter
                .check_and_consume_at(ANONYMOUS, "/products", "10.0.0.1", now)
                .await
                .allowed
        );
    }

    #[tokio::test]
    async fn test_ttl_set_only_on_fresh_window() {
        let mut store = MockStore::new();
        let mut seq = mockall::Sequence::new();

        store
            .expect_incr()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(1));
        store
            .expect_expire()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|_, ttl| *ttl == 60)
            .returning(|_, _| Ok(()));
        store
            .expect_incr()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(2));

        let limiter = RateLimiter::new(Arc::new(store), 3, 60);
        let now = 1_700_000_000;

        let first = limiter.check_and_consume_at("u1", "/orders", "10.0.0.1", now).await;
        assert_eq!(first.remaining, 2);

        // Second increment in the same window must not touch the TTL
        let second = limiter.check_and_consume_at("u1", "/orders", "10.0.0.1", now).await;
        assert_eq!(second.remaining, 1);
    }

    #[tokio::test]
    async fn test_store_outage_fails_open() {
        let limiter = RateLimiter::new(Arc::new(DownStore), 3, 60);

        for _ in 0..10 {
            let decision = limiter.check_and_consume("u1", "/orders", "10.0.0.1").await;
            assert!(decision.allowed);
            assert!(decision.degraded);
            assert_eq!(decision.remaining, 3);
        }
    }
}
