//! Shared helpers for the gateway integration tests
//!
//! All tests run against the in-memory store; no Redis instance needed.

use api_gateway::middleware::Claims;
use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use shared::{KeyValueStore, MemoryStore};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

pub const TEST_SECRET: &str = "integration-test-secret-of-adequate-length";

/// Issue a bearer token for `user`, valid for an hour.
pub fn token_for(user: &str) -> String {
    let claims = Claims {
        sub: user.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("token encoding")
}

/// Store that fails every operation, for outage scenarios.
pub struct DownStore;

#[async_trait]
impl KeyValueStore for DownStore {
    async fn get(&self, _: &str) -> shared::Result<Option<String>> {
        Err(shared::Error::store_unavailable("connection refused"))
    }
    async fn set(&self, _: &str, _: &str, _: u64) -> shared::Result<()> {
        Err(shared::Error::store_unavailable("connection refused"))
    }
    async fn incr(&self, _: &str) -> shared::Result<i64> {
        Err(shared::Error::store_unavailable("connection refused"))
    }
    async fn expire(&self, _: &str, _: u64) -> shared::Result<()> {
        Err(shared::Error::store_unavailable("connection refused"))
    }
    async fn delete(&self, _: &str) -> shared::Result<()> {
        Err(shared::Error::store_unavailable("connection refused"))
    }
    async fn delete_prefix(&self, _: &str) -> shared::Result<u64> {
        Err(shared::Error::store_unavailable("connection refused"))
    }
    async fn ping(&self) -> shared::Result<()> {
        Err(shared::Error::store_unavailable("connection refused"))
    }
}

/// Store wrapper that counts increments, to observe whether a request
/// reached the rate-limit counting path.
pub struct CountingStore {
    inner: MemoryStore,
    incr_calls: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            incr_calls: AtomicUsize::new(0),
        })
    }

    pub fn incr_count(&self) -> usize {
        self.incr_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for CountingStore {
    async fn get(&self, key: &str) -> shared::Result<Option<String>> {
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> shared::Result<()> {
        self.inner.set(key, value, ttl_seconds).await
    }
    async fn incr(&self, key: &str) -> shared::Result<i64> {
        self.incr_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.incr(key).await
    }
    async fn expire(&self, key: &str, ttl_seconds: u64) -> shared::Result<()> {
        self.inner.expire(key, ttl_seconds).await
    }
    async fn delete(&self, key: &str) -> shared::Result<()> {
        self.inner.delete(key).await
    }
    async fn delete_prefix(&self, prefix: &str) -> shared::Result<u64> {
        self.inner.delete_prefix(prefix).await
    }
    async fn ping(&self) -> shared::Result<()> {
        self.inner.ping().await
    }
}
