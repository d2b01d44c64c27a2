//! Key-value store abstraction
//!
//! The rate limiter and response cache share one store interface with TTLs
//! and an atomic increment. Two backends exist: Redis (production, shared
//! across process instances) and an in-process map (development and tests).
//!
//! All operations surface outages as `Error::StoreUnavailable` instead of
//! blocking; callers decide how to degrade (the rate limiter fails open,
//! the cache treats an outage as a miss).

use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::time::{Duration, Instant};
use tracing::debug;

/// Store interface consumed by the rate limiter and the response cache.
///
/// `incr` must be atomic at the store level; application code never does a
/// separate read-then-write on counters.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value with a TTL in seconds.
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;

    /// Atomically increment a counter, returning the post-increment value.
    /// Creates the key at 1 if absent.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Set a TTL on an existing key.
    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<()>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every key starting with `prefix`, returning how many were
    /// removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;

    /// Liveness check.
    async fn ping(&self) -> Result<()>;
}

/// Redis-backed store over a shared connection manager.
///
/// `ConnectionManager` reconnects internally and is cheap to clone, so one
/// instance is shared process-wide.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis.
    pub async fn connect(url: &str) -> Result<Self> {
        let client =
            Client::open(url).map_err(|e| Error::config(format!("Invalid Redis URL: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::store_unavailable(format!("Failed to connect to Redis: {}", e)))?;

        debug!("Redis store connected");
        Ok(Self { conn })
    }
}

fn store_err(e: redis::RedisError) -> Error {
    Error::store_unavailable(e.to_string())
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(key).await.map_err(store_err)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds)
            .await
            .map_err(store_err)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        conn.incr::<_, _, i64>(key, 1).await.map_err(store_err)
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.expire::<_, bool>(key, ttl_seconds as i64)
            .await
            .map(|_| ())
            .map_err(store_err)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(store_err)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        // SCAN instead of KEYS so the sweep never blocks the store
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;

            if !keys.is_empty() {
                let removed: u64 = conn.del(&keys).await.map_err(store_err)?;
                deleted += removed;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(deleted)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(store_err)
    }
}

/// Entry in the in-process store
#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process store backend.
///
/// State is local to a single process instance and is not shared across
/// instances. Expiry is lazy: entries are dropped when touched after their
/// deadline.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live value for a key, clearing it if expired.
    fn live_value(&self, key: &str) -> Option<String> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, e| e.is_expired());
        None
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_seconds)),
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        // The entry lock held by the map serializes racing increments
        let mut entry = self.entries.entry(key.to_string()).or_insert(MemoryEntry {
            value: "0".to_string(),
            expires_at: None,
        });
        if entry.is_expired() {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }
        let count = entry
            .value
            .parse::<i64>()
            .map_err(|_| Error::internal(format!("Counter '{}' holds a non-integer", key)))?
            + 1;
        entry.value = count.to_string();
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<()> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_seconds));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        let mut deleted = 0;
        for key in keys {
            if self.entries.remove(&key).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
