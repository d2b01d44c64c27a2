//! Response caching keyed by request fingerprint
//!
//! A fingerprint summarizes every request attribute that affects cacheable
//! response content: method, path, normalized query, the vary headers, and
//! the resolved identity when the target route is identity-sensitive.
//! Identity participating in the key makes cross-user leakage structurally
//! impossible — a hit can safely bypass downstream authorization because
//! the entry was produced under an equivalent authorization context.
//!
//! Store errors degrade to a miss (fail-through); the cache never fails a
//! request.

use crate::store::KeyValueStore;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

/// Key prefix for cached responses
pub const CACHE_KEY_PREFIX: &str = "cache:";

/// Build the fingerprint for a request.
///
/// Query parameters are normalized by sorting, so parameter order never
/// produces distinct variants. `identity` must be supplied for
/// identity-sensitive routes and omitted otherwise.
pub fn fingerprint(
    method: &str,
    path: &str,
    query: &str,
    vary_headers: &[(&str, &str)],
    identity: Option<&str>,
) -> String {
    let mut params: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
    params.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    hasher.update(params.join("&").as_bytes());
    for (name, value) in vary_headers {
        hasher.update(b"\n");
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(value.as_bytes());
    }
    if let Some(identity) = identity {
        hasher.update(b"\nid=");
        hasher.update(identity.as_bytes());
    }

    hex::encode(hasher.finalize())
}

/// Serialized response stored under a fingerprint key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Response status code
    pub status: u16,
    /// Headers worth replaying (content-type and friends)
    pub headers: Vec<(String, String)>,
    /// Response body, base64-encoded
    pub body: String,
    /// Unix timestamp the entry was stored
    pub stored_at: i64,
}

impl CacheEntry {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: &[u8]) -> Self {
        Self {
            status,
            headers,
            body: BASE64.encode(body),
            stored_at: Utc::now().timestamp(),
        }
    }

    /// Decoded response body. An undecodable entry is treated as corrupt
    /// by callers (miss).
    pub fn body_bytes(&self) -> Option<Vec<u8>> {
        BASE64.decode(&self.body).ok()
    }
}

/// Response cache over the shared key-value store.
pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
    ttl_seconds: u64,
    enabled: bool,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl_seconds: u64, enabled: bool) -> Self {
        debug!(ttl_seconds, enabled, "Response cache initialized");
        Self {
            store,
            ttl_seconds,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    fn key(fingerprint: &str) -> String {
        format!("{CACHE_KEY_PREFIX}{fingerprint}")
    }

    /// Look up an entry. Store errors and corrupt entries degrade to a miss.
    pub async fn get(&self, fingerprint: &str) -> Option<CacheEntry> {
        if !self.enabled {
            return None;
        }

        let key = Self::key(fingerprint);
        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(entry) => {
                    debug!(fingerprint, "Cache HIT");
                    Some(entry)
                }
                Err(e) => {
                    warn!(fingerprint, error = %e, "Corrupt cache entry, treating as miss");
                    None
                }
            },
            Ok(None) => {
                debug!(fingerprint, "Cache MISS");
                None
            }
            Err(e) => {
                warn!(fingerprint, error = %e, "Cache store read failed, treating as miss");
                None
            }
        }
    }

    /// Store an entry. Errors are logged, never surfaced.
    pub async fn put(&self, fingerprint: &str, entry: &CacheEntry) {
        if !self.enabled {
            return;
        }

        let key = Self::key(fingerprint);
        match serde_json::to_string(entry) {
            Ok(raw) => {
                if let Err(e) = self.store.set(&key, &raw, self.ttl_seconds).await {
                    warn!(fingerprint, error = %e, "Cache store write failed");
                }
            }
            Err(e) => {
                warn!(fingerprint, error = %e, "Failed to serialize cache entry");
            }
        }
    }

    /// Drop every entry whose key starts with `prefix_or_key` (a full
    /// fingerprint invalidates exactly one entry; an empty string clears
    /// the cache). Returns how many entries were removed.
    pub async fn invalidate(&self, prefix_or_key: &str) -> u64 {
        let key = Self::key(prefix_or_key);
        match self.store.delete_prefix(&key).await {
            Ok(deleted) => {
                debug!(prefix = prefix_or_key, deleted, "Cache invalidated");
                deleted
            }
            Err(e) => {
                warn!(prefix = prefix_or_key, error = %e, "Cache invalidation failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn cache() -> ResponseCache {
        ResponseCache::new(Arc::new(MemoryStore::new()), 60, true)
    }

    #[test]
    fn test_fingerprint_ignores_query_order() {
        let a = fingerprint("GET", "/products", "page=2&size=10", &[], None);
        let b = fingerprint("GET", "/products", "size=10&page=2", &[], None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_distinguishes_every_field() {
        let base = fingerprint("GET", "/products", "page=2", &[("accept", "*/*")], None);

        assert_ne!(base, fingerprint("HEAD", "/products", "page=2", &[("accept", "*/*")], None));
        assert_ne!(base, fingerprint("GET", "/stock", "page=2", &[("accept", "*/*")], None));
        assert_ne!(base, fingerprint("GET", "/products", "page=3", &[("accept", "*/*")], None));
        assert_ne!(
            base,
            fingerprint("GET", "/products", "page=2", &[("accept", "text/html")], None)
        );
        assert_ne!(
            base,
            fingerprint("GET", "/products", "page=2", &[("accept", "*/*")], Some("u1"))
        );
    }

    #[test]
    fn test_fingerprint_separates_identities() {
        let u1 = fingerprint("GET", "/balance", "", &[], Some("u1"));
        let u2 = fingerprint("GET", "/balance", "", &[], Some("u2"));
        let anon = fingerprint("GET", "/balance", "", &[], Some("anonymous"));
        assert_ne!(u1, u2);
        assert_ne!(u1, anon);
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let cache = cache();
        let entry = CacheEntry::new(
            200,
            vec![("content-type".to_string(), "application/json".to_string())],
            br#"{"items":[]}"#,
        );

        cache.put("fp1", &entry).await;
        let fetched = cache.get("fp1").await.expect("entry should be present");
        assert_eq!(fetched, entry);
        assert_eq!(fetched.body_bytes().unwrap(), br#"{"items":[]}"#);
    }

    #[tokio::test]
    async fn test_absent_is_miss() {
        assert!(cache().get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let cache = ResponseCache::new(Arc::new(MemoryStore::new()), 60, false);
        let entry = CacheEntry::new(200, vec![], b"body");
        cache.put("fp1", &entry).await;
        assert!(cache.get("fp1").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_prefix() {
        let cache = cache();
        let entry = CacheEntry::new(200, vec![], b"body");
        cache.put("aa11", &entry).await;
        cache.put("aa22", &entry).await;
        cache.put("bb33", &entry).await;

        assert_eq!(cache.invalidate("aa").await, 2);
        assert!(cache.get("aa11").await.is_none());
        assert!(cache.get("bb33").await.is_some());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_miss() {
        let store = Arc::new(MemoryStore::new());
        store.set("cache:fp1", "not json", 60).await.unwrap();
        let cache = ResponseCache::new(store, 60, true);
        assert!(cache.get("fp1").await.is_none());
    }
}
