//! In-memory document cache for previously fetched listings and schemas.
//!
//! Uses moka's concurrent cache implementation so reads and writes may
//! race across backends; readers treat an entry past its TTL as absent,
//! and expired entries are evicted lazily on read rather than swept.

use std::time::Duration;

use moka::sync::Cache;
use serde_json::Value;

use crate::utils;

/// Composite cache key: one entry per (backend, namespace, path).
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct CacheKey {
    pub backend: String,
    pub namespace: String,
    pub path: String,
}

impl CacheKey {
    pub fn new(
        backend: &str,
        namespace: &str,
        path: &str,
    ) -> Self {
        Self {
            backend: backend.to_string(),
            namespace: namespace.to_string(),
            path: path.to_string(),
        }
    }
}

#[derive(Clone)]
struct CacheEntry {
    value: Value,
    stored_at: i64,
    ttl_millis: i64,
}

impl CacheEntry {
    fn is_expired(
        &self,
        now: i64,
    ) -> bool {
        self.ttl_millis > 0 && now - self.stored_at >= self.ttl_millis
    }
}

/// Thread-safe store of fetched documents keyed by [`CacheKey`].
///
/// Holds both data documents (listings) and schema documents. The store
/// has no network knowledge; expansion decides what to put in and when
/// to invalidate.
#[derive(Clone)]
pub struct CacheStore {
    entries: Cache<CacheKey, CacheEntry>,
}

impl CacheStore {
    /// Allocate a new [`CacheStore`] holding at most `capacity` documents.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Cache::new(capacity as u64),
        }
    }

    /// Store a document under `key` with the given time-to-live.
    /// A zero TTL means the entry never expires.
    pub fn set(
        &self,
        key: CacheKey,
        value: Value,
        ttl: Duration,
    ) {
        self.entries.insert(key, CacheEntry {
            value,
            stored_at: utils::time::time_millis(),
            ttl_millis: ttl.as_millis() as i64,
        });
    }

    /// Get a fresh document for `key`. Expired entries are treated as
    /// absent and removed.
    pub fn get(
        &self,
        key: &CacheKey,
    ) -> Option<Value> {
        let entry = self.entries.get(key)?;
        if entry.is_expired(utils::time::time_millis()) {
            self.entries.remove(key);
            return None;
        }
        Some(entry.value)
    }

    /// Whether a fresh entry exists for `key` without cloning the document.
    pub fn contains(
        &self,
        key: &CacheKey,
    ) -> bool {
        self.get(key).is_some()
    }

    /// Drop the entry for `key`, if any.
    pub fn invalidate(
        &self,
        key: &CacheKey,
    ) {
        self.entries.remove(key);
    }

    /// Drop every entry. Used when the engine shuts down.
    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Drop every entry belonging to `backend`.
    pub fn invalidate_backend(
        &self,
        backend: &str,
    ) {
        let stale: Vec<CacheKey> = self.entries.iter().filter(|(k, _)| k.backend == backend).map(|(k, _)| (*k).clone()).collect();
        for key in stale {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_set_and_get() {
        let cache = CacheStore::new(16);
        let key = CacheKey::new("openbao", "", "secret/");
        cache.set(key.clone(), json!(["a", "b"]), Duration::from_secs(60));
        assert_eq!(cache.get(&key), Some(json!(["a", "b"])));
    }

    #[test]
    fn test_expired_entry_treated_as_absent() {
        let cache = CacheStore::new(16);
        let key = CacheKey::new("openbao", "", "secret/");
        cache.set(key.clone(), json!([]), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get(&key), None);
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let cache = CacheStore::new(16);
        let key = CacheKey::new("consul", "ns", "services");
        cache.set(key.clone(), json!({"web": {}}), Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.contains(&key));
    }

    #[test]
    fn test_invalidate_backend_leaves_other_backends() {
        let cache = CacheStore::new(16);
        let bao = CacheKey::new("openbao", "", "secret/");
        let nomad = CacheKey::new("nomad", "", "jobs");
        cache.set(bao.clone(), json!([]), Duration::from_secs(60));
        cache.set(nomad.clone(), json!([]), Duration::from_secs(60));
        cache.invalidate_backend("openbao");
        assert!(!cache.contains(&bao));
        assert!(cache.contains(&nomad));
    }
}
