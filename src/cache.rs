//! Multi-tier response cache (C2).
//!
//! Four named TTL+LRU caches keyed by object identity, selection shape, and a
//! cache-version tag. Expiry is checked lazily on `get`; recency and eviction
//! are O(1) via the LRU map. Each cache has its own mutex and the critical
//! sections never do I/O.

use lru::LruCache;
use serde::Serialize;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// Thread-safe TTL + LRU cache of JSON payloads.
pub struct TtlCache {
    name: &'static str,
    default_ttl: Duration,
    inner: Mutex<LruCache<String, Entry>>,
}

impl TtlCache {
    pub fn new(name: &'static str, default_ttl: Duration, max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).unwrap();
        tracing::info!(cache = name, ttl_s = default_ttl.as_secs(), max_entries, "cache initialized");
        Self { name, default_ttl, inner: Mutex::new(LruCache::new(capacity)) }
    }

    /// Fetch a value if present and unexpired. A hit promotes the entry to
    /// most-recent; an expired entry is removed on the spot.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut cache = self.inner.lock().unwrap();
        match cache.get(key) {
            None => return None,
            Some(entry) => {
                if Instant::now() <= entry.expires_at {
                    return Some(entry.value.clone());
                }
            }
        }
        tracing::debug!(cache = self.name, key = %key, "cache expired");
        cache.pop(key);
        None
    }

    /// Store with the cache's default TTL. Exceeding `max_entries` evicts the
    /// least-recently used entry.
    pub fn set(&self, key: &str, value: Value) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) {
        let entry = Entry { value, expires_at: Instant::now() + ttl };
        let mut cache = self.inner.lock().unwrap();
        cache.put(key.to_string(), entry);
    }

    pub fn delete(&self, key: &str) {
        self.inner.lock().unwrap().pop(key);
    }

    pub fn clear(&self) {
        let mut cache = self.inner.lock().unwrap();
        let count = cache.len();
        cache.clear();
        tracing::info!(cache = self.name, entries = count, "cache cleared");
    }

    /// Remove every entry whose key contains `pattern` as a substring.
    pub fn clear_matching(&self, pattern: &str) {
        let mut cache = self.inner.lock().unwrap();
        let keys: Vec<String> = cache
            .iter()
            .filter(|(k, _)| k.contains(pattern))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            cache.pop(key);
        }
        tracing::info!(cache = self.name, pattern = %pattern, entries = keys.len(), "cache cleared by pattern");
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.inner.lock().unwrap();
        let now = Instant::now();
        let total = cache.len();
        let expired = cache.iter().filter(|(_, e)| now > e.expires_at).count();
        CacheStats { total_entries: total, active_entries: total - expired, expired_entries: expired }
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub active_entries: usize,
    pub expired_entries: usize,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The four caches the service runs on, with their contract TTLs and bounds.
pub struct CacheRegistry {
    /// Bucket listings. Short TTL: listings go stale fast.
    pub files: TtlCache,
    /// Tree metadata: children listings, full node metadata, previews.
    pub tree: TtlCache,
    /// Dataset info (shape/ndim/dtype), shared by /preview and /data.
    pub dataset: TtlCache,
    /// Bounded /data windows.
    pub data: TtlCache,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self {
            files: TtlCache::new("file-list", Duration::from_secs(30), 200),
            tree: TtlCache::new("tree-meta", Duration::from_secs(300), 3000),
            dataset: TtlCache::new("dataset-info", Duration::from_secs(300), 3000),
            data: TtlCache::new("data-response", Duration::from_secs(120), 1200),
        }
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Colon-joined cache key.
pub fn cache_key(parts: &[&str]) -> String {
    parts.join(":")
}
