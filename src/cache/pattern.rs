//! # Pattern Cache
//!
//! Process-wide cache of translated filesystem-pattern queries. Keys are
//! SHA-256 hashes of `(tenant, model, pattern)`; entries expire on TTL,
//! evict by LRU at capacity, and are dropped when a write touches their
//! model.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use sha2::{Digest, Sha256};

type CacheKey = [u8; 32];

struct Entry {
    value: String,
    tenant: String,
    model: String,
    inserted_at: Instant,
}

/// LRU cache for translated pattern queries.
pub struct PatternCache {
    entries: Mutex<LruCache<CacheKey, Entry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PatternCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).unwrap();
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn key(tenant: &str, model: &str, pattern: &str) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(tenant.as_bytes());
        hasher.update([0]);
        hasher.update(model.as_bytes());
        hasher.update([0]);
        hasher.update(pattern.as_bytes());
        hasher.finalize().into()
    }

    /// Fetch a cached translation, honouring TTL.
    pub fn get(&self, tenant: &str, model: &str, pattern: &str) -> Option<String> {
        let key = Self::key(tenant, model, pattern);
        let mut entries = self.entries.lock().ok()?;
        let (value, expired) = match entries.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                (Some(entry.value.clone()), false)
            }
            Some(_) => (None, true),
            None => (None, false),
        };
        if expired {
            entries.pop(&key);
        }
        match value {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a translation.
    pub fn put(&self, tenant: &str, model: &str, pattern: &str, value: String) {
        let key = Self::key(tenant, model, pattern);
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(
                key,
                Entry {
                    value,
                    tenant: tenant.to_string(),
                    model: model.to_string(),
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    /// Drop every entry for `(tenant, model)`. Called by the record
    /// pipeline after writes.
    pub fn invalidate_model(&self, tenant: &str, model: &str) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let stale: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, e)| e.tenant == tenant && e.model == model)
            .map(|(k, _)| *k)
            .collect();
        for key in stale {
            entries.pop(&key);
        }
    }

    /// (hits, misses) counters for logs
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let cache = PatternCache::new(10, Duration::from_secs(60));
        cache.put("acme", "orders", "*.json", "sql-1".into());
        assert_eq!(
            cache.get("acme", "orders", "*.json"),
            Some("sql-1".to_string())
        );
        assert_eq!(cache.get("acme", "orders", "*.txt"), None);
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = PatternCache::new(2, Duration::from_secs(60));
        cache.put("t", "m", "a", "1".into());
        cache.put("t", "m", "b", "2".into());
        // touch "a" so "b" is the eviction candidate
        cache.get("t", "m", "a");
        cache.put("t", "m", "c", "3".into());

        assert!(cache.get("t", "m", "a").is_some());
        assert!(cache.get("t", "m", "b").is_none());
        assert!(cache.get("t", "m", "c").is_some());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = PatternCache::new(10, Duration::from_millis(0));
        cache.put("t", "m", "a", "1".into());
        assert_eq!(cache.get("t", "m", "a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_model_invalidation() {
        let cache = PatternCache::new(10, Duration::from_secs(60));
        cache.put("acme", "orders", "a", "1".into());
        cache.put("acme", "orders", "b", "2".into());
        cache.put("acme", "users", "a", "3".into());
        cache.put("globex", "orders", "a", "4".into());

        cache.invalidate_model("acme", "orders");

        assert!(cache.get("acme", "orders", "a").is_none());
        assert!(cache.get("acme", "orders", "b").is_none());
        assert!(cache.get("acme", "users", "a").is_some());
        assert!(cache.get("globex", "orders", "a").is_some());
    }

    #[test]
    fn test_tenants_do_not_collide() {
        let cache = PatternCache::new(10, Duration::from_secs(60));
        cache.put("acme", "orders", "a", "1".into());
        assert!(cache.get("globex", "orders", "a").is_none());
    }
}
