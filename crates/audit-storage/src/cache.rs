//! Query result cache (C9): bounded, TTL-expiring, LRU-evicting, with
//! glob-pattern invalidation for cache keys tied to a mutated resource.

use audit_core::config::CacheConfig;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    last_access: Instant,
    ttl: Duration,
    size_bytes: usize,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

fn value_size_bytes(value: &Value) -> usize {
    serde_json::to_vec(value).map(|bytes| bytes.len()).unwrap_or(0)
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entry_count: usize,
    pub memory_usage_mb: f64,
}

/// Bounded query cache keyed by opaque strings (see `generate_cache_key`).
/// Eviction is lazy: entries are dropped on lookup once expired, and the
/// least-recently-accessed entry is evicted on insert once `max_entries` or
/// `max_size_mb` is exceeded.
pub struct QueryCache {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
    max_size_bytes: u64,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    size_bytes: AtomicU64,
}

impl QueryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::with_capacity(config.max_entries.min(1024)),
            max_entries: config.max_entries,
            max_size_bytes: config.max_size_mb * 1024 * 1024,
            default_ttl: Duration::from_secs(config.default_ttl_seconds),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            size_bytes: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired() {
                entry.last_access = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }
        if let Some((_, removed)) = self.entries.remove(key) {
            self.size_bytes.fetch_sub(removed.size_bytes as u64, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        let key = key.into();
        let size_bytes = value_size_bytes(&value);

        while self.entries.len() >= self.max_entries
            || self.size_bytes.load(Ordering::Relaxed) + size_bytes as u64 > self.max_size_bytes
        {
            if !self.evict_least_recently_used() {
                break;
            }
        }

        if let Some((_, replaced)) = self.entries.remove(&key) {
            self.size_bytes.fetch_sub(replaced.size_bytes as u64, Ordering::Relaxed);
        }

        let now = Instant::now();
        self.entries.insert(key, CacheEntry { value, inserted_at: now, last_access: now, ttl, size_bytes });
        self.size_bytes.fetch_add(size_bytes as u64, Ordering::Relaxed);
    }

    /// Evicts the least-recently-accessed entry. Returns `false` if the
    /// cache was already empty.
    fn evict_least_recently_used(&self) -> bool {
        let oldest = self.entries.iter().min_by_key(|e| e.last_access).map(|e| e.key().clone());
        match oldest {
            Some(key) => {
                if let Some((_, removed)) = self.entries.remove(&key) {
                    self.size_bytes.fetch_sub(removed.size_bytes as u64, Ordering::Relaxed);
                }
                self.evictions.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Removes every key matching a glob `pattern` (e.g. `"events:org-42:*"`).
    pub fn invalidate(&self, pattern: &str) -> usize {
        let matcher = glob::Pattern::new(pattern).unwrap_or_else(|_| glob::Pattern::new("").unwrap());
        let to_remove: Vec<String> =
            self.entries.iter().filter(|e| matcher.matches(e.key())).map(|e| e.key().clone()).collect();
        let removed = to_remove.len();
        for key in to_remove {
            if let Some((_, entry)) = self.entries.remove(&key) {
                self.size_bytes.fetch_sub(entry.size_bytes as u64, Ordering::Relaxed);
            }
        }
        removed
    }

    /// Drops every entry, resetting tracked memory usage to zero. Hit/miss/
    /// eviction counters are left intact as a lifetime record.
    pub fn clear(&self) {
        self.entries.clear();
        self.size_bytes.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entry_count: self.entries.len(),
            memory_usage_mb: self.size_bytes.load(Ordering::Relaxed) as f64 / (1024.0 * 1024.0),
        }
    }
}

/// Builds a stable cache key from a query name and its bound parameters:
/// sort the parameters, join them, and hash with the query name to keep
/// keys fixed-length regardless of parameter count.
pub fn generate_cache_key(name: &str, params: &[String]) -> String {
    let mut sorted = params.to_vec();
    sorted.sort();
    let joined = sorted.join("|");
    let mut hasher = sha2::Sha256::new();
    use sha2::Digest;
    hasher.update(name.as_bytes());
    hasher.update(b"_");
    hasher.update(joined.as_bytes());
    format!("{}_{}", name, hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_entries: usize, ttl_secs: u64) -> CacheConfig {
        CacheConfig {
            redis_url: "redis://localhost".to_string(),
            max_entries,
            default_ttl_seconds: ttl_secs,
            max_size_mb: 100,
        }
    }

    #[test]
    fn set_then_get_round_trips() {
        let cache = QueryCache::new(&config(10, 60));
        cache.set("k1", Value::String("v1".to_string()));
        assert_eq!(cache.get("k1"), Some(Value::String("v1".to_string())));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn expired_entry_counts_as_miss_and_is_dropped() {
        let cache = QueryCache::new(&config(10, 60));
        cache.set_with_ttl("k1", Value::Bool(true), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k1"), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn insert_past_capacity_evicts_oldest() {
        let cache = QueryCache::new(&config(2, 60));
        cache.set("a", Value::Null);
        std::thread::sleep(Duration::from_millis(2));
        cache.set("b", Value::Null);
        std::thread::sleep(Duration::from_millis(2));
        cache.set("c", Value::Null);
        assert_eq!(cache.get("a"), None);
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn accessing_an_entry_protects_it_from_lru_eviction() {
        let cache = QueryCache::new(&config(2, 60));
        cache.set("a", Value::Null);
        std::thread::sleep(Duration::from_millis(2));
        cache.set("b", Value::Null);

        // Touch "a" so it becomes more-recently-used than "b".
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get("a").is_some());

        std::thread::sleep(Duration::from_millis(2));
        cache.set("c", Value::Null);

        // "b" is least-recently-used now, not "a".
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn insert_past_memory_cap_evicts_until_it_fits() {
        let mut cfg = config(1000, 60);
        cfg.max_size_mb = 0;
        let cache = QueryCache::new(&cfg);
        cache.set("a", Value::String("x".repeat(64)));
        // With a zero-byte cap, even a single entry can't fit and is
        // evicted before the next insert's room check passes.
        cache.set("b", Value::String("y".repeat(64)));
        assert!(cache.stats().evictions >= 1);
    }

    #[test]
    fn invalidate_removes_matching_keys_only() {
        let cache = QueryCache::new(&config(10, 60));
        cache.set("events:org-1:page-1", Value::Null);
        cache.set("events:org-1:page-2", Value::Null);
        cache.set("events:org-2:page-1", Value::Null);
        let removed = cache.invalidate("events:org-1:*");
        assert_eq!(removed, 2);
        assert!(cache.get("events:org-2:page-1").is_some());
    }

    #[test]
    fn clear_empties_the_cache_and_resets_memory_usage() {
        let cache = QueryCache::new(&config(10, 60));
        cache.set("a", Value::String("hello".to_string()));
        cache.set("b", Value::String("world".to_string()));
        cache.clear();
        assert_eq!(cache.stats().entry_count, 0);
        assert_eq!(cache.stats().memory_usage_mb, 0.0);
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn cache_key_is_order_independent_in_params() {
        let a = generate_cache_key("list_events", &["b".to_string(), "a".to_string()]);
        let b = generate_cache_key("list_events", &["a".to_string(), "b".to_string()]);
        assert_eq!(a, b);
    }
}
