// Generic LRU cache with per-entry TTL and size accounting
// Author: kelexine (https://github.com/kelexine)

use crate::cache::models::{CacheEntry, CacheStats, Metadata};
use crate::metrics;
use lru::LruCache;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Computes the size in bytes charged for a value.
pub type Sizer<V> = Arc<dyn Fn(&V) -> usize + Send + Sync>;

/// Outcome of an insertion, including everything evicted to make room.
pub(crate) struct Insertion<V> {
    pub stored: bool,
    /// Previous entry under the same key, if the insertion overwrote one.
    pub replaced: Option<CacheEntry<V>>,
    pub evicted: Vec<CacheEntry<V>>,
}

struct Inner<V> {
    /// Recency order is maintained by the `LruCache`; it is never bounded by
    /// it, capacity is enforced explicitly so that byte totals stay exact.
    entries: LruCache<String, CacheEntry<V>>,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<V> Inner<V> {
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.pop(key)?;
        self.total_bytes -= entry.size_bytes;
        Some(entry)
    }

    fn evict_lru(&mut self) -> Option<CacheEntry<V>> {
        let (_, entry) = self.entries.pop_lru()?;
        self.total_bytes -= entry.size_bytes;
        self.evictions += 1;
        Some(entry)
    }
}

/// Thread-safe keyed store bounded by entry count (and optionally bytes),
/// with lazy TTL expiry and least-recently-used eviction.
///
/// All operations serialize through one mutex. Eviction runs inside the
/// same critical section as the `put` that needs it.
pub struct TtlCache<V> {
    name: String,
    max_entries: usize,
    max_bytes: Option<usize>,
    ttl: Duration,
    sizer: Sizer<V>,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone + 'static> TtlCache<V> {
    /// Create a cache charging `size_of::<V>()` per entry.
    ///
    /// A `max_entries` of 0 is raised to 1; configuration validation
    /// rejects zero sizes before a cache is built from it.
    pub fn new(name: impl Into<String>, max_entries: usize, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            max_entries: max_entries.max(1),
            max_bytes: None,
            ttl,
            sizer: Arc::new(|_: &V| std::mem::size_of::<V>()),
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
        }
    }

    /// Use `sizer` to compute entry sizes for `put`.
    pub fn with_sizer(mut self, sizer: Sizer<V>) -> Self {
        self.sizer = sizer;
        self
    }

    /// Bound the total bytes of resident entries.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Returns the value and records the access, or `None` if absent or expired.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_entry(key).map(|entry| entry.value)
    }

    /// Like [`get`](Self::get) but returns a snapshot of the whole entry.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        let mut inner = self.inner.lock();

        let expired = match inner.entries.peek(key).map(|entry| entry.is_expired(self.ttl)) {
            Some(expired) => expired,
            None => {
                inner.misses += 1;
                drop(inner);
                metrics::record_cache_lookup(&self.name, false);
                return None;
            }
        };

        if expired {
            inner.remove(key);
            inner.expirations += 1;
            inner.misses += 1;
            let (len, bytes) = (inner.entries.len(), inner.total_bytes);
            drop(inner);
            debug!("[{}] Entry expired on read: {}", self.name, key);
            metrics::record_cache_lookup(&self.name, false);
            metrics::record_cache_expirations(&self.name, 1);
            metrics::update_cache_size(&self.name, len, bytes);
            return None;
        }

        inner.hits += 1;
        let snapshot = inner.entries.get_mut(key).map(|entry| {
            entry.touch();
            entry.clone()
        });
        drop(inner);
        metrics::record_cache_lookup(&self.name, true);
        snapshot
    }

    /// Whether a live entry exists. Does not count as an access.
    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .lock()
            .entries
            .peek(key)
            .map(|entry| !entry.is_expired(self.ttl))
            .unwrap_or(false)
    }

    /// Insert `value`, sizing it with the cache's sizer.
    /// Returns `false` if the value alone exceeds the byte budget.
    pub fn put(&self, key: impl Into<String>, value: V, metadata: Option<Metadata>) -> bool {
        let size = (self.sizer)(&value);
        self.insert(key.into(), value, size, metadata.unwrap_or_default())
            .stored
    }

    /// Insert `value` charging an explicit `size_bytes`.
    pub fn put_with_size(
        &self,
        key: impl Into<String>,
        value: V,
        size_bytes: usize,
        metadata: Option<Metadata>,
    ) -> bool {
        self.insert(key.into(), value, size_bytes, metadata.unwrap_or_default())
            .stored
    }

    pub(crate) fn insert(
        &self,
        key: String,
        value: V,
        size_bytes: usize,
        metadata: Metadata,
    ) -> Insertion<V> {
        if let Some(max_bytes) = self.max_bytes {
            if size_bytes > max_bytes {
                warn!(
                    "[{}] Refusing {} ({} bytes): larger than the whole budget of {} bytes",
                    self.name, key, size_bytes, max_bytes
                );
                return Insertion {
                    stored: false,
                    replaced: None,
                    evicted: Vec::new(),
                };
            }
        }

        let mut inner = self.inner.lock();
        let replaced = inner.remove(&key);

        let mut evicted = Vec::new();
        while inner.entries.len() >= self.max_entries {
            match inner.evict_lru() {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }
        if let Some(max_bytes) = self.max_bytes {
            while inner.total_bytes + size_bytes > max_bytes {
                match inner.evict_lru() {
                    Some(entry) => evicted.push(entry),
                    None => break,
                }
            }
        }

        inner.total_bytes += size_bytes;
        inner
            .entries
            .put(key.clone(), CacheEntry::new(key.clone(), value, size_bytes, metadata));
        let (len, bytes) = (inner.entries.len(), inner.total_bytes);
        drop(inner);

        for entry in &evicted {
            debug!("[{}] Evicted LRU entry: {} ({} bytes)", self.name, entry.key, entry.size_bytes);
        }
        metrics::record_cache_evictions(&self.name, evicted.len());
        metrics::update_cache_size(&self.name, len, bytes);

        Insertion {
            stored: true,
            replaced,
            evicted,
        }
    }

    /// Remove `key` explicitly.
    pub fn remove(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let removed = inner.remove(key);
        let (len, bytes) = (inner.entries.len(), inner.total_bytes);
        drop(inner);
        metrics::update_cache_size(&self.name, len, bytes);
        removed.map(|entry| entry.value)
    }

    /// Removes every expired entry and returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        self.remove_expired().len()
    }

    pub(crate) fn remove_expired(&self) -> Vec<CacheEntry<V>> {
        let mut inner = self.inner.lock();
        let expired_keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.ttl))
            .map(|(key, _)| key.clone())
            .collect();

        let removed: Vec<CacheEntry<V>> = expired_keys
            .iter()
            .filter_map(|key| inner.remove(key))
            .collect();
        inner.expirations += removed.len() as u64;
        let (len, bytes) = (inner.entries.len(), inner.total_bytes);
        drop(inner);

        if !removed.is_empty() {
            debug!("[{}] Removed {} expired entries", self.name, removed.len());
        }
        metrics::record_cache_expirations(&self.name, removed.len());
        metrics::update_cache_size(&self.name, len, bytes);
        removed
    }

    /// Empties the cache and returns the number of entries dropped.
    pub fn clear(&self) -> usize {
        self.drain().len()
    }

    pub(crate) fn drain(&self) -> Vec<CacheEntry<V>> {
        let mut inner = self.inner.lock();
        let mut drained = Vec::with_capacity(inner.entries.len());
        while let Some((_, entry)) = inner.entries.pop_lru() {
            drained.push(entry);
        }
        inner.total_bytes = 0;
        drop(inner);

        debug!("[{}] Cache cleared ({} entries)", self.name, drained.len());
        metrics::update_cache_size(&self.name, 0, 0);
        drained
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            name: self.name.clone(),
            entries: inner.entries.len(),
            max_entries: self.max_entries,
            total_bytes: inner.total_bytes,
            max_bytes: self.max_bytes,
            ttl_hours: self.ttl.as_secs_f64() / 3600.0,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
            entry_details: inner.entries.iter().map(|(_, e)| e.diagnostics()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn cache(max: usize) -> TtlCache<String> {
        TtlCache::new("test", max, Duration::from_secs(3600))
            .with_sizer(Arc::new(|v: &String| v.len()))
    }

    #[test]
    fn test_zero_capacity_holds_one_entry() {
        let cache = cache(0);
        assert_eq!(cache.max_entries(), 1);
        cache.put("a", "x".to_string(), None);
        cache.put("b", "y".to_string(), None);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("b"));
    }

    #[test]
    fn test_get_records_access() {
        let cache = cache(4);
        cache.put("a", "alpha".to_string(), None);

        assert_eq!(cache.get("a").as_deref(), Some("alpha"));
        let entry = cache.get_entry("a").unwrap();
        assert_eq!(entry.access_count, 2);
        assert!(entry.last_accessed >= entry.created_at);
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = cache(3);
        cache.put("a", "1".to_string(), None);
        cache.put("b", "2".to_string(), None);
        cache.put("c", "3".to_string(), None);

        // "a" becomes most recent, so "b" is the LRU victim
        cache.get("a");
        cache.put("d", "4".to_string(), None);

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_replacing_key_adjusts_bytes() {
        let cache = cache(4);
        cache.put("a", "12345".to_string(), None);
        cache.put("a", "12".to_string(), None);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 2);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_byte_budget_evicts_until_fit() {
        let cache = cache(10).with_max_bytes(10);
        cache.put("a", "aaaa".to_string(), None);
        cache.put("b", "bbbb".to_string(), None);
        cache.put("c", "cccccc".to_string(), None);

        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.total_bytes(), 10);
    }

    #[test]
    fn test_oversized_value_refused() {
        let cache = cache(10).with_max_bytes(4);
        cache.put("a", "aa".to_string(), None);

        assert!(!cache.put("big", "way too large".to_string(), None));
        assert!(cache.contains("a"));
        assert_eq!(cache.total_bytes(), 2);
    }

    #[test]
    fn test_expired_entry_absent_and_counted() {
        let cache: TtlCache<u32> = TtlCache::new("ttl", 4, Duration::from_millis(30));
        cache.put("a", 1, None);
        thread::sleep(Duration::from_millis(60));

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.total_bytes(), 0);
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_clear_resets_bytes() {
        let cache = cache(4);
        cache.put("a", "abc".to_string(), None);
        cache.put("b", "de".to_string(), None);

        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn test_stats_details() {
        let cache = cache(4);
        cache.put("a", "abc".to_string(), None);
        cache.get("a");

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.max_entries, 4);
        assert_eq!(stats.total_bytes, 3);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entry_details[0].access_count, 1);
        assert_eq!(stats.entry_details[0].size_bytes, 3);
    }

    #[test]
    fn test_concurrent_puts_keep_invariants() {
        let cache = Arc::new(cache(16));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for i in 0..200 {
                        cache.put(format!("{}-{}", t, i % 24), "x".repeat(i % 7), None);
                        cache.get(&format!("{}-{}", (t + 1) % 8, i % 24));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cache.stats();
        assert!(stats.entries <= 16);
        let summed: usize = stats.entry_details.iter().map(|e| e.size_bytes).sum();
        assert_eq!(summed, stats.total_bytes);
    }
}
