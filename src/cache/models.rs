//! Cache entry and statistics models.

// Author: kelexine (https://github.com/kelexine)

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Free-form metadata attached to cache entries, metrics and requests.
pub type Metadata = HashMap<String, Value>;

/// A value resident in a cache, with its access bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub access_count: u64,
    pub size_bytes: usize,
    pub metadata: Metadata,
}

impl<V> CacheEntry<V> {
    pub fn new(key: String, value: V, size_bytes: usize, metadata: Metadata) -> Self {
        let now = Instant::now();
        Self {
            key,
            value,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            size_bytes,
            metadata,
        }
    }

    /// Record a read.
    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Expiry is measured from creation, not from the last access.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }

    pub fn diagnostics(&self) -> EntryDiagnostics {
        EntryDiagnostics {
            key: self.key.clone(),
            age_secs: self.age().as_secs_f64(),
            idle_secs: self.last_accessed.elapsed().as_secs_f64(),
            access_count: self.access_count,
            size_bytes: self.size_bytes,
        }
    }
}

/// Per-entry view returned in [`CacheStats`].
#[derive(Debug, Clone, Serialize)]
pub struct EntryDiagnostics {
    pub key: String,
    pub age_secs: f64,
    pub idle_secs: f64,
    pub access_count: u64,
    pub size_bytes: usize,
}

/// Statistics for a single cache.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Name used in logs and metrics.
    pub name: String,
    pub entries: usize,
    pub max_entries: usize,
    pub total_bytes: usize,
    /// Byte budget, if the cache has one.
    pub max_bytes: Option<usize>,
    pub ttl_hours: f64,
    /// Number of successful cache hits.
    pub hits: u64,
    /// Number of cache misses, including lookups that found an expired entry.
    pub misses: u64,
    /// Entries removed to make room.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    pub entry_details: Vec<EntryDiagnostics>,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A value returned from one of the optimizer's cache-or-compute operations.
#[derive(Debug, Clone, Serialize)]
pub struct CacheLookup<T> {
    pub value: T,
    pub cache_hit: bool,
    pub cache_key: String,
    /// Age of the cached entry; zero for a fresh computation.
    pub age_secs: f64,
    pub access_count: u64,
}
