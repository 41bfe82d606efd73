// Model cache bounded by entry count and a memory budget
// Author: kelexine (https://github.com/kelexine)

use crate::cache::ttl::TtlCache;
use crate::cache::models::{CacheEntry, CacheStats, Metadata};
use crate::config::OptimizationConfig;
use crate::memory::MemoryReclaimer;
use serde_json::json;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Opaque handle to a loaded recognition model.
pub type ModelHandle = Arc<dyn Any + Send + Sync>;

/// A resident model together with its access bookkeeping.
pub type ModelCacheEntry = CacheEntry<ModelHandle>;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

pub(crate) fn mb_to_bytes(mb: f64) -> usize {
    (mb.max(0.0) * BYTES_PER_MB) as usize
}

pub(crate) fn bytes_to_mb(bytes: usize) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Cache for large, expensive-to-construct models.
///
/// Bounded by both the number of models and their estimated total
/// footprint. Dropping a model larger than the large-object threshold is
/// followed by a reclaim pass, since such models usually own native memory.
pub struct ModelCache {
    cache: TtlCache<ModelHandle>,
    max_memory_mb: f64,
    large_object_threshold_mb: f64,
    reclaimer: Arc<MemoryReclaimer>,
}

impl ModelCache {
    pub fn new(
        max_models: usize,
        max_memory_mb: f64,
        ttl: Duration,
        large_object_threshold_mb: f64,
        reclaimer: Arc<MemoryReclaimer>,
    ) -> Self {
        Self {
            cache: TtlCache::new("model", max_models, ttl).with_max_bytes(mb_to_bytes(max_memory_mb)),
            max_memory_mb,
            large_object_threshold_mb,
            reclaimer,
        }
    }

    pub fn from_config(config: &OptimizationConfig, reclaimer: Arc<MemoryReclaimer>) -> Self {
        Self::new(
            config.model_cache_size,
            config.model_cache_memory_mb,
            config.cache_ttl(),
            config.large_object_threshold_mb,
            reclaimer,
        )
    }

    /// Whether this cache was built with the limits `config` asks for.
    pub fn matches(&self, config: &OptimizationConfig) -> bool {
        self.cache.max_entries() == config.model_cache_size.max(1)
            && self.max_memory_mb == config.model_cache_memory_mb
            && self.cache.ttl() == config.cache_ttl()
            && self.large_object_threshold_mb == config.large_object_threshold_mb
    }

    pub fn get(&self, key: &str) -> Option<ModelHandle> {
        self.cache.get(key)
    }

    pub fn get_entry(&self, key: &str) -> Option<ModelCacheEntry> {
        self.cache.get_entry(key)
    }

    /// Returns the model if it is resident and of type `M`.
    pub fn get_typed<M: Any + Send + Sync>(&self, key: &str) -> Option<Arc<M>> {
        self.cache.get(key).and_then(|model| model.downcast::<M>().ok())
    }

    /// Store `model` with an estimated footprint of `size_mb`, evicting least
    /// recently used models until both budgets have room.
    /// Returns `false` if the model alone exceeds the memory budget.
    pub fn put(&self, key: impl Into<String>, model: ModelHandle, size_mb: f64) -> bool {
        let key = key.into();
        let mut metadata = Metadata::new();
        metadata.insert("size_mb".to_string(), json!(size_mb));

        let insertion = self.cache.insert(key.clone(), model, mb_to_bytes(size_mb), metadata);
        if insertion.stored {
            debug!("Cached model {} (~{:.1}MB)", key, size_mb);
        }
        let stored = insertion.stored;
        let mut released = insertion.evicted;
        released.extend(insertion.replaced);
        self.release(released, "model_eviction");
        stored
    }

    pub fn remove(&self, key: &str) -> bool {
        self.cache.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains(key)
    }

    pub fn cleanup_expired(&self) -> usize {
        let removed = self.cache.remove_expired();
        let count = removed.len();
        self.release(removed, "model_expiry");
        count
    }

    /// Drop every resident model. The caller decides whether to follow
    /// up with a reclaim pass.
    pub fn clear(&self) -> usize {
        let count = self.cache.clear();
        if count > 0 {
            info!("Cleared {} models from cache", count);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn memory_mb(&self) -> f64 {
        bytes_to_mb(self.cache.total_bytes())
    }

    pub fn max_memory_mb(&self) -> f64 {
        self.max_memory_mb
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop removed models, then hint a reclaim if any of them was large.
    fn release(&self, removed: Vec<ModelCacheEntry>, reason: &str) {
        let mut large = 0;
        for entry in removed {
            let size_mb = bytes_to_mb(entry.size_bytes);
            if size_mb > self.large_object_threshold_mb {
                large += 1;
            }
            debug!("Released model {} (~{:.1}MB)", entry.key, size_mb);
        }
        if large > 0 {
            self.reclaimer.collect(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeModel {
        name: &'static str,
    }

    fn model(name: &'static str) -> ModelHandle {
        Arc::new(FakeModel { name })
    }

    fn cache(max_models: usize, max_mb: f64) -> (ModelCache, Arc<MemoryReclaimer>) {
        let reclaimer = Arc::new(MemoryReclaimer::new());
        let cache = ModelCache::new(max_models, max_mb, Duration::from_secs(3600), 50.0, reclaimer.clone());
        (cache, reclaimer)
    }

    #[test]
    fn test_memory_budget_evicts_before_count_budget() {
        let (cache, _) = cache(10, 100.0);
        assert!(cache.put("a", model("a"), 40.0));
        assert!(cache.put("b", model("b"), 40.0));
        assert!(cache.put("c", model("c"), 40.0));

        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(cache.memory_mb() <= 100.0);
    }

    #[test]
    fn test_large_eviction_triggers_reclaim() {
        let (cache, reclaimer) = cache(1, 1000.0);
        cache.put("small", model("small"), 10.0);
        cache.put("large", model("large"), 200.0);
        assert_eq!(reclaimer.passes(), 0);

        cache.put("next", model("next"), 10.0);
        assert_eq!(reclaimer.passes(), 1);
    }

    #[test]
    fn test_replacing_large_model_triggers_reclaim() {
        let (cache, reclaimer) = cache(4, 1000.0);
        cache.put("layout", model("v1"), 200.0);
        assert_eq!(reclaimer.passes(), 0);

        cache.put("layout", model("v2"), 200.0);
        assert_eq!(reclaimer.passes(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_typed::<FakeModel>("layout").unwrap().name, "v2");
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_typed_lookup() {
        let (cache, _) = cache(2, 100.0);
        cache.put("m", model("layout"), 1.0);

        let typed = cache.get_typed::<FakeModel>("m").unwrap();
        assert_eq!(typed.name, "layout");
        assert!(cache.get_typed::<String>("m").is_none());
    }

    #[test]
    fn test_oversized_model_rejected() {
        let (cache, _) = cache(2, 100.0);
        assert!(!cache.put("huge", model("huge"), 150.0));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_reports_count() {
        let (cache, reclaimer) = cache(4, 100.0);
        cache.put("a", model("a"), 1.0);
        cache.put("b", model("b"), 1.0);

        assert_eq!(cache.clear(), 2);
        assert_eq!(cache.memory_mb(), 0.0);
        assert_eq!(reclaimer.passes(), 0);
    }
}
