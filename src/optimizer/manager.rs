// Optimizer: model, result and preprocessing caches behind cache-or-compute calls
// Author: kelexine (https://github.com/kelexine)

use super::keys;
use super::memory::MemoryOptimizer;
use super::models::{MemoryReport, ModelFootprint, OptimizerStatistics, SweepReport};
use crate::cache::{CacheLookup, ModelCache, ModelHandle, Sizer, TtlCache};
use crate::config::OptimizationConfig;
use crate::error::{ResourceError, Result};
use crate::monitor::PerformanceMonitor;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Preprocessed image bytes, shared between callers without copying.
pub type Preprocessed = Arc<[u8]>;

struct Sweeper {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Counters {
    model_loads: AtomicU64,
    load_micros: AtomicU64,
    result_computations: AtomicU64,
    preprocessing_runs: AtomicU64,
    sweeps: AtomicU64,
}

/// Composition root for the caching side of the OCR pipeline.
///
/// Each of the three caches can be switched off at runtime with
/// [`reconfigure`](Self::reconfigure); a disabled cache is cleared and
/// retired, and its cache-or-compute call always computes. The model cache
/// lives in the monitor, so critical-memory cleanup always reaches the
/// cache models are loaded into.
pub struct Optimizer {
    config: RwLock<OptimizationConfig>,
    monitor: Arc<PerformanceMonitor>,
    memory: MemoryOptimizer,
    result_cache: RwLock<Option<Arc<TtlCache<Value>>>>,
    preprocessing_cache: RwLock<Option<Arc<TtlCache<Preprocessed>>>>,
    /// Per-key locks so a model is loaded once however many callers miss.
    loading: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    counters: Counters,
    sweeper: Mutex<Option<Sweeper>>,
}

impl Optimizer {
    /// Build the optimizer's caches from `config`. The monitor's model cache
    /// is kept if it already has the configured limits and replaced otherwise.
    pub fn new(config: OptimizationConfig, monitor: Arc<PerformanceMonitor>) -> Arc<Self> {
        install_model_cache(&monitor, &config);
        let result_cache = config.enable_result_cache.then(|| Arc::new(result_cache(&config)));
        let preprocessing_cache = config
            .enable_preprocessing_cache
            .then(|| Arc::new(preprocessing_cache(&config)));

        info!(
            "Optimizer ready (model cache: {}, result cache: {}, preprocessing cache: {})",
            config.enable_model_cache, config.enable_result_cache, config.enable_preprocessing_cache
        );

        Arc::new(Self {
            memory: MemoryOptimizer::new(monitor.clone()),
            config: RwLock::new(config),
            monitor,
            result_cache: RwLock::new(result_cache),
            preprocessing_cache: RwLock::new(preprocessing_cache),
            loading: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            sweeper: Mutex::new(None),
        })
    }

    pub fn config(&self) -> OptimizationConfig {
        self.config.read().clone()
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn memory(&self) -> &MemoryOptimizer {
        &self.memory
    }

    pub fn model_cache(&self) -> Option<Arc<ModelCache>> {
        self.monitor.model_cache()
    }

    pub fn result_cache(&self) -> Option<Arc<TtlCache<Value>>> {
        self.result_cache.read().clone()
    }

    pub fn preprocessing_cache(&self) -> Option<Arc<TtlCache<Preprocessed>>> {
        self.preprocessing_cache.read().clone()
    }

    /// Return the model cached under `key`, loading it on a miss.
    ///
    /// Concurrent misses for the same key run `loader` once; the other
    /// callers wait and reuse its model. The footprint charged against the
    /// cache budget comes from [`ModelFootprint`], else the configured
    /// default.
    pub fn get_or_load_model<M, F, E>(&self, key: &str, loader: F) -> Result<Arc<M>>
    where
        M: ModelFootprint + Any + Send + Sync,
        F: FnOnce() -> std::result::Result<M, E>,
        E: Display,
    {
        let Some(cache) = self.model_cache() else {
            let (model, _) = self.load_model(key, loader)?;
            return Ok(Arc::new(model));
        };

        if let Some(model) = cache.get_typed::<M>(key) {
            debug!("Model cache hit: {}", key);
            return Ok(model);
        }

        let key_lock = self
            .loading
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone();
        let _loading = key_lock.lock();

        // Another caller may have finished loading while we waited
        if let Some(model) = cache.get_typed::<M>(key) {
            debug!("Model {} loaded by a concurrent caller", key);
            return Ok(model);
        }

        let outcome = self.load_model(key, loader);
        let model = match outcome {
            Ok((model, size_mb)) => {
                let model = Arc::new(model);
                let handle: ModelHandle = model.clone();
                if !cache.put(key, handle, size_mb) {
                    warn!(
                        "Model {} (~{:.1}MB) does not fit the {:.1}MB model budget, not cached",
                        key,
                        size_mb,
                        cache.max_memory_mb()
                    );
                }
                Ok(model)
            }
            Err(e) => Err(e),
        };

        self.loading.lock().remove(key);
        model
    }

    fn load_model<M, F, E>(&self, key: &str, loader: F) -> Result<(M, f64)>
    where
        M: ModelFootprint,
        F: FnOnce() -> std::result::Result<M, E>,
        E: Display,
    {
        let started = Instant::now();
        let model = loader().map_err(|e| {
            warn!("Loading model {} failed: {}", key, e);
            ResourceError::LoadFailed(format!("model {}: {}", key, e))
        })?;
        let elapsed = started.elapsed();

        let size_mb = model
            .footprint_mb()
            .filter(|mb| mb.is_finite() && *mb >= 0.0)
            .unwrap_or_else(|| self.config.read().default_model_size_mb);

        self.counters.model_loads.fetch_add(1, Ordering::Relaxed);
        self.counters
            .load_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        info!("Loaded model {} in {:.2}s (~{:.1}MB)", key, elapsed.as_secs_f64(), size_mb);

        Ok((model, size_mb))
    }

    /// Return the result cached for `content` and `params`, computing and
    /// caching it on a miss. Failed computations are not cached.
    pub fn get_or_compute_result<F, E>(
        &self,
        content: &[u8],
        params: &Value,
        compute: F,
    ) -> Result<CacheLookup<Value>>
    where
        F: FnOnce() -> std::result::Result<Value, E>,
        E: Display,
    {
        let cache_key = keys::cache_key(content, params);
        let cache = self.result_cache();

        if let Some(entry) = cache.as_ref().and_then(|c| c.get_entry(&cache_key)) {
            debug!("Result cache hit: {}", &cache_key[..12]);
            let age_secs = entry.age().as_secs_f64();
            return Ok(CacheLookup {
                value: entry.value,
                cache_hit: true,
                cache_key,
                age_secs,
                access_count: entry.access_count,
            });
        }

        let value = compute()
            .map_err(|e| ResourceError::LoadFailed(format!("result computation failed: {}", e)))?;
        self.counters.result_computations.fetch_add(1, Ordering::Relaxed);

        if let Some(cache) = &cache {
            cache.put(cache_key.clone(), value.clone(), None);
        }

        Ok(CacheLookup {
            value,
            cache_hit: false,
            cache_key,
            age_secs: 0.0,
            access_count: 0,
        })
    }

    /// Same as [`get_or_compute_result`](Self::get_or_compute_result) for
    /// preprocessed image bytes.
    pub fn get_or_preprocess<F, E>(
        &self,
        content: &[u8],
        params: &Value,
        preprocess: F,
    ) -> Result<CacheLookup<Preprocessed>>
    where
        F: FnOnce() -> std::result::Result<Vec<u8>, E>,
        E: Display,
    {
        let cache_key = keys::cache_key(content, params);
        let cache = self.preprocessing_cache();

        if let Some(entry) = cache.as_ref().and_then(|c| c.get_entry(&cache_key)) {
            debug!("Preprocessing cache hit: {}", &cache_key[..12]);
            let age_secs = entry.age().as_secs_f64();
            return Ok(CacheLookup {
                value: entry.value,
                cache_hit: true,
                cache_key,
                age_secs,
                access_count: entry.access_count,
            });
        }

        let bytes: Preprocessed = preprocess()
            .map_err(|e| ResourceError::LoadFailed(format!("preprocessing failed: {}", e)))?
            .into();
        self.counters.preprocessing_runs.fetch_add(1, Ordering::Relaxed);

        if let Some(cache) = &cache {
            cache.put(cache_key.clone(), bytes.clone(), None);
        }

        Ok(CacheLookup {
            value: bytes,
            cache_hit: false,
            cache_key,
            age_secs: 0.0,
            access_count: 0,
        })
    }

    /// Remove expired entries from every cache, then reclaim if memory is
    /// above the GC trigger.
    pub fn sweep_expired(&self) -> SweepReport {
        let mut report = SweepReport {
            models: self.model_cache().map(|c| c.cleanup_expired()).unwrap_or(0),
            results: self.result_cache().map(|c| c.cleanup_expired()).unwrap_or(0),
            preprocessed: self
                .preprocessing_cache()
                .map(|c| c.cleanup_expired())
                .unwrap_or(0),
            reclaimed: false,
        };
        report.reclaimed = self.memory.collect_if_needed("sweep");
        self.counters.sweeps.fetch_add(1, Ordering::Relaxed);

        if report.total() > 0 {
            info!(
                "Sweep removed {} expired entries ({} models, {} results, {} preprocessed)",
                report.total(),
                report.models,
                report.results,
                report.preprocessed
            );
        }
        report
    }

    /// Start the periodic expiry sweep. Does nothing if it is already
    /// running. Must be called inside a tokio runtime.
    pub fn start_background_sweep(self: &Arc<Self>) -> Result<()> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ResourceError::Config(
                "background sweep needs a tokio runtime".to_string(),
            ));
        }

        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return Ok(());
        }

        let (stop, stop_rx) = watch::channel(false);
        let handle = spawn_sweep(Arc::downgrade(self), stop_rx);
        *sweeper = Some(Sweeper { stop, handle });
        debug!("Background sweep started");
        Ok(())
    }

    /// Always runs a reclaim pass. Clears every cache first when
    /// `aggressive` is set or memory is critical.
    pub fn optimize_memory(&self, aggressive: bool) -> MemoryReport {
        let before_mb = self.memory.current_mb();
        let critical = self.memory.is_critical();

        let caches_cleared = aggressive || critical;
        let entries_cleared = if caches_cleared {
            if critical {
                warn!("Memory critical at {:.1}MB, clearing all caches", before_mb);
            }
            self.clear_caches()
        } else {
            0
        };

        self.memory.collect("optimize_memory");
        let after_mb = self.memory.current_mb();

        let report = MemoryReport {
            before_mb,
            after_mb,
            freed_mb: (before_mb - after_mb).max(0.0),
            caches_cleared,
            entries_cleared,
        };
        info!(
            "Memory optimization: {:.1}MB -> {:.1}MB, {} entries cleared",
            report.before_mb, report.after_mb, report.entries_cleared
        );
        report
    }

    /// Empty all caches and run a reclaim pass if anything was dropped.
    pub fn clear_all_caches(&self) -> usize {
        let cleared = self.clear_caches();
        if cleared > 0 {
            self.memory.collect("cache_clear");
        }
        cleared
    }

    fn clear_caches(&self) -> usize {
        let models = self.model_cache().map(|c| c.clear()).unwrap_or(0);
        let results = self.result_cache().map(|c| c.clear()).unwrap_or(0);
        let preprocessed = self.preprocessing_cache().map(|c| c.clear()).unwrap_or(0);
        let total = models + results + preprocessed;
        if total > 0 {
            info!(
                "Cleared caches: {} models, {} results, {} preprocessed",
                models, results, preprocessed
            );
        }
        total
    }

    /// Apply a new configuration at runtime.
    ///
    /// A cache switched off is cleared and retired. A cache switched on, or
    /// whose size or TTL changed, is rebuilt empty. Unchanged caches keep
    /// their contents. The sweep picks up a new interval on its next tick.
    pub fn reconfigure(&self, new_config: OptimizationConfig) {
        let mut config = self.config.write();
        let old = config.clone();

        install_model_cache(&self.monitor, &new_config);

        {
            let mut slot = self.result_cache.write();
            let changed = old.result_cache_size != new_config.result_cache_size
                || old.cache_ttl_hours != new_config.cache_ttl_hours;
            if !new_config.enable_result_cache || changed {
                if let Some(retired) = slot.take() {
                    retired.clear();
                }
            }
            if new_config.enable_result_cache && slot.is_none() {
                *slot = Some(Arc::new(result_cache(&new_config)));
            }
        }

        {
            let mut slot = self.preprocessing_cache.write();
            let changed = old.preprocessing_cache_size != new_config.preprocessing_cache_size
                || old.cache_ttl_hours != new_config.cache_ttl_hours;
            if !new_config.enable_preprocessing_cache || changed {
                if let Some(retired) = slot.take() {
                    retired.clear();
                }
            }
            if new_config.enable_preprocessing_cache && slot.is_none() {
                *slot = Some(Arc::new(preprocessing_cache(&new_config)));
            }
        }

        info!(
            "Optimizer reconfigured (model cache: {}, result cache: {}, preprocessing cache: {})",
            new_config.enable_model_cache,
            new_config.enable_result_cache,
            new_config.enable_preprocessing_cache
        );
        *config = new_config;
    }

    pub fn get_statistics(&self) -> OptimizerStatistics {
        let counters = &self.counters;
        OptimizerStatistics {
            model_cache: self.model_cache().map(|c| c.stats()),
            result_cache: self.result_cache().map(|c| c.stats()),
            preprocessing_cache: self.preprocessing_cache().map(|c| c.stats()),
            model_loads: counters.model_loads.load(Ordering::Relaxed),
            total_load_time_secs: counters.load_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            result_computations: counters.result_computations.load(Ordering::Relaxed),
            preprocessing_runs: counters.preprocessing_runs.load(Ordering::Relaxed),
            sweeps: counters.sweeps.load(Ordering::Relaxed),
            reclaim_passes: self.memory.passes(),
            memory: self.monitor.check_memory_limits(),
        }
    }

    /// Stop the background sweep and wait for it to exit.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.stop.send(true);
            let _ = sweeper.handle.await;
            debug!("Background sweep stopped");
        }
    }
}

impl Drop for Optimizer {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            let _ = sweeper.stop.send(true);
            sweeper.handle.abort();
        }
    }
}

/// Make the monitor's model cache match `config`: keep it if its limits
/// already match, otherwise clear and retire it and install a new one
/// (or none when model caching is off).
fn install_model_cache(monitor: &PerformanceMonitor, config: &OptimizationConfig) {
    if config.enable_model_cache && monitor.model_cache().is_some_and(|cache| cache.matches(config)) {
        return;
    }
    let replacement = config
        .enable_model_cache
        .then(|| Arc::new(ModelCache::from_config(config, monitor.reclaimer().clone())));
    if let Some(retired) = monitor.replace_model_cache(replacement) {
        retired.clear();
    }
}

fn result_cache(config: &OptimizationConfig) -> TtlCache<Value> {
    let sizer: Sizer<Value> = Arc::new(|value: &Value| value.to_string().len());
    TtlCache::new("result", config.result_cache_size, config.cache_ttl()).with_sizer(sizer)
}

fn preprocessing_cache(config: &OptimizationConfig) -> TtlCache<Preprocessed> {
    let sizer: Sizer<Preprocessed> = Arc::new(|bytes: &Preprocessed| bytes.len());
    TtlCache::new("preprocessing", config.preprocessing_cache_size, config.cache_ttl())
        .with_sizer(sizer)
}

/// Sweep loop. The interval is re-read every round so `reconfigure` takes
/// effect without a restart.
fn spawn_sweep(optimizer: Weak<Optimizer>, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let interval = match optimizer.upgrade() {
                Some(optimizer) => optimizer.config.read().cleanup_interval(),
                None => break,
            };
            tokio::select! {
                _ = stop.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let Some(optimizer) = optimizer.upgrade() else { break };
            optimizer.sweep_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimits;
    use crate::memory::MemoryProbe;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct Model {
        mb: Option<f64>,
    }

    impl ModelFootprint for Model {
        fn footprint_mb(&self) -> Option<f64> {
            self.mb
        }
    }

    fn optimizer(config: OptimizationConfig) -> Arc<Optimizer> {
        let probe: Arc<dyn MemoryProbe> = Arc::new(|| -> Result<f64> { Ok(100.0) });
        let monitor = PerformanceMonitor::builder(ResourceLimits::default())
            .probe(probe)
            .cache_config(config.clone())
            .build();
        Optimizer::new(config, monitor)
    }

    #[test]
    fn test_shares_model_cache_with_monitor() {
        let optimizer = optimizer(OptimizationConfig::default());
        let ours = optimizer.model_cache().unwrap();
        let monitors = optimizer.monitor().model_cache().unwrap();
        assert!(Arc::ptr_eq(&ours, &monitors));
    }

    #[test]
    fn test_model_without_hint_uses_default_size() {
        let optimizer = optimizer(OptimizationConfig::default());
        optimizer
            .get_or_load_model("m", || Ok::<_, String>(Model { mb: None }))
            .unwrap();

        let cache = optimizer.model_cache().unwrap();
        assert!((cache.memory_mb() - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_load_failure_is_not_cached() {
        let optimizer = optimizer(OptimizationConfig::default());
        let result = optimizer.get_or_load_model::<Model, _, _>("m", || Err("disk gone"));
        assert!(matches!(result, Err(ResourceError::LoadFailed(_))));

        let calls = AtomicUsize::new(0);
        optimizer
            .get_or_load_model("m", || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(Model { mb: Some(1.0) })
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disabled_result_cache_always_computes() {
        let optimizer = optimizer(OptimizationConfig {
            enable_result_cache: false,
            ..OptimizationConfig::default()
        });
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let lookup = optimizer
                .get_or_compute_result(b"doc", &json!({}), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(json!("text"))
                })
                .unwrap();
            assert!(!lookup.cache_hit);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reconfigure_retires_and_restores_caches() {
        let optimizer = optimizer(OptimizationConfig::default());
        optimizer
            .get_or_compute_result(b"doc", &json!({}), || Ok::<_, String>(json!(1)))
            .unwrap();
        assert_eq!(optimizer.result_cache().unwrap().len(), 1);

        optimizer.reconfigure(OptimizationConfig {
            enable_result_cache: false,
            ..OptimizationConfig::default()
        });
        assert!(optimizer.result_cache().is_none());
        assert!(optimizer.model_cache().is_some());

        optimizer.reconfigure(OptimizationConfig::default());
        let cache = optimizer.result_cache().unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disabling_model_cache_removes_it_from_monitor() {
        let optimizer = optimizer(OptimizationConfig::default());
        optimizer
            .get_or_load_model("m", || Ok::<_, String>(Model { mb: Some(1.0) }))
            .unwrap();
        let retired = optimizer.model_cache().unwrap();

        optimizer.reconfigure(OptimizationConfig {
            enable_model_cache: false,
            ..OptimizationConfig::default()
        });
        assert!(retired.is_empty());
        assert!(optimizer.model_cache().is_none());
        assert!(optimizer.monitor().model_cache().is_none());
    }

    #[test]
    fn test_optimize_memory_always_reclaims() {
        let optimizer = optimizer(OptimizationConfig::default());
        optimizer
            .get_or_compute_result(b"doc", &json!({}), || Ok::<_, String>(json!(1)))
            .unwrap();

        let gentle = optimizer.optimize_memory(false);
        assert!(!gentle.caches_cleared);
        assert_eq!(optimizer.memory().passes(), 1);
        assert_eq!(optimizer.result_cache().unwrap().len(), 1);

        let aggressive = optimizer.optimize_memory(true);
        assert!(aggressive.caches_cleared);
        assert_eq!(aggressive.entries_cleared, 1);
        assert_eq!(optimizer.memory().passes(), 2);
    }

    #[tokio::test]
    async fn test_background_sweep_starts_once_and_stops() {
        let optimizer = optimizer(OptimizationConfig::default());
        optimizer.start_background_sweep().unwrap();
        optimizer.start_background_sweep().unwrap();
        assert!(optimizer.sweeper.lock().is_some());

        optimizer.shutdown().await;
        assert!(optimizer.sweeper.lock().is_none());
    }
}
