// Performance monitor: memory limits, slots and operation metrics
// Author: kelexine (https://github.com/kelexine)

use crate::cache::{Metadata, ModelCache};
use crate::config::{AppConfig, MonitorConfig, OptimizationConfig, ResourceLimits};
use crate::error::{ResourceError, Result};
use crate::memory::{MemoryProbe, MemoryReclaimer, ProcessMemoryProbe};
use crate::metrics;
use crate::monitor::models::{
    MemoryCheck, MemoryStatus, OperationStats, PerformanceMetrics, PerformanceStats, SlotStats,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

struct History {
    /// Ring buffer of finalized metrics, oldest first.
    recent: VecDeque<PerformanceMetrics>,
    by_operation: BTreeMap<String, OperationStats>,
    total_recorded: u64,
}

/// Enforces memory limits and records per-operation telemetry.
///
/// Construct with [`PerformanceMonitor::builder`] or
/// [`PerformanceMonitor::from_config`]; share it as `Arc<PerformanceMonitor>`.
pub struct PerformanceMonitor {
    limits: ResourceLimits,
    config: MonitorConfig,
    slot_timeout: Duration,
    probe: Arc<dyn MemoryProbe>,
    reclaimer: Arc<MemoryReclaimer>,
    /// The process-wide model cache. Swapped by the optimizer on reconfigure.
    model_cache: RwLock<Option<Arc<ModelCache>>>,
    slots: Option<Arc<Semaphore>>,
    history: Mutex<History>,
}

/// Builder for [`PerformanceMonitor`].
pub struct PerformanceMonitorBuilder {
    limits: ResourceLimits,
    config: MonitorConfig,
    slot_timeout: Duration,
    probe: Option<Arc<dyn MemoryProbe>>,
    reclaimer: Option<Arc<MemoryReclaimer>>,
    model_cache: Option<Arc<ModelCache>>,
    cache_config: OptimizationConfig,
}

impl PerformanceMonitorBuilder {
    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    /// Longest `monitor_operation` waits for a free slot.
    pub fn slot_timeout(mut self, timeout: Duration) -> Self {
        self.slot_timeout = timeout;
        self
    }

    pub fn probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn reclaimer(mut self, reclaimer: Arc<MemoryReclaimer>) -> Self {
        self.reclaimer = Some(reclaimer);
        self
    }

    /// Use an existing model cache instead of building one from the cache config.
    pub fn model_cache(mut self, cache: Arc<ModelCache>) -> Self {
        self.model_cache = Some(cache);
        self
    }

    /// Settings for the model cache built when none is supplied.
    pub fn cache_config(mut self, config: OptimizationConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn build(self) -> Arc<PerformanceMonitor> {
        let reclaimer = self
            .reclaimer
            .unwrap_or_else(|| Arc::new(MemoryReclaimer::new()));

        let model_cache = if self.config.enable_model_caching {
            let cache_config = self.cache_config;
            let reclaimer = reclaimer.clone();
            Some(
                self.model_cache
                    .unwrap_or_else(|| Arc::new(ModelCache::from_config(&cache_config, reclaimer))),
            )
        } else {
            None
        };

        let slots = self
            .config
            .enable_concurrency_management
            .then(|| Arc::new(Semaphore::new(self.limits.max_concurrent_requests.max(1))));

        let history_size = self.config.history_size;
        Arc::new(PerformanceMonitor {
            limits: self.limits,
            config: self.config,
            slot_timeout: self.slot_timeout,
            probe: self.probe.unwrap_or_else(|| Arc::new(ProcessMemoryProbe::new())),
            reclaimer,
            model_cache: RwLock::new(model_cache),
            slots,
            history: Mutex::new(History {
                recent: VecDeque::with_capacity(history_size.min(1024)),
                by_operation: BTreeMap::new(),
                total_recorded: 0,
            }),
        })
    }
}

impl PerformanceMonitor {
    pub fn builder(limits: ResourceLimits) -> PerformanceMonitorBuilder {
        PerformanceMonitorBuilder {
            limits,
            config: MonitorConfig::default(),
            slot_timeout: Duration::from_secs(300),
            probe: None,
            reclaimer: None,
            model_cache: None,
            cache_config: OptimizationConfig::default(),
        }
    }

    /// Build a monitor from the application config. The slot wait is bounded
    /// by the pool's per-worker timeout.
    pub fn from_config(config: &AppConfig, probe: Arc<dyn MemoryProbe>) -> Arc<Self> {
        Self::builder(config.limits.clone())
            .config(config.monitor.clone())
            .slot_timeout(config.pool.worker_timeout())
            .cache_config(config.optimization.clone())
            .probe(probe)
            .build()
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn model_cache(&self) -> Option<Arc<ModelCache>> {
        self.model_cache.read().clone()
    }

    /// Install `cache` as the model cache cleared on critical memory and
    /// return the one it replaces.
    pub fn replace_model_cache(&self, cache: Option<Arc<ModelCache>>) -> Option<Arc<ModelCache>> {
        std::mem::replace(&mut *self.model_cache.write(), cache)
    }

    pub fn reclaimer(&self) -> &Arc<MemoryReclaimer> {
        &self.reclaimer
    }

    pub fn probe(&self) -> Arc<dyn MemoryProbe> {
        self.probe.clone()
    }

    /// Current resident memory. A failing probe reads as 0 MB.
    pub fn current_memory_mb(&self) -> f64 {
        match self.probe.resident_mb() {
            Ok(mb) => {
                metrics::update_resident_memory(mb);
                mb
            }
            Err(e) => {
                warn!("Memory probe failed, treating sample as 0MB: {}", e);
                0.0
            }
        }
    }

    pub fn check_memory_limits(&self) -> MemoryCheck {
        let current_mb = self.current_memory_mb();
        let warning_mb = self.limits.warning_mb();
        let critical_mb = self.limits.critical_mb();

        let status = if current_mb >= critical_mb {
            MemoryStatus::Critical
        } else if current_mb >= warning_mb {
            MemoryStatus::Warning
        } else {
            MemoryStatus::Ok
        };

        MemoryCheck {
            current_mb,
            status,
            warning_mb,
            critical_mb,
        }
    }

    /// Reclaims memory according to the current status.
    /// Returns `true` when it is safe to start new work.
    pub fn enforce_memory_limits(&self) -> bool {
        let check = self.check_memory_limits();
        match check.status {
            MemoryStatus::Ok => true,
            MemoryStatus::Warning => {
                if self
                    .reclaimer
                    .collect_with_cooldown(self.config.gc_cooldown(), "memory_warning")
                {
                    debug!(
                        "Memory at {:.1}MB (warning at {:.1}MB), ran reclaim pass",
                        check.current_mb, check.warning_mb
                    );
                }
                true
            }
            MemoryStatus::Critical => {
                warn!(
                    "Memory critical: {:.1}MB >= {:.1}MB, clearing model cache",
                    check.current_mb, check.critical_mb
                );
                if let Some(cache) = self.model_cache() {
                    cache.clear();
                }
                self.reclaimer.collect("memory_critical");

                let after = self.current_memory_mb();
                let recovered = after < check.critical_mb;
                if recovered {
                    debug!("Memory recovered to {:.1}MB", after);
                } else {
                    error!(
                        "Memory still critical after cleanup: {:.1}MB >= {:.1}MB",
                        after, check.critical_mb
                    );
                }
                recovered
            }
        }
    }

    /// Start monitoring an operation.
    ///
    /// Fails with `ResourceExhausted` if memory cannot be brought below the
    /// critical threshold, and with `Timeout` if no slot frees up within the
    /// slot timeout. Metrics are finalized when the returned guard drops.
    pub async fn monitor_operation(
        self: &Arc<Self>,
        name: &str,
        metadata: Metadata,
    ) -> Result<OperationGuard> {
        if !self.enforce_memory_limits() {
            return Err(ResourceError::ResourceExhausted(format!(
                "memory above {:.1}MB, refusing to start '{}'",
                self.limits.critical_mb(),
                name
            )));
        }

        let permit = match &self.slots {
            Some(slots) => {
                match tokio::time::timeout(self.slot_timeout, slots.clone().acquire_owned()).await {
                    Ok(Ok(permit)) => Some(permit),
                    Ok(Err(_)) => return Err(ResourceError::ShutDown),
                    Err(_) => {
                        warn!("No processing slot for '{}' within {:?}", name, self.slot_timeout);
                        return Err(ResourceError::Timeout(format!(
                            "waited {:?} for a processing slot for '{}'",
                            self.slot_timeout, name
                        )));
                    }
                }
            }
            None => None,
        };

        let before = self.current_memory_mb();
        let peak = Arc::new(AtomicU64::new(before.to_bits()));
        let sampler = self.spawn_sampler(peak.clone());

        Ok(OperationGuard {
            monitor: self.clone(),
            metrics: Some(PerformanceMetrics::start(name, metadata, before)),
            started: Instant::now(),
            peak,
            sampler,
            error: None,
            completed: false,
            _permit: permit,
        })
    }

    /// Run `operation` under [`monitor_operation`](Self::monitor_operation),
    /// recording success or failure from its result.
    pub async fn track<T, F>(self: &Arc<Self>, name: &str, metadata: Metadata, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let guard = self.monitor_operation(name, metadata).await?;
        match operation.await {
            Ok(value) => {
                guard.succeed();
                Ok(value)
            }
            Err(e) => {
                guard.fail(&e);
                Err(e)
            }
        }
    }

    /// Polls the probe while an operation is active. Needs a tokio runtime;
    /// without one the peak is taken from the before/after samples only.
    fn spawn_sampler(&self, peak: Arc<AtomicU64>) -> Option<JoinHandle<()>> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let probe = self.probe.clone();
        let period = self.config.sample_interval();
        Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Ok(mb) = probe.resident_mb() {
                    raise_peak(&peak, mb);
                }
            }
        }))
    }

    fn finalize(&self, metrics: PerformanceMetrics) {
        if metrics.duration_secs > self.limits.max_processing_time_secs {
            warn!(
                "Operation '{}' took {:.2}s (limit {:.0}s)",
                metrics.operation, metrics.duration_secs, self.limits.max_processing_time_secs
            );
        }
        if metrics.memory_peak_mb > self.limits.max_memory_mb {
            warn!(
                "Operation '{}' peaked at {:.1}MB (limit {:.0}MB)",
                metrics.operation, metrics.memory_peak_mb, self.limits.max_memory_mb
            );
        }
        self.record(metrics);
    }

    /// Append finalized metrics to the history.
    pub fn record(&self, metrics: PerformanceMetrics) {
        metrics::record_operation(&metrics.operation, metrics.success, metrics.duration_secs);
        debug!(
            "Operation '{}' finished in {:.3}s (success: {}, memory {:+.1}MB)",
            metrics.operation,
            metrics.duration_secs,
            metrics.success,
            metrics.memory_used_mb()
        );

        let mut history = self.history.lock();
        history
            .by_operation
            .entry(metrics.operation.clone())
            .or_default()
            .record(metrics.duration_secs, metrics.success);
        history.total_recorded += 1;
        history.recent.push_back(metrics);
        while history.recent.len() > self.config.history_size.max(1) {
            history.recent.pop_front();
        }
    }

    /// The `n` most recently recorded metrics, oldest first.
    pub fn recent_metrics(&self, n: usize) -> Vec<PerformanceMetrics> {
        let history = self.history.lock();
        let skip = history.recent.len().saturating_sub(n);
        history.recent.iter().skip(skip).cloned().collect()
    }

    pub fn slot_stats(&self) -> Option<SlotStats> {
        self.slots.as_ref().map(|slots| {
            let max_slots = self.limits.max_concurrent_requests.max(1);
            let available = slots.available_permits();
            SlotStats {
                max_slots,
                available,
                in_use: max_slots.saturating_sub(available),
            }
        })
    }

    pub fn get_performance_stats(&self) -> PerformanceStats {
        let check = self.check_memory_limits();

        let (operations, total_recorded, recent_success_rate) = {
            let history = self.history.lock();
            let window: Vec<&PerformanceMetrics> = history
                .recent
                .iter()
                .rev()
                .take(self.config.success_window.max(1))
                .collect();
            let rate = if window.is_empty() {
                None
            } else {
                let successes = window.iter().filter(|m| m.success).count();
                Some(successes as f64 / window.len() as f64)
            };
            (history.by_operation.clone(), history.total_recorded, rate)
        };

        PerformanceStats {
            current_memory_mb: check.current_mb,
            memory_status: check.status,
            limits: self.limits.clone(),
            operations,
            total_recorded,
            recent_success_rate,
            reclaim_passes: self.reclaimer.passes(),
            model_cache: self.model_cache().map(|cache| cache.stats()),
            slots: self.slot_stats(),
        }
    }
}

fn raise_peak(peak: &AtomicU64, sample_mb: f64) {
    let _ = peak.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
        (sample_mb > f64::from_bits(bits)).then(|| sample_mb.to_bits())
    });
}

/// Scoped handle for one monitored operation.
///
/// Dropping the guard stops the memory sampler, records the finalized
/// metrics and releases the slot. A guard dropped without
/// [`succeed`](Self::succeed) or [`fail`](Self::fail) (early return,
/// cancelled future) is recorded as a failure.
pub struct OperationGuard {
    monitor: Arc<PerformanceMonitor>,
    metrics: Option<PerformanceMetrics>,
    started: Instant,
    peak: Arc<AtomicU64>,
    sampler: Option<JoinHandle<()>>,
    error: Option<String>,
    completed: bool,
    _permit: Option<OwnedSemaphorePermit>,
}

impl OperationGuard {
    pub fn operation(&self) -> &str {
        self.metrics
            .as_ref()
            .map(|m| m.operation.as_str())
            .unwrap_or_default()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn insert_metadata(&mut self, key: impl Into<String>, value: Value) {
        if let Some(metrics) = self.metrics.as_mut() {
            metrics.metadata.insert(key.into(), value);
        }
    }

    pub fn succeed(mut self) {
        self.completed = true;
    }

    pub fn fail(mut self, error: impl ToString) {
        self.error = Some(error.to_string());
        self.completed = true;
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            sampler.abort();
        }
        let Some(mut metrics) = self.metrics.take() else {
            return;
        };

        let error = if self.completed {
            self.error.take()
        } else {
            Some("operation ended before completing".to_string())
        };
        let after = self.monitor.current_memory_mb();
        let peak = f64::from_bits(self.peak.load(Ordering::Relaxed));
        metrics.finish(self.started.elapsed().as_secs_f64(), after, peak, error);
        self.monitor.finalize(metrics);
    }
}
