//! Configuration data structures for the OCR resource core.
//!
//! This module defines the schema for resource limits, the worker pool,
//! the performance monitor, the cache optimizer, and logging.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The root configuration object for the application.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Memory and time limits enforced by the performance monitor.
    #[serde(default)]
    pub limits: ResourceLimits,

    /// Performance monitor behaviour (caching, slots, history).
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Worker pool settings for the resource manager.
    #[serde(default)]
    pub pool: ResourcePool,

    /// Model, result and preprocessing cache settings.
    #[serde(default)]
    pub optimization: OptimizationConfig,

    /// Logging and observability settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Immutable resource limits supplied once at construction.
///
/// The three thresholds are fractions of `max_memory_mb`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceLimits {
    /// Memory budget for the whole process in MB.
    /// Default: `2048`
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: f64,

    /// Longest a single monitored operation may run before a warning is logged.
    /// Default: `300`
    #[serde(default = "default_max_processing_time")]
    pub max_processing_time_secs: f64,

    /// Number of monitor slots available to concurrent operations.
    /// Default: `3`
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Default: `0.8`
    #[serde(default = "default_warning_threshold")]
    pub memory_warning_threshold: f64,

    /// Default: `0.95`
    #[serde(default = "default_critical_threshold")]
    pub memory_critical_threshold: f64,

    /// Fraction of the budget above which a reclaim pass is worthwhile.
    /// Default: `0.7`
    #[serde(default = "default_gc_threshold")]
    pub gc_threshold: f64,
}

impl ResourceLimits {
    pub fn warning_mb(&self) -> f64 {
        self.max_memory_mb * self.memory_warning_threshold
    }

    pub fn critical_mb(&self) -> f64 {
        self.max_memory_mb * self.memory_critical_threshold
    }

    pub fn gc_trigger_mb(&self) -> f64 {
        self.max_memory_mb * self.gc_threshold
    }

    pub fn max_processing_time(&self) -> Duration {
        secs_to_duration(self.max_processing_time_secs)
    }
}

/// Settings for the performance monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    /// Keep a model cache that is cleared when memory goes critical.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub enable_model_caching: bool,

    /// Bound concurrent monitored operations with slots.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub enable_concurrency_management: bool,

    /// Minimum spacing between reclaim passes triggered by the warning level.
    /// Default: `60`
    #[serde(default = "default_gc_cooldown")]
    pub gc_cooldown_secs: u64,

    /// Number of finalized operation metrics kept in the ring buffer.
    /// Default: `1000`
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Memory sampling period while an operation is active.
    /// Default: `100`
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,

    /// Number of most recent operations used for the success rate.
    /// Default: `10`
    #[serde(default = "default_success_window")]
    pub success_window: usize,
}

impl MonitorConfig {
    pub fn gc_cooldown(&self) -> Duration {
        Duration::from_secs(self.gc_cooldown_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }
}

/// Static configuration for the resource manager's worker pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourcePool {
    /// Number of worker tasks. Bounded to 1..=10.
    /// Default: number of logical CPUs, capped at 4.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Submissions are refused while resident memory is at or above this.
    /// Default: `2048`
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: f64,

    /// Pending requests accepted before `QueueFull` is returned.
    /// Default: `100`
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Per-request timeout when the request does not carry its own.
    /// Also bounds the monitor's slot wait.
    /// Default: `300`
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout_secs: f64,

    /// Period of the completed-result purge.
    /// Default: `60`
    #[serde(default = "default_pool_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Period of the dead/stuck worker check.
    /// Default: `30`
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,

    /// How long unclaimed results stay available to `get_result`.
    /// Default: `600`
    #[serde(default = "default_result_retention")]
    pub result_retention_secs: u64,

    /// How long `shutdown` waits for in-flight work.
    /// Default: `5`
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: f64,
}

impl ResourcePool {
    pub fn worker_timeout(&self) -> Duration {
        secs_to_duration(self.worker_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    pub fn result_retention(&self) -> Duration {
        Duration::from_secs(self.result_retention_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        secs_to_duration(self.shutdown_grace_secs)
    }
}

/// Settings for the model, result and preprocessing caches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationConfig {
    /// Default: `true`
    #[serde(default = "default_true")]
    pub enable_model_cache: bool,

    /// Default: `true`
    #[serde(default = "default_true")]
    pub enable_result_cache: bool,

    /// Default: `true`
    #[serde(default = "default_true")]
    pub enable_preprocessing_cache: bool,

    /// Maximum number of resident models.
    /// Default: `5`
    #[serde(default = "default_model_cache_size")]
    pub model_cache_size: usize,

    /// Memory budget for resident models in MB.
    /// Default: `2048`
    #[serde(default = "default_max_memory_mb")]
    pub model_cache_memory_mb: f64,

    /// Default: `1000`
    #[serde(default = "default_result_cache_size")]
    pub result_cache_size: usize,

    /// Default: `500`
    #[serde(default = "default_preprocessing_cache_size")]
    pub preprocessing_cache_size: usize,

    /// Time-to-live for every cache entry, in hours.
    /// Default: `24`
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: f64,

    /// Models above this size get a reclaim pass after eviction.
    /// Default: `50`
    #[serde(default = "default_large_object_threshold")]
    pub large_object_threshold_mb: f64,

    /// Footprint assumed for models that give no size hint.
    /// Default: `100`
    #[serde(default = "default_model_size")]
    pub default_model_size_mb: f64,

    /// Period of the background expiry sweep.
    /// Default: `300` (5 minutes)
    #[serde(default = "default_optimizer_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl OptimizationConfig {
    pub fn cache_ttl(&self) -> Duration {
        ttl_from_hours(self.cache_ttl_hours)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

/// Converts a TTL given in (possibly fractional) hours.
pub fn ttl_from_hours(hours: f64) -> Duration {
    secs_to_duration(hours * 3600.0)
}

/// Negative and NaN values become zero, values too large for a
/// `Duration` saturate.
fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// Settings for application logging and output format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    /// Default: `info`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for logs (`pretty`, `json`, `compact`).
    /// Default: `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default trait implementations linking to custom logic

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: default_max_memory_mb(),
            max_processing_time_secs: default_max_processing_time(),
            max_concurrent_requests: default_max_concurrent(),
            memory_warning_threshold: default_warning_threshold(),
            memory_critical_threshold: default_critical_threshold(),
            gc_threshold: default_gc_threshold(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enable_model_caching: true,
            enable_concurrency_management: true,
            gc_cooldown_secs: default_gc_cooldown(),
            history_size: default_history_size(),
            sample_interval_ms: default_sample_interval(),
            success_window: default_success_window(),
        }
    }
}

impl Default for ResourcePool {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_memory_mb: default_max_memory_mb(),
            max_queue_size: default_max_queue_size(),
            worker_timeout_secs: default_worker_timeout(),
            cleanup_interval_secs: default_pool_cleanup_interval(),
            health_check_interval_secs: default_health_check_interval(),
            result_retention_secs: default_result_retention(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            enable_model_cache: true,
            enable_result_cache: true,
            enable_preprocessing_cache: true,
            model_cache_size: default_model_cache_size(),
            model_cache_memory_mb: default_max_memory_mb(),
            result_cache_size: default_result_cache_size(),
            preprocessing_cache_size: default_preprocessing_cache_size(),
            cache_ttl_hours: default_cache_ttl_hours(),
            large_object_threshold_mb: default_large_object_threshold(),
            default_model_size_mb: default_model_size(),
            cleanup_interval_secs: default_optimizer_cleanup_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Helper functions for serde defaults and shared constants

/// Smallest pool `scale_workers` accepts.
pub const MIN_WORKERS: usize = 1;

/// Largest pool `scale_workers` accepts.
pub const MAX_WORKERS: usize = 10;

fn default_true() -> bool {
    true
}

fn default_max_memory_mb() -> f64 {
    2048.0
}

fn default_max_processing_time() -> f64 {
    300.0
}

fn default_max_concurrent() -> usize {
    3
}

fn default_warning_threshold() -> f64 {
    0.8
}

fn default_critical_threshold() -> f64 {
    0.95
}

fn default_gc_threshold() -> f64 {
    0.7
}

fn default_gc_cooldown() -> u64 {
    60
}

fn default_history_size() -> usize {
    1000
}

fn default_sample_interval() -> u64 {
    100
}

fn default_success_window() -> usize {
    10
}

fn default_max_workers() -> usize {
    num_cpus::get().clamp(MIN_WORKERS, 4)
}

fn default_max_queue_size() -> usize {
    100
}

fn default_worker_timeout() -> f64 {
    300.0
}

fn default_pool_cleanup_interval() -> u64 {
    60
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_result_retention() -> u64 {
    600 // 10 minutes
}

fn default_shutdown_grace() -> f64 {
    5.0
}

fn default_model_cache_size() -> usize {
    5
}

fn default_result_cache_size() -> usize {
    1000
}

fn default_preprocessing_cache_size() -> usize {
    500
}

fn default_cache_ttl_hours() -> f64 {
    24.0
}

fn default_large_object_threshold() -> f64 {
    50.0
}

fn default_model_size() -> f64 {
    100.0
}

fn default_optimizer_cleanup_interval() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
