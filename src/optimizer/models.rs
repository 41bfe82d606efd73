//! Optimizer reports and statistics.

// Author: kelexine (https://github.com/kelexine)

use crate::cache::CacheStats;
use crate::monitor::MemoryCheck;
use serde::Serialize;

/// Lets a model report its own memory footprint.
///
/// Models that cannot tell return `None` and are charged the configured
/// `default_model_size_mb`, which is only a rough guess.
pub trait ModelFootprint {
    fn footprint_mb(&self) -> Option<f64> {
        None
    }
}

/// What one expiry sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub models: usize,
    pub results: usize,
    pub preprocessed: usize,
    pub reclaimed: bool,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.models + self.results + self.preprocessed
    }
}

/// Outcome of [`Optimizer::optimize_memory`](super::Optimizer::optimize_memory).
#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    pub before_mb: f64,
    pub after_mb: f64,
    pub freed_mb: f64,
    pub caches_cleared: bool,
    pub entries_cleared: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizerStatistics {
    pub model_cache: Option<CacheStats>,
    pub result_cache: Option<CacheStats>,
    pub preprocessing_cache: Option<CacheStats>,
    pub model_loads: u64,
    pub total_load_time_secs: f64,
    pub result_computations: u64,
    pub preprocessing_runs: u64,
    pub sweeps: u64,
    pub reclaim_passes: u64,
    pub memory: MemoryCheck,
}
