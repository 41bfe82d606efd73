//! Memory status and operation metrics models.

// Author: kelexine (https://github.com/kelexine)

use crate::cache::{CacheStats, Metadata};
use crate::config::ResourceLimits;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Memory pressure level relative to the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    Ok,
    Warning,
    Critical,
}

impl MemoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStatus::Ok => "ok",
            MemoryStatus::Warning => "warning",
            MemoryStatus::Critical => "critical",
        }
    }
}

/// Result of [`check_memory_limits`](super::PerformanceMonitor::check_memory_limits).
#[derive(Debug, Clone, Serialize)]
pub struct MemoryCheck {
    pub current_mb: f64,
    pub status: MemoryStatus,
    pub warning_mb: f64,
    pub critical_mb: f64,
}

/// Telemetry for one monitored operation.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub memory_before_mb: f64,
    pub memory_after_mb: f64,
    pub memory_peak_mb: f64,
    pub success: bool,
    pub error: Option<String>,
    pub metadata: Metadata,
}

impl PerformanceMetrics {
    pub fn start(operation: impl Into<String>, metadata: Metadata, memory_before_mb: f64) -> Self {
        Self {
            operation: operation.into(),
            started_at: Utc::now(),
            ended_at: None,
            duration_secs: 0.0,
            memory_before_mb,
            memory_after_mb: memory_before_mb,
            memory_peak_mb: memory_before_mb,
            success: false,
            error: None,
            metadata,
        }
    }

    /// Stamp the end of the operation.
    pub fn finish(&mut self, duration_secs: f64, memory_after_mb: f64, memory_peak_mb: f64, error: Option<String>) {
        self.ended_at = Some(Utc::now());
        self.duration_secs = duration_secs;
        self.memory_after_mb = memory_after_mb;
        self.memory_peak_mb = memory_peak_mb.max(memory_after_mb).max(self.memory_before_mb);
        self.success = error.is_none();
        self.error = error;
    }

    pub fn memory_used_mb(&self) -> f64 {
        self.memory_after_mb - self.memory_before_mb
    }

    pub fn memory_peak_delta_mb(&self) -> f64 {
        self.memory_peak_mb - self.memory_before_mb
    }
}

/// Aggregate timing for one operation name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationStats {
    pub count: u64,
    pub failures: u64,
    pub avg_time_secs: f64,
    pub min_time_secs: f64,
    pub max_time_secs: f64,
    pub total_time_secs: f64,
}

impl OperationStats {
    pub(crate) fn record(&mut self, duration_secs: f64, success: bool) {
        if self.count == 0 {
            self.min_time_secs = duration_secs;
            self.max_time_secs = duration_secs;
        } else {
            self.min_time_secs = self.min_time_secs.min(duration_secs);
            self.max_time_secs = self.max_time_secs.max(duration_secs);
        }
        self.count += 1;
        if !success {
            self.failures += 1;
        }
        self.total_time_secs += duration_secs;
        self.avg_time_secs = self.total_time_secs / self.count as f64;
    }
}

/// Monitor slot usage.
#[derive(Debug, Clone, Serialize)]
pub struct SlotStats {
    pub max_slots: usize,
    pub available: usize,
    pub in_use: usize,
}

/// Snapshot returned by [`get_performance_stats`](super::PerformanceMonitor::get_performance_stats).
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceStats {
    pub current_memory_mb: f64,
    pub memory_status: MemoryStatus,
    pub limits: ResourceLimits,
    pub operations: BTreeMap<String, OperationStats>,
    pub total_recorded: u64,
    /// Success rate over the most recent operations, `None` before any ran.
    pub recent_success_rate: Option<f64>,
    pub reclaim_passes: u64,
    pub model_cache: Option<CacheStats>,
    pub slots: Option<SlotStats>,
}
