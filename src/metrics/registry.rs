// Prometheus metrics registry and collectors
// Author: kelexine (https://github.com/kelexine)

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramVec, Opts, Registry, TextEncoder, Encoder,
    register_counter_vec_with_registry, register_gauge_vec_with_registry,
    register_gauge_with_registry, register_histogram_vec_with_registry,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // CACHE METRICS
    // ============================================================================

    /// Cache operations
    pub static ref CACHE_OPERATIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("ocr_cache_operations_total", "Total cache operations"),
        &["cache", "operation"], // operation: hit, miss, eviction, expiration
        REGISTRY
    ).unwrap();

    /// Current cache entries
    pub static ref CACHE_ENTRIES: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("ocr_cache_entries_current", "Current number of cache entries"),
        &["cache"],
        REGISTRY
    ).unwrap();

    /// Current cache footprint
    pub static ref CACHE_BYTES: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("ocr_cache_bytes_current", "Bytes held by resident cache entries"),
        &["cache"],
        REGISTRY
    ).unwrap();

    // ============================================================================
    // OPERATION METRICS
    // ============================================================================

    /// Monitored operations
    pub static ref OPERATIONS_TOTAL: CounterVec = register_counter_vec_with_registry!(
        Opts::new("ocr_operations_total", "Total monitored operations"),
        &["operation", "status"], // status: success, failure
        REGISTRY
    ).unwrap();

    /// Monitored operation duration
    pub static ref OPERATION_DURATION: HistogramVec = register_histogram_vec_with_registry!(
        prometheus::HistogramOpts::new("ocr_operation_duration_seconds", "Monitored operation duration")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["operation"],
        REGISTRY
    ).unwrap();

    // ============================================================================
    // POOL METRICS
    // ============================================================================

    /// Processing requests by outcome
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec_with_registry!(
        Opts::new("ocr_requests_total", "Total processing requests"),
        &["operation", "outcome"], // outcome: success or an error kind
        REGISTRY
    ).unwrap();

    /// Pending requests
    pub static ref QUEUE_DEPTH: Gauge = register_gauge_with_registry!(
        Opts::new("ocr_queue_depth", "Requests waiting for a worker"),
        REGISTRY
    ).unwrap();

    /// Workers by state
    pub static ref WORKERS: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("ocr_workers_current", "Workers by state"),
        &["state"], // state: idle, active, dead
        REGISTRY
    ).unwrap();

    /// Worker restarts
    pub static ref WORKER_RESTARTS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("ocr_worker_restarts_total", "Workers restarted by the health check"),
        &["reason"], // reason: dead, stuck
        REGISTRY
    ).unwrap();

    // ============================================================================
    // MEMORY METRICS
    // ============================================================================

    /// Last sampled resident memory
    pub static ref MEMORY_RESIDENT: Gauge = register_gauge_with_registry!(
        Opts::new("ocr_memory_resident_mb", "Last sampled resident memory in MB"),
        REGISTRY
    ).unwrap();

    /// Reclaim passes
    pub static ref RECLAIM_PASSES: CounterVec = register_counter_vec_with_registry!(
        Opts::new("ocr_reclaim_passes_total", "Memory reclaim passes"),
        &["reason"],
        REGISTRY
    ).unwrap();
}

/// Gather all metrics and return as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        CACHE_OPERATIONS.with_label_values(&["test", "hit"]).inc();
        OPERATIONS_TOTAL.with_label_values(&["test", "success"]).inc();
        REQUESTS_TOTAL.with_label_values(&["test", "success"]).inc();

        let metrics = gather_metrics();
        assert!(metrics.contains("ocr_cache_operations_total"));
        assert!(metrics.contains("ocr_operations_total"));
        assert!(metrics.contains("ocr_requests_total"));
    }
}
