// Metrics module for Prometheus observability
// Author: kelexine (https://github.com/kelexine)

mod registry;

pub use registry::{
    gather_metrics,
    CACHE_BYTES,
    CACHE_ENTRIES,
    CACHE_OPERATIONS,
    MEMORY_RESIDENT,
    OPERATIONS_TOTAL,
    OPERATION_DURATION,
    QUEUE_DEPTH,
    RECLAIM_PASSES,
    REQUESTS_TOTAL,
    WORKERS,
    WORKER_RESTARTS,
};

/// Helper to record cache hits and misses
pub fn record_cache_lookup(cache: &str, hit: bool) {
    let operation = if hit { "hit" } else { "miss" };
    CACHE_OPERATIONS.with_label_values(&[cache, operation]).inc();
}

pub fn record_cache_evictions(cache: &str, count: usize) {
    if count > 0 {
        CACHE_OPERATIONS
            .with_label_values(&[cache, "eviction"])
            .inc_by(count as f64);
    }
}

pub fn record_cache_expirations(cache: &str, count: usize) {
    if count > 0 {
        CACHE_OPERATIONS
            .with_label_values(&[cache, "expiration"])
            .inc_by(count as f64);
    }
}

pub fn update_cache_size(cache: &str, entries: usize, bytes: usize) {
    CACHE_ENTRIES.with_label_values(&[cache]).set(entries as f64);
    CACHE_BYTES.with_label_values(&[cache]).set(bytes as f64);
}

/// Helper to record a finalized monitored operation
pub fn record_operation(operation: &str, success: bool, duration_secs: f64) {
    let status = if success { "success" } else { "failure" };
    OPERATIONS_TOTAL.with_label_values(&[operation, status]).inc();
    OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

/// Helper to record a processing request outcome (`success` or an error kind)
pub fn record_request(operation: &str, outcome: &str) {
    REQUESTS_TOTAL.with_label_values(&[operation, outcome]).inc();
}

pub fn update_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(depth as f64);
}

pub fn update_workers(idle: usize, active: usize, dead: usize) {
    WORKERS.with_label_values(&["idle"]).set(idle as f64);
    WORKERS.with_label_values(&["active"]).set(active as f64);
    WORKERS.with_label_values(&["dead"]).set(dead as f64);
}

pub fn record_worker_restart(reason: &str) {
    WORKER_RESTARTS.with_label_values(&[reason]).inc();
}

pub fn update_resident_memory(mb: f64) {
    MEMORY_RESIDENT.set(mb);
}

pub fn record_reclaim(reason: &str) {
    RECLAIM_PASSES.with_label_values(&[reason]).inc();
}
