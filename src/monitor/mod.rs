//! Resource-limit enforcement and operation-level telemetry.
//!
//! The `PerformanceMonitor` owns the memory probe, decides the current
//! memory status, reclaims memory when thresholds are crossed, and records
//! a `PerformanceMetrics` for every monitored operation.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod models;
pub mod performance;

pub use models::{
    MemoryCheck, MemoryStatus, OperationStats, PerformanceMetrics, PerformanceStats, SlotStats,
};
pub use performance::{OperationGuard, PerformanceMonitor, PerformanceMonitorBuilder};
