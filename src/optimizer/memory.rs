// Memory optimizer: decides when a reclaim pass is worth running
// Author: kelexine (https://github.com/kelexine)

use crate::monitor::{MemoryStatus, PerformanceMonitor};
use std::sync::Arc;
use tracing::debug;

/// Thin policy layer over the monitor's probe and reclaimer.
pub struct MemoryOptimizer {
    monitor: Arc<PerformanceMonitor>,
}

impl MemoryOptimizer {
    pub fn new(monitor: Arc<PerformanceMonitor>) -> Self {
        Self { monitor }
    }

    pub fn current_mb(&self) -> f64 {
        self.monitor.current_memory_mb()
    }

    /// Memory has reached the GC trigger threshold.
    pub fn should_collect(&self) -> bool {
        self.current_mb() >= self.monitor.limits().gc_trigger_mb()
    }

    pub fn is_critical(&self) -> bool {
        self.monitor.check_memory_limits().status == MemoryStatus::Critical
    }

    /// Reclaim if memory is above the trigger and the cooldown has passed.
    pub fn collect_if_needed(&self, reason: &str) -> bool {
        if !self.should_collect() {
            return false;
        }
        let ran = self
            .monitor
            .reclaimer()
            .collect_with_cooldown(self.monitor.config().gc_cooldown(), reason);
        if ran {
            debug!("Memory above GC trigger, ran reclaim pass ({})", reason);
        }
        ran
    }

    /// Reclaim now. Returns the memory freed in MB (never negative).
    pub fn collect(&self, reason: &str) -> f64 {
        let before = self.current_mb();
        self.monitor.reclaimer().collect(reason);
        (before - self.current_mb()).max(0.0)
    }

    pub fn passes(&self) -> u64 {
        self.monitor.reclaimer().passes()
    }
}
