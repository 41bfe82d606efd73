// Memory reclaim hints
// Author: kelexine (https://github.com/kelexine)
//
// Rust frees memory when values drop, so a "garbage collection" here is a
// hint: it counts the pass and runs an optional embedder-supplied hook
// (for example an allocator trim) that can return freed pages to the OS.

use crate::metrics;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Hook invoked on each reclaim pass.
pub type ReclaimHook = Arc<dyn Fn() + Send + Sync>;

pub struct MemoryReclaimer {
    hook: Option<ReclaimHook>,
    passes: AtomicU64,
    last_pass: Mutex<Option<Instant>>,
}

impl MemoryReclaimer {
    pub fn new() -> Self {
        Self {
            hook: None,
            passes: AtomicU64::new(0),
            last_pass: Mutex::new(None),
        }
    }

    pub fn with_hook(hook: ReclaimHook) -> Self {
        Self {
            hook: Some(hook),
            ..Self::new()
        }
    }

    /// Runs a reclaim pass unconditionally.
    pub fn collect(&self, reason: &str) {
        *self.last_pass.lock() = Some(Instant::now());
        self.run(reason);
    }

    /// Runs a reclaim pass unless one ran within `cooldown`.
    /// Returns whether a pass ran.
    pub fn collect_with_cooldown(&self, cooldown: Duration, reason: &str) -> bool {
        {
            let mut last = self.last_pass.lock();
            if let Some(at) = *last {
                if at.elapsed() < cooldown {
                    return false;
                }
            }
            *last = Some(Instant::now());
        }
        self.run(reason);
        true
    }

    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    fn run(&self, reason: &str) {
        if let Some(hook) = &self.hook {
            hook();
        }
        let passes = self.passes.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_reclaim(reason);
        debug!("Reclaim pass #{} ({})", passes, reason);
    }
}

impl Default for MemoryReclaimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_collect_runs_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let reclaimer = MemoryReclaimer::with_hook(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        reclaimer.collect("test");
        reclaimer.collect("test");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(reclaimer.passes(), 2);
    }

    #[test]
    fn test_cooldown_suppresses_second_pass() {
        let reclaimer = MemoryReclaimer::new();
        assert!(reclaimer.collect_with_cooldown(Duration::from_secs(60), "warning"));
        assert!(!reclaimer.collect_with_cooldown(Duration::from_secs(60), "warning"));
        assert_eq!(reclaimer.passes(), 1);
    }

    #[test]
    fn test_zero_cooldown_always_runs() {
        let reclaimer = MemoryReclaimer::new();
        assert!(reclaimer.collect_with_cooldown(Duration::ZERO, "warning"));
        assert!(reclaimer.collect_with_cooldown(Duration::ZERO, "warning"));
        assert_eq!(reclaimer.passes(), 2);
    }
}
