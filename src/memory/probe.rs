// Resident memory probes
// Author: kelexine (https://github.com/kelexine)

use crate::error::{ResourceError, Result};
use parking_lot::Mutex;
use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::warn;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Reports the current resident memory of the process in MB.
///
/// Implementations must be cheap enough to call every ~100ms from several
/// threads at once.
pub trait MemoryProbe: Send + Sync {
    fn resident_mb(&self) -> Result<f64>;
}

/// Any `Fn() -> Result<f64>` closure is a probe. Tests use this to script memory levels.
impl<F> MemoryProbe for F
where
    F: Fn() -> Result<f64> + Send + Sync,
{
    fn resident_mb(&self) -> Result<f64> {
        self()
    }
}

/// Resident memory of this process, read through `sysinfo`.
///
/// The `System` handle and pid are resolved once and reused; each sample
/// refreshes only this process's memory.
pub struct ProcessMemoryProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        let pid = match get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Cannot resolve current pid, memory samples will fail: {}", e);
                None
            }
        };
        Self {
            pid,
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn resident_mb(&self) -> Result<f64> {
        let pid = self
            .pid
            .ok_or_else(|| ResourceError::ProbeFailure("current pid unavailable".to_string()))?;

        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system
            .process(pid)
            .map(|process| process.memory() as f64 / BYTES_PER_MB)
            .ok_or_else(|| ResourceError::ProbeFailure(format!("process {} not visible to sysinfo", pid)))
    }
}
