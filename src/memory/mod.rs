//! Process memory measurement and reclaim hints.
//!
//! # Submodules
//!
//! - `probe`: the `MemoryProbe` seam and the `sysinfo`-backed process probe.
//! - `reclaim`: `MemoryReclaimer`, the hook run when memory should be given back.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod probe;
pub mod reclaim;

pub use probe::{MemoryProbe, ProcessMemoryProbe};
pub use reclaim::{MemoryReclaimer, ReclaimHook};
