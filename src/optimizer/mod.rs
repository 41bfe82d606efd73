//! Cache-or-compute entry points for models, results and preprocessed images.
//!
//! # Submodules
//!
//! - `manager`: the `Optimizer` composition root and its background sweep.
//! - `memory`: `MemoryOptimizer`, the reclaim policy.
//! - `keys`: content and parameter hashing for cache keys.
//! - `models`: `ModelFootprint` and report types.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod keys;
pub mod manager;
pub mod memory;
pub mod models;

pub use manager::{Optimizer, Preprocessed};
pub use memory::MemoryOptimizer;
pub use models::{MemoryReport, ModelFootprint, OptimizerStatistics, SweepReport};
