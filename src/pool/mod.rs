//! Worker pool for OCR requests.
//!
//! # Submodules
//!
//! - `manager`: `ResourceManager`, submission, results, scaling and shutdown.
//! - `queue`: the bounded priority queue of pending requests.
//! - `worker`: worker tasks and per-request execution.
//! - `models`: requests, results and status snapshots.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod manager;
pub mod models;
pub mod queue;
mod worker;

pub use manager::ResourceManager;
pub use models::{
    CancellationFlag, HealthReport, PoolStatistics, ProcessingRequest, ProcessingResult, Processor,
    ProcessorResult, QueueStatus, SubmitOptions, WorkerSnapshot, WorkerState,
};
pub use queue::RequestQueue;
