//! Request, result and pool status models.

// Author: kelexine (https://github.com/kelexine)

use crate::cache::Metadata;
use crate::error::ResourceError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a processor returns: a JSON payload or any error.
pub type ProcessorResult = std::result::Result<Value, Box<dyn std::error::Error + Send + Sync>>;

/// A registered handler for one operation type.
pub type Processor = Arc<dyn Fn(&ProcessingRequest) -> ProcessorResult + Send + Sync>;

/// Cooperative cancellation signal shared between the manager and a processor.
///
/// The manager raises it when a request times out or is reclaimed; long
/// processors should poll [`ProcessingRequest::is_cancelled`] and bail out.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A unit of work submitted to the resource manager.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingRequest {
    pub id: String,
    /// Key into the processor registry.
    pub operation_type: String,
    /// Lower values are more urgent.
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    /// Overrides the pool's per-worker timeout.
    pub timeout: Option<Duration>,
    pub args: Value,
    pub metadata: Metadata,
    #[serde(skip)]
    pub cancel: CancellationFlag,
}

impl ProcessingRequest {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Optional parameters for [`submit_request`](super::ResourceManager::submit_request).
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub priority: i32,
    pub timeout: Option<Duration>,
    pub metadata: Metadata,
}

/// Outcome of one request. Delivered exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    pub request_id: String,
    pub success: bool,
    pub payload: Option<Value>,
    pub error: Option<ResourceError>,
    pub processing_time_secs: f64,
    pub memory_used_mb: f64,
    pub worker_id: Option<usize>,
    pub completed_at: DateTime<Utc>,
    pub metadata: Metadata,
}

impl ProcessingResult {
    pub fn succeeded(request_id: impl Into<String>, payload: Value) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            payload: Some(payload),
            error: None,
            processing_time_secs: 0.0,
            memory_used_mb: 0.0,
            worker_id: None,
            completed_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    pub fn failed(request_id: impl Into<String>, error: ResourceError) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            payload: None,
            error: Some(error),
            processing_time_secs: 0.0,
            memory_used_mb: 0.0,
            worker_id: None,
            completed_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    /// `success` or the error kind, for metrics.
    pub fn outcome(&self) -> &'static str {
        match &self.error {
            Some(error) => error.kind(),
            None => "success",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Active,
    Dead,
    /// Asked to stop; finishes its current request first.
    Stopping,
}

/// Point-in-time view of one worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub id: usize,
    pub state: WorkerState,
    pub current_request: Option<String>,
    pub busy_secs: Option<f64>,
    pub processed: u64,
    pub failed: u64,
    pub restarts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queued: usize,
    pub max_queue_size: usize,
    pub by_priority: BTreeMap<i32, usize>,
    pub running: usize,
    /// Completed results nobody has collected yet.
    pub awaiting_pickup: usize,
    pub accepting: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatistics {
    pub workers: Vec<WorkerSnapshot>,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub rejected: u64,
    pub avg_processing_time_secs: f64,
    pub queue: QueueStatus,
}

/// What one health check pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub restarted_dead: usize,
    pub restarted_stuck: usize,
}

impl SubmitOptions {
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}
