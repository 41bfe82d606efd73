// Worker tasks: dequeue, execute under a timeout, deliver
// Author: kelexine (https://github.com/kelexine)

use super::manager::Shared;
use crate::error::ResourceError;
use crate::monitor::PerformanceMetrics;
use crate::pool::models::{ProcessingRequest, ProcessingResult, WorkerSnapshot, WorkerState};
use crate::metrics;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Mutable per-worker bookkeeping, shared between the task and the manager.
#[derive(Debug)]
pub(super) struct WorkerStatus {
    pub state: WorkerState,
    pub current_request: Option<String>,
    pub active_since: Option<Instant>,
    pub processed: u64,
    pub failed: u64,
}

impl WorkerStatus {
    fn new() -> Self {
        Self {
            state: WorkerState::Idle,
            current_request: None,
            active_since: None,
            processed: 0,
            failed: 0,
        }
    }
}

/// Handle the manager keeps for each running worker task.
pub(super) struct Worker {
    pub id: usize,
    pub status: Arc<Mutex<WorkerStatus>>,
    pub stop: watch::Sender<bool>,
    pub handle: JoinHandle<()>,
    pub restarts: u32,
}

impl Worker {
    pub fn spawn(shared: &Arc<Shared>, id: usize) -> Self {
        Self::spawn_with_status(shared, id, Arc::new(Mutex::new(WorkerStatus::new())), 0)
    }

    /// Replace a dead or stuck worker, keeping its counters.
    pub fn respawn(shared: &Arc<Shared>, previous: &Worker) -> Self {
        {
            let mut status = previous.status.lock();
            status.state = WorkerState::Idle;
            status.current_request = None;
            status.active_since = None;
        }
        Self::spawn_with_status(shared, previous.id, previous.status.clone(), previous.restarts + 1)
    }

    fn spawn_with_status(
        shared: &Arc<Shared>,
        id: usize,
        status: Arc<Mutex<WorkerStatus>>,
        restarts: u32,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(shared.clone(), id, status.clone(), stop_rx));
        Self {
            id,
            status,
            stop,
            handle,
            restarts,
        }
    }

    /// Ask the worker to exit once its current request (if any) is done.
    pub fn request_stop(&self) {
        self.status.lock().state = WorkerState::Stopping;
        let _ = self.stop.send(true);
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        let status = self.status.lock();
        let state = if self.handle.is_finished() && status.state != WorkerState::Stopping {
            WorkerState::Dead
        } else {
            status.state
        };
        WorkerSnapshot {
            id: self.id,
            state,
            current_request: status.current_request.clone(),
            busy_secs: status.active_since.map(|at| at.elapsed().as_secs_f64()),
            processed: status.processed,
            failed: status.failed,
            restarts: self.restarts,
        }
    }
}

/// Worker loop: `idle -> active -> idle` until asked to stop.
async fn run(
    shared: Arc<Shared>,
    id: usize,
    status: Arc<Mutex<WorkerStatus>>,
    mut stop: watch::Receiver<bool>,
) {
    debug!("Worker {} started", id);
    loop {
        if *stop.borrow() {
            break;
        }

        let request = tokio::select! {
            _ = stop.changed() => break,
            request = shared.next_request() => request,
        };

        execute(&shared, id, &status, request).await;
    }
    debug!("Worker {} stopped", id);
}

async fn execute(shared: &Arc<Shared>, worker_id: usize, status: &Mutex<WorkerStatus>, request: ProcessingRequest) {
    {
        let mut status = status.lock();
        if status.state != WorkerState::Stopping {
            status.state = WorkerState::Active;
        }
        status.current_request = Some(request.id.clone());
        status.active_since = Some(Instant::now());
    }
    shared.mark_running(&request.id, worker_id);

    let result = process(shared, worker_id, request).await;

    {
        let mut status = status.lock();
        if status.state != WorkerState::Stopping {
            status.state = WorkerState::Idle;
        }
        status.current_request = None;
        status.active_since = None;
        if result.success {
            status.processed += 1;
        } else {
            status.failed += 1;
        }
    }
    shared.deliver(result);
}

/// Run one request's processor on the blocking pool, bounded by its timeout.
async fn process(shared: &Arc<Shared>, worker_id: usize, request: ProcessingRequest) -> ProcessingResult {
    let request_id = request.id.clone();
    let operation = request.operation_type.clone();

    let Some(processor) = shared.processor(&operation) else {
        warn!("Request {} names unregistered operation '{}'", request_id, operation);
        let mut result = ProcessingResult::failed(&request_id, ResourceError::UnregisteredOperation(operation));
        result.worker_id = Some(worker_id);
        return result;
    };

    if !shared.monitor.enforce_memory_limits() {
        let mut result = ProcessingResult::failed(
            &request_id,
            ResourceError::ResourceExhausted("memory critical when the request reached a worker".to_string()),
        );
        result.worker_id = Some(worker_id);
        return result;
    }

    let timeout = request.timeout.unwrap_or_else(|| shared.config.worker_timeout());
    let cancel = request.cancel.clone();
    let mut op_metrics = PerformanceMetrics::start(
        operation.clone(),
        request.metadata.clone(),
        shared.monitor.current_memory_mb(),
    );
    let started = Instant::now();

    let task = tokio::task::spawn_blocking(move || processor(&request));
    let outcome = tokio::time::timeout(timeout, task).await;

    let elapsed = started.elapsed().as_secs_f64();
    let memory_after = shared.monitor.current_memory_mb();

    let mut result = match outcome {
        Ok(Ok(Ok(payload))) => ProcessingResult::succeeded(&request_id, payload),
        Ok(Ok(Err(e))) => {
            error!("Processor '{}' failed on {}: {}", operation, request_id, e);
            ProcessingResult::failed(&request_id, ResourceError::WorkerFailure(e.to_string()))
        }
        Ok(Err(join_error)) => {
            error!("Processor '{}' panicked on {}: {}", operation, request_id, join_error);
            ProcessingResult::failed(
                &request_id,
                ResourceError::WorkerFailure(format!("processor panicked: {}", join_error)),
            )
        }
        Err(_) => {
            // The blocking thread cannot be killed; raise the flag and move on
            cancel.cancel();
            warn!("Request {} exceeded {:?}, abandoning it", request_id, timeout);
            ProcessingResult::failed(
                &request_id,
                ResourceError::Timeout(format!("'{}' exceeded {:.3}s", operation, timeout.as_secs_f64())),
            )
        }
    };

    result.processing_time_secs = elapsed;
    result.memory_used_mb = memory_after - op_metrics.memory_before_mb;
    result.worker_id = Some(worker_id);
    result.metadata.insert("operation_type".to_string(), json!(operation));

    op_metrics.finish(
        elapsed,
        memory_after,
        memory_after,
        result.error.as_ref().map(|e| e.to_string()),
    );
    shared.monitor.record(op_metrics);
    metrics::record_request(&operation, result.outcome());

    result
}
