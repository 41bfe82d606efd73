//! Resource manager: a bounded worker pool fed by a priority queue.
//!
//! Submissions are non-blocking and fail fast (`QueueFull`,
//! `ResourceExhausted`, `ShutDown`). Workers take the most urgent request,
//! run its processor on the blocking pool under a timeout, and hand the
//! result to whoever waits in `get_result`, or keep it for later pickup.
//! A maintenance task restarts dead or stuck workers and purges results
//! nobody collected.

// Author: kelexine (https://github.com/kelexine)

use super::queue::RequestQueue;
use super::worker::Worker;
use crate::config::{ResourcePool, MAX_WORKERS, MIN_WORKERS};
use crate::error::{ResourceError, Result};
use crate::metrics;
use crate::monitor::{MemoryStatus, PerformanceMonitor};
use crate::pool::models::{
    CancellationFlag, HealthReport, PoolStatistics, ProcessingRequest, ProcessingResult, Processor,
    ProcessorResult, QueueStatus, SubmitOptions, WorkerState,
};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

enum Phase {
    Queued,
    Running { worker_id: usize },
    Completed { at: Instant },
}

/// Book-keeping for a request from submission until its result is collected.
struct Tracked {
    phase: Phase,
    waiter: Option<oneshot::Sender<ProcessingResult>>,
    result: Option<ProcessingResult>,
    cancel: CancellationFlag,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
    processing_micros: AtomicU64,
}

/// State shared by the manager, its workers and its maintenance task.
pub(super) struct Shared {
    pub config: ResourcePool,
    pub monitor: Arc<PerformanceMonitor>,
    processors: RwLock<HashMap<String, Processor>>,
    queue: Mutex<RequestQueue>,
    queue_signal: Notify,
    tracked: Mutex<HashMap<String, Tracked>>,
    workers: Mutex<Vec<Worker>>,
    next_worker_id: AtomicUsize,
    accepting: AtomicBool,
    counters: Counters,
}

impl Shared {
    pub fn processor(&self, operation_type: &str) -> Option<Processor> {
        self.processors.read().get(operation_type).cloned()
    }

    /// Wait for the next request in priority order.
    pub async fn next_request(&self) -> ProcessingRequest {
        loop {
            // Register interest before looking so a push in between is not missed
            let notified = self.queue_signal.notified();
            let popped = self.queue.lock().pop();
            if let Some(request) = popped {
                let remaining = self.queue.lock().len();
                metrics::update_queue_depth(remaining);
                if remaining > 0 {
                    // Permits do not stack; pass the wakeup on to another worker
                    self.queue_signal.notify_one();
                }
                return request;
            }
            notified.await;
        }
    }

    pub fn mark_running(&self, request_id: &str, worker_id: usize) {
        if let Some(entry) = self.tracked.lock().get_mut(request_id) {
            entry.phase = Phase::Running { worker_id };
        }
    }

    /// Hand a result to its waiter, or keep it for later pickup.
    /// A request that already has a result keeps the first one.
    pub fn deliver(&self, result: ProcessingResult) {
        let request_id = result.request_id.clone();
        let succeeded = result.success;
        let cancelled = matches!(result.error, Some(ResourceError::Cancelled(_)));
        let elapsed = result.processing_time_secs;

        let mut tracked = self.tracked.lock();
        let Some(entry) = tracked.get_mut(&request_id) else {
            debug!("Dropping late result for {}", request_id);
            return;
        };
        if matches!(entry.phase, Phase::Completed { .. }) {
            debug!("Dropping duplicate result for {}", request_id);
            return;
        }

        let unclaimed = match entry.waiter.take() {
            Some(waiter) => waiter.send(result).err(),
            None => Some(result),
        };
        match unclaimed {
            Some(result) => {
                entry.phase = Phase::Completed { at: Instant::now() };
                entry.result = Some(result);
            }
            None => {
                tracked.remove(&request_id);
            }
        }
        drop(tracked);

        if cancelled {
            self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if succeeded {
            self.counters.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.counters
            .processing_micros
            .fetch_add((elapsed * 1_000_000.0) as u64, Ordering::Relaxed);
    }

    /// Fail the request a reclaimed worker was running.
    fn fail_in_flight(&self, request_id: &str, worker_id: usize, error: ResourceError) {
        if let Some(entry) = self.tracked.lock().get(request_id) {
            entry.cancel.cancel();
        }
        let mut result = ProcessingResult::failed(request_id, error);
        result.worker_id = Some(worker_id);
        self.deliver(result);
    }

    /// Restart workers whose task ended unexpectedly, and reclaim workers
    /// that have been busy with one request for over twice the timeout.
    pub fn check_workers(self: &Arc<Self>) -> HealthReport {
        let stuck_after = self.config.worker_timeout() * 2;
        let mut report = HealthReport::default();
        let mut in_flight_failures = Vec::new();

        {
            let mut workers = self.workers.lock();
            for slot in workers.iter_mut() {
                let (state, current, since) = {
                    let status = slot.status.lock();
                    (status.state, status.current_request.clone(), status.active_since)
                };
                if state == WorkerState::Stopping {
                    continue;
                }

                if slot.handle.is_finished() {
                    warn!("Worker {} died, restarting", slot.id);
                    if let Some(request_id) = current {
                        in_flight_failures.push((
                            request_id,
                            slot.id,
                            ResourceError::WorkerFailure(format!("worker {} died", slot.id)),
                        ));
                    }
                    *slot = Worker::respawn(self, slot);
                    report.restarted_dead += 1;
                    metrics::record_worker_restart("dead");
                } else if state == WorkerState::Active
                    && since.map(|at| at.elapsed() > stuck_after).unwrap_or(false)
                {
                    warn!(
                        "Worker {} stuck for more than {:?}, restarting",
                        slot.id, stuck_after
                    );
                    slot.handle.abort();
                    if let Some(request_id) = current {
                        in_flight_failures.push((
                            request_id,
                            slot.id,
                            ResourceError::Timeout(format!(
                                "worker {} reclaimed after {:?}",
                                slot.id, stuck_after
                            )),
                        ));
                    }
                    *slot = Worker::respawn(self, slot);
                    report.restarted_stuck += 1;
                    metrics::record_worker_restart("stuck");
                }
            }
        }

        for (request_id, worker_id, error) in in_flight_failures {
            self.fail_in_flight(&request_id, worker_id, error);
        }
        self.update_worker_gauges();
        report
    }

    /// Drop completed results older than the retention period.
    pub fn purge_completed(&self) -> usize {
        let retention = self.config.result_retention();
        let mut tracked = self.tracked.lock();
        let before = tracked.len();
        tracked.retain(|_, entry| match entry.phase {
            Phase::Completed { at } => at.elapsed() <= retention,
            _ => true,
        });
        let purged = before - tracked.len();
        if purged > 0 {
            debug!("Purged {} unclaimed results", purged);
        }
        purged
    }

    fn update_worker_gauges(&self) {
        let workers = self.workers.lock();
        let (mut idle, mut active, mut dead) = (0, 0, 0);
        for worker in workers.iter() {
            match worker.snapshot().state {
                WorkerState::Idle => idle += 1,
                WorkerState::Active | WorkerState::Stopping => active += 1,
                WorkerState::Dead => dead += 1,
            }
        }
        metrics::update_workers(idle, active, dead);
    }

    fn queue_status(&self) -> QueueStatus {
        let (queued, max_queue_size, by_priority, closed) = {
            let queue = self.queue.lock();
            (queue.len(), queue.capacity(), queue.counts_by_priority(), queue.is_closed())
        };
        let (running, awaiting_pickup) = {
            let tracked = self.tracked.lock();
            tracked.values().fold((0, 0), |(running, ready), entry| match entry.phase {
                Phase::Running { .. } => (running + 1, ready),
                Phase::Completed { .. } => (running, ready + 1),
                Phase::Queued => (running, ready),
            })
        };

        QueueStatus {
            queued,
            max_queue_size,
            by_priority,
            running,
            awaiting_pickup,
            accepting: self.accepting.load(Ordering::SeqCst) && !closed,
        }
    }
}

/// Bounded worker pool with a priority queue, per-request results and
/// self-healing workers.
///
/// Must be created inside a tokio runtime. Call [`shutdown`](Self::shutdown)
/// to stop it; dropping it stops the workers without waiting.
pub struct ResourceManager {
    shared: Arc<Shared>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    maintenance_stop: watch::Sender<bool>,
}

impl ResourceManager {
    pub fn new(config: ResourcePool, monitor: Arc<PerformanceMonitor>) -> Result<Self> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&config.max_workers) {
            return Err(ResourceError::InvalidArgument(format!(
                "max_workers must be between {} and {}, got {}",
                MIN_WORKERS, MAX_WORKERS, config.max_workers
            )));
        }
        if config.max_queue_size == 0 {
            return Err(ResourceError::InvalidArgument(
                "max_queue_size must be at least 1".to_string(),
            ));
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ResourceError::Config(
                "ResourceManager must be created inside a tokio runtime".to_string(),
            ));
        }

        let worker_count = config.max_workers;
        let shared = Arc::new(Shared {
            queue: Mutex::new(RequestQueue::new(config.max_queue_size)),
            config,
            monitor,
            processors: RwLock::new(HashMap::new()),
            queue_signal: Notify::new(),
            tracked: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            next_worker_id: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
            counters: Counters::default(),
        });

        {
            let mut workers = shared.workers.lock();
            for _ in 0..worker_count {
                let id = shared.next_worker_id.fetch_add(1, Ordering::Relaxed);
                workers.push(Worker::spawn(&shared, id));
            }
        }
        shared.update_worker_gauges();

        let (maintenance_stop, stop_rx) = watch::channel(false);
        let maintenance = spawn_maintenance(Arc::downgrade(&shared), stop_rx);

        info!(
            "Resource manager started with {} workers (queue capacity {})",
            worker_count, shared.config.max_queue_size
        );

        Ok(Self {
            shared,
            maintenance: Mutex::new(Some(maintenance)),
            maintenance_stop,
        })
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.shared.monitor
    }

    /// Register the handler for `operation_type`, replacing any previous one.
    pub fn register_processor<F>(&self, operation_type: impl Into<String>, processor: F)
    where
        F: Fn(&ProcessingRequest) -> ProcessorResult + Send + Sync + 'static,
    {
        let operation_type = operation_type.into();
        let previous = self
            .shared
            .processors
            .write()
            .insert(operation_type.clone(), Arc::new(processor));
        if previous.is_some() {
            debug!("Replaced processor for '{}'", operation_type);
        } else {
            debug!("Registered processor for '{}'", operation_type);
        }
    }

    /// Queue a request and return its id without waiting for a worker.
    pub fn submit_request(
        &self,
        operation_type: impl Into<String>,
        args: Value,
        options: SubmitOptions,
    ) -> Result<String> {
        let operation_type = operation_type.into();
        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(ResourceError::ShutDown);
        }

        let check = self.shared.monitor.check_memory_limits();
        let pool_budget = self.shared.config.max_memory_mb;
        if check.status == MemoryStatus::Critical || check.current_mb >= pool_budget {
            self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
            metrics::record_request(&operation_type, "resource_exhausted");
            return Err(ResourceError::ResourceExhausted(format!(
                "memory at {:.1}MB (critical at {:.1}MB, pool budget {:.1}MB)",
                check.current_mb, check.critical_mb, pool_budget
            )));
        }

        let cancel = CancellationFlag::new();
        let request = ProcessingRequest {
            id: uuid::Uuid::new_v4().to_string(),
            operation_type: operation_type.clone(),
            priority: options.priority,
            created_at: Utc::now(),
            timeout: options.timeout,
            args,
            metadata: options.metadata,
            cancel: cancel.clone(),
        };
        let request_id = request.id.clone();

        // Track first so a fast worker always finds the entry
        self.shared.tracked.lock().insert(
            request_id.clone(),
            Tracked {
                phase: Phase::Queued,
                waiter: None,
                result: None,
                cancel,
            },
        );

        let pushed = {
            let mut queue = self.shared.queue.lock();
            queue.push(request).map(|_| queue.len())
        };
        match pushed {
            Ok(depth) => {
                self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
                metrics::update_queue_depth(depth);
                self.shared.queue_signal.notify_one();
                debug!(
                    "Queued {} ({}, priority {}), depth {}",
                    request_id, operation_type, options.priority, depth
                );
                Ok(request_id)
            }
            Err(e) => {
                self.shared.tracked.lock().remove(&request_id);
                if matches!(e, ResourceError::QueueFull(_)) {
                    self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    metrics::record_request(&operation_type, e.kind());
                }
                Err(e)
            }
        }
    }

    /// Wait for a request's result. Never hangs past `timeout`: on expiry a
    /// failed result carrying `Timeout` is returned instead.
    pub async fn get_result(&self, request_id: &str, timeout: Option<Duration>) -> ProcessingResult {
        let mut receiver = {
            let mut tracked = self.shared.tracked.lock();
            let Some(entry) = tracked.get_mut(request_id) else {
                return ProcessingResult::failed(
                    request_id,
                    ResourceError::UnknownRequest(request_id.to_string()),
                );
            };
            if let Some(result) = entry.result.take() {
                tracked.remove(request_id);
                return result;
            }
            let (sender, receiver) = oneshot::channel();
            entry.waiter = Some(sender);
            receiver
        };

        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, &mut receiver).await.ok(),
            None => Some((&mut receiver).await),
        };

        match received {
            Some(Ok(result)) => result,
            Some(Err(_)) => ProcessingResult::failed(
                request_id,
                ResourceError::Cancelled("another caller took over the wait".to_string()),
            ),
            None => {
                // Withdraw the waiter; a result that raced in is still ours
                if let Some(entry) = self.shared.tracked.lock().get_mut(request_id) {
                    entry.waiter = None;
                }
                match receiver.try_recv() {
                    Ok(result) => result,
                    Err(_) => ProcessingResult::failed(
                        request_id,
                        ResourceError::Timeout(format!(
                            "no result for {} within {:?}",
                            request_id,
                            timeout.unwrap_or_default()
                        )),
                    ),
                }
            }
        }
    }

    /// Cancel a request that no worker has picked up yet.
    pub fn cancel_request(&self, request_id: &str) -> bool {
        let removed = {
            let mut queue = self.shared.queue.lock();
            let removed = queue.remove(request_id);
            metrics::update_queue_depth(queue.len());
            removed
        };
        let Some(request) = removed else {
            return false;
        };

        request.cancel.cancel();
        self.shared.deliver(ProcessingResult::failed(
            request_id,
            ResourceError::Cancelled("cancelled before execution".to_string()),
        ));
        info!("Cancelled queued request {}", request_id);
        true
    }

    /// Grow or shrink the pool to exactly `target` workers. Busy workers
    /// being removed finish their current request first.
    pub fn scale_workers(&self, target: usize) -> Result<usize> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&target) {
            return Err(ResourceError::InvalidArgument(format!(
                "worker count must be between {} and {}, got {}",
                MIN_WORKERS, MAX_WORKERS, target
            )));
        }
        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(ResourceError::ShutDown);
        }

        let (before, after) = {
            let mut workers = self.shared.workers.lock();
            let before = workers.len();
            while workers.len() < target {
                let id = self.shared.next_worker_id.fetch_add(1, Ordering::Relaxed);
                workers.push(Worker::spawn(&self.shared, id));
            }
            while workers.len() > target {
                // Prefer idle workers; otherwise take the newest
                let index = workers
                    .iter()
                    .position(|w| w.status.lock().state == WorkerState::Idle)
                    .unwrap_or(workers.len() - 1);
                let worker = workers.remove(index);
                worker.request_stop();
            }
            (before, workers.len())
        };

        self.shared.update_worker_gauges();
        if before != after {
            info!("Scaled workers from {} to {}", before, after);
        }
        Ok(after)
    }

    /// Run one health check pass now.
    pub fn run_health_check(&self) -> HealthReport {
        self.shared.check_workers()
    }

    /// Drop unclaimed results older than the retention period now.
    pub fn purge_completed(&self) -> usize {
        self.shared.purge_completed()
    }

    pub fn get_queue_status(&self) -> QueueStatus {
        self.shared.queue_status()
    }

    pub fn get_statistics(&self) -> PoolStatistics {
        let workers = self
            .shared
            .workers
            .lock()
            .iter()
            .map(|w| w.snapshot())
            .collect();
        let counters = &self.shared.counters;
        let completed = counters.completed.load(Ordering::Relaxed);
        let failed = counters.failed.load(Ordering::Relaxed);
        let finished = completed + failed;
        let avg_processing_time_secs = if finished == 0 {
            0.0
        } else {
            counters.processing_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0 / finished as f64
        };

        PoolStatistics {
            workers,
            submitted: counters.submitted.load(Ordering::Relaxed),
            completed,
            failed,
            cancelled: counters.cancelled.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            avg_processing_time_secs,
            queue: self.shared.queue_status(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        !self.shared.accepting.load(Ordering::SeqCst)
    }

    /// Stop accepting work, cancel everything still queued, and stop the
    /// workers, giving in-flight requests the configured grace period.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if !self.shared.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down resource manager");

        let pending = {
            let mut queue = self.shared.queue.lock();
            queue.close();
            queue.drain()
        };
        metrics::update_queue_depth(0);
        for request in pending {
            request.cancel.cancel();
            self.shared.deliver(ProcessingResult::failed(
                &request.id,
                ResourceError::Cancelled("resource manager shut down".to_string()),
            ));
        }

        let _ = self.maintenance_stop.send(true);
        let maintenance = self.maintenance.lock().take();
        if let Some(handle) = maintenance {
            let _ = handle.await;
        }

        let mut workers = std::mem::take(&mut *self.shared.workers.lock());
        for worker in &workers {
            worker.request_stop();
        }
        let grace = self.shared.config.shutdown_grace();
        let all_stopped = futures::future::join_all(workers.iter_mut().map(|w| &mut w.handle));
        if tokio::time::timeout(grace, all_stopped).await.is_err() {
            warn!("Workers still busy after {:?}, aborting them", grace);
            for worker in &workers {
                worker.handle.abort();
            }
        }

        // Anything still marked running was abandoned by an aborted worker
        let abandoned: Vec<(String, usize)> = self
            .shared
            .tracked
            .lock()
            .iter()
            .filter_map(|(id, entry)| match entry.phase {
                Phase::Running { worker_id } => Some((id.clone(), worker_id)),
                _ => None,
            })
            .collect();
        for (request_id, worker_id) in abandoned {
            self.shared.fail_in_flight(
                &request_id,
                worker_id,
                ResourceError::Cancelled("resource manager shut down while running".to_string()),
            );
        }

        metrics::update_workers(0, 0, 0);
        info!("Resource manager stopped");
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        if self.shared.accepting.swap(false, Ordering::SeqCst) {
            self.shared.queue.lock().close();
        }
        let _ = self.maintenance_stop.send(true);
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
        for worker in self.shared.workers.lock().drain(..) {
            worker.request_stop();
            worker.handle.abort();
        }
    }
}

/// Periodic health checks and result purges. Holds only a weak reference
/// so an abandoned manager is not kept alive.
fn spawn_maintenance(shared: Weak<Shared>, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
    let (health_every, cleanup_every) = match shared.upgrade() {
        Some(shared) => (
            shared.config.health_check_interval(),
            shared.config.cleanup_interval(),
        ),
        None => (Duration::from_secs(30), Duration::from_secs(60)),
    };

    tokio::spawn(async move {
        let start = tokio::time::Instant::now();
        let mut health = tokio::time::interval_at(start + health_every, health_every);
        let mut cleanup = tokio::time::interval_at(start + cleanup_every, cleanup_every);

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = health.tick() => {
                    let Some(shared) = shared.upgrade() else { break };
                    let report = shared.check_workers();
                    if report != HealthReport::default() {
                        info!(
                            "Health check restarted {} dead and {} stuck workers",
                            report.restarted_dead, report.restarted_stuck
                        );
                    }
                }
                _ = cleanup.tick() => {
                    let Some(shared) = shared.upgrade() else { break };
                    shared.purge_completed();
                }
            }
        }
        debug!("Pool maintenance stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimits;
    use crate::memory::MemoryProbe;
    use serde_json::json;

    fn manager(workers: usize) -> ResourceManager {
        let probe: Arc<dyn MemoryProbe> = Arc::new(|| -> Result<f64> { Ok(10.0) });
        let monitor = PerformanceMonitor::builder(ResourceLimits::default())
            .probe(probe)
            .build();
        let config = ResourcePool {
            max_workers: workers,
            worker_timeout_secs: 0.05,
            ..ResourcePool::default()
        };
        ResourceManager::new(config, monitor).unwrap()
    }

    #[tokio::test]
    async fn test_dead_worker_is_restarted() {
        let manager = manager(2);
        manager.shared.workers.lock()[0].handle.abort();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = manager.run_health_check();
        assert_eq!(report.restarted_dead, 1);
        assert_eq!(report.restarted_stuck, 0);

        let stats = manager.get_statistics();
        assert_eq!(stats.workers.len(), 2);
        assert_eq!(stats.workers[0].restarts, 1);
        assert_eq!(stats.workers[0].state, WorkerState::Idle);

        // The replacement still serves requests
        manager.register_processor("echo", |req: &ProcessingRequest| Ok(req.args.clone()));
        let id = manager
            .submit_request("echo", json!(1), SubmitOptions::default())
            .unwrap();
        let result = manager.get_result(&id, Some(Duration::from_secs(2))).await;
        assert!(result.success);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_stuck_worker_is_reclaimed() {
        let manager = manager(1);
        {
            let workers = manager.shared.workers.lock();
            let mut status = workers[0].status.lock();
            status.state = WorkerState::Active;
            status.active_since = Instant::now().checked_sub(Duration::from_secs(1));
        }

        let report = manager.run_health_check();
        assert_eq!(report.restarted_stuck, 1);
        assert_eq!(manager.get_statistics().workers[0].restarts, 1);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_unclaimed_results_are_purged() {
        let probe: Arc<dyn MemoryProbe> = Arc::new(|| -> Result<f64> { Ok(10.0) });
        let monitor = PerformanceMonitor::builder(ResourceLimits::default())
            .probe(probe)
            .build();
        let config = ResourcePool {
            max_workers: 1,
            result_retention_secs: 0,
            ..ResourcePool::default()
        };
        let manager = ResourceManager::new(config, monitor).unwrap();
        manager.register_processor("echo", |req: &ProcessingRequest| Ok(req.args.clone()));

        let id = manager
            .submit_request("echo", json!("x"), SubmitOptions::default())
            .unwrap();
        for _ in 0..100 {
            if manager.get_queue_status().awaiting_pickup == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(manager.purge_completed(), 1);
        let result = manager.get_result(&id, Some(Duration::from_millis(10))).await;
        assert!(matches!(result.error, Some(ResourceError::UnknownRequest(_))));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_workers() {
        let manager = manager(2);
        assert!(matches!(
            manager.scale_workers(0),
            Err(ResourceError::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.scale_workers(MAX_WORKERS + 1),
            Err(ResourceError::InvalidArgument(_))
        ));
        assert_eq!(manager.scale_workers(4).unwrap(), 4);
        assert_eq!(manager.scale_workers(1).unwrap(), 1);

        manager.shutdown().await;
    }
}
