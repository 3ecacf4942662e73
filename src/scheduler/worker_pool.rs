//! Worker pool for processing jobs from the queue.
//!
//! This module provides a pool of workers that compete for job ids on a
//! shared queue. Each worker runs as an independent async task, claims the
//! job in the store, runs the enrichment pipeline and records exactly one
//! terminal transition.
//!
//! # Features
//!
//! - Configurable number of workers
//! - Graceful shutdown with broadcast channel
//! - Lease heartbeat while the pipeline runs
//! - Lease reaper for jobs whose worker vanished
//! - Pool statistics tracking

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::metrics::MetricsCollector;
use crate::pipeline::{EnrichmentPipeline, StageFailure};

use super::job::{Job, JobResult, JobStatus};
use super::queue::{JobQueue, QueueError, DEFAULT_QUEUE_NAME};
use super::reaper::LeaseReaper;
use super::store::{JobStore, StoreError, DEFAULT_LEASE};

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The job queue could not be reached while starting.
    #[error("Queue connection failed: {0}")]
    QueueConnection(#[from] QueueError),

    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// Longest a single dequeue blocks before the worker checks for shutdown.
    pub poll_interval: Duration,
    /// Lease length the store grants on claim and renewal.
    ///
    /// A worker that has not renewed within this long abandons its job.
    pub lease: Duration,
    /// How often a worker renews the lease of the job it is running.
    ///
    /// Must be well below `lease`.
    pub heartbeat_interval: Duration,
    /// How often the reaper looks for lapsed leases.
    pub reaper_interval: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            poll_interval: Duration::from_secs(30),
            lease: DEFAULT_LEASE,
            heartbeat_interval: DEFAULT_LEASE / 3,
            reaper_interval: Duration::from_secs(15),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the lease length and derives the heartbeat interval from it.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self.with_heartbeat_interval(lease / 3)
    }

    /// Sets the reaper interval.
    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently processing jobs.
    pub active_workers: usize,
    /// Jobs this pool moved to `succeeded`.
    pub jobs_succeeded: u64,
    /// Jobs this pool moved to `failed`.
    pub jobs_failed: u64,
    /// Dequeued ids that were expired, unknown or already claimed.
    pub jobs_skipped: u64,
    /// Jobs dropped mid-run because the lease was lost.
    pub jobs_abandoned: u64,
    /// Average job processing duration.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of jobs processed (succeeded + failed).
    pub fn total_processed(&self) -> u64 {
        self.jobs_succeeded + self.jobs_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_succeeded as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_skipped: AtomicU64,
    jobs_abandoned: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_succeeded: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_skipped: AtomicU64::new(0),
            jobs_abandoned: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record_success(&self, duration: Duration) {
        self.jobs_succeeded.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_failure(&self, duration: Duration) {
        self.jobs_failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_skip(&self) {
        self.jobs_skipped.fetch_add(1, Ordering::SeqCst);
    }

    fn record_abandoned(&self) {
        self.jobs_abandoned.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let succeeded = self.jobs_succeeded.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);

        let total_jobs = succeeded + failed;
        let average_duration = if total_jobs > 0 {
            Duration::from_millis(total_duration_ms / total_jobs)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            jobs_succeeded: succeeded,
            jobs_failed: failed,
            jobs_skipped: self.jobs_skipped.load(Ordering::SeqCst),
            jobs_abandoned: self.jobs_abandoned.load(Ordering::SeqCst),
            average_job_duration: average_duration,
        }
    }
}

/// Worker pool that manages multiple workers processing jobs from a queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    pipeline: Arc<EnrichmentPipeline>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
    /// Prefix that keeps worker ids distinct across processes.
    instance_id: String,
}

impl WorkerPool {
    /// Creates a new worker pool over a shared store and queue.
    pub fn new(
        config: WorkerPoolConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        pipeline: Arc<EnrichmentPipeline>,
    ) -> Self {
        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            store,
            queue,
            pipeline,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
            instance_id: instance_id(),
        }
    }

    /// Starts all workers and the lease reaper.
    ///
    /// Workers will begin polling the queue for jobs immediately.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        // Ids a previous process dequeued but never acknowledged
        let recovered = self.queue.recover_unacked().await?;
        if recovered > 0 {
            info!(recovered = recovered, "Recovered unacknowledged jobs");
        }

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("{}-worker-{}", self.instance_id, i),
                store: Arc::clone(&self.store),
                queue: Arc::clone(&self.queue),
                pipeline: Arc::clone(&self.pipeline),
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
                lease: self.config.lease,
                heartbeat_interval: self.config.heartbeat_interval,
                stats: Arc::clone(&self.stats),
                metrics: MetricsCollector::new(),
            };

            let handle = tokio::spawn(async move {
                worker.run().await;
            });

            self.worker_handles.push(handle);
        }

        let reaper = LeaseReaper::new(Arc::clone(&self.store), self.config.reaper_interval);
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.worker_handles
            .push(tokio::spawn(async move { reaper.run(shutdown_rx).await }));

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.config.num_workers, "Worker pool started");

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// Sends a shutdown signal to all workers and waits for them to finish
    /// their current jobs.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Ignore send error - workers may have already stopped
        let _ = self.shutdown_tx.send(());

        let shutdown_future = async {
            for outcome in join_all(self.worker_handles.drain(..)).await {
                if let Err(e) = outcome {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        let outcome = tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await;
        self.is_running.store(false, Ordering::SeqCst);

        match outcome {
            Ok(()) => {
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    /// Returns the prefix of this pool's worker ids.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

/// Short random id for one pool instance, e.g. `3f9a1c2e`.
fn instance_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// How a claimed job's run ended.
enum RunOutcome {
    Finished(Result<JobResult, StageFailure>),
    /// The lease was taken away or ran out before the run finished.
    LeaseLost(String),
}

/// A single worker that processes jobs from the queue.
pub struct Worker {
    /// Unique identifier for this worker; recorded as the lease owner.
    id: String,
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    pipeline: Arc<EnrichmentPipeline>,
    /// Receiver for shutdown signal.
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    lease: Duration,
    heartbeat_interval: Duration,
    /// Shared statistics.
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
}

impl Worker {
    /// Main worker loop.
    ///
    /// Continuously dequeues and processes jobs until a shutdown signal is
    /// received. A job in progress is finished before the worker stops.
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");
        self.metrics.inc_workers();

        loop {
            let dequeued = tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                result = self.queue.dequeue(self.poll_interval) => result,
            };

            match dequeued {
                Ok(Some(job_id)) => {
                    if let Ok(depth) = self.queue.len().await {
                        self.metrics.update_queue_depth(DEFAULT_QUEUE_NAME, depth);
                    }
                    self.process_job(job_id).await;
                }
                Ok(None) => {
                    // The dequeue already waited poll_interval
                    debug!(worker_id = %self.id, "No jobs available");
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to dequeue job");
                    // Wait before retrying on error
                    tokio::time::sleep(self.poll_interval.min(Duration::from_secs(5))).await;
                }
            }
        }

        self.metrics.dec_workers();
        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Processes a single dequeued id.
    async fn process_job(&self, job_id: Uuid) {
        // The store's lease starts no earlier than this
        let claimed_at = tokio::time::Instant::now();
        let job = match self
            .store
            .transition_to_running(job_id, &self.id, Utc::now())
            .await
        {
            Ok(job) => job,
            Err(StoreError::NotFound(_)) => {
                warn!(worker_id = %self.id, job_id = %job_id, "Job expired or unknown, skipping");
                self.skip(job_id, "not_found").await;
                return;
            }
            Err(StoreError::InvalidTransition { from, .. }) => {
                warn!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    status = %from,
                    "Job is no longer queued, skipping"
                );
                self.skip(job_id, "not_queued").await;
                return;
            }
            Err(e) => {
                // Left unacknowledged; recovered when a pool next starts
                error!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to claim job");
                return;
            }
        };

        info!(
            worker_id = %self.id,
            job_id = %job_id,
            source = %job.payload.source,
            "Processing job"
        );

        let start_time = Instant::now();
        self.stats.increment_active();
        self.metrics.inc_jobs_in_progress();

        let outcome = self.run_with_heartbeat(&job, claimed_at).await;

        self.stats.decrement_active();
        self.metrics.dec_jobs_in_progress();

        match outcome {
            RunOutcome::Finished(result) => self.finish(job_id, result, start_time).await,
            RunOutcome::LeaseLost(reason) => {
                self.stats.record_abandoned();
                warn!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    reason = %reason,
                    "Lease lost, abandoning job"
                );
            }
        }

        self.ack(job_id).await;
    }

    /// Runs the pipeline while renewing the lease on every heartbeat tick.
    ///
    /// The run is abandoned when the store refuses a renewal, or when no
    /// renewal has succeeded for a whole lease, since the reaper may already
    /// have failed the job. Dropping the pipeline future cancels whatever
    /// stage call is in flight, so no document is created after that point.
    async fn run_with_heartbeat(&self, job: &Job, claimed_at: tokio::time::Instant) -> RunOutcome {
        let pipeline = self.pipeline.run(&job.payload);
        tokio::pin!(pipeline);

        let lease_end = tokio::time::sleep_until(claimed_at + self.lease);
        tokio::pin!(lease_end);

        let mut heartbeat =
            tokio::time::interval(self.heartbeat_interval.max(Duration::from_millis(10)));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; the claim already set the lease
        heartbeat.tick().await;

        loop {
            tokio::select! {
                result = &mut pipeline => return RunOutcome::Finished(result),
                _ = &mut lease_end => {
                    return RunOutcome::LeaseLost(format!(
                        "no lease renewal succeeded within {:?}",
                        self.lease
                    ));
                }
                _ = heartbeat.tick() => {
                    let renewing_at = tokio::time::Instant::now();
                    match self.store.renew_lease(job.id, &self.id, Utc::now()).await {
                        Ok(()) => {
                            lease_end.as_mut().reset(renewing_at + self.lease);
                            debug!(worker_id = %self.id, job_id = %job.id, "Lease renewed");
                        }
                        Err(e @ (StoreError::NotFound(_) | StoreError::InvalidTransition { .. })) => {
                            return RunOutcome::LeaseLost(e.to_string());
                        }
                        Err(e) => {
                            warn!(
                                worker_id = %self.id,
                                job_id = %job.id,
                                error = %e,
                                "Failed to renew lease"
                            );
                        }
                    }
                }
            }
        }
    }

    /// Records the terminal transition for a finished run.
    async fn finish(
        &self,
        job_id: Uuid,
        result: Result<JobResult, StageFailure>,
        start_time: Instant,
    ) {
        let (status, stored) = match result {
            Ok(job_result) => {
                let document_id = job_result.document.document_id.clone();
                let stored = self
                    .store
                    .complete_success(job_id, Utc::now(), job_result)
                    .await;
                if stored.is_ok() {
                    info!(
                        worker_id = %self.id,
                        job_id = %job_id,
                        document_id = %document_id,
                        duration_ms = start_time.elapsed().as_millis(),
                        "Job succeeded"
                    );
                }
                (JobStatus::Succeeded, stored)
            }
            Err(failure) => {
                let stored = self
                    .store
                    .complete_failure(job_id, Utc::now(), &failure.message)
                    .await;
                if stored.is_ok() {
                    warn!(
                        worker_id = %self.id,
                        job_id = %job_id,
                        stage = %failure.stage,
                        error = %failure.message,
                        "Job failed"
                    );
                }
                (JobStatus::Failed, stored)
            }
        };

        let duration = start_time.elapsed();
        match stored {
            Ok(()) => {
                match status {
                    JobStatus::Succeeded => self.stats.record_success(duration),
                    _ => self.stats.record_failure(duration),
                }
                self.metrics
                    .record_job_finished(status.as_str(), duration.as_secs_f64());
            }
            Err(e) => {
                error!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    status = %status,
                    error = %e,
                    "Failed to record job outcome"
                );
            }
        }
    }

    async fn skip(&self, job_id: Uuid, reason: &str) {
        self.stats.record_skip();
        self.metrics.record_skipped(reason);
        self.ack(job_id).await;
    }

    async fn ack(&self, job_id: Uuid) {
        if let Err(e) = self.queue.ack(job_id).await {
            warn!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to acknowledge job");
        }
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();

        assert_eq!(config.num_workers, 1);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.lease, DEFAULT_LEASE);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(40));
        assert_eq!(config.reaper_interval, Duration::from_secs(15));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_worker_pool_config_builder() {
        let config = WorkerPoolConfig::new(8)
            .with_poll_interval(Duration::from_secs(5))
            .with_lease(Duration::from_secs(90))
            .with_reaper_interval(Duration::from_secs(10))
            .with_shutdown_timeout(Duration::from_secs(120));

        assert_eq!(config.num_workers, 8);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.lease, Duration::from_secs(90));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.reaper_interval, Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_pool_stats_default() {
        let stats = PoolStats::default();

        assert_eq!(stats.num_workers, 0);
        assert_eq!(stats.active_workers, 0);
        assert_eq!(stats.jobs_succeeded, 0);
        assert_eq!(stats.jobs_failed, 0);
        assert_eq!(stats.average_job_duration, Duration::ZERO);
        assert_eq!(stats.total_processed(), 0);
        assert!((stats.success_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_stats_calculations() {
        let stats = PoolStats {
            num_workers: 4,
            active_workers: 2,
            jobs_succeeded: 80,
            jobs_failed: 20,
            jobs_skipped: 3,
            jobs_abandoned: 1,
            average_job_duration: Duration::from_secs(60),
        };

        assert_eq!(stats.total_processed(), 100);
        assert!((stats.success_rate() - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shared_pool_stats() {
        let stats = SharedPoolStats::new();

        stats.record_success(Duration::from_secs(10));
        stats.record_success(Duration::from_secs(20));
        stats.record_failure(Duration::from_secs(5));
        stats.record_skip();

        let pool_stats = stats.to_pool_stats(4);

        assert_eq!(pool_stats.num_workers, 4);
        assert_eq!(pool_stats.jobs_succeeded, 2);
        assert_eq!(pool_stats.jobs_failed, 1);
        assert_eq!(pool_stats.jobs_skipped, 1);
        // Average: (10000 + 20000 + 5000) / 3 = 11666 ms
        assert!(pool_stats.average_job_duration.as_millis() > 11000);
        assert!(pool_stats.average_job_duration.as_millis() < 12000);
    }

    #[test]
    fn test_shared_pool_stats_active_workers() {
        let stats = SharedPoolStats::new();

        stats.increment_active();
        stats.increment_active();
        assert_eq!(stats.active_workers.load(Ordering::SeqCst), 2);

        stats.decrement_active();
        assert_eq!(stats.active_workers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_instance_ids_are_short_and_distinct() {
        let a = instance_id();
        let b = instance_id();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_pool_error_display() {
        let err = PoolError::AlreadyRunning;
        assert!(err.to_string().contains("already running"));

        let err = PoolError::NotRunning;
        assert!(err.to_string().contains("not running"));

        let err = PoolError::ShutdownTimeout(Duration::from_secs(60));
        assert!(err.to_string().contains("60"));

        let err: PoolError = QueueError::Unavailable("refused".to_string()).into();
        assert!(err.to_string().contains("Queue connection failed"));
    }
}
