//! High-level metric recording for the job lifecycle.
//!
//! The `MetricsCollector` struct wraps the raw Prometheus metrics and provides
//! convenient methods for the events workers, the reaper and the submission
//! path emit. Recording is a no-op until `init_metrics()` has run, so library
//! code and tests can record freely.

use super::prometheus::{
    ACTIVE_WORKERS, JOBS_FINISHED_TOTAL, JOBS_IN_PROGRESS, JOBS_SKIPPED_TOTAL,
    JOBS_SUBMITTED_TOTAL, JOB_DURATION, LEASES_REAPED_TOTAL, QUEUE_DEPTH, STAGE_LATENCY,
    STAGE_REQUESTS_TOTAL,
};

/// Metrics collector for recording task-capture operational metrics.
///
/// # Example
///
/// ```ignore
/// use task_capture::metrics::{MetricsCollector, init_metrics};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
///
/// collector.record_stage("planning", true, 1.8);
/// collector.record_job_finished("succeeded", 12.5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    /// Record a job accepted by the submission interface.
    pub fn record_submitted(&self) {
        if let Some(submitted) = JOBS_SUBMITTED_TOTAL.get() {
            submitted.inc();
        }
    }

    /// Record a terminal transition.
    ///
    /// # Arguments
    ///
    /// * `status` - Terminal status ("succeeded" or "failed")
    /// * `duration_secs` - Time from claim to the terminal transition
    pub fn record_job_finished(&self, status: &str, duration_secs: f64) {
        if let Some(finished) = JOBS_FINISHED_TOTAL.get() {
            finished.with_label_values(&[status]).inc();
        }

        if let Some(duration) = JOB_DURATION.get() {
            duration.with_label_values(&[status]).observe(duration_secs);
        }

        tracing::trace!(
            status = status,
            duration_secs = duration_secs,
            "Recorded job metric"
        );
    }

    /// Record a dequeued id that the worker did not run.
    pub fn record_skipped(&self, reason: &str) {
        if let Some(skipped) = JOBS_SKIPPED_TOTAL.get() {
            skipped.with_label_values(&[reason]).inc();
        }
    }

    /// Record one enrichment stage call.
    pub fn record_stage(&self, stage: &str, success: bool, latency_secs: f64) {
        let status = if success { "success" } else { "failure" };

        if let Some(requests) = STAGE_REQUESTS_TOTAL.get() {
            requests.with_label_values(&[stage, status]).inc();
        }

        if let Some(latency) = STAGE_LATENCY.get() {
            latency.with_label_values(&[stage]).observe(latency_secs);
        }
    }

    /// Record jobs failed by the lease reaper.
    pub fn record_leases_reaped(&self, count: usize) {
        if let Some(reaped) = LEASES_REAPED_TOTAL.get() {
            reaped.inc_by(count as f64);
        }
    }

    /// Update the queue depth gauge.
    pub fn update_queue_depth(&self, queue_name: &str, depth: usize) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth
                .with_label_values(&[queue_name])
                .set(depth as f64);
        }
    }

    pub fn inc_workers(&self) {
        if let Some(workers) = ACTIVE_WORKERS.get() {
            workers.inc();
        }
    }

    pub fn dec_workers(&self) {
        if let Some(workers) = ACTIVE_WORKERS.get() {
            workers.dec();
        }
    }

    pub fn inc_jobs_in_progress(&self) {
        if let Some(jobs) = JOBS_IN_PROGRESS.get() {
            jobs.inc();
        }
    }

    pub fn dec_jobs_in_progress(&self) {
        if let Some(jobs) = JOBS_IN_PROGRESS.get() {
            jobs.dec();
        }
    }
}
