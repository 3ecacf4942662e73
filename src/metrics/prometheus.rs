//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by task-capture and
//! provides functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all task-capture metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of jobs accepted by the submission interface.
pub static JOBS_SUBMITTED_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Total number of jobs that reached a terminal status, labeled by status.
pub static JOBS_FINISHED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Time from claim to terminal status in seconds, labeled by status.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Dequeued ids a worker did not run, labeled by reason.
pub static JOBS_SKIPPED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Number of jobs currently being processed.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Number of ids waiting in the queue, labeled by queue name.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Total enrichment stage calls, labeled by stage and status.
pub static STAGE_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Enrichment stage latency in seconds, labeled by stage.
pub static STAGE_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Number of running worker tasks.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Total running jobs failed because their worker lease lapsed.
pub static LEASES_REAPED_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// This function should be called once at application startup. Later calls
/// leave the first registry in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Job lifecycle metrics
    let jobs_submitted_total = Counter::new(
        "task_capture_jobs_submitted_total",
        "Total number of jobs accepted for asynchronous processing",
    )?;

    let jobs_finished_total = CounterVec::new(
        Opts::new(
            "task_capture_jobs_finished_total",
            "Total number of jobs that reached a terminal status",
        ),
        &["status"],
    )?;

    let job_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "task_capture_job_duration_seconds",
            "Time from claim to terminal status in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["status"],
    )?;

    let jobs_skipped_total = CounterVec::new(
        Opts::new(
            "task_capture_jobs_skipped_total",
            "Dequeued jobs that were not run",
        ),
        &["reason"],
    )?;

    let jobs_in_progress = Gauge::new(
        "task_capture_jobs_in_progress",
        "Number of jobs currently being processed",
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("task_capture_queue_depth", "Number of jobs in queue"),
        &["queue_name"],
    )?;

    // Stage metrics
    let stage_requests_total = CounterVec::new(
        Opts::new(
            "task_capture_stage_requests_total",
            "Total enrichment stage calls",
        ),
        &["stage", "status"],
    )?;

    let stage_latency = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "task_capture_stage_latency_seconds",
            "Enrichment stage latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 120.0, 600.0]),
        &["stage"],
    )?;

    // Worker metrics
    let active_workers = Gauge::new("task_capture_active_workers", "Number of active workers")?;

    let leases_reaped_total = Counter::new(
        "task_capture_leases_reaped_total",
        "Running jobs failed because their worker lease lapsed",
    )?;

    registry.register(Box::new(jobs_submitted_total.clone()))?;
    registry.register(Box::new(jobs_finished_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(jobs_skipped_total.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(stage_requests_total.clone()))?;
    registry.register(Box::new(stage_latency.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(leases_reaped_total.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = JOBS_SUBMITTED_TOTAL.set(jobs_submitted_total);
    let _ = JOBS_FINISHED_TOTAL.set(jobs_finished_total);
    let _ = JOB_DURATION.set(job_duration);
    let _ = JOBS_SKIPPED_TOTAL.set(jobs_skipped_total);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = STAGE_REQUESTS_TOTAL.set(stage_requests_total);
    let _ = STAGE_LATENCY.set(stage_latency);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = LEASES_REAPED_TOTAL.set(leases_reaped_total);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// HTTP handler for the /metrics endpoint.
pub async fn metrics_handler() -> String {
    export_metrics()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        // First call should succeed or metrics already initialized
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();

        let metrics = export_metrics();
        assert!(!metrics.is_empty());
        assert!(!metrics.starts_with("# Error"));
    }

    #[test]
    fn test_recorded_counter_is_exported() {
        let _ = init_metrics();
        if let Some(counter) = LEASES_REAPED_TOTAL.get() {
            counter.inc();
        }

        let metrics = export_metrics();
        assert!(metrics.contains("task_capture_leases_reaped_total"));
    }
}
