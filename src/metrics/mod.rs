//! Metrics module for Prometheus-based monitoring.
//!
//! Covers the job lifecycle (submitted, finished, skipped, in progress),
//! enrichment stage calls, worker count and lease reaping.
//!
//! # Example
//!
//! ```ignore
//! use task_capture::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! // Initialize metrics on startup
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_submitted();
//!
//! // Export metrics for Prometheus scraping
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

// Re-export key types for convenient access
pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics, metrics_handler};
