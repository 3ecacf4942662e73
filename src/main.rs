//! task-capture entry point.
//!
//! Initializes logging and metrics, then delegates to the CLI module.

use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments first to get log_level
    let cli = task_capture::cli::parse_cli();

    // Initialize tracing with environment filter
    // Priority: RUST_LOG env var > --log-level CLI arg > default "info"
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    if let Err(e) = task_capture::metrics::init_metrics() {
        warn!(error = %e, "Failed to register Prometheus metrics");
    }

    // Run the CLI with parsed arguments
    task_capture::cli::run_with_cli(cli).await
}
