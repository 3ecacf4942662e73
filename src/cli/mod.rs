//! Command-line interface for task-capture.
//!
//! Provides the `serve` (HTTP API) and `worker` commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Backend, Cli, Commands};
