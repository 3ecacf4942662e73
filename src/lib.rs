//! task-capture: asynchronous task capture and enrichment service.
//!
//! Clients submit short task notes over HTTP. Each note becomes a job that a
//! worker plans with an LLM, optionally researches, and files as a Notion
//! page. Clients poll the job until it succeeds or fails.

pub mod api;
pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod utils;

// Re-export commonly used error types
pub use config::ConfigError;
pub use error::{DocumentError, LlmError};
pub use scheduler::{PoolError, QueueError, StoreError, SubmitError};
