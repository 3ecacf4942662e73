//! Enrichment pipeline invoked by the workers for each job.
//!
//! The pipeline is a straight-line sequence of external calls:
//!
//! ```text
//!   TaskPayload ──► Stage A (planning) ──► need_deep_research?
//!                                             │ yes            │ no
//!                                             ▼                │
//!                                     Stage B (research)       │
//!                                             │                │
//!                                             ▼                ▼
//!                                    Document creation (plan + research?)
//!                                             │
//!                                             ▼
//!                                         JobResult
//! ```
//!
//! Each stage sits behind a trait so the worker never depends on a concrete
//! LLM or document backend:
//!
//! - [`Planner`]: task payload to structured plan
//! - [`Researcher`]: plan to research summary
//! - [`DocumentSink`]: plan (+ research) to a document reference
//!
//! Every stage is attempted once. The first failure ends the run and is
//! reported as a [`StageFailure`] naming the stage.

pub mod runner;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

use crate::scheduler::TaskPayload;

pub use runner::EnrichmentPipeline;
pub use types::{DocumentRef, PlanOutput, ResearchOutput};

/// Error reported by a single stage implementation.
///
/// The message is what ends up, verbatim, as the failed job's `error`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct StageError(pub String);

impl StageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<crate::error::LlmError> for StageError {
    fn from(err: crate::error::LlmError) -> Self {
        Self(err.to_string())
    }
}

impl From<crate::error::DocumentError> for StageError {
    fn from(err: crate::error::DocumentError) -> Self {
        Self(err.to_string())
    }
}

/// The enrichment stages, used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Planning,
    Research,
    Document,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Planning => "planning",
            Stage::Research => "research",
            Stage::Document => "document",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage failed; the job fails as a whole.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{stage} stage failed: {message}")]
pub struct StageFailure {
    pub stage: Stage,
    pub message: String,
}

impl StageFailure {
    pub fn new(stage: Stage, err: StageError) -> Self {
        Self {
            stage,
            message: err.0,
        }
    }
}

/// Stage A: turns a raw task into a structured plan.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, payload: &TaskPayload) -> Result<PlanOutput, StageError>;
}

/// Stage B: researches the question raised by the plan.
#[async_trait]
pub trait Researcher: Send + Sync {
    async fn research(&self, plan: &PlanOutput) -> Result<ResearchOutput, StageError>;
}

/// Everything the document stage needs to build a page.
#[derive(Debug, Clone, Copy)]
pub struct DocumentRequest<'a> {
    pub payload: &'a TaskPayload,
    pub plan: &'a PlanOutput,
    pub research: Option<&'a ResearchOutput>,
}

/// Document creation stage: persists the enriched task externally.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn create_document(&self, request: DocumentRequest<'_>) -> Result<DocumentRef, StageError>;
}
