//! Job definitions for the scheduler.
//!
//! This module defines the core job types used in the scheduling system:
//!
//! - `TaskPayload`: The task record submitted by a client
//! - `Job`: The stored lifecycle record of one submitted task
//! - `JobStatus`: Position of a job in the `queued → running → terminal` machine
//! - `JobResult`: Output of a successful enrichment run
//!
//! All status changes go through the transition methods on [`Job`], which
//! enforce the state machine for every store backend.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::pipeline::{DocumentRef, PlanOutput, ResearchOutput};

/// Source recorded when the client does not name one.
const DEFAULT_SOURCE: &str = "shortcut";

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}

/// A task as captured by a remote client.
///
/// Timestamps keep the offset the client sent, so the stored payload matches
/// the submitted one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskPayload {
    /// Short name of the task.
    pub task_name: String,
    /// Wall-clock time on the client when the task was captured.
    pub client_time: DateTime<FixedOffset>,
    /// Free-form description of the task.
    pub task_content: String,
    /// Where the task came from (e.g. "shortcut", "api").
    #[serde(default = "default_source")]
    pub source: String,
    /// Optional due date for the task.
    #[serde(default)]
    pub task_date: Option<DateTime<FixedOffset>>,
}

impl TaskPayload {
    /// Creates a payload with the default source and no due date.
    pub fn new(
        task_name: impl Into<String>,
        task_content: impl Into<String>,
        client_time: impl Into<DateTime<FixedOffset>>,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            client_time: client_time.into(),
            task_content: task_content.into(),
            source: default_source(),
            task_date: None,
        }
    }

    /// Sets the source.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the due date.
    pub fn with_task_date(mut self, task_date: impl Into<DateTime<FixedOffset>>) -> Self {
        self.task_date = Some(task_date.into());
        self
    }

    /// Returns the payload with surrounding whitespace trimmed from every
    /// string field.
    pub fn normalized(self) -> Self {
        Self {
            task_name: self.task_name.trim().to_string(),
            task_content: self.task_content.trim().to_string(),
            source: self.source.trim().to_string(),
            ..self
        }
    }
}

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted and waiting for a worker.
    Queued,
    /// Claimed by a worker; the pipeline is running.
    Running,
    /// Pipeline finished and the document exists.
    Succeeded,
    /// A stage failed, or the worker's lease lapsed.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    /// Returns whether no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a successful job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    /// Stage A output.
    pub plan: PlanOutput,
    /// Stage B output; `None` when the plan did not ask for research.
    pub deep_research: Option<ResearchOutput>,
    /// The created document.
    pub document: DocumentRef,
}

/// A status change that the state machine does not allow.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("cannot move job from {from} to {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// The stored lifecycle record of one submitted task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Unique identifier; also the store key and the queue message.
    pub id: Uuid,
    pub status: JobStatus,
    /// The task exactly as accepted.
    pub payload: TaskPayload,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// `created_at + TTL`; the record reads as not-found from this instant on.
    pub expires_at: DateTime<Utc>,
    /// Worker that claimed the job.
    #[serde(default)]
    pub worker_id: Option<String>,
    /// Deadline of the running worker's lease. Only set while running.
    #[serde(default)]
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Present only when `status == succeeded`.
    #[serde(default)]
    pub result: Option<JobResult>,
    /// Present only when `status == failed`.
    #[serde(default)]
    pub error: Option<String>,
}

impl Job {
    /// Creates a queued job whose expiry is fixed at `now + ttl`.
    pub fn new(id: Uuid, payload: TaskPayload, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            payload,
            created_at: now,
            started_at: None,
            finished_at: None,
            expires_at: now + ttl,
            worker_id: None,
            lease_expires_at: None,
            result: None,
            error: None,
        }
    }

    /// Returns whether the record has outlived its TTL at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Returns whether the job is running on a lease that ended before `now`.
    pub fn lease_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Running
            && self.lease_expires_at.is_some_and(|deadline| deadline <= now)
    }

    /// `queued → running`, stamping `started_at` and the first lease deadline.
    pub fn start(
        &mut self,
        now: DateTime<Utc>,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.require(JobStatus::Queued, JobStatus::Running)?;
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        self.worker_id = Some(worker_id.to_string());
        self.lease_expires_at = Some(lease_until);
        Ok(())
    }

    /// Returns whether `worker_id` holds the lease of this running job.
    pub fn is_owned_by(&self, worker_id: &str) -> bool {
        self.status == JobStatus::Running && self.worker_id.as_deref() == Some(worker_id)
    }

    /// Pushes the lease deadline of a running job forward.
    ///
    /// Fails when the job left `running` or another worker owns it.
    pub fn renew_lease(
        &mut self,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.require(JobStatus::Running, JobStatus::Running)?;
        if !self.is_owned_by(worker_id) {
            return Err(TransitionError {
                from: self.status,
                to: JobStatus::Running,
            });
        }
        self.lease_expires_at = Some(lease_until);
        Ok(())
    }

    /// `running → succeeded`, attaching the result.
    pub fn succeed(&mut self, now: DateTime<Utc>, result: JobResult) -> Result<(), TransitionError> {
        self.require(JobStatus::Running, JobStatus::Succeeded)?;
        self.status = JobStatus::Succeeded;
        self.finished_at = Some(now);
        self.lease_expires_at = None;
        self.result = Some(result);
        Ok(())
    }

    /// `running → failed`, attaching the error description.
    pub fn fail(
        &mut self,
        now: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.require(JobStatus::Running, JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.finished_at = Some(now);
        self.lease_expires_at = None;
        self.error = Some(error.into());
        Ok(())
    }

    fn require(&self, required: JobStatus, to: JobStatus) -> Result<(), TransitionError> {
        if self.status == required {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                to,
            })
        }
    }
}
