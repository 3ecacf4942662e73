//! Client-facing job status.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::pipeline::{DocumentRef, PlanOutput, ResearchOutput};

use super::job::{Job, JobStatus, TaskPayload};
use super::store::{JobStore, StoreError};

/// Message returned for ids that were never submitted or have expired.
pub const NOT_FOUND_MESSAGE: &str = "Job not found or expired";

/// Snapshot of a job, carrying only the fields meaningful for its status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobView {
    Queued {
        job_id: Uuid,
        created_at: DateTime<Utc>,
        payload: TaskPayload,
    },
    Running {
        job_id: Uuid,
        created_at: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
        payload: TaskPayload,
    },
    Succeeded {
        job_id: Uuid,
        created_at: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
        document: DocumentRef,
        plan: PlanOutput,
        deep_research: Option<ResearchOutput>,
    },
    Failed {
        job_id: Uuid,
        created_at: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
        error: String,
        payload: TaskPayload,
    },
}

impl JobView {
    pub fn status(&self) -> JobStatus {
        match self {
            JobView::Queued { .. } => JobStatus::Queued,
            JobView::Running { .. } => JobStatus::Running,
            JobView::Succeeded { .. } => JobStatus::Succeeded,
            JobView::Failed { .. } => JobStatus::Failed,
        }
    }
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        match (job.status, job.result) {
            (JobStatus::Queued, _) => JobView::Queued {
                job_id: job.id,
                created_at: job.created_at,
                payload: job.payload,
            },
            (JobStatus::Running, _) => JobView::Running {
                job_id: job.id,
                created_at: job.created_at,
                started_at: job.started_at,
                payload: job.payload,
            },
            (JobStatus::Succeeded, Some(result)) => JobView::Succeeded {
                job_id: job.id,
                created_at: job.created_at,
                started_at: job.started_at,
                finished_at: job.finished_at,
                document: result.document,
                plan: result.plan,
                deep_research: result.deep_research,
            },
            // Failed, or a succeeded record missing its result.
            (_, _) => JobView::Failed {
                job_id: job.id,
                created_at: job.created_at,
                started_at: job.started_at,
                finished_at: job.finished_at,
                error: job
                    .error
                    .unwrap_or_else(|| "job finished without a result".to_string()),
                payload: job.payload,
            },
        }
    }
}

/// Read-only lookup of job state.
#[derive(Clone)]
pub struct StatusService {
    store: Arc<dyn JobStore>,
}

impl StatusService {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Returns the job's view, or `None` if it never existed or expired.
    pub async fn get(&self, job_id: Uuid) -> Result<Option<JobView>, StoreError> {
        Ok(self.store.read(job_id).await?.map(JobView::from))
    }
}
