//! Accepts tasks for asynchronous processing.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::metrics::MetricsCollector;

use super::job::TaskPayload;
use super::queue::{JobQueue, QueueError};
use super::store::{JobStore, StoreError};

/// Errors that can occur while accepting a job.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The record could not be created.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The record exists but its id never reached the queue.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// What the caller gets back for an accepted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub job_id: Uuid,
    /// Relative path to poll for the job's status.
    pub status_url: String,
}

/// Path under which a job's status is served.
pub fn status_url(job_id: Uuid) -> String {
    format!("/jobs/{}", job_id)
}

/// Creates a job record and hands its id to the workers.
#[derive(Clone)]
pub struct SubmissionService {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    metrics: MetricsCollector,
}

impl SubmissionService {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            store,
            queue,
            metrics: MetricsCollector::new(),
        }
    }

    /// Accepts a task.
    ///
    /// The record is written before the id is enqueued, so a worker never
    /// dequeues an id the store does not know. If the enqueue fails the
    /// record stays `queued` until it expires and the caller gets the error;
    /// nothing is retried.
    pub async fn submit(&self, payload: TaskPayload) -> Result<SubmissionReceipt, SubmitError> {
        let job_id = Uuid::new_v4();
        let payload = payload.normalized();

        self.store.create(job_id, payload, Utc::now()).await?;

        if let Err(e) = self.queue.enqueue(job_id).await {
            error!(job_id = %job_id, error = %e, "Job created but not enqueued");
            return Err(e.into());
        }

        self.metrics.record_submitted();
        info!(job_id = %job_id, "Job submitted");

        Ok(SubmissionReceipt {
            job_id,
            status_url: status_url(job_id),
        })
    }
}
