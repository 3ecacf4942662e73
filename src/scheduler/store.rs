//! Time-bounded job state storage.
//!
//! The store owns the lifecycle record of every job. All writes are
//! conditional on the current status, which is what makes exactly one worker
//! win the `queued → running` claim when several dequeue the same id.
//!
//! Two backends implement [`JobStore`]:
//!
//! - [`RedisJobStore`](super::redis_store::RedisJobStore): production, one
//!   `job:{id}` key per job with a server-side expiry
//! - [`InMemoryJobStore`]: tests and local development

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::job::{Job, JobResult, JobStatus, TaskPayload, TransitionError};

/// Default time a job record stays readable after creation (6 hours).
pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(21_600);

/// Default length of a worker lease on a running job.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(120);

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record with this id already exists.
    #[error("Job {0} already exists")]
    DuplicateJob(Uuid),

    /// No record, or the record has expired.
    #[error("Job {0} not found or expired")]
    NotFound(Uuid),

    /// The record is not in the status the transition requires.
    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    /// The backing service could not be reached.
    #[error("Job store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn invalid(id: Uuid, err: TransitionError) -> Self {
        StoreError::InvalidTransition {
            id,
            from: err.from,
            to: err.to,
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Timing settings shared by every store backend.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Lifetime of a record, counted from creation.
    pub ttl: Duration,
    /// Length of a worker lease; renewed by the worker heartbeat.
    pub lease: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_JOB_TTL,
            lease: DEFAULT_LEASE,
        }
    }
}

impl StoreConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub(crate) fn ttl_delta(&self) -> chrono::Duration {
        to_delta(self.ttl)
    }

    /// Lease deadline for a claim or renewal made at `now`.
    pub(crate) fn lease_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + to_delta(self.lease)
    }
}

fn to_delta(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(3650))
}

/// Lifecycle storage for jobs.
///
/// Every transition is atomic with respect to the record's current status.
/// Records expire `ttl` after creation; later writes never extend that.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Creates a `queued` record for `id`.
    ///
    /// Fails with `DuplicateJob` if a live record with the id exists.
    async fn create(
        &self,
        id: Uuid,
        payload: TaskPayload,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError>;

    /// Claims a queued job for `worker_id`, starting its lease.
    ///
    /// Exactly one of several concurrent callers succeeds; the others get
    /// `InvalidTransition`.
    async fn transition_to_running(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError>;

    /// Extends the lease of a running job owned by `worker_id`.
    async fn renew_lease(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// `running → succeeded` with the pipeline result.
    async fn complete_success(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        result: JobResult,
    ) -> Result<(), StoreError>;

    /// `running → failed` with an error description.
    async fn complete_failure(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError>;

    /// Returns the current record, or `None` if it never existed or expired.
    async fn read(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Ids of running jobs whose lease ended at or before `now`.
    async fn lapsed_leases(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;

    /// Fails a running job only if its lease is still lapsed.
    ///
    /// Returns `false` when the job finished, was renewed, or expired in the
    /// meantime.
    async fn fail_lapsed(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StoreError>;
}

/// In-process store backed by a mutex-guarded map.
///
/// Expired records are dropped on access, and the whole map is swept on every
/// `create` and `lapsed_leases`, so the reaper keeps it bounded.
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    config: StoreConfig,
}

impl InMemoryJobStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Applies a transition to a live record under the lock.
    async fn update<F>(&self, id: Uuid, now: DateTime<Utc>, transition: F) -> Result<Job, StoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), TransitionError>,
    {
        let mut jobs = self.jobs.lock().await;
        let job = live_entry(&mut jobs, id, now).ok_or(StoreError::NotFound(id))?;
        transition(job).map_err(|e| StoreError::invalid(id, e))?;
        Ok(job.clone())
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

/// Drops every record that has outlived its TTL.
fn evict_expired(jobs: &mut HashMap<Uuid, Job>, now: DateTime<Utc>) {
    jobs.retain(|_, job| !job.is_expired(now));
}

/// Returns the record for `id` unless it has expired, evicting it if so.
fn live_entry(jobs: &mut HashMap<Uuid, Job>, id: Uuid, now: DateTime<Utc>) -> Option<&mut Job> {
    if jobs.get(&id).is_some_and(|job| job.is_expired(now)) {
        jobs.remove(&id);
    }
    jobs.get_mut(&id)
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(
        &self,
        id: Uuid,
        payload: TaskPayload,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.lock().await;
        evict_expired(&mut jobs, now);
        if jobs.contains_key(&id) {
            return Err(StoreError::DuplicateJob(id));
        }
        let job = Job::new(id, payload, now, self.config.ttl_delta());
        jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn transition_to_running(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let lease_until = self.config.lease_deadline(now);
        self.update(id, now, |job| job.start(now, worker_id, lease_until))
            .await
    }

    async fn renew_lease(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let lease_until = self.config.lease_deadline(now);
        self.update(id, now, |job| job.renew_lease(worker_id, lease_until))
            .await
            .map(|_| ())
    }

    async fn complete_success(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        result: JobResult,
    ) -> Result<(), StoreError> {
        self.update(id, now, |job| job.succeed(now, result))
            .await
            .map(|_| ())
    }

    async fn complete_failure(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        self.update(id, now, |job| job.fail(now, error))
            .await
            .map(|_| ())
    }

    async fn read(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        Ok(live_entry(&mut jobs, id, Utc::now()).cloned())
    }

    async fn lapsed_leases(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        evict_expired(&mut jobs, now);
        Ok(jobs
            .values()
            .filter(|job| job.lease_lapsed(now))
            .map(|job| job.id)
            .collect())
    }

    async fn fail_lapsed(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().await;
        match live_entry(&mut jobs, id, now) {
            Some(job) if job.lease_lapsed(now) => Ok(job.fail(now, error).is_ok()),
            _ => Ok(false),
        }
    }
}
