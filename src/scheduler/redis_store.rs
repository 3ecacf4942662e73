//! Redis-backed job store.
//!
//! # Key Layout
//!
//! - `job:{id}`: JSON-encoded [`Job`], created with `SET NX PXAT` so the
//!   expiry instant is fixed at `created_at + ttl`
//! - `job:leases`: sorted set of running job ids scored by lease deadline
//!   (milliseconds since the epoch)
//!
//! # Atomicity
//!
//! Every transition is a read, a local state-machine check and a Lua
//! compare-and-set that only writes when the stored status still matches the
//! one that was read. The write uses `KEEPTTL`, so the original expiry
//! survives every update. When the compare fails the record is re-read and
//! the transition re-checked; statuses only move forward, so this settles
//! after a few rounds at most.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;
use uuid::Uuid;

use super::job::{Job, JobResult, JobStatus, TaskPayload, TransitionError};
use super::store::{JobStore, StoreConfig, StoreError};

/// Prefix of the per-job keys.
pub const JOB_KEY_PREFIX: &str = "job:";

/// Sorted set indexing running jobs by lease deadline.
pub const LEASE_INDEX_KEY: &str = "job:leases";

/// Conditional write of a job record.
///
/// KEYS[1] job key, KEYS[2] lease index.
/// ARGV[1] expected status, ARGV[2] new record, ARGV[3] expected lease
/// deadline or '', ARGV[4] 'set' or 'clear' for the lease index, ARGV[5]
/// lease score, ARGV[6] job id.
///
/// Returns 1 when written, 0 when the key is gone, -1 on a status mismatch
/// and -2 on a lease mismatch.
const COMPARE_AND_SET: &str = r#"
local cur = redis.call('GET', KEYS[1])
if not cur then
  redis.call('ZREM', KEYS[2], ARGV[6])
  return 0
end
local job = cjson.decode(cur)
if job['status'] ~= ARGV[1] then
  return -1
end
if ARGV[3] ~= '' and job['lease_expires_at'] ~= ARGV[3] then
  return -2
end
redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
if ARGV[4] == 'set' then
  redis.call('ZADD', KEYS[2], ARGV[5], ARGV[6])
else
  redis.call('ZREM', KEYS[2], ARGV[6])
end
return 1
"#;

/// Outcome of a compare-and-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CasOutcome {
    Written,
    Missing,
    StatusChanged,
    LeaseChanged,
}

impl CasOutcome {
    fn from_code(code: i64) -> Self {
        match code {
            1 => CasOutcome::Written,
            0 => CasOutcome::Missing,
            -2 => CasOutcome::LeaseChanged,
            _ => CasOutcome::StatusChanged,
        }
    }
}

/// Job store on a Redis server.
pub struct RedisJobStore {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    config: StoreConfig,
    cas: redis::Script,
}

impl RedisJobStore {
    /// Connects to Redis and creates the store.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the connection fails.
    pub async fn connect(redis_url: &str, config: StoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self::from_connection(redis, config))
    }

    /// Creates a store from an existing ConnectionManager.
    pub fn from_connection(redis: ConnectionManager, config: StoreConfig) -> Self {
        Self {
            redis,
            config,
            cas: redis::Script::new(COMPARE_AND_SET),
        }
    }

    fn job_key(id: Uuid) -> String {
        format!("{}{}", JOB_KEY_PREFIX, id)
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let mut conn = self.redis.clone();
        let data: Option<String> = conn.get(Self::job_key(id)).await?;
        match data {
            Some(s) => {
                let job: Job = serde_json::from_str(&s)?;
                Ok((!job.is_expired(Utc::now())).then_some(job))
            }
            None => Ok(None),
        }
    }

    async fn compare_and_set(
        &self,
        expected: JobStatus,
        job: &Job,
        lease_guard: Option<DateTime<Utc>>,
    ) -> Result<CasOutcome, StoreError> {
        let guard = match lease_guard {
            Some(deadline) => serde_json::to_value(deadline)?
                .as_str()
                .unwrap_or_default()
                .to_string(),
            None => String::new(),
        };
        let (lease_op, score) = match job.lease_expires_at {
            Some(deadline) if job.status == JobStatus::Running => {
                ("set", deadline.timestamp_millis())
            }
            _ => ("clear", 0),
        };

        let mut conn = self.redis.clone();
        let code: i64 = self
            .cas
            .key(Self::job_key(job.id))
            .key(LEASE_INDEX_KEY)
            .arg(expected.as_str())
            .arg(serde_json::to_string(job)?)
            .arg(guard)
            .arg(lease_op)
            .arg(score)
            .arg(job.id.to_string())
            .invoke_async(&mut conn)
            .await?;

        Ok(CasOutcome::from_code(code))
    }

    /// Re-reads and re-applies `transition` until the write lands or the
    /// state machine rejects it.
    async fn update<F>(&self, id: Uuid, mut transition: F) -> Result<Job, StoreError>
    where
        F: FnMut(&mut Job) -> Result<(), TransitionError> + Send,
    {
        loop {
            let mut job = self.fetch(id).await?.ok_or(StoreError::NotFound(id))?;
            let expected = job.status;
            transition(&mut job).map_err(|e| StoreError::invalid(id, e))?;

            match self.compare_and_set(expected, &job, None).await? {
                CasOutcome::Written => return Ok(job),
                CasOutcome::Missing => return Err(StoreError::NotFound(id)),
                outcome => {
                    debug!(job_id = %id, ?outcome, "Concurrent job update, retrying");
                }
            }
        }
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(
        &self,
        id: Uuid,
        payload: TaskPayload,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let job = Job::new(id, payload, now, self.config.ttl_delta());
        let serialized = serde_json::to_string(&job)?;

        let mut conn = self.redis.clone();
        let created: Option<String> = redis::cmd("SET")
            .arg(Self::job_key(id))
            .arg(serialized)
            .arg("NX")
            .arg("PXAT")
            .arg(job.expires_at.timestamp_millis())
            .query_async(&mut conn)
            .await?;

        match created {
            Some(_) => Ok(job),
            None => Err(StoreError::DuplicateJob(id)),
        }
    }

    async fn transition_to_running(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let lease_until = self.config.lease_deadline(now);
        self.update(id, |job| job.start(now, worker_id, lease_until))
            .await
    }

    async fn renew_lease(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let lease_until = self.config.lease_deadline(now);
        self.update(id, |job| job.renew_lease(worker_id, lease_until))
            .await
            .map(|_| ())
    }

    async fn complete_success(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        result: JobResult,
    ) -> Result<(), StoreError> {
        self.update(id, |job| job.succeed(now, result.clone()))
            .await
            .map(|_| ())
    }

    async fn complete_failure(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        self.update(id, |job| job.fail(now, error))
            .await
            .map(|_| ())
    }

    async fn read(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        self.fetch(id).await
    }

    async fn lapsed_leases(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let mut conn = self.redis.clone();
        let members: Vec<String> = conn
            .zrangebyscore(LEASE_INDEX_KEY, "-inf", now.timestamp_millis())
            .await?;

        Ok(members
            .iter()
            .filter_map(|member| Uuid::parse_str(member).ok())
            .collect())
    }

    async fn fail_lapsed(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StoreError> {
        let Some(mut job) = self.fetch(id).await? else {
            let mut conn = self.redis.clone();
            conn.zrem::<_, _, ()>(LEASE_INDEX_KEY, id.to_string())
                .await?;
            return Ok(false);
        };
        if !job.lease_lapsed(now) {
            return Ok(false);
        }

        let guard = job.lease_expires_at;
        if job.fail(now, error).is_err() {
            return Ok(false);
        }

        let outcome = self
            .compare_and_set(JobStatus::Running, &job, guard)
            .await?;
        Ok(outcome == CasOutcome::Written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_key_layout() {
        let id = Uuid::new_v4();
        assert_eq!(RedisJobStore::job_key(id), format!("job:{}", id));
    }

    #[test]
    fn test_cas_outcome_codes() {
        assert_eq!(CasOutcome::from_code(1), CasOutcome::Written);
        assert_eq!(CasOutcome::from_code(0), CasOutcome::Missing);
        assert_eq!(CasOutcome::from_code(-1), CasOutcome::StatusChanged);
        assert_eq!(CasOutcome::from_code(-2), CasOutcome::LeaseChanged);
    }

    #[test]
    fn test_lease_guard_matches_stored_encoding() {
        let deadline = Utc::now();
        let job_json = serde_json::json!({ "lease_expires_at": deadline });
        let guard = serde_json::to_value(deadline).expect("serialize");

        assert_eq!(job_json["lease_expires_at"], guard);
        assert!(guard.is_string());
    }
}
