//! Asynchronous job lifecycle: storage, queueing, workers and status.
//!
//! This module provides the infrastructure that turns a submitted task into
//! a finished document without holding the client's request open:
//!
//! - **JobStore**: Time-bounded job records with status-conditional writes
//! - **JobQueue**: FIFO hand-off of job ids with reliable dequeue
//! - **WorkerPool**: Workers competing for ids and running the pipeline
//! - **LeaseReaper**: Fails running jobs whose worker stopped renewing
//! - **SubmissionService** / **StatusService**: The client-facing operations
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │  Submission  │
//!                      │   (HTTP)     │
//!                      └──┬────────┬──┘
//!                 create  │        │ enqueue(id)
//!                 ┌───────▼──┐  ┌──▼──────────┐
//!                 │  Store   │  │    Queue    │
//!                 │ job:{id} │  │ queue:jobs  │
//!                 └───────▲──┘  └──┬──────────┘
//!                         │        │ dequeue
//!         ┌───────────────┼────────┼──────────────┐
//!         │               │        │              │
//!         ▼               │        ▼              ▼
//!    ┌─────────┐     transitions ┌─────────┐  ┌─────────┐
//!    │ Worker 1│ ◄──────┘        │ Worker 2│  │ Worker N│
//!    └─────────┘                 └─────────┘  └─────────┘
//! ```
//!
//! # Job State Machine
//!
//! ```text
//!   queued ──claim──► running ──pipeline ok──────► succeeded
//!                        │
//!                        ├──stage failed──────────► failed
//!                        └──lease lapsed (reaper)─► failed
//! ```
//!
//! Records expire `ttl` after creation whatever their status, and read as
//! not found from then on.
//!
//! # Example
//!
//! ```rust,ignore
//! use task_capture::scheduler::{
//!     InMemoryJobQueue, InMemoryJobStore, StatusService, SubmissionService, TaskPayload,
//!     WorkerPool, WorkerPoolConfig,
//! };
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryJobStore::default());
//! let queue = Arc::new(InMemoryJobQueue::new());
//!
//! let submissions = SubmissionService::new(store.clone(), queue.clone());
//! let receipt = submissions
//!     .submit(TaskPayload::new("Buy milk", "2 litres", chrono::Utc::now()))
//!     .await?;
//!
//! let mut pool = WorkerPool::new(WorkerPoolConfig::new(2), store.clone(), queue, pipeline);
//! pool.start().await?;
//!
//! let view = StatusService::new(store).get(receipt.job_id).await?;
//!
//! // Graceful shutdown
//! pool.shutdown().await?;
//! ```

pub mod job;
pub mod queue;
pub mod reaper;
pub mod redis_store;
pub mod status;
pub mod store;
pub mod submission;
pub mod worker_pool;

// Re-export main types for convenience
pub use job::{Job, JobResult, JobStatus, TaskPayload, TransitionError};
pub use queue::{InMemoryJobQueue, JobQueue, QueueError, RedisJobQueue, DEFAULT_QUEUE_NAME};
pub use reaper::{LeaseReaper, LEASE_EXPIRED_ERROR};
pub use redis_store::RedisJobStore;
pub use status::{JobView, StatusService, NOT_FOUND_MESSAGE};
pub use store::{InMemoryJobStore, JobStore, StoreConfig, StoreError};
pub use submission::{status_url, SubmissionReceipt, SubmissionService, SubmitError};
pub use worker_pool::{PoolError, PoolStats, Worker, WorkerPool, WorkerPoolConfig};
