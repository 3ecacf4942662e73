//! Job queue with reliable dequeue.
//!
//! The queue only carries job ids; the store holds everything else.
//!
//! # Queue Structure
//!
//! The Redis backend uses two lists:
//!
//! - `queue:jobs`: Main queue where ids are enqueued (LPUSH)
//! - `queue:jobs:processing`: Ids handed to a worker but not yet acknowledged
//!
//! # Reliability
//!
//! Ids are atomically moved from the main queue to the processing queue when
//! dequeued (BRPOPLPUSH). If a worker crashes before acknowledging, the id
//! stays in the processing queue and [`JobQueue::recover_unacked`] puts it
//! back on the main queue when a pool starts. A recovered id whose job was
//! already claimed is rejected by the store and skipped by the worker.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::warn;
use uuid::Uuid;

/// Default name of the main queue.
pub const DEFAULT_QUEUE_NAME: &str = "queue:jobs";

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// The queue backend rejected or could not complete the operation.
    #[error("Job queue unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Unavailable(err.to_string())
    }
}

/// FIFO hand-off of job ids from submitters to workers.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Appends an id to the tail of the queue.
    async fn enqueue(&self, id: Uuid) -> Result<(), QueueError>;

    /// Removes the head of the queue, waiting up to `timeout` for one.
    ///
    /// Returns `Ok(None)` when the wait elapsed with nothing to take.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Uuid>, QueueError>;

    /// Marks a dequeued id as handled.
    async fn ack(&self, id: Uuid) -> Result<(), QueueError>;

    /// Moves dequeued but unacknowledged ids back to the main queue.
    ///
    /// Returns the number of ids recovered.
    async fn recover_unacked(&self) -> Result<usize, QueueError>;

    /// Number of ids waiting in the main queue.
    async fn len(&self) -> Result<usize, QueueError>;

    async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }
}

/// Redis-based job queue with reliable dequeue.
pub struct RedisJobQueue {
    /// Used to open a dedicated connection per blocking pop.
    client: redis::Client,
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    /// Name of the main queue.
    queue_name: String,
    /// Name of the processing queue.
    processing_queue: String,
}

impl RedisJobQueue {
    /// Connects to Redis and creates a new job queue.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `queue_name` - Name of the queue (used as prefix for Redis keys)
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            redis,
            queue_name: queue_name.to_string(),
            processing_queue: format!("{}:processing", queue_name),
        })
    }

    /// Returns the queue name.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Number of ids handed out but not yet acknowledged.
    pub async fn processing_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.processing_queue).await?;
        Ok(len)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.queue_name, id.to_string())
            .await?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Uuid>, QueueError> {
        // A blocking pop would stall every other command on a shared
        // multiplexed connection.
        let mut conn = self.client.get_multiplexed_tokio_connection().await?;
        let timeout_secs = timeout.as_secs().max(1) as usize;

        // BRPOPLPUSH atomically pops from source and pushes to destination
        let result: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.queue_name)
            .arg(&self.processing_queue)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        let Some(data) = result else {
            return Ok(None);
        };

        match Uuid::parse_str(&data) {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                warn!(message = %data, error = %e, "Discarding malformed queue message");
                conn.lrem::<_, _, ()>(&self.processing_queue, 1, &data)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.lrem::<_, _, ()>(&self.processing_queue, 1, id.to_string())
            .await?;
        Ok(())
    }

    async fn recover_unacked(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let mut recovered = 0;

        let pending: Vec<String> = conn.lrange(&self.processing_queue, 0, -1).await?;

        for data in pending {
            // Use a transaction to atomically remove from processing and add to main
            let mut pipe = redis::pipe();
            pipe.atomic().lrem(&self.processing_queue, 1, &data);
            if Uuid::parse_str(&data).is_ok() {
                pipe.rpush(&self.queue_name, &data);
                recovered += 1;
            } else {
                warn!(message = %data, "Dropping malformed message from processing queue");
            }
            pipe.query_async::<_, ()>(&mut conn).await?;
        }

        Ok(recovered)
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.queue_name).await?;
        Ok(len)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Uuid>,
    in_flight: Vec<Uuid>,
}

/// In-process queue for tests and local development.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ids handed out but not yet acknowledged.
    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, id: Uuid) -> Result<(), QueueError> {
        self.state.lock().await.pending.push_back(id);
        self.available.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Uuid>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.available.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(id) = state.pending.pop_front() {
                    state.in_flight.push(id);
                    return Ok(Some(id));
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, id: Uuid) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if let Some(pos) = state.in_flight.iter().position(|held| *held == id) {
            state.in_flight.remove(pos);
        }
        Ok(())
    }

    async fn recover_unacked(&self) -> Result<usize, QueueError> {
        let recovered = {
            let mut state = self.state.lock().await;
            let in_flight = std::mem::take(&mut state.in_flight);
            for id in in_flight.iter().rev() {
                state.pending.push_front(*id);
            }
            in_flight.len()
        };
        for _ in 0..recovered {
            self.available.notify_one();
        }
        Ok(recovered)
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.state.lock().await.pending.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_queue_error_display() {
        let err = QueueError::ConnectionFailed("timeout".to_string());
        assert!(err.to_string().contains("timeout"));

        let err = QueueError::Unavailable("broken pipe".to_string());
        assert!(err.to_string().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = InMemoryJobQueue::new();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.enqueue(*id).await.expect("enqueue");
        }

        for expected in &ids {
            let got = queue
                .dequeue(Duration::from_millis(10))
                .await
                .expect("dequeue");
            assert_eq!(got, Some(*expected));
        }
        assert_eq!(queue.len().await.expect("len"), 0);
    }

    #[tokio::test]
    async fn test_dequeue_times_out_when_empty() {
        let queue = InMemoryJobQueue::new();
        let got = queue
            .dequeue(Duration::from_millis(20))
            .await
            .expect("dequeue");
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let id = Uuid::new_v4();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(id).await.expect("enqueue");

        let got = waiter.await.expect("join").expect("dequeue");
        assert_eq!(got, Some(id));
    }

    #[tokio::test]
    async fn test_unacked_ids_are_recovered() {
        let queue = InMemoryJobQueue::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        queue.enqueue(first).await.expect("enqueue");
        queue.enqueue(second).await.expect("enqueue");

        let a = queue.dequeue(Duration::from_millis(10)).await.expect("dequeue");
        let b = queue.dequeue(Duration::from_millis(10)).await.expect("dequeue");
        assert_eq!((a, b), (Some(first), Some(second)));
        queue.ack(first).await.expect("ack");
        assert_eq!(queue.in_flight_len().await, 1);

        assert_eq!(queue.recover_unacked().await.expect("recover"), 1);
        assert_eq!(queue.in_flight_len().await, 0);
        assert_eq!(
            queue.dequeue(Duration::from_millis(10)).await.expect("dequeue"),
            Some(second)
        );
    }
}
