//! Redis-backed store and queue tests.
//!
//! These need a running Redis server:
//!
//! ```text
//! REDIS_URL=redis://localhost:6379/15 cargo test --test redis_backend -- --ignored
//! ```

use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use task_capture::pipeline::{DocumentRef, PlanOutput};
use task_capture::scheduler::{
    JobQueue, JobResult, JobStatus, JobStore, RedisJobQueue, RedisJobStore, StoreConfig,
    StoreError, TaskPayload, LEASE_EXPIRED_ERROR,
};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/15".to_string())
}

fn payload() -> TaskPayload {
    TaskPayload::new("Buy milk", "2 litres, oat", Utc::now())
}

fn result() -> JobResult {
    JobResult {
        plan: PlanOutput {
            need_deep_research: false,
            deep_research_prompt: None,
            research_todos: vec![],
            human_todos: vec!["Buy".to_string()],
            document_title: "Buy milk".to_string(),
            summary: "Errand".to_string(),
            tags: vec![],
        },
        deep_research: None,
        document: DocumentRef {
            document_id: "page-1".to_string(),
            document_url: "https://www.notion.so/page1".to_string(),
        },
    }
}

#[tokio::test]
#[ignore = "requires a Redis server at REDIS_URL"]
async fn test_store_lifecycle() {
    let store = RedisJobStore::connect(&redis_url(), StoreConfig::default())
        .await
        .expect("connect");
    let id = Uuid::new_v4();
    let now = Utc::now();

    let submitted = payload();
    store.create(id, submitted.clone(), now).await.expect("create");
    assert!(matches!(
        store.create(id, payload(), now).await,
        Err(StoreError::DuplicateJob(_))
    ));

    let job = store.read(id).await.expect("read").expect("job");
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.payload, submitted);

    store
        .transition_to_running(id, "worker-0", now)
        .await
        .expect("claim");
    assert!(matches!(
        store.transition_to_running(id, "worker-1", now).await,
        Err(StoreError::InvalidTransition { .. })
    ));

    store.renew_lease(id, "worker-0", Utc::now()).await.expect("renew");
    store
        .complete_success(id, Utc::now(), result())
        .await
        .expect("succeed");

    let job = store.read(id).await.expect("read").expect("job");
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(job.result.is_some());
    assert!(job.lease_expires_at.is_none());
    assert!(job.expires_at > job.created_at);
}

#[tokio::test]
#[ignore = "requires a Redis server at REDIS_URL"]
async fn test_store_records_expire() {
    let store = RedisJobStore::connect(
        &redis_url(),
        StoreConfig::default()
            .with_ttl(Duration::from_secs(1))
            .with_lease(Duration::from_millis(500)),
    )
    .await
    .expect("connect");
    let id = Uuid::new_v4();

    store.create(id, payload(), Utc::now()).await.expect("create");
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(store.read(id).await.expect("read").is_none());
    assert!(matches!(
        store.transition_to_running(id, "worker-0", Utc::now()).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
#[ignore = "requires a Redis server at REDIS_URL"]
async fn test_lapsed_lease_is_failed_once() {
    let store = RedisJobStore::connect(
        &redis_url(),
        StoreConfig::default().with_lease(Duration::from_millis(200)),
    )
    .await
    .expect("connect");
    let id = Uuid::new_v4();

    store.create(id, payload(), Utc::now()).await.expect("create");
    store
        .transition_to_running(id, "worker-0", Utc::now())
        .await
        .expect("claim");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let now = Utc::now();
    assert!(store.lapsed_leases(now).await.expect("scan").contains(&id));
    assert!(store
        .fail_lapsed(id, now, LEASE_EXPIRED_ERROR)
        .await
        .expect("reap"));
    assert!(!store
        .fail_lapsed(id, now, LEASE_EXPIRED_ERROR)
        .await
        .expect("reap again"));

    let job = store.read(id).await.expect("read").expect("job");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some(LEASE_EXPIRED_ERROR));
    assert!(!store.lapsed_leases(Utc::now()).await.expect("scan").contains(&id));
}

#[tokio::test]
#[ignore = "requires a Redis server at REDIS_URL"]
async fn test_queue_is_fifo_and_recovers_unacked() {
    let name = format!("queue:test:{}", Uuid::new_v4());
    let queue = RedisJobQueue::connect(&redis_url(), &name)
        .await
        .expect("connect");

    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    queue.enqueue(first).await.expect("enqueue");
    queue.enqueue(second).await.expect("enqueue");
    assert_eq!(queue.len().await.expect("len"), 2);

    let timeout = Duration::from_secs(1);
    assert_eq!(queue.dequeue(timeout).await.expect("dequeue"), Some(first));
    queue.ack(first).await.expect("ack");

    assert_eq!(queue.dequeue(timeout).await.expect("dequeue"), Some(second));
    assert_eq!(queue.processing_len().await.expect("processing"), 1);

    // `second` was never acknowledged
    assert_eq!(queue.recover_unacked().await.expect("recover"), 1);
    assert_eq!(queue.processing_len().await.expect("processing"), 0);
    assert_eq!(queue.dequeue(timeout).await.expect("dequeue"), Some(second));
    queue.ack(second).await.expect("ack");

    assert_eq!(queue.dequeue(timeout).await.expect("dequeue"), None);
}
