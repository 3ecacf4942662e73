//! HTTP API tests driving the router in-process.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use task_capture::api::{self, AppState};
use task_capture::pipeline::{
    DocumentRef, DocumentRequest, DocumentSink, EnrichmentPipeline, PlanOutput, Planner,
    ResearchOutput, Researcher, StageError,
};
use task_capture::scheduler::{
    InMemoryJobQueue, InMemoryJobStore, JobQueue, QueueError, StatusService, SubmissionService,
    TaskPayload,
};

const API_KEY: &str = "test-key";

struct FixedPlanner {
    need_deep_research: bool,
}

#[async_trait]
impl Planner for FixedPlanner {
    async fn plan(&self, payload: &TaskPayload) -> Result<PlanOutput, StageError> {
        Ok(PlanOutput {
            need_deep_research: self.need_deep_research,
            deep_research_prompt: None,
            research_todos: vec![],
            human_todos: vec!["Go to the shop".to_string()],
            document_title: payload.task_name.clone(),
            summary: "Errand".to_string(),
            tags: vec![],
        })
    }
}

struct UnusedResearcher;

#[async_trait]
impl Researcher for UnusedResearcher {
    async fn research(&self, _plan: &PlanOutput) -> Result<ResearchOutput, StageError> {
        Err(StageError::new("research is not part of synchronous capture"))
    }
}

struct FixedSink;

#[async_trait]
impl DocumentSink for FixedSink {
    async fn create_document(&self, _request: DocumentRequest<'_>) -> Result<DocumentRef, StageError> {
        Ok(DocumentRef {
            document_id: "page-1".to_string(),
            document_url: "https://www.notion.so/page1".to_string(),
        })
    }
}

/// Queue whose backend is unreachable.
struct DownQueue;

#[async_trait]
impl JobQueue for DownQueue {
    async fn enqueue(&self, _id: Uuid) -> Result<(), QueueError> {
        Err(QueueError::Unavailable("connection refused".to_string()))
    }

    async fn dequeue(&self, _timeout: std::time::Duration) -> Result<Option<Uuid>, QueueError> {
        Ok(None)
    }

    async fn ack(&self, _id: Uuid) -> Result<(), QueueError> {
        Ok(())
    }

    async fn recover_unacked(&self) -> Result<usize, QueueError> {
        Ok(0)
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(0)
    }
}

fn pipeline(need_deep_research: bool) -> Arc<EnrichmentPipeline> {
    Arc::new(EnrichmentPipeline::new(
        Arc::new(FixedPlanner { need_deep_research }),
        Arc::new(UnusedResearcher),
        Arc::new(FixedSink),
    ))
}

fn app_with(queue: Arc<dyn JobQueue>, api_key: Option<&str>) -> Router {
    let store = Arc::new(InMemoryJobStore::default());
    let state = AppState::new(
        SubmissionService::new(store.clone(), queue),
        StatusService::new(store),
    )
    .with_api_key(api_key.map(str::to_string));
    api::router(state)
}

fn app() -> Router {
    app_with(Arc::new(InMemoryJobQueue::new()), Some(API_KEY))
}

fn app_with_pipeline(need_deep_research: bool) -> Router {
    let store = Arc::new(InMemoryJobStore::default());
    let state = AppState::new(
        SubmissionService::new(store.clone(), Arc::new(InMemoryJobQueue::new())),
        StatusService::new(store),
    )
    .with_api_key(Some(API_KEY.to_string()))
    .with_pipeline(pipeline(need_deep_research));
    api::router(state)
}

fn task_body() -> Body {
    Body::from(
        json!({
            "task_name": "  Buy milk ",
            "client_time": "2026-04-01T08:00:00+02:00",
            "task_content": "2 litres, oat",
        })
        .to_string(),
    )
}

fn post(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(task_body()).expect("request")
}

fn get(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::empty()).expect("request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn test_health_needs_no_key() {
    let response = app().oneshot(get("/health", None)).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "ok": true }));
}

#[tokio::test]
async fn test_metrics_needs_no_key() {
    let response = app().oneshot(get("/metrics", None)).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_or_wrong_key_is_rejected() {
    let response = app()
        .oneshot(post("/capture_async", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "Invalid or missing API key");

    let response = app()
        .oneshot(get(&format!("/jobs/{}", Uuid::new_v4()), Some("wrong")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unconfigured_key_rejects_everything() {
    let app = app_with(Arc::new(InMemoryJobQueue::new()), None);
    let response = app
        .oneshot(post("/capture_async", Some("")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_capture_async_then_poll() {
    let app = app();

    let response = app
        .clone()
        .oneshot(post("/capture_async", Some(API_KEY)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["ok"], true);
    let job_id = body["job_id"].as_str().expect("job id").to_string();
    assert_eq!(body["status_url"], format!("/jobs/{}", job_id));

    let response = app
        .oneshot(get(&format!("/jobs/{}", job_id), Some(API_KEY)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let view = json_body(response).await;
    assert_eq!(view["status"], "queued");
    assert_eq!(view["job_id"], job_id);
    assert_eq!(view["payload"]["task_name"], "Buy milk");
    assert_eq!(view["payload"]["source"], "shortcut");
    assert!(view.get("error").is_none());
}

#[tokio::test]
async fn test_unknown_and_malformed_ids_are_not_found() {
    for uri in [format!("/jobs/{}", Uuid::new_v4()), "/jobs/not-a-uuid".to_string()] {
        let response = app().oneshot(get(&uri, Some(API_KEY))).await.expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body, json!({ "ok": false, "error": "Job not found or expired" }));
    }
}

#[tokio::test]
async fn test_queue_outage_is_service_unavailable() {
    let app = app_with(Arc::new(DownQueue), Some(API_KEY));
    let response = app
        .oneshot(post("/capture_async", Some(API_KEY)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["ok"], false);
    assert!(body["error"]
        .as_str()
        .is_some_and(|e| e.contains("connection refused")));
}

#[tokio::test]
async fn test_sync_capture_files_document() {
    let response = app_with_pipeline(false)
        .oneshot(post("/capture", Some(API_KEY)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["document"]["document_url"], "https://www.notion.so/page1");
    assert_eq!(body["plan"]["document_title"], "Buy milk");
}

#[tokio::test]
async fn test_sync_capture_refuses_research_tasks() {
    let response = app_with_pipeline(true)
        .oneshot(post("/capture", Some(API_KEY)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = json_body(response).await;
    assert_eq!(body["ok"], false);
    assert_eq!(body["use_capture_async"], true);
    assert_eq!(
        body["error"],
        "Task requires deep research. Use POST /capture_async instead."
    );
}

#[tokio::test]
async fn test_sync_capture_without_pipeline_is_unavailable() {
    let response = app()
        .oneshot(post("/capture", Some(API_KEY)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_malformed_body_gets_error_shape() {
    let cases = [
        ("not json", StatusCode::BAD_REQUEST),
        (r#"{"task_name": "Buy milk"}"#, StatusCode::UNPROCESSABLE_ENTITY),
    ];
    for (body, status) in cases {
        let request = Request::builder()
            .method("POST")
            .uri("/capture_async")
            .header("content-type", "application/json")
            .header("x-api-key", API_KEY)
            .body(Body::from(body))
            .expect("request");
        let response = app().oneshot(request).await.expect("response");
        assert_eq!(response.status(), status);

        let body = json_body(response).await;
        assert_eq!(body["ok"], false);
        assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
    }
}
