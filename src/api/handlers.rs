//! Route handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::errors::ApiError;
use super::AppState;
use crate::pipeline::{DocumentRef, DocumentRequest, PlanOutput};
use crate::scheduler::{JobView, TaskPayload};

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

#[derive(Debug, Serialize)]
pub struct CaptureAsyncResponse {
    pub ok: bool,
    pub job_id: Uuid,
    pub status_url: String,
}

/// POST /capture_async
///
/// Creates a queued job and returns where to poll for it.
pub async fn capture_async(
    State(state): State<AppState>,
    payload: Result<Json<TaskPayload>, JsonRejection>,
) -> Result<Json<CaptureAsyncResponse>, ApiError> {
    let Json(payload) = payload?;
    let receipt = state.submissions.submit(payload).await?;
    Ok(Json(CaptureAsyncResponse {
        ok: true,
        job_id: receipt.job_id,
        status_url: receipt.status_url,
    }))
}

/// GET /jobs/{job_id}
///
/// Ids that do not parse as UUIDs can never have been issued, so they read
/// as not found like expired ones.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let job_id = Uuid::parse_str(&job_id).map_err(|_| ApiError::JobNotFound)?;
    state
        .status
        .get(job_id)
        .await?
        .map(Json)
        .ok_or(ApiError::JobNotFound)
}

#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    pub ok: bool,
    pub document: DocumentRef,
    pub plan: PlanOutput,
}

/// POST /capture
///
/// Plans the task inline and files the document without research. Tasks
/// that need research are refused with 409 so the client retries on the
/// async route; no job is created either way.
pub async fn capture(
    State(state): State<AppState>,
    payload: Result<Json<TaskPayload>, JsonRejection>,
) -> Result<Json<CaptureResponse>, ApiError> {
    let Json(payload) = payload?;
    let pipeline = state.pipeline.as_ref().ok_or(ApiError::SyncCaptureDisabled)?;
    let payload = payload.normalized();

    let plan = pipeline.plan(&payload).await?;
    if plan.need_deep_research {
        return Err(ApiError::NeedsDeepResearch);
    }

    let document = pipeline
        .create_document(DocumentRequest {
            payload: &payload,
            plan: &plan,
            research: None,
        })
        .await?;

    info!(document_id = %document.document_id, "Synchronous capture filed");
    Ok(Json(CaptureResponse {
        ok: true,
        document,
        plan,
    }))
}
