//! Error responses for the HTTP API.
//!
//! Every error body has the shape `{"ok": false, "error": "<message>"}`.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::pipeline::StageFailure;
use crate::scheduler::{StoreError, SubmitError, NOT_FOUND_MESSAGE};

pub const UNAUTHORIZED_MESSAGE: &str = "Invalid or missing API key";
pub const DEEP_RESEARCH_MESSAGE: &str = "Task requires deep research. Use POST /capture_async instead.";
pub const SYNC_CAPTURE_DISABLED_MESSAGE: &str =
    "Synchronous capture is not configured on this server";

/// Failures a handler can report to the client.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    /// The request body is missing, not JSON, or not a valid task.
    InvalidBody { status: StatusCode, message: String },
    /// Unknown, expired or malformed job id.
    JobNotFound,
    /// The plan asks for research; the client must use the async route.
    NeedsDeepResearch,
    /// A backend the request depends on could not be reached.
    Unavailable(String),
    /// An enrichment stage failed during a synchronous capture.
    Stage(StageFailure),
    SyncCaptureDisabled,
    Internal(String),
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Store(e) => e.into(),
            SubmitError::Queue(e) => ApiError::Unavailable(e.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            e @ StoreError::Unavailable(_) => ApiError::Unavailable(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidBody {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<StageFailure> for ApiError {
    fn from(err: StageFailure) -> Self {
        ApiError::Stage(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => json_error(StatusCode::UNAUTHORIZED, UNAUTHORIZED_MESSAGE),
            ApiError::InvalidBody { status, message } => json_error(status, message),
            ApiError::JobNotFound => json_error(StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE),
            ApiError::NeedsDeepResearch => (
                StatusCode::CONFLICT,
                Json(json!({
                    "ok": false,
                    "error": DEEP_RESEARCH_MESSAGE,
                    "use_capture_async": true,
                })),
            )
                .into_response(),
            ApiError::Unavailable(msg) => {
                error!(error = %msg, "Backend unavailable");
                json_error(StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            ApiError::Stage(failure) => json_error(StatusCode::BAD_GATEWAY, failure.message),
            ApiError::SyncCaptureDisabled => {
                json_error(StatusCode::SERVICE_UNAVAILABLE, SYNC_CAPTURE_DISABLED_MESSAGE)
            }
            ApiError::Internal(msg) => {
                error!(error = %msg, "Internal error");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        }
    }
}

pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "ok": false,
            "error": message.into(),
        })),
    )
        .into_response()
}
