//! HTTP API.
//!
//! ```text
//!   GET  /health            liveness, no auth
//!   GET  /metrics           Prometheus exposition, no auth
//!   POST /capture_async     submit a task, returns the job id
//!   GET  /jobs/{job_id}     job status
//!   POST /capture           plan + file inline, refused when research is needed
//! ```
//!
//! The last three require the `X-API-Key` header.

pub mod errors;
pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::metrics::metrics_handler;
use crate::pipeline::EnrichmentPipeline;
use crate::scheduler::{StatusService, SubmissionService};

pub use errors::ApiError;
pub use middleware::API_KEY_HEADER;

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub submissions: SubmissionService,
    pub status: StatusService,
    /// Backs `POST /capture`; `None` disables the route.
    pub pipeline: Option<Arc<EnrichmentPipeline>>,
    pub api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(submissions: SubmissionService, status: StatusService) -> Self {
        Self {
            submissions,
            status,
            pipeline: None,
            api_key: None,
        }
    }

    pub fn with_pipeline(mut self, pipeline: Arc<EnrichmentPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.map(Arc::from);
        self
    }
}

/// Build the full HTTP router.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/capture_async", post(handlers::capture_async))
        .route("/capture", post(handlers::capture))
        .route("/jobs/{job_id}", get(handlers::get_job))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_api_key,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(metrics_handler))
        .merge(protected)
        .layer(axum::middleware::from_fn(middleware::log_requests))
        .with_state(state)
}
