//! Sequential runner for the enrichment stages.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use super::{
    DocumentRef, DocumentRequest, DocumentSink, PlanOutput, Planner, Researcher, Stage,
    StageError, StageFailure,
};
use crate::metrics::MetricsCollector;
use crate::scheduler::{JobResult, TaskPayload};

/// Runs Stage A, the optional Stage B and document creation for one payload.
///
/// The runner holds no per-job state, so one instance is shared by every
/// worker in a pool.
pub struct EnrichmentPipeline {
    planner: Arc<dyn Planner>,
    researcher: Arc<dyn Researcher>,
    documents: Arc<dyn DocumentSink>,
    metrics: MetricsCollector,
}

impl EnrichmentPipeline {
    /// Creates a pipeline from its three stage implementations.
    pub fn new(
        planner: Arc<dyn Planner>,
        researcher: Arc<dyn Researcher>,
        documents: Arc<dyn DocumentSink>,
    ) -> Self {
        Self {
            planner,
            researcher,
            documents,
            metrics: MetricsCollector::new(),
        }
    }

    /// Runs the full pipeline.
    ///
    /// Stage B only runs when the plan asks for deep research. A research
    /// failure fails the whole run; the plan is not kept as a partial result.
    pub async fn run(&self, payload: &TaskPayload) -> Result<JobResult, StageFailure> {
        let plan = self.plan(payload).await?;

        let deep_research = if plan.need_deep_research {
            Some(
                self.timed(Stage::Research, self.researcher.research(&plan))
                    .await?,
            )
        } else {
            None
        };

        let document = self
            .create_document(DocumentRequest {
                payload,
                plan: &plan,
                research: deep_research.as_ref(),
            })
            .await?;

        Ok(JobResult {
            plan,
            deep_research,
            document,
        })
    }

    /// Runs Stage A only.
    pub async fn plan(&self, payload: &TaskPayload) -> Result<PlanOutput, StageFailure> {
        self.timed(Stage::Planning, self.planner.plan(payload)).await
    }

    /// Runs the document stage only.
    pub async fn create_document(
        &self,
        request: DocumentRequest<'_>,
    ) -> Result<DocumentRef, StageFailure> {
        self.timed(Stage::Document, self.documents.create_document(request))
            .await
    }

    async fn timed<T, F>(&self, stage: Stage, call: F) -> Result<T, StageFailure>
    where
        F: Future<Output = Result<T, StageError>>,
    {
        let start = Instant::now();
        let result = call.await;
        let latency = start.elapsed();

        self.metrics
            .record_stage(stage.as_str(), result.is_ok(), latency.as_secs_f64());

        match result {
            Ok(value) => {
                debug!(stage = %stage, latency_ms = latency.as_millis(), "Stage completed");
                Ok(value)
            }
            Err(err) => {
                warn!(stage = %stage, error = %err, latency_ms = latency.as_millis(), "Stage failed");
                Err(StageFailure::new(stage, err))
            }
        }
    }
}
