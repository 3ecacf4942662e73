//! LLM-backed implementations of the planning and research stages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::client::{GenerationRequest, LlmProvider, Message};
use super::prompts::{
    planning_input, EMPTY_OUTPUT_PLACEHOLDER, PLANNING_REPAIR_PROMPT, PLANNING_SYSTEM_PROMPT,
    RESEARCH_SYSTEM_PROMPT,
};
use crate::error::LlmError;
use crate::pipeline::{PlanOutput, Planner, ResearchOutput, Researcher, StageError};
use crate::scheduler::TaskPayload;
use crate::utils::extract_json_as;

/// Deadline for one planning call.
pub const PLAN_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for the research call; research models browse before answering.
pub const RESEARCH_TIMEOUT: Duration = Duration::from_secs(600);

pub const PLAN_PARSE_ERROR: &str = "Could not parse Stage A output as valid JSON after retry";
pub const RESEARCH_PARSE_ERROR: &str = "Could not parse Stage B output as valid JSON";

/// Sends one system + user exchange and returns the reply text.
///
/// A reply with a choice but no text reads as an empty string; a reply with
/// no choices at all is an error.
async fn complete(
    provider: &dyn LlmProvider,
    request: GenerationRequest,
) -> Result<String, LlmError> {
    let response = provider.generate(request).await?;
    if let Some(usage) = &response.usage {
        debug!(
            model = %response.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "LLM call completed"
        );
    }
    response
        .first_content()
        .map(str::to_string)
        .ok_or(LlmError::EmptyResponse)
}

/// Stage A: plans a task with one repair attempt on malformed output.
pub struct LlmPlanner {
    provider: Arc<dyn LlmProvider>,
    model: String,
    timeout: Duration,
}

impl LlmPlanner {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout: PLAN_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request(&self, system: &str, user: String) -> GenerationRequest {
        GenerationRequest::new(
            self.model.clone(),
            vec![Message::system(system), Message::user(user)],
        )
        .with_json_output()
        .with_timeout(self.timeout)
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, payload: &TaskPayload) -> Result<PlanOutput, StageError> {
        let text = complete(
            self.provider.as_ref(),
            self.request(PLANNING_SYSTEM_PROMPT, planning_input(payload)),
        )
        .await?;

        let parse_error = match extract_json_as::<PlanOutput>(&text) {
            Ok(plan) => return Ok(plan),
            Err(e) => e,
        };
        warn!(error = %parse_error, "Planning output was not valid JSON, sending repair prompt");

        let repair_input = if text.trim().is_empty() {
            EMPTY_OUTPUT_PLACEHOLDER.to_string()
        } else {
            text
        };
        let repaired = complete(
            self.provider.as_ref(),
            self.request(PLANNING_REPAIR_PROMPT, repair_input),
        )
        .await?;

        extract_json_as::<PlanOutput>(&repaired).map_err(|e| {
            warn!(error = %e, "Repaired planning output was not valid JSON");
            StageError::new(PLAN_PARSE_ERROR)
        })
    }
}

/// Stage B: answers the plan's research question.
pub struct LlmResearcher {
    provider: Arc<dyn LlmProvider>,
    model: String,
    timeout: Duration,
}

impl LlmResearcher {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout: RESEARCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Researcher for LlmResearcher {
    async fn research(&self, plan: &PlanOutput) -> Result<ResearchOutput, StageError> {
        // Search-enabled models reject `response_format`, so JSON is asked for
        // in the prompt only.
        let request = GenerationRequest::new(
            self.model.clone(),
            vec![
                Message::system(RESEARCH_SYSTEM_PROMPT),
                Message::user(plan.research_prompt()),
            ],
        )
        .with_timeout(self.timeout);

        let text = complete(self.provider.as_ref(), request).await?;

        extract_json_as::<ResearchOutput>(&text).map_err(|e| {
            warn!(error = %e, "Research output was not valid JSON");
            StageError::new(RESEARCH_PARSE_ERROR)
        })
    }
}
