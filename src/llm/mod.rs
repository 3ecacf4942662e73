//! LLM integration for task-capture.
//!
//! This module provides the two language-model stages of the enrichment
//! pipeline on top of an OpenAI-compatible chat-completions client:
//!
//! - [`LlmPlanner`] (Stage A): turns a task into a structured plan, with one
//!   repair round-trip when the model does not answer with JSON
//! - [`LlmResearcher`] (Stage B): answers the plan's research question
//!
//! ```ignore
//! use task_capture::llm::{ChatClient, LlmPlanner, LlmResearcher};
//! use std::sync::Arc;
//!
//! let client = Arc::new(ChatClient::new("https://api.openai.com/v1", api_key)?);
//! let planner = LlmPlanner::new(client.clone(), "gpt-4o-mini");
//! let researcher = LlmResearcher::new(client, "gpt-4o");
//! ```

pub mod client;
pub mod prompts;
pub mod stages;

pub use client::{
    ChatClient, Choice, GenerationRequest, GenerationResponse, LlmProvider, Message,
    ResponseFormat, Usage, DEFAULT_API_BASE,
};
pub use stages::{LlmPlanner, LlmResearcher, PLAN_TIMEOUT, RESEARCH_TIMEOUT};
