//! Error types for the external collaborators of the job pipeline.
//!
//! The job lifecycle keeps its errors next to the code that raises them
//! (`StoreError`, `QueueError`, `PoolError`, `SubmitError`). This module holds
//! the errors of the outbound HTTP integrations:
//! - LLM API interactions (planning and deep research)
//! - Document creation in Notion

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: OPENAI_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("LLM returned an empty response")]
    EmptyResponse,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(err.to_string())
        } else {
            LlmError::RequestFailed(err.to_string())
        }
    }
}

/// Errors that can occur while creating the external document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Missing Notion configuration: {0}")]
    MissingConfig(&'static str),

    #[error("Notion request failed: {0}")]
    RequestFailed(String),

    #[error("Notion request timed out: {0}")]
    Timeout(String),

    #[error("Notion API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Notion response did not contain a page id")]
    MissingPageId,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for DocumentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DocumentError::Timeout(err.to_string())
        } else {
            DocumentError::RequestFailed(err.to_string())
        }
    }
}
