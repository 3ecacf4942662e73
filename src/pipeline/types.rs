//! Data exchanged between the enrichment stages.

use serde::{Deserialize, Serialize};

/// Output of the planning stage (Stage A).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanOutput {
    /// Whether the task needs the deep research stage.
    pub need_deep_research: bool,
    /// The research question to hand to Stage B, when research is needed.
    #[serde(default)]
    pub deep_research_prompt: Option<String>,
    /// Items that need research before the user can act.
    #[serde(default)]
    pub research_todos: Vec<String>,
    /// Checkbox-ready action items for the user.
    #[serde(default)]
    pub human_todos: Vec<String>,
    /// Title for the created document.
    #[serde(alias = "notion_page_title")]
    pub document_title: String,
    /// Short summary of the task.
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PlanOutput {
    /// The question Stage B should answer.
    ///
    /// Falls back to the plan summary when the planner flagged research but
    /// did not phrase a prompt.
    pub fn research_prompt(&self) -> &str {
        match self.deep_research_prompt.as_deref() {
            Some(prompt) if !prompt.trim().is_empty() => prompt,
            _ => &self.summary,
        }
    }
}

/// Output of the deep research stage (Stage B).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchOutput {
    pub research_summary: String,
    #[serde(default)]
    pub key_takeaways: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Reference to the document created for a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentRef {
    pub document_id: String,
    pub document_url: String,
}
