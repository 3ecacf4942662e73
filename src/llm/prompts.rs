//! Prompt templates for the planning and research stages.

use crate::scheduler::TaskPayload;

/// System prompt for Stage A. The model must answer with one JSON object.
pub const PLANNING_SYSTEM_PROMPT: &str = r#"You are a task planning assistant. Given a task from the user, output a STRICT JSON object only. No markdown, no explanations. Output ONLY valid JSON matching this schema exactly:

{
  "need_deep_research": boolean,
  "deep_research_prompt": string | null,
  "research_todos": string[],
  "human_todos": string[],
  "document_title": string,
  "summary": string,
  "tags": string[]
}

Rules:
- need_deep_research: true only if the task requires web research, external data, or non-obvious facts. false for straightforward execution tasks.
- deep_research_prompt: exactly one detailed research question if need_deep_research is true; otherwise null.
- research_todos: items requiring research before human action.
- human_todos: atomic, checkbox-ready action items for the user.
- document_title: concise title for the page that will hold this task.
- summary: brief task summary.
- tags: optional labels for the page.
Output JSON only."#;

/// Sent with the unparseable answer when Stage A did not return JSON.
pub const PLANNING_REPAIR_PROMPT: &str = "Your previous response was not valid JSON. \
Please output ONLY a valid JSON object, no other text. Match the schema: need_deep_research, \
deep_research_prompt, research_todos, human_todos, document_title, summary, tags.";

/// System prompt for Stage B.
pub const RESEARCH_SYSTEM_PROMPT: &str = r#"You are a deep research assistant. Given a research prompt, output a STRICT JSON object only:

{
  "research_summary": string,
  "key_takeaways": string[],
  "sources": string[]
}

- research_summary: comprehensive summary of findings.
- key_takeaways: bullet points of main findings.
- sources: URLs or references if available.
Output JSON only."#;

/// Placeholder sent to the repair turn when the model returned nothing.
pub const EMPTY_OUTPUT_PLACEHOLDER: &str = "No output.";

/// Builds the user message for Stage A.
pub fn planning_input(payload: &TaskPayload) -> String {
    let mut input = format!(
        "Task name: {}\nTask content: {}",
        payload.task_name, payload.task_content
    );
    if let Some(task_date) = payload.task_date {
        input.push_str(&format!("\nTask date: {}", task_date.to_rfc3339()));
    }
    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    #[test]
    fn test_planning_input_without_date() {
        let payload = TaskPayload::new("Buy milk", "2 litres, oat", Utc::now());
        assert_eq!(
            planning_input(&payload),
            "Task name: Buy milk\nTask content: 2 litres, oat"
        );
    }

    #[test]
    fn test_planning_input_with_date() {
        let due = DateTime::parse_from_rfc3339("2026-05-01T09:00:00+02:00").expect("date");
        let payload = TaskPayload::new("Dentist", "Book checkup", Utc::now()).with_task_date(due);
        let input = planning_input(&payload);
        assert!(input.ends_with("\nTask date: 2026-05-01T09:00:00+02:00"));
    }

    #[test]
    fn test_prompts_name_every_plan_field() {
        for field in [
            "need_deep_research",
            "deep_research_prompt",
            "research_todos",
            "human_todos",
            "document_title",
            "summary",
            "tags",
        ] {
            assert!(PLANNING_SYSTEM_PROMPT.contains(field), "{field}");
            assert!(PLANNING_REPAIR_PROMPT.contains(field), "{field}");
        }
    }
}
