//! JSON extraction utilities for parsing LLM responses.
//!
//! Models asked for "JSON only" still wrap their answer in markdown fences or
//! add a sentence before it. The extraction functions try the following
//! strategies in order:
//!
//! 1. The whole (trimmed) content is a JSON object
//! 2. JSON in a ```json code block
//! 3. JSON in a generic code block
//! 4. The first balanced `{ ... }` anywhere in the content
//!
//! # Example
//!
//! ```
//! use task_capture::utils::json_extraction::try_extract_json_object;
//!
//! let response = "Here is the plan: {\"summary\": \"buy milk\"} Let me know!";
//! let json = try_extract_json_object(response).unwrap();
//! assert_eq!(json, "{\"summary\": \"buy milk\"}");
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use thiserror::Error;

static JSON_CODE_BLOCK: OnceLock<Option<Regex>> = OnceLock::new();
static GENERIC_CODE_BLOCK: OnceLock<Option<Regex>> = OnceLock::new();

/// Error type for JSON extraction failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated: {unclosed_braces} unclosed braces")]
    Truncated { unclosed_braces: usize },

    #[error("No JSON content found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },

    #[error("JSON does not match the expected shape: {0}")]
    Invalid(String),
}

/// Extracts the first JSON object from an LLM response.
///
/// Returns the object's source text, validated to parse as JSON.
pub fn try_extract_json_object(content: &str) -> Result<String, JsonExtractionError> {
    let trimmed = content.trim();

    // Strategy 1: the whole response
    if trimmed.starts_with('{') && is_json(trimmed) {
        return Ok(trimmed.to_string());
    }

    // Strategy 2: ```json fence
    if let Some(json) = extract_from_code_block(json_code_block(), trimmed) {
        return Ok(json);
    }

    // Strategy 3: any fence
    if let Some(json) = extract_from_code_block(generic_code_block(), trimmed) {
        return Ok(json);
    }

    // Strategy 4: first balanced object
    if let Some(start) = trimmed.find('{') {
        let rest = &trimmed[start..];
        if let Some(end) = find_matching_brace(rest) {
            let candidate = &rest[..=end];
            if is_json(candidate) {
                return Ok(candidate.to_string());
            }
        } else {
            return Err(JsonExtractionError::Truncated {
                unclosed_braces: count_unclosed_braces(rest),
            });
        }
    }

    Err(JsonExtractionError::NotFound {
        content_preview: trimmed.chars().take(50).collect(),
    })
}

/// Extracts the first JSON object from an LLM response and deserializes it.
pub fn extract_json_as<T: DeserializeOwned>(content: &str) -> Result<T, JsonExtractionError> {
    let json = try_extract_json_object(content)?;
    serde_json::from_str(&json).map_err(|e| JsonExtractionError::Invalid(e.to_string()))
}

/// Helper function to find the matching closing brace for a JSON object.
///
/// Handles nested braces and braces inside string literals, including
/// escaped quotes.
///
/// # Arguments
///
/// * `s` - A string starting with '{'
///
/// # Returns
///
/// The index of the matching closing '}', or None if not found.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => {
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
            }
            '{' if !in_string => {
                depth += 1;
            }
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

fn count_unclosed_braces(s: &str) -> usize {
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth = depth.saturating_sub(1),
            _ => {}
        }
    }

    depth
}

fn is_json(candidate: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(candidate).is_ok()
}

fn json_code_block() -> Option<&'static Regex> {
    JSON_CODE_BLOCK
        .get_or_init(|| Regex::new(r"```json\s*\n?([\s\S]*?)\n?```").ok())
        .as_ref()
}

fn generic_code_block() -> Option<&'static Regex> {
    GENERIC_CODE_BLOCK
        .get_or_init(|| Regex::new(r"```(?:\w+)?\s*\n?([\s\S]*?)\n?```").ok())
        .as_ref()
}

fn extract_from_code_block(re: Option<&Regex>, content: &str) -> Option<String> {
    let caps = re?.captures(content)?;
    let block = caps.get(1)?.as_str().trim();
    let start = block.find('{')?;
    let end = find_matching_brace(&block[start..])?;
    let candidate = &block[start..=start + end];
    is_json(candidate).then(|| candidate.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_object() {
        let json = try_extract_json_object(r#"  {"a": 1}  "#).expect("object");
        assert_eq!(json, r#"{"a": 1}"#);
    }

    #[test]
    fn test_json_code_block() {
        let content = "Sure!\n```json\n{\"summary\": \"milk\", \"tags\": []}\n```\nDone.";
        let json = try_extract_json_object(content).expect("object");
        assert_eq!(json, "{\"summary\": \"milk\", \"tags\": []}");
    }

    #[test]
    fn test_generic_code_block() {
        let content = "```\n{\"ok\": true}\n```";
        assert_eq!(try_extract_json_object(content).expect("object"), "{\"ok\": true}");
    }

    #[test]
    fn test_object_after_prose() {
        let content = r#"The plan is {"title": "a } in a string", "n": {"x": 1}} as requested."#;
        let json = try_extract_json_object(content).expect("object");
        assert_eq!(json, r#"{"title": "a } in a string", "n": {"x": 1}}"#);
    }

    #[test]
    fn test_truncated_object() {
        let err = try_extract_json_object(r#"{"summary": "milk", "todos": {"a": 1"#)
            .expect_err("truncated");
        assert_eq!(err, JsonExtractionError::Truncated { unclosed_braces: 2 });
    }

    #[test]
    fn test_no_json() {
        let err = try_extract_json_object("I cannot help with that.").expect_err("no json");
        assert!(matches!(err, JsonExtractionError::NotFound { .. }));
    }

    #[test]
    fn test_extract_json_as_reports_shape_mismatch() {
        #[derive(Debug, serde::Deserialize)]
        struct Shape {
            #[allow(dead_code)]
            summary: String,
        }

        let err = extract_json_as::<Shape>(r#"{"title": "x"}"#).expect_err("missing field");
        assert!(matches!(err, JsonExtractionError::Invalid(_)));
        assert!(extract_json_as::<Shape>(r#"{"summary": "x"}"#).is_ok());
    }

    #[test]
    fn test_find_matching_brace_with_escapes() {
        let s = r#"{"a": "quote \" and brace }", "b": 2} tail"#;
        let end = find_matching_brace(s).expect("match");
        assert_eq!(&s[end..end + 1], "}");
        assert!(is_json(&s[..=end]));
    }
}
