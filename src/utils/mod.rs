//! Shared utility functions for task-capture.
//!
//! Currently JSON extraction from LLM responses.

pub mod json_extraction;

pub use json_extraction::{
    extract_json_as, find_matching_brace, try_extract_json_object, JsonExtractionError,
};
