//! JSON extraction from free-form LLM output.
//!
//! Models wrap JSON in code fences, lead with prose, or trail off with
//! commentary. Extraction tries, in order:
//!
//! 1. the first fenced code block whose body parses as JSON,
//! 2. the first `{` walked to its matching `}` (string- and escape-aware).
//!
//! Malformed JSON is not repaired.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Errors from JSON extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no JSON object found in model output")]
    NotFound,

    #[error("malformed JSON in model output: {0}")]
    Malformed(String),
}

/// Locate the JSON object text inside `text`.
pub fn extract_json_str(text: &str) -> Option<&str> {
    if let Some(body) = fenced_blocks(text).find(|body| {
        let trimmed = body.trim();
        trimmed.starts_with('{') && serde_json::from_str::<Value>(trimmed).is_ok()
    }) {
        return Some(body.trim());
    }
    balanced_object(text)
}

/// Extract and parse the JSON object inside `text`.
pub fn extract_json(text: &str) -> Result<Value, ExtractError> {
    let raw = extract_json_str(text).ok_or(ExtractError::NotFound)?;
    serde_json::from_str(raw).map_err(|e| ExtractError::Malformed(e.to_string()))
}

/// Extract the JSON object inside `text` and deserialize it into `T`.
pub fn extract_as<T: DeserializeOwned>(text: &str) -> Result<T, ExtractError> {
    let value = extract_json(text)?;
    serde_json::from_value(value).map_err(|e| ExtractError::Malformed(e.to_string()))
}

/// Bodies of ``` fenced blocks, skipping an info string such as `json`.
fn fenced_blocks(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        let open = rest.find("```")?;
        let after = &rest[open + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let info = &after[..body_start];
        // A fence opened mid-line without a newline carries its body inline.
        let body_start = if info.trim().contains('{') { 0 } else { body_start };
        let body = &after[body_start..];
        let close = body.find("```")?;
        rest = &body[close + 3..];
        Some(&body[..close])
    })
}

/// The first `{ ... }` span with balanced braces outside string literals.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
