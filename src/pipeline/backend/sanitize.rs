//! Cleanup of raw model text before JSON parsing.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::BackendError;

static THINK_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));

/// Strip reasoning blocks and markdown fences from a model reply.
pub fn sanitize_llm_output(raw: &str) -> String {
    let text = THINK_BLOCK_RE.replace_all(raw, "");
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        // Skip an info string such as `json`
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Parse a model reply into JSON, tolerating fences and reasoning blocks.
pub fn parse_json_reply(raw: &str) -> Result<Value, BackendError> {
    let cleaned = sanitize_llm_output(raw);
    if cleaned.is_empty() {
        return Err(BackendError::MalformedResponse("empty reply".into()));
    }
    serde_json::from_str(&cleaned).map_err(|e| BackendError::MalformedResponse(e.to_string()))
}
