//! Generative backend seam.
//!
//! Stages describe the JSON shape they want with a `SchemaDescriptor` and
//! receive a parsed `serde_json::Value`. Whether the value has the right
//! number of children is the caller's business.

pub mod mock;
pub mod openai;
pub mod sanitize;

use serde_json::{json, Map, Value};
use thiserror::Error;

pub use mock::ScriptedBackend;
pub use openai::OpenAiClient;

/// Every variant is retryable by the transform engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Cannot reach backend at {0}")]
    Connection(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Backend returned error (status {status}): {body}")]
    Http { status: u16, body: String },
}

impl BackendError {
    /// Short label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::Auth(_) => "auth",
            Self::Connection(_) => "connection",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Http { .. } => "http",
        }
    }
}

/// Named JSON schema for a structured reply.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDescriptor {
    pub name: &'static str,
    pub schema: Value,
}

impl SchemaDescriptor {
    pub fn new(name: &'static str, schema: Value) -> Self {
        Self { name, schema }
    }
}

pub trait GenerativeBackend: Send + Sync {
    /// One structured completion. The reply is valid JSON of the requested
    /// field types, but cardinality is unchecked.
    fn complete(
        &self,
        system_prompt: &str,
        user_payload: &str,
        schema: &SchemaDescriptor,
    ) -> Result<Value, BackendError>;
}

// ═══════════════════════════════════════════
// Schema helpers
// ═══════════════════════════════════════════

/// Closed object schema; every listed property is required.
pub fn object_schema(properties: &[(&str, Value)]) -> Value {
    let mut props = Map::new();
    for (name, schema) in properties {
        props.insert((*name).to_string(), schema.clone());
    }
    let required: Vec<&str> = properties.iter().map(|(name, _)| *name).collect();
    json!({
        "type": "object",
        "properties": props,
        "required": required,
        "additionalProperties": false,
    })
}

pub fn array_of(items: Value) -> Value {
    json!({ "type": "array", "items": items })
}

pub fn string_type() -> Value {
    json!({ "type": "string" })
}

pub fn nullable_string() -> Value {
    json!({ "type": ["string", "null"] })
}

pub fn integer_type() -> Value {
    json!({ "type": "integer" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_schema_requires_all_properties() {
        let schema = object_schema(&[("question", string_type()), ("n", integer_type())]);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["question", "n"]));
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["properties"]["n"]["type"], "integer");
    }

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(BackendError::RateLimited("x".into()).kind(), "rate_limited");
        assert_eq!(BackendError::Http { status: 500, body: String::new() }.kind(), "http");
    }

    #[test]
    fn backend_is_object_safe() {
        fn _assert(_: &dyn GenerativeBackend) {}
    }
}
