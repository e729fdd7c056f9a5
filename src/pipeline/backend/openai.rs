use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::sanitize::parse_json_reply;
use super::{BackendError, GenerativeBackend, SchemaDescriptor};
use crate::config::BackendSettings;

/// Blocking client for an OpenAI-compatible `/chat/completions` endpoint
/// with JSON-schema structured output.
pub struct OpenAiClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f32>,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OpenAiClient {
    pub fn new(settings: &BackendSettings, api_key: Option<String>) -> Result<Self, BackendError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| BackendError::Connection(format!("HTTP client setup failed: {e}")))?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key,
            temperature: settings.temperature,
            client,
            timeout_secs: settings.timeout_secs,
        })
    }

    fn request_body<'a>(
        &'a self,
        system_prompt: &'a str,
        user_payload: &'a str,
        schema: &SchemaDescriptor,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_payload,
                },
            ],
            response_format: json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": true,
                }
            }),
            temperature: self.temperature,
        }
    }
}

/// Request body for /chat/completions
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Response body from /chat/completions
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

fn classify_status(status: u16, body: String) -> BackendError {
    match status {
        429 => BackendError::RateLimited(body),
        401 | 403 => BackendError::Auth(body),
        _ => BackendError::Http { status, body },
    }
}

fn extract_content(parsed: ChatResponse) -> Result<String, BackendError> {
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::MalformedResponse("no choices in reply".into()))?;
    if let Some(refusal) = choice.message.refusal {
        return Err(BackendError::MalformedResponse(format!("model refused: {refusal}")));
    }
    choice
        .message
        .content
        .ok_or_else(|| BackendError::MalformedResponse("reply has no content".into()))
}

impl GenerativeBackend for OpenAiClient {
    fn complete(
        &self,
        system_prompt: &str,
        user_payload: &str,
        schema: &SchemaDescriptor,
    ) -> Result<Value, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(system_prompt, user_payload, schema);

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(|e| {
            if e.is_connect() {
                BackendError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                BackendError::Connection(format!(
                    "{} (timed out after {}s)",
                    self.base_url, self.timeout_secs
                ))
            } else {
                BackendError::Http {
                    status: 0,
                    body: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status.as_u16(), body));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| BackendError::MalformedResponse(e.to_string()))?;

        let content = extract_content(parsed)?;
        parse_json_reply(&content)
    }
}
