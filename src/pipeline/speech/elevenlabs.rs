use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{SpeechBackend, SpeechClip, SpeechError, SpeechRequest, VoiceSettings};
use crate::config::SpeechSettings;

/// Blocking client for the ElevenLabs text-to-speech-with-timestamps API.
pub struct ElevenLabsClient {
    base_url: String,
    model_id: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl ElevenLabsClient {
    pub fn new(settings: &SpeechSettings, api_key: Option<String>) -> Result<Self, SpeechError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| SpeechError::Connection(format!("HTTP client setup failed: {e}")))?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model_id: settings.model_id.clone(),
            api_key,
            client,
        })
    }

    fn endpoint(&self, voice_id: &str) -> String {
        format!("{}/v1/text-to-speech/{}/with-timestamps", self.base_url, voice_id)
    }
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    previous_text: &'a str,
    next_text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Deserialize)]
struct TtsResponse {
    audio_base64: Option<String>,
    alignment: Option<Value>,
}

fn decode_response(parsed: TtsResponse) -> Result<SpeechClip, SpeechError> {
    let encoded = parsed
        .audio_base64
        .ok_or_else(|| SpeechError::MalformedResponse("no audio in reply".into()))?;
    let audio = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| SpeechError::MalformedResponse(format!("audio is not base64: {e}")))?;
    Ok(SpeechClip {
        audio,
        alignment: parsed.alignment,
    })
}

impl SpeechBackend for ElevenLabsClient {
    fn synthesize(&self, request: &SpeechRequest<'_>) -> Result<SpeechClip, SpeechError> {
        let body = TtsRequest {
            text: request.text,
            previous_text: request.previous_text.unwrap_or(""),
            next_text: request.next_text.unwrap_or(""),
            model_id: &self.model_id,
            voice_settings: request.settings,
        };

        let mut http = self
            .client
            .post(self.endpoint(request.voice_id))
            .header("accept", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            http = http.header("xi-api-key", key);
        }

        let response = http.send().map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                SpeechError::Connection(self.base_url.clone())
            } else {
                SpeechError::Http {
                    status: 0,
                    body: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(match status.as_u16() {
                429 => SpeechError::RateLimited(body),
                401 | 403 => SpeechError::Auth(body),
                code => SpeechError::Http { status: code, body },
            });
        }

        let parsed: TtsResponse = response
            .json()
            .map_err(|e| SpeechError::MalformedResponse(e.to_string()))?;
        decode_response(parsed)
    }
}
