//! Audio synthesis seam.

pub mod elevenlabs;

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use elevenlabs::ElevenLabsClient;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpeechError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Cannot reach speech service at {0}")]
    Connection(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Speech service returned error (status {status}): {body}")]
    Http { status: u16, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub speed: f32,
}

/// One paragraph to narrate. Neighbouring paragraphs keep intonation continuous.
#[derive(Debug, Clone)]
pub struct SpeechRequest<'a> {
    pub text: &'a str,
    pub voice_id: &'a str,
    pub settings: VoiceSettings,
    pub previous_text: Option<&'a str>,
    pub next_text: Option<&'a str>,
}

/// Decoded audio plus word-level timing as returned by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechClip {
    pub audio: Vec<u8>,
    pub alignment: Option<Value>,
}

pub trait SpeechBackend: Send + Sync {
    fn synthesize(&self, request: &SpeechRequest<'_>) -> Result<SpeechClip, SpeechError>;
}

/// Queue-driven speech backend for tests. Records the text of every call.
pub struct ScriptedSpeech {
    replies: Mutex<VecDeque<Result<SpeechClip, SpeechError>>>,
    texts: Mutex<Vec<String>>,
}

impl ScriptedSpeech {
    pub fn new(replies: Vec<Result<SpeechClip, SpeechError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.texts.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

impl SpeechBackend for ScriptedSpeech {
    fn synthesize(&self, request: &SpeechRequest<'_>) -> Result<SpeechClip, SpeechError> {
        if let Ok(mut texts) = self.texts.lock() {
            texts.push(request.text.to_string());
        }
        self.replies
            .lock()
            .map_err(|_| SpeechError::Connection("scripted speech poisoned".into()))?
            .pop_front()
            .unwrap_or_else(|| Err(SpeechError::Connection("scripted speech exhausted".into())))
    }
}
