use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::models::enums::{Language, StageName};

/// Application-level constants
pub const APP_NAME: &str = "Bookweave";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the application data directory (~/Bookweave/)
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default tracing filter when RUST_LOG is unset
pub fn default_log_filter() -> &'static str {
    "bookweave_lib=info,bookweave=info,warn"
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Missing credential: environment variable {0} is not set")]
    MissingCredential(String),
}

// ═══════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(deserialize_with = "language")]
    pub source_lang: Language,
    #[serde(deserialize_with = "languages")]
    pub target_langs: Vec<Language>,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
    #[serde(default = "default_audio_dir")]
    pub audio_dir: PathBuf,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub tasks: TaskSettings,
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub speech: SpeechSettings,
    /// Stage toggles keyed by stage name. A stage missing from the table is enabled.
    #[serde(default)]
    pub steps: HashMap<String, bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Upper bound on characters sent in one backend request.
    pub max_chars_per_request: usize,
    /// Budget for preceding-unit context attached to a request.
    pub context_chars: usize,
    /// Paragraphs longer than this are re-split before chaptering.
    pub max_paragraph_chars: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_chars_per_request: 4000,
            context_chars: 1500,
            max_paragraph_chars: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    /// Attempts per paragraph for task generation.
    pub task_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            task_attempts: 2,
            delay_ms: 2000,
        }
    }
}

impl RetrySettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    /// Probability that a true/false task asks for a true statement.
    pub true_rate: f64,
    /// Fixed seed for reproducible task generation.
    pub seed: Option<u64>,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            true_rate: 0.6,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub base_url: String,
    pub model: String,
    /// Empty means the endpoint needs no key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub temperature: Option<f32>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4.1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_secs: 300,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    pub base_url: String,
    pub model_id: String,
    pub voice_id: Option<String>,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub stability: f32,
    pub similarity_boost: f32,
    pub speed: f32,
    /// Slower narration for the simplified text.
    pub speed_simplified: f32,
    /// Stop after this many paragraphs per run.
    pub max_paragraphs: Option<usize>,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.elevenlabs.io".into(),
            model_id: "eleven_multilingual_v2".into(),
            voice_id: None,
            api_key_env: "ELEVENLABS_API_KEY".into(),
            timeout_secs: 120,
            stability: 0.5,
            similarity_boost: 0.7,
            speed: 0.9,
            speed_simplified: 0.7,
            max_paragraphs: None,
        }
    }
}

fn default_database_path() -> PathBuf {
    app_data_dir().join("bookweave.db")
}

fn default_export_dir() -> PathBuf {
    app_data_dir().join("export")
}

fn default_audio_dir() -> PathBuf {
    app_data_dir().join("audio")
}

fn default_workers() -> usize {
    1
}

fn language<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Language, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_language(&raw).map_err(serde::de::Error::custom)
}

fn languages<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Language>, D::Error> {
    let raw = Vec::<String>::deserialize(deserializer)?;
    raw.iter()
        .map(|code| parse_language(code).map_err(serde::de::Error::custom))
        .collect()
}

/// Parse an ISO 639-1 code from the supported set.
pub fn parse_language(code: &str) -> Result<Language, ConfigError> {
    Language::from_str(code.trim()).map_err(|_| ConfigError::UnsupportedLanguage(code.to_string()))
}

impl Settings {
    /// Read, parse and validate a TOML settings file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        let settings = Self::from_toml(&contents).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: display,
                source,
            },
            other => other,
        })?;
        Ok(settings)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: "<inline>".into(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=5).contains(&self.retry.max_attempts) {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts",
                reason: format!("{} is outside 1..=5", self.retry.max_attempts),
            });
        }
        if !(1..=5).contains(&self.retry.task_attempts) {
            return Err(ConfigError::InvalidValue {
                field: "retry.task_attempts",
                reason: format!("{} is outside 1..=5", self.retry.task_attempts),
            });
        }
        if !(0.0..=1.0).contains(&self.tasks.true_rate) {
            return Err(ConfigError::InvalidValue {
                field: "tasks.true_rate",
                reason: format!("{} is not a probability", self.tasks.true_rate),
            });
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workers",
                reason: "at least one worker is required".into(),
            });
        }
        if self.limits.max_chars_per_request < 200 {
            return Err(ConfigError::InvalidValue {
                field: "limits.max_chars_per_request",
                reason: format!("{} is too small", self.limits.max_chars_per_request),
            });
        }
        if let Some(unknown) = self.steps.keys().find(|k| StageName::from_str(k).is_err()) {
            return Err(ConfigError::InvalidValue {
                field: "steps",
                reason: format!("unknown stage '{unknown}'"),
            });
        }
        if self.target_langs.contains(&self.source_lang) {
            return Err(ConfigError::InvalidValue {
                field: "target_langs",
                reason: format!("source language {} cannot be a target", self.source_lang),
            });
        }
        let voice_missing = self.speech.voice_id.as_deref().map_or(true, |v| v.trim().is_empty());
        if self.needs_speech_backend() && voice_missing {
            return Err(ConfigError::InvalidValue {
                field: "speech.voice_id",
                reason: "narration is enabled but no voice is set".into(),
            });
        }
        Ok(())
    }

    /// Stages run only when `[steps]` turns them on.
    pub fn is_enabled(&self, stage: StageName) -> bool {
        self.steps.get(stage.as_str()).copied().unwrap_or(false)
    }

    /// True if any enabled stage calls the text generation backend.
    pub fn needs_generative_backend(&self) -> bool {
        StageName::all().iter().any(|s| {
            self.is_enabled(*s)
                && !matches!(
                    s,
                    StageName::CheckPreparation
                        | StageName::Export
                        | StageName::VoiceNarration
                        | StageName::VoiceNarrationSimplified
                )
        })
    }

    pub fn needs_speech_backend(&self) -> bool {
        self.is_enabled(StageName::VoiceNarration)
            || self.is_enabled(StageName::VoiceNarrationSimplified)
    }

    /// API key for the generative backend, if one is configured.
    pub fn backend_api_key(&self) -> Result<Option<String>, ConfigError> {
        read_key(&self.backend.api_key_env)
    }

    pub fn speech_api_key(&self) -> Result<Option<String>, ConfigError> {
        read_key(&self.speech.api_key_env)
    }
}

fn read_key(var: &str) -> Result<Option<String>, ConfigError> {
    if var.is_empty() {
        return Ok(None);
    }
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(Some(key)),
        _ => Err(ConfigError::MissingCredential(var.to_string())),
    }
}
