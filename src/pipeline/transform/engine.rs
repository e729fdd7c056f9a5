use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::RetrySettings;
use crate::models::document::ShapeError;
use crate::models::enums::{Language, StageName};
use crate::pipeline::backend::{BackendError, GenerativeBackend, SchemaDescriptor};

// ═══════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════

/// A reply that parsed but does not fit the unit it was produced for.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct ShapeViolation(pub String);

impl From<ShapeError> for ShapeViolation {
    fn from(e: ShapeError) -> Self {
        Self(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("{stage} gave up at {coords} after {attempts} attempts: {last}")]
    Exhausted {
        stage: StageName,
        coords: String,
        attempts: u32,
        last: String,
    },

    #[error("Could not build request payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Why a single attempt was discarded.
#[derive(Error, Debug)]
pub enum AttemptFailure {
    #[error("backend call failed: {0}")]
    Backend(#[from] BackendError),

    #[error("reply does not match schema: {0}")]
    Decode(String),

    #[error("expected {expected} children, reply has {actual}")]
    Cardinality { expected: usize, actual: usize },

    #[error("reply rejected: {0}")]
    Shape(#[from] ShapeViolation),
}

impl AttemptFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Backend(e) => e.kind(),
            Self::Decode(_) => "decode",
            Self::Cardinality { .. } => "cardinality",
            Self::Shape(_) => "shape",
        }
    }
}

// ═══════════════════════════════════════════
// Retry policy and unit coordinates
// ═══════════════════════════════════════════

/// Fixed attempt budget with a constant pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Policy for structural stages.
    pub fn stages(settings: &RetrySettings) -> Self {
        Self::new(settings.max_attempts, settings.delay())
    }

    /// Policy for per-paragraph task generation.
    pub fn tasks(settings: &RetrySettings) -> Self {
        Self::new(settings.task_attempts, settings.delay())
    }
}

/// Where in the book a unit lives. Carried into every log line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitCoords {
    pub book_id: i64,
    pub stage: StageName,
    pub language: Option<Language>,
    pub chapter: Option<u32>,
    pub paragraph: Option<u32>,
    pub sentence: Option<u32>,
}

impl UnitCoords {
    pub fn new(book_id: i64, stage: StageName, language: Option<Language>) -> Self {
        Self {
            book_id,
            stage,
            language,
            chapter: None,
            paragraph: None,
            sentence: None,
        }
    }

    pub fn chapter(mut self, chapter: u32) -> Self {
        self.chapter = Some(chapter);
        self
    }

    pub fn paragraph(mut self, paragraph: u32) -> Self {
        self.paragraph = Some(paragraph);
        self
    }

    pub fn sentence(mut self, sentence: u32) -> Self {
        self.sentence = Some(sentence);
        self
    }

    fn language_str(&self) -> &'static str {
        self.language.map(|l| l.as_str()).unwrap_or("")
    }
}

impl fmt::Display for UnitCoords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "book {}", self.book_id)?;
        if let Some(lang) = self.language {
            write!(f, " [{lang}]")?;
        }
        if let Some(c) = self.chapter {
            write!(f, " chapter {c}")?;
        }
        if let Some(p) = self.paragraph {
            write!(f, " paragraph {p}")?;
        }
        if let Some(s) = self.sentence {
            write!(f, " sentence {s}")?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════
// Retry loop
// ═══════════════════════════════════════════

/// Run `attempt` until it succeeds or the policy is exhausted.
///
/// Every failed attempt is logged with the unit's coordinates. The closure
/// receives the 1-based attempt number.
pub fn run_with_retry<T, E, F>(
    policy: &RetryPolicy,
    coords: &UnitCoords,
    mut attempt: F,
) -> Result<T, TransformError>
where
    E: fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut last = String::new();
    for n in 1..=policy.max_attempts {
        if n > 1 && !policy.delay.is_zero() {
            std::thread::sleep(policy.delay);
        }
        match attempt(n) {
            Ok(value) => {
                if n > 1 {
                    tracing::info!(
                        book_id = coords.book_id,
                        stage = coords.stage.as_str(),
                        language = coords.language_str(),
                        chapter = ?coords.chapter,
                        paragraph = ?coords.paragraph,
                        attempt = n,
                        "Unit succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                tracing::warn!(
                    book_id = coords.book_id,
                    stage = coords.stage.as_str(),
                    language = coords.language_str(),
                    chapter = ?coords.chapter,
                    paragraph = ?coords.paragraph,
                    sentence = ?coords.sentence,
                    attempt = n,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Unit attempt failed"
                );
                last = e.to_string();
            }
        }
    }

    tracing::error!(
        book_id = coords.book_id,
        stage = coords.stage.as_str(),
        language = coords.language_str(),
        chapter = ?coords.chapter,
        paragraph = ?coords.paragraph,
        attempts = policy.max_attempts,
        "Retry budget exhausted"
    );
    Err(TransformError::Exhausted {
        stage: coords.stage,
        coords: coords.to_string(),
        attempts: policy.max_attempts,
        last,
    })
}

// ═══════════════════════════════════════════
// Shape-preserving transform
// ═══════════════════════════════════════════

/// One stage's view of a unit transformation.
///
/// The engine owns the control flow; implementors only describe the
/// request and how to check and assemble the reply.
pub trait ShapeTransform {
    type Unit: ?Sized;
    type Reply: DeserializeOwned;
    type Output;

    fn schema(&self) -> SchemaDescriptor;

    fn system_prompt(&self) -> String;

    /// Request body for `unit`. `context` holds preceding units that are
    /// shown to the model but not transformed.
    fn user_payload(&self, unit: &Self::Unit, context: &[String]) -> Result<String, serde_json::Error>;

    /// Number of addressable children the reply must carry.
    fn expected_cardinality(&self, unit: &Self::Unit) -> usize;

    fn reply_cardinality(&self, reply: &Self::Reply) -> usize;

    /// Build the output from a reply of the right cardinality. Content
    /// checks beyond counting belong here.
    fn assemble(&self, unit: &Self::Unit, reply: Self::Reply) -> Result<Self::Output, ShapeViolation>;

    /// Output for a unit with no children. `None` sends it to the backend anyway.
    fn passthrough(&self, _unit: &Self::Unit) -> Option<Self::Output> {
        None
    }
}

/// Transform one unit under the retry policy.
///
/// Backend failures, undecodable replies, cardinality mismatches and
/// rejected content all count against the same attempt budget. Exhaustion
/// is returned to the caller, which decides between halting the stage and
/// emitting a null result.
pub fn transform_unit<T>(
    transform: &T,
    unit: &T::Unit,
    context: &[String],
    backend: &dyn GenerativeBackend,
    policy: &RetryPolicy,
    coords: &UnitCoords,
) -> Result<T::Output, TransformError>
where
    T: ShapeTransform + ?Sized,
{
    let expected = transform.expected_cardinality(unit);
    if expected == 0 {
        if let Some(output) = transform.passthrough(unit) {
            tracing::debug!(
                book_id = coords.book_id,
                stage = coords.stage.as_str(),
                chapter = ?coords.chapter,
                paragraph = ?coords.paragraph,
                "Empty unit passed through"
            );
            return Ok(output);
        }
    }

    let schema = transform.schema();
    let system_prompt = transform.system_prompt();
    let payload = transform.user_payload(unit, context)?;

    run_with_retry(policy, coords, |_| -> Result<T::Output, AttemptFailure> {
        let value = backend.complete(&system_prompt, &payload, &schema)?;
        let reply: T::Reply =
            serde_json::from_value(value).map_err(|e| AttemptFailure::Decode(e.to_string()))?;

        let actual = transform.reply_cardinality(&reply);
        if actual != expected {
            return Err(AttemptFailure::Cardinality { expected, actual });
        }
        Ok(transform.assemble(unit, reply)?)
    })
}
