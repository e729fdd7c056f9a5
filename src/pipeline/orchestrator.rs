//! Stage orchestrator.
//!
//! Runs the enabled stages of one book in fixed order: book-level stages
//! once, then the per-language stages for each target language in turn.
//! Stages hand their output back; only the orchestrator writes result
//! fields, so a halted or failed stage leaves its field untouched and the
//! stages depending on it skip for want of a source.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::config::Settings;
use crate::models::enums::{FieldScope, Language, StageField, StageName};
use crate::models::Book;
use crate::pipeline::backend::GenerativeBackend;
use crate::pipeline::error::PipelineError;
use crate::pipeline::guard::{acquire_claim, check_result_field, Guard, GuardDecision};
use crate::pipeline::speech::SpeechBackend;
use crate::pipeline::stages::{all_stages, Stage, StageContext, StageOutcome};
use crate::pipeline::store::{FieldState, RecordStore};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Disabled,
    /// Result field already populated, or claim already complete.
    AlreadyDone,
    /// Another worker holds the claim, or a crashed one left it behind.
    Claimed,
    MissingSource { field: StageField },
    Completed,
    Halted { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub stage: StageName,
    pub language: Option<Language>,
    #[serde(flatten)]
    pub status: StageStatus,
}

/// Outcome of every stage for one book in one run.
#[derive(Debug, Clone, Serialize)]
pub struct BookReport {
    pub run_id: Uuid,
    pub book_id: i64,
    pub stages: Vec<StageRecord>,
}

impl BookReport {
    pub fn status(&self, stage: StageName, language: Option<Language>) -> Option<&StageStatus> {
        self.stages
            .iter()
            .find(|r| r.stage == stage && r.language == language)
            .map(|r| &r.status)
    }

    /// Stages that stopped short: halted or failed.
    pub fn incomplete(&self) -> usize {
        self.stages
            .iter()
            .filter(|r| matches!(r.status, StageStatus::Halted { .. } | StageStatus::Failed { .. }))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<'o> {
    settings: &'o Settings,
    backend: Option<&'o dyn GenerativeBackend>,
    speech: Option<&'o dyn SpeechBackend>,
    stages: Vec<Box<dyn Stage>>,
}

impl<'o> Orchestrator<'o> {
    pub fn new(
        settings: &'o Settings,
        backend: Option<&'o dyn GenerativeBackend>,
        speech: Option<&'o dyn SpeechBackend>,
    ) -> Self {
        Self {
            settings,
            backend,
            speech,
            stages: all_stages(),
        }
    }

    /// Run every enabled stage for `book_id`.
    ///
    /// Stage failures are recorded in the report; only a missing book or a
    /// store failure outside any stage is returned as an error.
    pub fn run_book(&self, conn: &Connection, book_id: i64) -> Result<BookReport, PipelineError> {
        let store = RecordStore::new(conn);
        let book = store.book(book_id)?;
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("book", book_id, run_id = %run_id);
        let _enter = span.enter();
        tracing::info!(title = %book.title, "Book pipeline started");

        let mut rng = match self.settings.tasks.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(book_id as u64)),
            None => StdRng::from_entropy(),
        };

        let mut records = Vec::new();
        for stage in self.stages.iter().filter(|s| !s.name().is_per_language()) {
            let status = self.run_stage(stage.as_ref(), &store, &book, None, &mut rng);
            records.push(StageRecord {
                stage: stage.name(),
                language: None,
                status,
            });
        }

        for &language in &self.settings.target_langs {
            let _lang = tracing::info_span!("language", language = language.as_str()).entered();
            for stage in self.stages.iter().filter(|s| s.name().is_per_language()) {
                let status = self.run_stage(stage.as_ref(), &store, &book, Some(language), &mut rng);
                records.push(StageRecord {
                    stage: stage.name(),
                    language: Some(language),
                    status,
                });
            }
        }

        let report = BookReport {
            run_id,
            book_id,
            stages: records,
        };
        tracing::info!(incomplete = report.incomplete(), "Book pipeline finished");
        Ok(report)
    }

    fn run_stage(
        &self,
        stage: &dyn Stage,
        store: &RecordStore<'_>,
        book: &Book,
        language: Option<Language>,
        rng: &mut StdRng,
    ) -> StageStatus {
        let name = stage.name();
        if !self.settings.is_enabled(name) {
            return StageStatus::Disabled;
        }
        let status = match self.execute(stage, store, book, language, rng) {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(stage = name.as_str(), error = %e, "Stage failed");
                StageStatus::Failed { error: e.to_string() }
            }
        };
        tracing::info!(stage = name.as_str(), status = ?status, "Stage finished");
        status
    }

    fn execute(
        &self,
        stage: &dyn Stage,
        store: &RecordStore<'_>,
        book: &Book,
        language: Option<Language>,
        rng: &mut StdRng,
    ) -> Result<StageStatus, PipelineError> {
        let name = stage.name();

        if stage.guard() == Guard::ResultField {
            if let Some(field) = stage.result() {
                if check_result_field(store, book.id, key(field, language), field)? == GuardDecision::AlreadyDone {
                    tracing::info!(stage = name.as_str(), field = field.as_str(), "Result already present, skipped");
                    return Ok(StageStatus::AlreadyDone);
                }
            }
        }

        for field in stage.sources() {
            if store.state(book.id, key(field, language), field)? != FieldState::Populated {
                tracing::info!(stage = name.as_str(), field = field.as_str(), "Source not populated, skipped");
                return Ok(StageStatus::MissingSource { field });
            }
        }

        let claimed = stage.guard() == Guard::Claim;
        if claimed {
            match acquire_claim(store, book.id, name)? {
                GuardDecision::Proceed => {}
                GuardDecision::AlreadyDone => return Ok(StageStatus::AlreadyDone),
                GuardDecision::Claimed => return Ok(StageStatus::Claimed),
            }
        }

        let mut ctx = StageContext {
            book,
            language,
            settings: self.settings,
            store,
            backend: self.backend,
            speech: self.speech,
            rng,
        };
        let outcome = stage.run(&mut ctx);

        if claimed {
            match &outcome {
                Ok(StageOutcome::Produced(_) | StageOutcome::Completed) => store.complete_claim(book.id, name)?,
                _ => {
                    if let Err(e) = store.release_claim(book.id, name) {
                        tracing::warn!(stage = name.as_str(), error = %e, "Failed to release claim");
                    }
                }
            }
        }

        match outcome? {
            StageOutcome::Produced(value) => {
                if let Some(field) = stage.result() {
                    store.write_text(book.id, key(field, language), field, &value)?;
                }
                Ok(StageStatus::Completed)
            }
            StageOutcome::Completed => Ok(StageStatus::Completed),
            StageOutcome::Halted { reason } => {
                tracing::warn!(stage = name.as_str(), reason = %reason, "Stage halted, result not written");
                Ok(StageStatus::Halted { reason })
            }
        }
    }
}

/// Store key of `field` when running for `language`.
fn key(field: StageField, language: Option<Language>) -> Option<Language> {
    match field.scope() {
        FieldScope::Book => None,
        FieldScope::Translation => language,
    }
}
