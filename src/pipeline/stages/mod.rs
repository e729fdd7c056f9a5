//! Pipeline stages.
//!
//! A stage reads its source fields, computes one new structure and hands it
//! back to the orchestrator, which writes the result field. Stages never
//! write their own result field, so a halted stage leaves nothing behind.

pub mod chapters;
pub mod enrich;
pub mod export;
pub mod narration;
pub mod paragraph_verify;
pub mod preparation;
pub mod simplify;
pub mod text_rewrite;
pub mod titles;
pub mod translate;

use rand::rngs::StdRng;

use crate::config::Settings;
use crate::models::enums::{FieldScope, Language, StageField, StageName};
use crate::models::Book;
use crate::pipeline::backend::GenerativeBackend;
use crate::pipeline::error::PipelineError;
use crate::pipeline::guard::Guard;
use crate::pipeline::speech::SpeechBackend;
use crate::pipeline::store::{RecordStore, StoredDocument};
use crate::pipeline::transform::{RetryPolicy, TransformError, UnitCoords};

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Serialized value for the stage's result field.
    Produced(String),
    /// Stage finished with side effects only (files, reports).
    Completed,
    /// Retry budget exhausted or work left undone; nothing is written.
    Halted { reason: String },
}

/// Everything a stage may touch while it runs.
pub struct StageContext<'a> {
    pub book: &'a Book,
    /// Target language for per-language stages.
    pub language: Option<Language>,
    pub settings: &'a Settings,
    pub store: &'a RecordStore<'a>,
    pub backend: Option<&'a dyn GenerativeBackend>,
    pub speech: Option<&'a dyn SpeechBackend>,
    pub rng: &'a mut StdRng,
}

impl<'a> StageContext<'a> {
    pub fn source_lang(&self) -> Language {
        self.settings.source_lang
    }

    pub fn target(&self, stage: StageName) -> Result<Language, PipelineError> {
        self.language.ok_or(PipelineError::MissingLanguage(stage.as_str()))
    }

    pub fn backend(&self, stage: StageName) -> Result<&'a dyn GenerativeBackend, PipelineError> {
        self.backend.ok_or(PipelineError::BackendMissing {
            stage: stage.as_str(),
            backend: "generative",
        })
    }

    pub fn speech(&self, stage: StageName) -> Result<&'a dyn SpeechBackend, PipelineError> {
        self.speech.ok_or(PipelineError::BackendMissing {
            stage: stage.as_str(),
            backend: "speech",
        })
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::stages(&self.settings.retry)
    }

    pub fn task_policy(&self) -> RetryPolicy {
        RetryPolicy::tasks(&self.settings.retry)
    }

    pub fn coords(&self, stage: StageName) -> UnitCoords {
        UnitCoords::new(self.book.id, stage, self.language)
    }

    /// Language key for reading `field`: book fields have none.
    pub fn key_for(&self, field: StageField) -> Option<Language> {
        match field.scope() {
            FieldScope::Book => None,
            FieldScope::Translation => self.language,
        }
    }

    pub fn read_text(&self, field: StageField) -> Result<Option<String>, PipelineError> {
        self.store.read_text(self.book.id, self.key_for(field), field)
    }

    pub fn read_document<T: StoredDocument>(
        &self,
        field: StageField,
    ) -> Result<Option<T>, PipelineError> {
        self.store.read_document(self.book.id, self.key_for(field), field)
    }

    /// Source that the orchestrator has already checked is populated.
    pub fn require_document<T: StoredDocument>(
        &self,
        field: StageField,
    ) -> Result<T, PipelineError> {
        self.read_document(field)?.ok_or_else(|| missing(field))
    }

    pub fn require_text(&self, field: StageField) -> Result<String, PipelineError> {
        self.read_text(field)?.ok_or_else(|| missing(field))
    }
}

fn missing(field: StageField) -> PipelineError {
    PipelineError::InvalidField {
        field: field.as_str().into(),
        reason: "field is not populated".into(),
    }
}

pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    /// Fields that must be populated before the stage can run.
    fn sources(&self) -> Vec<StageField>;

    /// Field written from `StageOutcome::Produced`.
    fn result(&self) -> Option<StageField>;

    fn guard(&self) -> Guard {
        Guard::ResultField
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, PipelineError>;
}

/// Exhaustion halts the stage; an unserializable request is a real error.
pub fn halt(err: TransformError) -> Result<StageOutcome, PipelineError> {
    match err {
        TransformError::Payload(e) => Err(PipelineError::Json(e)),
        exhausted @ TransformError::Exhausted { .. } => Ok(StageOutcome::Halted {
            reason: exhausted.to_string(),
        }),
    }
}

/// Every stage in pipeline order.
pub fn all_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(text_rewrite::TextRewriteStage::preprocess()),
        Box::new(text_rewrite::TextRewriteStage::sentence_split()),
        Box::new(text_rewrite::TextRewriteStage::paragraph_split()),
        Box::new(paragraph_verify::ParagraphVerifyStage),
        Box::new(chapters::ChapterSplitStage),
        Box::new(simplify::SimplifyStage),
        Box::new(titles::ChapterTitlesStage),
        Box::new(preparation::CheckPreparationStage),
        Box::new(narration::NarrationStage::original()),
        Box::new(narration::NarrationStage::simplified()),
        Box::new(translate::TranslateStage::original()),
        Box::new(translate::TranslateStage::simplified()),
        Box::new(enrich::EnrichStage::original()),
        Box::new(enrich::EnrichStage::simplified()),
        Box::new(crate::pipeline::tasks::TrueFalseStage::original()),
        Box::new(crate::pipeline::tasks::TrueFalseStage::simplified()),
        Box::new(crate::pipeline::tasks::TranslationChoiceStage::original()),
        Box::new(crate::pipeline::tasks::TranslationChoiceStage::simplified()),
        Box::new(crate::pipeline::tasks::WordPairingStage::original()),
        Box::new(crate::pipeline::tasks::WordPairingStage::simplified()),
        Box::new(titles::TitleTranslateStage),
        Box::new(export::ExportStage),
    ]
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn stage_list_covers_every_stage_once_in_order() {
        let stages = all_stages();
        let names: Vec<StageName> = stages.iter().map(|s| s.name()).collect();
        assert_eq!(names, StageName::all().to_vec());
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn per_language_stages_write_translation_fields() {
        for stage in all_stages() {
            if let Some(field) = stage.result() {
                let per_language = field.scope() == FieldScope::Translation;
                assert_eq!(per_language, stage.name().is_per_language(), "{}", stage.name());
            }
        }
    }

    #[test]
    fn halt_keeps_payload_errors_fatal() {
        let err = serde_json::from_str::<u8>("x").unwrap_err();
        assert!(halt(TransformError::Payload(err)).is_err());
    }
}
