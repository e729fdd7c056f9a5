//! Typed access to stage output fields.
//!
//! Fields are stored as strings. JSON fields are decoded into their
//! document type on read and their numbering checked before any stage sees
//! them, so a stage never works on a malformed tree.

use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::repository::{
    complete_claim, get_claim_state, get_stage_output, require_book, reset_claim, try_claim,
    upsert_stage_output, ClaimState,
};
use crate::models::document::{
    ChapterTitle, ChapterTitleTranslation, Document, ParagraphText, SentenceParagraph, ShapeError,
};
use crate::models::enums::{FieldKind, Language, StageField, StageName};
use crate::models::task::TaskDocument;
use crate::models::Book;
use crate::pipeline::error::PipelineError;

/// Tri-state of a stored field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    Absent,
    /// Present but empty: `""`, `"{}"`, `"[]"` or whitespace.
    Placeholder,
    Populated,
}

pub fn classify(value: Option<&str>) -> FieldState {
    match value.map(str::trim) {
        None => FieldState::Absent,
        Some("") | Some("{}") | Some("[]") => FieldState::Placeholder,
        Some(_) => FieldState::Populated,
    }
}

/// A JSON document that can check its own numbering after decoding.
pub trait StoredDocument: Serialize + DeserializeOwned {
    fn validate(&self) -> Result<(), ShapeError>;
}

impl StoredDocument for Document<ParagraphText> {
    fn validate(&self) -> Result<(), ShapeError> {
        self.validate_numbering()
    }
}

impl StoredDocument for Document<SentenceParagraph> {
    fn validate(&self) -> Result<(), ShapeError> {
        self.validate_sentences()
    }
}

/// Task layers may omit paragraphs with nothing to ask about, so paragraph
/// numbers only need to increase.
impl StoredDocument for TaskDocument {
    fn validate(&self) -> Result<(), ShapeError> {
        validate_chapter_numbers(self.chapters.iter().map(|c| c.chapter_number))?;
        for chapter in &self.chapters {
            let mut previous = 0;
            for paragraph in &chapter.paragraphs {
                if paragraph.paragraph_number <= previous {
                    return Err(ShapeError::ParagraphNumber {
                        chapter: chapter.chapter_number,
                        expected: previous + 1,
                        found: paragraph.paragraph_number,
                    });
                }
                previous = paragraph.paragraph_number;
            }
        }
        Ok(())
    }
}

fn validate_chapter_numbers(numbers: impl Iterator<Item = u32>) -> Result<(), ShapeError> {
    for (idx, found) in numbers.enumerate() {
        let expected = idx as u32 + 1;
        if found != expected {
            return Err(ShapeError::ChapterNumber { expected, found });
        }
    }
    Ok(())
}

impl StoredDocument for Vec<ChapterTitle> {
    fn validate(&self) -> Result<(), ShapeError> {
        validate_chapter_numbers(self.iter().map(|t| t.chapter_number))
    }
}

impl StoredDocument for Vec<ChapterTitleTranslation> {
    fn validate(&self) -> Result<(), ShapeError> {
        validate_chapter_numbers(self.iter().map(|t| t.chapter_number))
    }
}

/// Record store over one SQLite connection. One per worker.
pub struct RecordStore<'c> {
    conn: &'c Connection,
}

impl<'c> RecordStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn book(&self, book_id: i64) -> Result<Book, PipelineError> {
        Ok(require_book(self.conn, book_id)?)
    }

    pub fn raw(
        &self,
        book_id: i64,
        language: Option<Language>,
        field: StageField,
    ) -> Result<Option<String>, PipelineError> {
        Ok(get_stage_output(self.conn, book_id, language, field)?)
    }

    pub fn state(
        &self,
        book_id: i64,
        language: Option<Language>,
        field: StageField,
    ) -> Result<FieldState, PipelineError> {
        Ok(classify(self.raw(book_id, language, field)?.as_deref()))
    }

    /// Plain-text field, `None` unless populated.
    pub fn read_text(
        &self,
        book_id: i64,
        language: Option<Language>,
        field: StageField,
    ) -> Result<Option<String>, PipelineError> {
        let value = self.raw(book_id, language, field)?;
        match classify(value.as_deref()) {
            FieldState::Populated => Ok(value),
            _ => Ok(None),
        }
    }

    /// JSON field decoded and validated, `None` unless populated.
    pub fn read_document<T: StoredDocument>(
        &self,
        book_id: i64,
        language: Option<Language>,
        field: StageField,
    ) -> Result<Option<T>, PipelineError> {
        let Some(raw) = self.read_text(book_id, language, field)? else {
            return Ok(None);
        };
        let doc: T = serde_json::from_str(&raw).map_err(|e| PipelineError::InvalidField {
            field: field.as_str().into(),
            reason: e.to_string(),
        })?;
        doc.validate().map_err(|e| PipelineError::InvalidField {
            field: field.as_str().into(),
            reason: e.to_string(),
        })?;
        Ok(Some(doc))
    }

    pub fn write_text(
        &self,
        book_id: i64,
        language: Option<Language>,
        field: StageField,
        value: &str,
    ) -> Result<(), PipelineError> {
        upsert_stage_output(self.conn, book_id, language, field, value)?;
        tracing::debug!(
            book_id,
            language = language.map(|l| l.as_str()).unwrap_or(""),
            field = field.as_str(),
            bytes = value.len(),
            "Field written"
        );
        Ok(())
    }

    pub fn write_document<T: StoredDocument>(
        &self,
        book_id: i64,
        language: Option<Language>,
        field: StageField,
        doc: &T,
    ) -> Result<(), PipelineError> {
        debug_assert_eq!(field.kind(), FieldKind::Json);
        let json = serde_json::to_string_pretty(doc)?;
        self.write_text(book_id, language, field, &json)
    }

    // ── Claims ───────────────────────────────────────────────

    pub fn claim_state(&self, book_id: i64, stage: StageName) -> Result<ClaimState, PipelineError> {
        Ok(get_claim_state(self.conn, book_id, stage)?)
    }

    pub fn try_claim(&self, book_id: i64, stage: StageName) -> Result<bool, PipelineError> {
        Ok(try_claim(self.conn, book_id, stage)?)
    }

    pub fn complete_claim(&self, book_id: i64, stage: StageName) -> Result<(), PipelineError> {
        Ok(complete_claim(self.conn, book_id, stage)?)
    }

    /// Drop a claim this worker holds so the stage can be retried.
    pub fn release_claim(&self, book_id: i64, stage: StageName) -> Result<(), PipelineError> {
        reset_claim(self.conn, book_id, stage)?;
        Ok(())
    }
}
