//! Read-only sanity report over the book-level text fields.

use serde::Serialize;

use super::{Stage, StageContext, StageOutcome};
use crate::models::document::{Document, ParagraphText};
use crate::models::enums::{StageField, StageName};
use crate::pipeline::error::PipelineError;
use crate::pipeline::guard::Guard;
use crate::pipeline::store::RecordStore;

/// Derived text keeping less than this share of the original's characters fails.
pub const MIN_RATIO: f64 = 0.95;

const TEXT_FIELDS: [StageField; 4] = [
    StageField::FormattedText,
    StageField::SplittedText,
    StageField::SeparatedText,
    StageField::SeparatedTextVerified,
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatioCheck {
    pub field: StageField,
    /// `None` when the field is not populated yet.
    pub ratio: Option<f64>,
}

impl RatioCheck {
    pub fn passed(&self) -> bool {
        self.ratio.map_or(true, |r| r >= MIN_RATIO)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParagraphMismatch {
    pub chapter_number: u32,
    pub original: usize,
    /// `None` when the simplified text lacks the chapter.
    pub simplified: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparationReport {
    pub book_id: i64,
    pub ratios: Vec<RatioCheck>,
    pub mismatches: Vec<ParagraphMismatch>,
}

impl PreparationReport {
    pub fn passed(&self) -> bool {
        self.ratios.iter().all(RatioCheck::passed) && self.mismatches.is_empty()
    }

    pub fn log(&self) {
        for check in &self.ratios {
            match check.ratio {
                Some(ratio) if check.passed() => tracing::info!(
                    book_id = self.book_id,
                    field = check.field.as_str(),
                    percent = format!("{:.2}", ratio * 100.0),
                    "OK"
                ),
                Some(ratio) => tracing::warn!(
                    book_id = self.book_id,
                    field = check.field.as_str(),
                    percent = format!("{:.2}", ratio * 100.0),
                    "FAILED: text lost against original"
                ),
                None => tracing::info!(
                    book_id = self.book_id,
                    field = check.field.as_str(),
                    "Not populated"
                ),
            }
        }
        for m in &self.mismatches {
            tracing::warn!(
                book_id = self.book_id,
                chapter = m.chapter_number,
                original = m.original,
                simplified = ?m.simplified,
                "FAILED: paragraph count differs in simplified chapter"
            );
        }
    }
}

fn visible_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

fn ratio(original: usize, derived: usize) -> f64 {
    if original == 0 {
        1.0
    } else {
        derived as f64 / original as f64
    }
}

/// Compare every derived text field against `original_text`.
pub fn check_preparation(store: &RecordStore<'_>, book_id: i64) -> Result<PreparationReport, PipelineError> {
    let original = store
        .read_text(book_id, None, StageField::OriginalText)?
        .map(|t| visible_chars(&t))
        .unwrap_or(0);

    let mut ratios = Vec::with_capacity(TEXT_FIELDS.len() + 1);
    for field in TEXT_FIELDS {
        let derived = store.read_text(book_id, None, field)?;
        ratios.push(RatioCheck {
            field,
            ratio: derived.map(|t| ratio(original, visible_chars(&t))),
        });
    }

    let chapters: Option<Document<ParagraphText>> =
        store.read_document(book_id, None, StageField::TextByChapters)?;
    ratios.push(RatioCheck {
        field: StageField::TextByChapters,
        ratio: chapters.as_ref().map(|doc| {
            let chars = doc
                .chapters
                .iter()
                .flat_map(|c| &c.paragraphs)
                .map(|p| visible_chars(&p.paragraph_content))
                .sum();
            ratio(original, chars)
        }),
    });

    let simplified: Option<Document<ParagraphText>> =
        store.read_document(book_id, None, StageField::TextByChaptersSimplified)?;
    let mut mismatches = Vec::new();
    if let (Some(original), Some(simplified)) = (&chapters, &simplified) {
        for chapter in &original.chapters {
            let counterpart = simplified
                .chapters
                .iter()
                .find(|c| c.chapter_number == chapter.chapter_number)
                .map(|c| c.paragraphs.len());
            if counterpart != Some(chapter.paragraphs.len()) {
                mismatches.push(ParagraphMismatch {
                    chapter_number: chapter.chapter_number,
                    original: chapter.paragraphs.len(),
                    simplified: counterpart,
                });
            }
        }
    }

    Ok(PreparationReport {
        book_id,
        ratios,
        mismatches,
    })
}

pub struct CheckPreparationStage;

impl Stage for CheckPreparationStage {
    fn name(&self) -> StageName {
        StageName::CheckPreparation
    }

    fn sources(&self) -> Vec<StageField> {
        vec![StageField::OriginalText]
    }

    fn result(&self) -> Option<StageField> {
        None
    }

    fn guard(&self) -> Guard {
        Guard::None
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, PipelineError> {
        let report = check_preparation(ctx.store, ctx.book.id)?;
        report.log();
        Ok(StageOutcome::Completed)
    }
}
