//! Group verified paragraphs into chapters.
//!
//! The backend only decides where chapters break: it returns paragraph
//! numbers, and the paragraph text is copied from the input. Paragraphs are
//! sent in windows that fit one request; a window edge is always a chapter
//! edge.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{halt, Stage, StageContext, StageOutcome};
use crate::models::document::{Chapter, Document, ParagraphText};
use crate::models::enums::{StageField, StageName};
use crate::pipeline::backend::{array_of, integer_type, object_schema, SchemaDescriptor};
use crate::pipeline::error::PipelineError;
use crate::pipeline::segment::split_paragraphs;
use crate::pipeline::transform::{
    preceding_context, transform_unit, Progress, ShapeTransform, ShapeViolation,
};

const SYSTEM_PROMPT: &str = "You structure book text into chapters for a language-learning app.\n\
- A new chapter starts where a new scene begins or the reader's attention moves elsewhere.\n\
- A chapter should have roughly 15 to 50 paragraphs; meaning matters more than length.\n\
- Every paragraph belongs to exactly one chapter, in the given order.\n\
Return `chapters`, each listing the `paragraph_numbers` it contains. `context` is earlier text for reference only.";

pub struct ChapterSplitStage;

impl Stage for ChapterSplitStage {
    fn name(&self) -> StageName {
        StageName::ChapterSplit
    }

    fn sources(&self) -> Vec<StageField> {
        vec![StageField::SeparatedTextVerified]
    }

    fn result(&self) -> Option<StageField> {
        Some(StageField::TextByChapters)
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, PipelineError> {
        let stage = self.name();
        let backend = ctx.backend(stage)?;
        let text = ctx.require_text(StageField::SeparatedTextVerified)?;
        let paragraphs = split_paragraphs(&text);
        let limits = &ctx.settings.limits;
        let windows = windows(&paragraphs, limits.max_chars_per_request);

        let policy = ctx.policy();
        let mut progress = Progress::new(ctx.book.id, stage, windows.len());
        let mut chapters: Vec<Chapter<ParagraphText>> = Vec::new();

        for window in &windows {
            let context = preceding_context(&paragraphs, window.start, 2, limits.context_chars);
            let unit = &paragraphs[window.clone()];
            let coords = ctx.coords(stage).chapter(chapters.len() as u32 + 1);
            let groups = match transform_unit(&ChapterGrouping, unit, &context, backend, &policy, &coords) {
                Ok(groups) => groups,
                Err(e) => return halt(e),
            };

            for group in groups {
                let number = chapters.len() as u32 + 1;
                let members = group
                    .into_iter()
                    .enumerate()
                    .map(|(i, idx)| ParagraphText {
                        paragraph_number: i as u32 + 1,
                        paragraph_content: unit[idx].clone(),
                    })
                    .collect();
                chapters.push(Chapter::new(number, members));
            }
            progress.advance();
        }

        tracing::info!(book_id = ctx.book.id, chapters = chapters.len(), "Chapters assigned");
        let doc = Document { chapters };
        Ok(StageOutcome::Produced(serde_json::to_string_pretty(&doc)?))
    }
}

/// Consecutive paragraph ranges whose text fits in `max_chars`.
fn windows(paragraphs: &[String], max_chars: usize) -> Vec<std::ops::Range<usize>> {
    let mut windows = Vec::new();
    let mut start = 0;
    let mut used = 0;
    for (idx, paragraph) in paragraphs.iter().enumerate() {
        let len = paragraph.chars().count();
        if idx > start && used + len > max_chars {
            windows.push(start..idx);
            start = idx;
            used = 0;
        }
        used += len;
    }
    if start < paragraphs.len() {
        windows.push(start..paragraphs.len());
    }
    windows
}

struct ChapterGrouping;

#[derive(Serialize)]
struct NumberedParagraph<'a> {
    paragraph_number: usize,
    paragraph_content: &'a str,
}

#[derive(Deserialize)]
struct GroupingReply {
    chapters: Vec<ChapterGroup>,
}

#[derive(Deserialize)]
struct ChapterGroup {
    paragraph_numbers: Vec<usize>,
}

impl ShapeTransform for ChapterGrouping {
    type Unit = [String];
    type Reply = GroupingReply;
    /// Zero-based paragraph indices per chapter.
    type Output = Vec<Vec<usize>>;

    fn schema(&self) -> SchemaDescriptor {
        let group = object_schema(&[("paragraph_numbers", array_of(integer_type()))]);
        SchemaDescriptor::new("chapter_structure", object_schema(&[("chapters", array_of(group))]))
    }

    fn system_prompt(&self) -> String {
        SYSTEM_PROMPT.to_string()
    }

    fn user_payload(&self, unit: &[String], context: &[String]) -> Result<String, serde_json::Error> {
        let paragraphs: Vec<NumberedParagraph<'_>> = unit
            .iter()
            .enumerate()
            .map(|(i, p)| NumberedParagraph {
                paragraph_number: i + 1,
                paragraph_content: p,
            })
            .collect();
        serde_json::to_string(&json!({ "context": context, "paragraphs": paragraphs }))
    }

    fn expected_cardinality(&self, unit: &[String]) -> usize {
        unit.len()
    }

    fn reply_cardinality(&self, reply: &GroupingReply) -> usize {
        reply.chapters.iter().map(|c| c.paragraph_numbers.len()).sum()
    }

    fn assemble(&self, _unit: &[String], reply: GroupingReply) -> Result<Vec<Vec<usize>>, ShapeViolation> {
        let mut next = 1;
        let mut groups = Vec::with_capacity(reply.chapters.len());
        for chapter in reply.chapters {
            if chapter.paragraph_numbers.is_empty() {
                return Err(ShapeViolation("empty chapter".into()));
            }
            let mut group = Vec::with_capacity(chapter.paragraph_numbers.len());
            for n in chapter.paragraph_numbers {
                if n != next {
                    return Err(ShapeViolation(format!("expected paragraph {next}, got {n}")));
                }
                group.push(n - 1);
                next += 1;
            }
            groups.push(group);
        }
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::backend::ScriptedBackend;
    use crate::pipeline::stages::testing::{run_stage, settings, setup};
    use crate::pipeline::store::RecordStore;

    fn paragraphs(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("Paragraph number {i}.")).collect()
    }

    #[test]
    fn windows_split_on_budget() {
        let paras = vec!["a".repeat(100), "b".repeat(100), "c".repeat(100)];
        assert_eq!(windows(&paras, 250), vec![0..2, 2..3]);
        assert_eq!(windows(&paras, 1000), vec![0..3]);
        // A paragraph over budget still gets a window
        assert_eq!(windows(&paras, 50), vec![0..1, 1..2, 2..3]);
        assert!(windows(&[], 100).is_empty());
    }

    #[test]
    fn grouping_keeps_text_verbatim() {
        let (conn, book) = setup();
        let settings = settings();
        let store = RecordStore::new(&conn);
        store
            .write_text(1, None, StageField::SeparatedTextVerified, &paragraphs(5).join("\n\n"))
            .unwrap();

        let backend = ScriptedBackend::new(vec![Ok(json!({
            "chapters": [
                { "paragraph_numbers": [1, 2] },
                { "paragraph_numbers": [3, 4, 5] }
            ]
        }))]);
        let outcome = run_stage(&ChapterSplitStage, &book, &settings, &store, None, Some(&backend), None).unwrap();
        let StageOutcome::Produced(json) = outcome else {
            panic!("expected Produced");
        };
        let doc: Document<ParagraphText> = serde_json::from_str(&json).unwrap();
        doc.validate_numbering().unwrap();
        assert_eq!(doc.chapters.len(), 2);
        assert_eq!(doc.chapters[1].paragraphs[0].paragraph_number, 1);
        assert_eq!(doc.chapters[1].paragraphs[0].paragraph_content, "Paragraph number 3.");
    }

    #[test]
    fn dropped_paragraph_is_retried() {
        let (conn, book) = setup();
        let settings = settings();
        let store = RecordStore::new(&conn);
        store
            .write_text(1, None, StageField::SeparatedTextVerified, &paragraphs(3).join("\n"))
            .unwrap();

        let backend = ScriptedBackend::new(vec![
            Ok(json!({ "chapters": [{ "paragraph_numbers": [1, 3] }] })),
            Ok(json!({ "chapters": [{ "paragraph_numbers": [1, 3, 2] }] })),
            Ok(json!({ "chapters": [{ "paragraph_numbers": [1, 2, 3] }] })),
        ]);
        let outcome = run_stage(&ChapterSplitStage, &book, &settings, &store, None, Some(&backend), None).unwrap();
        assert!(matches!(outcome, StageOutcome::Produced(_)));
        assert_eq!(backend.call_count(), 3);
    }

    #[test]
    fn chapters_continue_numbering_across_windows() {
        let (conn, book) = setup();
        let mut settings = settings();
        settings.limits.max_chars_per_request = 200;
        let store = RecordStore::new(&conn);
        let paras: Vec<String> = (0..4).map(|i| format!("{i}{}", "x".repeat(120))).collect();
        store
            .write_text(1, None, StageField::SeparatedTextVerified, &paras.join("\n"))
            .unwrap();

        let backend = ScriptedBackend::with_handler(|_, _, _| {
            Ok(json!({ "chapters": [{ "paragraph_numbers": [1] }] }))
        });
        let StageOutcome::Produced(json) =
            run_stage(&ChapterSplitStage, &book, &settings, &store, None, Some(&backend), None).unwrap()
        else {
            panic!("expected Produced");
        };
        let doc: Document<ParagraphText> = serde_json::from_str(&json).unwrap();
        assert_eq!(doc.chapters.len(), 4);
        assert_eq!(doc.chapters[3].chapter_number, 4);
        assert!(doc.chapters[3].paragraphs[0].paragraph_content.starts_with('3'));
    }
}
