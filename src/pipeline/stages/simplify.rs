use serde::Deserialize;

use super::{halt, Stage, StageContext, StageOutcome};
use crate::models::document::{Chapter, Document, ParagraphText};
use crate::models::enums::{Language, StageField, StageName};
use crate::pipeline::backend::{array_of, integer_type, object_schema, string_type, SchemaDescriptor};
use crate::pipeline::error::PipelineError;
use crate::pipeline::transform::{transform_unit, Progress, ShapeTransform, ShapeViolation};

/// Retell every chapter in simple language, paragraph for paragraph.
pub struct SimplifyStage;

impl Stage for SimplifyStage {
    fn name(&self) -> StageName {
        StageName::SimplifyText
    }

    fn sources(&self) -> Vec<StageField> {
        vec![StageField::TextByChapters]
    }

    fn result(&self) -> Option<StageField> {
        Some(StageField::TextByChaptersSimplified)
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, PipelineError> {
        let stage = self.name();
        let backend = ctx.backend(stage)?;
        let original: Document<ParagraphText> = ctx.require_document(StageField::TextByChapters)?;

        let transform = Simplify {
            language: ctx.source_lang(),
        };
        let policy = ctx.policy();
        let mut progress = Progress::new(ctx.book.id, stage, original.chapters.len());
        let mut chapters = Vec::with_capacity(original.chapters.len());

        for chapter in &original.chapters {
            let coords = ctx.coords(stage).chapter(chapter.chapter_number);
            match transform_unit(&transform, chapter, &[], backend, &policy, &coords) {
                Ok(simplified) => chapters.push(simplified),
                Err(e) => return halt(e),
            }
            progress.advance();
        }

        let doc = Document { chapters };
        Ok(StageOutcome::Produced(serde_json::to_string_pretty(&doc)?))
    }
}

struct Simplify {
    language: Language,
}

#[derive(Deserialize)]
struct SimplifiedChapter {
    paragraphs: Vec<ParagraphText>,
}

impl ShapeTransform for Simplify {
    type Unit = Chapter<ParagraphText>;
    type Reply = SimplifiedChapter;
    type Output = Chapter<ParagraphText>;

    fn schema(&self) -> SchemaDescriptor {
        let paragraph = object_schema(&[
            ("paragraph_number", integer_type()),
            ("paragraph_content", string_type()),
        ]);
        SchemaDescriptor::new("simplified_chapter", object_schema(&[("paragraphs", array_of(paragraph))]))
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are a friendly storyteller adapting book chapters for language learners.\n\
             - Retell the text in simple words with short, easy sentences (level A2-B1).\n\
             - Keep the paragraph structure: never merge, split or skip paragraphs; keep every paragraph_number.\n\
             - Write in {}.\n\
             - Keep a warm, natural tone, as if telling the story to a friend.\n\
             Return only the chapter's paragraphs.",
            self.language.display_name()
        )
    }

    fn user_payload(&self, unit: &Chapter<ParagraphText>, _context: &[String]) -> Result<String, serde_json::Error> {
        serde_json::to_string(unit)
    }

    fn expected_cardinality(&self, unit: &Chapter<ParagraphText>) -> usize {
        unit.paragraphs.len()
    }

    fn reply_cardinality(&self, reply: &SimplifiedChapter) -> usize {
        reply.paragraphs.len()
    }

    fn assemble(
        &self,
        unit: &Chapter<ParagraphText>,
        reply: SimplifiedChapter,
    ) -> Result<Chapter<ParagraphText>, ShapeViolation> {
        let mut paragraphs = Vec::with_capacity(reply.paragraphs.len());
        for (idx, paragraph) in reply.paragraphs.into_iter().enumerate() {
            let expected = idx as u32 + 1;
            if paragraph.paragraph_number != expected {
                return Err(ShapeViolation(format!(
                    "paragraph {expected} came back as {}",
                    paragraph.paragraph_number
                )));
            }
            if paragraph.paragraph_content.trim().is_empty() {
                return Err(ShapeViolation(format!("paragraph {expected} is empty")));
            }
            paragraphs.push(ParagraphText {
                paragraph_number: expected,
                paragraph_content: paragraph.paragraph_content.trim().to_string(),
            });
        }
        Ok(Chapter::new(unit.chapter_number, paragraphs))
    }

    fn passthrough(&self, unit: &Chapter<ParagraphText>) -> Option<Chapter<ParagraphText>> {
        Some(Chapter::new(unit.chapter_number, Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::backend::ScriptedBackend;
    use crate::pipeline::stages::testing::{run_stage, settings, setup};
    use crate::pipeline::store::RecordStore;
    use serde_json::json;

    fn original() -> Document<ParagraphText> {
        let para = |n: u32, text: &str| ParagraphText {
            paragraph_number: n,
            paragraph_content: text.into(),
        };
        Document {
            chapters: vec![
                Chapter::new(1, vec![para(1, "The feline reposed."), para(2, "Its mood was jubilant.")]),
                Chapter::new(2, vec![para(1, "Night descended.")]),
            ],
        }
    }

    #[test]
    fn paragraph_counts_preserved_per_chapter() {
        let (conn, book) = setup();
        let settings = settings();
        let store = RecordStore::new(&conn);
        store.write_document(1, None, StageField::TextByChapters, &original()).unwrap();

        let backend = ScriptedBackend::new(vec![
            Ok(json!({ "paragraphs": [
                { "paragraph_number": 1, "paragraph_content": "The cat sat." },
                { "paragraph_number": 2, "paragraph_content": "It was happy." }
            ]})),
            Ok(json!({ "paragraphs": [
                { "paragraph_number": 1, "paragraph_content": "It got dark." }
            ]})),
        ]);
        let StageOutcome::Produced(json) =
            run_stage(&SimplifyStage, &book, &settings, &store, None, Some(&backend), None).unwrap()
        else {
            panic!("expected Produced");
        };
        let simplified: Document<ParagraphText> = serde_json::from_str(&json).unwrap();
        original().check_aligned(&simplified).unwrap();
        assert_eq!(simplified.chapters[0].paragraphs[1].paragraph_content, "It was happy.");
    }

    #[test]
    fn merged_paragraphs_exhaust_and_halt() {
        let (conn, book) = setup();
        let settings = settings();
        let store = RecordStore::new(&conn);
        store.write_document(1, None, StageField::TextByChapters, &original()).unwrap();

        let merged = json!({ "paragraphs": [
            { "paragraph_number": 1, "paragraph_content": "The cat sat and was happy." }
        ]});
        let backend = ScriptedBackend::with_handler(move |_, _, _| Ok(merged.clone()));
        let outcome = run_stage(&SimplifyStage, &book, &settings, &store, None, Some(&backend), None).unwrap();

        assert!(matches!(outcome, StageOutcome::Halted { .. }));
        assert_eq!(backend.call_count(), 3);
    }

    #[test]
    fn renumbered_reply_rejected() {
        let chapter = &original().chapters[0];
        let reply = SimplifiedChapter {
            paragraphs: vec![
                ParagraphText { paragraph_number: 2, paragraph_content: "a".into() },
                ParagraphText { paragraph_number: 1, paragraph_content: "b".into() },
            ],
        };
        let transform = Simplify { language: Language::English };
        assert!(transform.assemble(chapter, reply).is_err());
    }
}
