//! Re-split paragraphs that are still too long after the paragraph split.
//!
//! The backend proposes the cut points; the parts must reproduce the
//! paragraph exactly. Anything it cannot handle falls back to sentence
//! packing, so this stage always produces a result.

use serde::Deserialize;
use serde_json::json;

use super::{Stage, StageContext, StageOutcome};
use crate::models::enums::{Language, StageField, StageName};
use crate::pipeline::backend::{array_of, object_schema, string_type, SchemaDescriptor};
use crate::pipeline::error::PipelineError;
use crate::pipeline::segment::{split_paragraph_manually, split_paragraphs, strip_whitespace};
use crate::pipeline::transform::{
    transform_unit, Progress, ShapeTransform, ShapeViolation, TransformError,
};

/// Target length of one part when asking the backend to split.
const TARGET_PART_CHARS: usize = 150;
const MIN_CHUNK_CHARS: usize = 30;
const SENTENCE_END: [char; 4] = ['.', '!', '?', '…'];

pub struct ParagraphVerifyStage;

impl Stage for ParagraphVerifyStage {
    fn name(&self) -> StageName {
        StageName::ParagraphVerify
    }

    fn sources(&self) -> Vec<StageField> {
        vec![StageField::SeparatedText]
    }

    fn result(&self) -> Option<StageField> {
        Some(StageField::SeparatedTextVerified)
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, PipelineError> {
        let stage = self.name();
        let text = ctx.require_text(StageField::SeparatedText)?;
        let paragraphs = split_paragraphs(&text);
        let max_len = ctx.settings.limits.max_paragraph_chars;
        let language = ctx.source_lang();

        let long: Vec<usize> = paragraphs
            .iter()
            .enumerate()
            .filter(|(_, p)| needs_split(p, max_len))
            .map(|(i, _)| i)
            .collect();
        tracing::info!(
            book_id = ctx.book.id,
            paragraphs = paragraphs.len(),
            long = long.len(),
            "Verifying paragraph lengths"
        );
        let backend = if long.is_empty() { None } else { Some(ctx.backend(stage)?) };

        let transform = PartsTransform { language, max_len };
        let policy = ctx.policy();
        let mut progress = Progress::new(ctx.book.id, stage, long.len());
        let mut verified = Vec::with_capacity(paragraphs.len());

        for (idx, paragraph) in paragraphs.iter().enumerate() {
            let Some(backend) = backend.filter(|_| needs_split(paragraph, max_len)) else {
                verified.push(paragraph.clone());
                continue;
            };
            let coords = ctx.coords(stage).paragraph(idx as u32 + 1);
            match transform_unit(&transform, paragraph, &[], backend, &policy, &coords) {
                Ok(parts) => verified.extend(parts),
                Err(TransformError::Exhausted { .. }) => {
                    tracing::warn!(
                        book_id = ctx.book.id,
                        paragraph = idx + 1,
                        "Backend split failed, packing sentences instead"
                    );
                    verified.extend(manual_split(paragraph, language, max_len));
                }
                Err(TransformError::Payload(e)) => return Err(e.into()),
            }
            progress.advance();
        }

        Ok(StageOutcome::Produced(verified.join("\n\n")))
    }
}

/// Over the limit and cuttable at a sentence end.
fn needs_split(paragraph: &str, max_len: usize) -> bool {
    paragraph.chars().count() > max_len && paragraph.contains(SENTENCE_END)
}

fn manual_split(paragraph: &str, language: Language, max_len: usize) -> Vec<String> {
    split_paragraph_manually(paragraph, language, max_len, MIN_CHUNK_CHARS)
}

struct PartsTransform {
    language: Language,
    max_len: usize,
}

#[derive(Deserialize)]
struct PartsReply {
    parts: Vec<String>,
}

impl ShapeTransform for PartsTransform {
    type Unit = String;
    type Reply = PartsReply;
    type Output = Vec<String>;

    fn schema(&self) -> SchemaDescriptor {
        SchemaDescriptor::new("paragraph_parts", object_schema(&[("parts", array_of(string_type()))]))
    }

    fn system_prompt(&self) -> String {
        format!(
            "You split text into paragraphs. The text is in {}. Split the paragraph into parts of \
             roughly equal length, each ending with a complete sentence. Do not change the \
             sentences and do not add anything. Return the parts in order in `parts`.",
            self.language.display_name()
        )
    }

    fn user_payload(&self, unit: &String, _context: &[String]) -> Result<String, serde_json::Error> {
        let target_parts = (unit.chars().count() as f64 / TARGET_PART_CHARS as f64).round().max(1.0);
        serde_json::to_string(&json!({ "parts_wanted": target_parts as usize, "paragraph": unit }))
    }

    /// Parts are counted in characters: together they must carry every
    /// non-whitespace character of the paragraph.
    fn expected_cardinality(&self, unit: &String) -> usize {
        strip_whitespace(unit).chars().count()
    }

    fn reply_cardinality(&self, reply: &PartsReply) -> usize {
        reply.parts.iter().map(|p| strip_whitespace(p).chars().count()).sum()
    }

    fn assemble(&self, unit: &String, reply: PartsReply) -> Result<Vec<String>, ShapeViolation> {
        if strip_whitespace(&reply.parts.concat()) != strip_whitespace(unit) {
            return Err(ShapeViolation("parts do not reproduce the paragraph".into()));
        }
        let mut out = Vec::new();
        for part in reply.parts.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
            if needs_split(part, self.max_len) {
                out.extend(manual_split(part, self.language, self.max_len));
            } else {
                out.push(part.to_string());
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::backend::{BackendError, ScriptedBackend};
    use crate::pipeline::stages::testing::{run_stage, settings, setup};
    use crate::pipeline::store::RecordStore;
    use crate::pipeline::segment::split_paragraphs;

    fn long_paragraph() -> String {
        "The fox ran into the dark forest. ".repeat(8).trim().to_string()
    }

    fn produced(outcome: StageOutcome) -> String {
        match outcome {
            StageOutcome::Produced(text) => text,
            other => panic!("expected Produced, got {other:?}"),
        }
    }

    #[test]
    fn short_paragraphs_need_no_backend() {
        let (conn, book) = setup();
        let settings = settings();
        let store = RecordStore::new(&conn);
        store
            .write_text(1, None, StageField::SeparatedText, "One.\n\nTwo.")
            .unwrap();

        let out = run_stage(&ParagraphVerifyStage, &book, &settings, &store, None, None, None).unwrap();
        assert_eq!(produced(out), "One.\n\nTwo.");
    }

    #[test]
    fn backend_parts_replace_long_paragraph() {
        let (conn, book) = setup();
        let settings = settings();
        let store = RecordStore::new(&conn);
        let long = long_paragraph();
        store
            .write_text(1, None, StageField::SeparatedText, &format!("Intro.\n\n{long}"))
            .unwrap();

        let half = "The fox ran into the dark forest. ".repeat(4);
        let backend = ScriptedBackend::new(vec![Ok(json!({ "parts": [half.trim(), half.trim()] }))]);
        let out = produced(
            run_stage(&ParagraphVerifyStage, &book, &settings, &store, None, Some(&backend), None).unwrap(),
        );

        let paragraphs = split_paragraphs(&out);
        assert_eq!(paragraphs.len(), 3);
        assert_eq!(paragraphs[0], "Intro.");
        assert!(paragraphs.iter().all(|p| p.chars().count() <= 200));
        assert!(backend.calls()[0].user_payload.contains("\"parts_wanted\":2"));
    }

    #[test]
    fn altered_parts_rejected_then_manual_fallback() {
        let (conn, book) = setup();
        let settings = settings();
        let store = RecordStore::new(&conn);
        let long = long_paragraph();
        store.write_text(1, None, StageField::SeparatedText, &long).unwrap();

        let backend = ScriptedBackend::new(vec![
            Ok(json!({ "parts": ["Something else entirely."] })),
            Err(BackendError::RateLimited("slow".into())),
            Ok(json!({ "parts": ["still wrong"] })),
        ]);
        let out = produced(
            run_stage(&ParagraphVerifyStage, &book, &settings, &store, None, Some(&backend), None).unwrap(),
        );

        assert_eq!(backend.call_count(), 3);
        let paragraphs = split_paragraphs(&out);
        assert!(paragraphs.len() >= 2);
        assert!(paragraphs.iter().all(|p| p.chars().count() <= 200));
        assert_eq!(strip_whitespace(&out), strip_whitespace(&long));
    }

    #[test]
    fn long_paragraph_without_sentence_end_kept() {
        let no_stop = "word ".repeat(60);
        assert!(!needs_split(no_stop.trim(), 200));
        assert!(needs_split(&long_paragraph(), 200));
    }
}
