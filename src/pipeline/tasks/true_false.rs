use rand::Rng;
use serde::Deserialize;

use super::null_on_exhaustion;
use crate::models::document::{Chapter, Document, SentenceParagraph};
use crate::models::enums::{Language, StageField, StageName};
use crate::models::task::{ParagraphTasks, TaskDocument, TrueFalse};
use crate::pipeline::backend::{object_schema, string_type, SchemaDescriptor};
use crate::pipeline::error::PipelineError;
use crate::pipeline::stages::{Stage, StageContext, StageOutcome};
use crate::pipeline::transform::{transform_unit, Progress, ShapeTransform, ShapeViolation};

const MAX_INPUT_CHARS: usize = 2000;
const MAX_STATEMENT_WORDS: usize = 7;

/// One true-or-false statement per translated paragraph.
///
/// Whether the statement must be true is drawn before the request, so the
/// share of true answers follows `tasks.true_rate` regardless of what the
/// backend prefers to write.
pub struct TrueFalseStage {
    name: StageName,
    source: StageField,
    result: StageField,
}

impl TrueFalseStage {
    pub fn original() -> Self {
        Self {
            name: StageName::TasksTrueOrFalse,
            source: StageField::SentenceTranslation,
            result: StageField::TasksTrueOrFalse,
        }
    }

    pub fn simplified() -> Self {
        Self {
            name: StageName::TasksTrueOrFalseSimplified,
            source: StageField::SimplifiedSentenceTranslation,
            result: StageField::TasksTrueOrFalseSimplified,
        }
    }
}

impl Stage for TrueFalseStage {
    fn name(&self) -> StageName {
        self.name
    }

    fn sources(&self) -> Vec<StageField> {
        vec![self.source]
    }

    fn result(&self) -> Option<StageField> {
        Some(self.result)
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, PipelineError> {
        let target = ctx.target(self.name)?;
        let backend = ctx.backend(self.name)?;
        let doc: Document<SentenceParagraph> = ctx.require_document(self.source)?;
        let policy = ctx.task_policy();
        let true_rate = ctx.settings.tasks.true_rate;

        let mut progress = Progress::new(ctx.book.id, self.name, doc.paragraph_count());
        let mut chapters = Vec::with_capacity(doc.chapters.len());
        for chapter in &doc.chapters {
            let mut paragraphs = Vec::with_capacity(chapter.paragraphs.len());
            for paragraph in &chapter.paragraphs {
                progress.advance();
                let text: String = paragraph.joined_translation().chars().take(MAX_INPUT_CHARS).collect();
                if text.is_empty() {
                    continue;
                }

                let answer = ctx.rng.gen_bool(true_rate);
                let transform = Statement { target, answer };
                let coords = ctx
                    .coords(self.name)
                    .chapter(chapter.chapter_number)
                    .paragraph(paragraph.paragraph_number);
                let task = null_on_exhaustion(transform_unit(&transform, &text, &[], backend, &policy, &coords))?;

                let mut tasks = ParagraphTasks::new(paragraph.paragraph_number);
                tasks.true_or_false = Some(task);
                paragraphs.push(tasks);
            }
            chapters.push(Chapter::new(chapter.chapter_number, paragraphs));
        }

        let doc = TaskDocument { chapters };
        Ok(StageOutcome::Produced(serde_json::to_string_pretty(&doc)?))
    }
}

struct Statement {
    target: Language,
    answer: bool,
}

#[derive(Deserialize)]
struct StatementReply {
    question: String,
}

impl ShapeTransform for Statement {
    type Unit = String;
    type Reply = StatementReply;
    type Output = TrueFalse;

    fn schema(&self) -> SchemaDescriptor {
        SchemaDescriptor::new("true_or_false", object_schema(&[("question", string_type())]))
    }

    fn system_prompt(&self) -> String {
        let (kind, content) = if self.answer {
            ("a TRUE statement", "reflect what actually happens in the paragraph")
        } else {
            ("a clearly FALSE statement", "state an invented fact about what happens in the paragraph")
        };
        format!(
            "You are a reading assistant. Write {kind} about the content of the paragraph.\n\
             The statement must:\n\
             - be in {};\n\
             - {content};\n\
             - be easy to check against the text and obvious to an attentive reader;\n\
             - be short, at most {MAX_STATEMENT_WORDS} words;\n\
             - be unambiguous.\n\
             Return `question` with the statement.",
            self.target.display_name()
        )
    }

    fn user_payload(&self, unit: &String, _context: &[String]) -> Result<String, serde_json::Error> {
        Ok(unit.clone())
    }

    fn expected_cardinality(&self, _unit: &String) -> usize {
        1
    }

    fn reply_cardinality(&self, reply: &StatementReply) -> usize {
        usize::from(!reply.question.trim().is_empty())
    }

    fn assemble(&self, _unit: &String, reply: StatementReply) -> Result<TrueFalse, ShapeViolation> {
        let trimmed = reply.question.trim();
        let question = trimmed.strip_suffix('.').unwrap_or(trimmed).trim_end().to_string();
        let words = question.split_whitespace().count();
        if words > MAX_STATEMENT_WORDS {
            return Err(ShapeViolation(format!("statement has {words} words")));
        }
        Ok(TrueFalse {
            question,
            answer: self.answer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::document::Sentence;
    use crate::pipeline::backend::{BackendError, ScriptedBackend};
    use crate::pipeline::stages::testing::{run_stage, settings, setup};
    use crate::pipeline::store::RecordStore;
    use serde_json::json;

    fn translated(n: u32) -> Document<SentenceParagraph> {
        let paragraph = |number: u32, translation: Option<&str>| SentenceParagraph {
            paragraph_number: number,
            sentences: vec![Sentence {
                sentence_number: 1,
                sentence_original: "The cat sat.".into(),
                sentence_translation: translation.map(Into::into),
                words: vec![],
            }],
        };
        Document {
            chapters: vec![Chapter::new(1, (1..=n).map(|i| paragraph(i, Some("El gato se sentó."))).collect())],
        }
    }

    fn run(store: &RecordStore<'_>, backend: &ScriptedBackend) -> TaskDocument {
        let (_, book) = setup();
        let settings = settings();
        let StageOutcome::Produced(json) = run_stage(
            &TrueFalseStage::original(),
            &book,
            &settings,
            store,
            Some(Language::Spanish),
            Some(backend),
            None,
        )
        .unwrap() else {
            panic!("expected Produced");
        };
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn truth_rate_follows_policy_and_prompt() {
        let (conn, _) = setup();
        let store = RecordStore::new(&conn);
        store
            .write_document(1, Some(Language::Spanish), StageField::SentenceTranslation, &translated(1000))
            .unwrap();
        let backend = ScriptedBackend::with_handler(|_, _, _| Ok(json!({ "question": "El gato duerme." })));

        let doc = run(&store, &backend);
        let tasks: Vec<TrueFalse> = doc.chapters[0]
            .paragraphs
            .iter()
            .map(|p| p.true_or_false.clone().flatten().unwrap())
            .collect();
        assert_eq!(tasks.len(), 1000);

        let trues = tasks.iter().filter(|t| t.answer).count();
        let rate = trues as f64 / 1000.0;
        assert!((rate - 0.6).abs() < 0.05, "true rate {rate}");

        // Prompt asked for the answer that was drawn
        for (task, call) in tasks.iter().zip(backend.calls()) {
            assert_eq!(call.system_prompt.contains("a TRUE statement"), task.answer);
        }
        assert_eq!(tasks[0].question, "El gato duerme");
    }

    #[test]
    fn exhaustion_nulls_task_and_empty_paragraphs_are_omitted() {
        let (conn, _) = setup();
        let store = RecordStore::new(&conn);
        let mut doc = translated(2);
        doc.chapters[0].paragraphs[1].sentences[0].sentence_translation = None;
        store
            .write_document(1, Some(Language::Spanish), StageField::SentenceTranslation, &doc)
            .unwrap();
        let backend = ScriptedBackend::failing(BackendError::RateLimited("busy".into()));

        let out = run(&store, &backend);
        let paragraphs = &out.chapters[0].paragraphs;
        assert_eq!(paragraphs.len(), 1);
        assert_eq!(paragraphs[0].true_or_false, Some(None));
        assert_eq!(backend.call_count(), settings().retry.task_attempts as usize);
    }

    #[test]
    fn long_statement_rejected() {
        let transform = Statement { target: Language::Spanish, answer: true };
        let reply = StatementReply {
            question: "uno dos tres cuatro cinco seis siete ocho".into(),
        };
        assert!(transform.assemble(&String::new(), reply).is_err());
    }
}
