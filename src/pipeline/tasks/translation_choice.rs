use serde::Deserialize;

use super::word_index::{find, index_paragraph, IndexedWord, WordCandidate};
use super::{carry_forward, null_on_exhaustion};
use crate::models::document::{Chapter, Document, SentenceParagraph};
use crate::models::enums::{StageField, StageName};
use crate::models::task::{TaskDocument, TranslationChoice};
use crate::pipeline::backend::{object_schema, string_type, SchemaDescriptor};
use crate::pipeline::error::PipelineError;
use crate::pipeline::stages::{Stage, StageContext, StageOutcome};
use crate::pipeline::transform::{transform_unit, Progress, ShapeTransform, ShapeViolation};

/// Longer word groups make poor multiple-choice options.
const MAX_OPTION_CHARS: usize = 22;
const MIN_CANDIDATES: usize = 3;

const SYSTEM_PROMPT: &str = "You are a foreign language teacher.\n\
You get a list of words with the fields:\n\
- id: word identifier\n\
- o: the word in the language being learned\n\
- o_t: its translation into the learner's language\n\
Pick one less frequent word, specific to this paragraph, to check that the learner understood the text. Return:\n\
- correct_id: the id of that word\n\
- incorrect1_id and incorrect2_id: ids of two other words from the list, similar in kind but different in meaning.";

pub struct TranslationChoiceStage {
    name: StageName,
    words: StageField,
    base: StageField,
    result: StageField,
}

impl TranslationChoiceStage {
    pub fn original() -> Self {
        Self {
            name: StageName::TasksHowToTranslate,
            words: StageField::SentenceTranslationWords,
            base: StageField::TasksTrueOrFalse,
            result: StageField::TasksHowTo,
        }
    }

    pub fn simplified() -> Self {
        Self {
            name: StageName::TasksHowToTranslateSimplified,
            words: StageField::SimplifiedSentenceTranslationWords,
            base: StageField::TasksTrueOrFalseSimplified,
            result: StageField::TasksHowToSimplified,
        }
    }
}

/// Word groups short enough on both sides to be an option.
fn candidates(words: Vec<IndexedWord>) -> Vec<IndexedWord> {
    words
        .into_iter()
        .filter(|w| {
            w.word.original.trim().chars().count() <= MAX_OPTION_CHARS
                && w.word.original_translation.trim().chars().count() <= MAX_OPTION_CHARS
        })
        .collect()
}

impl Stage for TranslationChoiceStage {
    fn name(&self) -> StageName {
        self.name
    }

    fn sources(&self) -> Vec<StageField> {
        vec![self.words, self.base]
    }

    fn result(&self) -> Option<StageField> {
        Some(self.result)
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, PipelineError> {
        ctx.target(self.name)?;
        let backend = ctx.backend(self.name)?;
        let words: Document<SentenceParagraph> = ctx.require_document(self.words)?;
        let base: TaskDocument = ctx.require_document(self.base)?;
        let policy = ctx.task_policy();

        let mut progress = Progress::new(ctx.book.id, self.name, words.paragraph_count());
        let mut chapters = Vec::with_capacity(words.chapters.len());
        for chapter in &words.chapters {
            let mut paragraphs = Vec::with_capacity(chapter.paragraphs.len());
            for paragraph in &chapter.paragraphs {
                let mut tasks = carry_forward(&base, chapter.chapter_number, paragraph.paragraph_number);
                let options = candidates(index_paragraph(chapter.chapter_number, paragraph));

                let task = if options.len() < MIN_CANDIDATES {
                    tracing::debug!(
                        book_id = ctx.book.id,
                        chapter = chapter.chapter_number,
                        paragraph = paragraph.paragraph_number,
                        candidates = options.len(),
                        "Not enough words for a translation choice"
                    );
                    None
                } else {
                    let coords = ctx
                        .coords(self.name)
                        .chapter(chapter.chapter_number)
                        .paragraph(paragraph.paragraph_number);
                    null_on_exhaustion(transform_unit(&ChooseTranslation, &options, &[], backend, &policy, &coords))?
                };
                tasks.how_to_translate = Some(task);
                paragraphs.push(tasks);
                progress.advance();
            }
            chapters.push(Chapter::new(chapter.chapter_number, paragraphs));
        }

        let doc = TaskDocument { chapters };
        Ok(StageOutcome::Produced(serde_json::to_string_pretty(&doc)?))
    }
}

struct ChooseTranslation;

#[derive(Deserialize)]
struct ChoiceReply {
    correct_id: String,
    incorrect1_id: String,
    incorrect2_id: String,
}

impl ShapeTransform for ChooseTranslation {
    type Unit = [IndexedWord];
    type Reply = ChoiceReply;
    type Output = TranslationChoice;

    fn schema(&self) -> SchemaDescriptor {
        SchemaDescriptor::new(
            "how_to_translate",
            object_schema(&[
                ("correct_id", string_type()),
                ("incorrect1_id", string_type()),
                ("incorrect2_id", string_type()),
            ]),
        )
    }

    fn system_prompt(&self) -> String {
        SYSTEM_PROMPT.to_string()
    }

    fn user_payload(&self, unit: &[IndexedWord], _context: &[String]) -> Result<String, serde_json::Error> {
        let list: Vec<WordCandidate<'_>> = unit
            .iter()
            .map(|w| WordCandidate {
                id: &w.id,
                o: Some(&w.word.original),
                o_t: &w.word.original_translation,
            })
            .collect();
        serde_json::to_string(&list)
    }

    fn expected_cardinality(&self, _unit: &[IndexedWord]) -> usize {
        3
    }

    fn reply_cardinality(&self, reply: &ChoiceReply) -> usize {
        [&reply.correct_id, &reply.incorrect1_id, &reply.incorrect2_id]
            .iter()
            .filter(|id| !id.trim().is_empty())
            .count()
    }

    fn assemble(&self, unit: &[IndexedWord], reply: ChoiceReply) -> Result<TranslationChoice, ShapeViolation> {
        let ids = [
            reply.correct_id.trim(),
            reply.incorrect1_id.trim(),
            reply.incorrect2_id.trim(),
        ];
        for id in ids {
            if find(unit, id).is_none() {
                return Err(ShapeViolation(format!("unknown word id {id}")));
            }
        }
        if ids[0] == ids[1] || ids[0] == ids[2] || ids[1] == ids[2] {
            return Err(ShapeViolation("word ids repeat".into()));
        }
        Ok(TranslationChoice {
            correct_id: ids[0].to_string(),
            distractor_id_1: ids[1].to_string(),
            distractor_id_2: ids[2].to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::Language;
    use crate::models::task::{ParagraphTasks, TrueFalse};
    use crate::pipeline::backend::ScriptedBackend;
    use crate::pipeline::stages::testing::{run_stage, settings, setup};
    use crate::pipeline::store::RecordStore;
    use crate::pipeline::tasks::fixtures::{doc, paragraph, word};
    use serde_json::json;

    const ES: Option<Language> = Some(Language::Spanish);

    fn base() -> TaskDocument {
        let mut first = ParagraphTasks::new(1);
        first.true_or_false = Some(Some(TrueFalse {
            question: "El viejo pesca".into(),
            answer: true,
        }));
        TaskDocument {
            chapters: vec![Chapter::new(1, vec![first])],
        }
    }

    fn store_sources(store: &RecordStore<'_>) {
        let words = doc(vec![
            paragraph(1, vec![word("old man", "viejo"), word("fished", "pescaba"), word("sea", "mar")]),
            paragraph(2, vec![word("a", "un"), word("an extremely long expression", "x")]),
        ]);
        store.write_document(1, ES, StageField::SentenceTranslationWords, &words).unwrap();
        store.write_document(1, ES, StageField::TasksTrueOrFalse, &base()).unwrap();
    }

    fn run(store: &RecordStore<'_>, backend: &ScriptedBackend) -> TaskDocument {
        let (_, book) = setup();
        let settings = settings();
        let StageOutcome::Produced(json) = run_stage(
            &TranslationChoiceStage::original(),
            &book,
            &settings,
            store,
            ES,
            Some(backend),
            None,
        )
        .unwrap() else {
            panic!("expected Produced");
        };
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn unknown_id_retried_then_accepted() {
        let (conn, _) = setup();
        let store = RecordStore::new(&conn);
        store_sources(&store);
        let backend = ScriptedBackend::new(vec![
            Ok(json!({ "correct_id": "1_1_1_9", "incorrect1_id": "1_1_1_1", "incorrect2_id": "1_1_1_2" })),
            Ok(json!({ "correct_id": "1_1_1_2", "incorrect1_id": "1_1_1_1", "incorrect2_id": "1_1_1_3" })),
        ]);

        let out = run(&store, &backend);
        let paragraphs = &out.chapters[0].paragraphs;
        // Second paragraph has too few short words, so only one call succeeds
        assert_eq!(backend.call_count(), 2);
        let choice = paragraphs[0].how_to_translate.clone().flatten().unwrap();
        assert_eq!(choice.correct_id, "1_1_1_2");
        assert_eq!(paragraphs[1].how_to_translate, Some(None));
        // True/false tasks carried forward, omitted paragraph gets null
        assert!(paragraphs[0].true_or_false.clone().flatten().is_some());
        assert_eq!(paragraphs[1].true_or_false, Some(None));
    }

    #[test]
    fn repeated_ids_rejected() {
        let words = vec![word("a", "b"), word("c", "d"), word("e", "f")];
        let p = paragraph(1, words);
        let unit = index_paragraph(1, &p);
        let reply = ChoiceReply {
            correct_id: "1_1_1_1".into(),
            incorrect1_id: "1_1_1_1".into(),
            incorrect2_id: "1_1_1_2".into(),
        };
        assert!(ChooseTranslation.assemble(&unit, reply).is_err());
    }

    #[test]
    fn long_word_groups_are_not_candidates() {
        let p = paragraph(1, vec![word("cat", "gato"), word("a very long phrasal group here", "x")]);
        let options = candidates(index_paragraph(1, &p));
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].id, "1_1_1_1");
    }
}
