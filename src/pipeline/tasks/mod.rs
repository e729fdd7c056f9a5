//! Comprehension task generation.
//!
//! Three cumulative layers per paragraph: a true/false statement, a
//! "how do you translate" choice between three words of the paragraph, and
//! a pair of related words plus an invented odd one out. Each layer copies
//! the previous one and fills its own slot. Unlike the structural stages a
//! failed task never halts: the slot is set to `null` and the stage moves
//! on.

pub mod translation_choice;
pub mod true_false;
pub mod word_index;
pub mod word_pairing;

pub use translation_choice::TranslationChoiceStage;
pub use true_false::TrueFalseStage;
pub use word_pairing::WordPairingStage;

use crate::models::task::{ParagraphTasks, TaskDocument};
use crate::pipeline::error::PipelineError;
use crate::pipeline::transform::TransformError;

/// Exhaustion yields no task; an unserializable request is still an error.
fn null_on_exhaustion<T>(result: Result<T, TransformError>) -> Result<Option<T>, PipelineError> {
    match result {
        Ok(task) => Ok(Some(task)),
        Err(TransformError::Exhausted { coords, .. }) => {
            tracing::info!(unit = %coords, "Task skipped after exhausting attempts");
            Ok(None)
        }
        Err(TransformError::Payload(e)) => Err(PipelineError::Json(e)),
    }
}

/// Earlier tasks of a paragraph. A paragraph the previous layer left out
/// gets `null` for its true/false slot.
fn carry_forward(base: &TaskDocument, chapter: u32, paragraph: u32) -> ParagraphTasks {
    let mut tasks = base
        .paragraph(chapter, paragraph)
        .cloned()
        .unwrap_or_else(|| ParagraphTasks::new(paragraph));
    tasks.true_or_false.get_or_insert(None);
    tasks
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Word-enriched documents for task tests.

    use crate::models::document::{Chapter, Document, Sentence, SentenceParagraph, WordGroup};

    pub fn word(o: &str, o_t: &str) -> WordGroup {
        WordGroup {
            original: o.into(),
            original_translation: o_t.into(),
            lemma: None,
            lemma_translation: None,
        }
    }

    pub fn paragraph(number: u32, words: Vec<WordGroup>) -> SentenceParagraph {
        SentenceParagraph {
            paragraph_number: number,
            sentences: vec![Sentence {
                sentence_number: 1,
                sentence_original: "The old man fished.".into(),
                sentence_translation: Some("El viejo pescaba.".into()),
                words,
            }],
        }
    }

    pub fn doc(paragraphs: Vec<SentenceParagraph>) -> Document<SentenceParagraph> {
        Document {
            chapters: vec![Chapter::new(1, paragraphs)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::document::Chapter;
    use crate::models::enums::StageName;
    use crate::models::task::TrueFalse;

    #[test]
    fn carried_tasks_keep_earlier_slots() {
        let mut tasks = ParagraphTasks::new(2);
        tasks.true_or_false = Some(Some(TrueFalse {
            question: "El viejo pesca".into(),
            answer: true,
        }));
        let base = TaskDocument {
            chapters: vec![Chapter::new(1, vec![tasks.clone()])],
        };
        assert_eq!(carry_forward(&base, 1, 2), tasks);

        let omitted = carry_forward(&base, 1, 1);
        assert_eq!(omitted.paragraph_number, 1);
        assert_eq!(omitted.true_or_false, Some(None));
        assert_eq!(omitted.how_to_translate, None);
    }

    #[test]
    fn exhaustion_becomes_null_task() {
        let exhausted: Result<u8, _> = Err(TransformError::Exhausted {
            stage: StageName::TasksTwoWords,
            coords: "book 1".into(),
            attempts: 2,
            last: "bad id".into(),
        });
        assert_eq!(null_on_exhaustion(exhausted).unwrap(), None);

        let payload = serde_json::from_str::<u8>("x").unwrap_err();
        assert!(null_on_exhaustion::<u8>(Err(TransformError::Payload(payload))).is_err());
    }
}
