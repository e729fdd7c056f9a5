use serde::Deserialize;

use super::word_index::{find, index_paragraph, IndexedWord, WordCandidate};
use super::{carry_forward, null_on_exhaustion};
use crate::models::document::{Chapter, Document, SentenceParagraph};
use crate::models::enums::{Language, StageField, StageName};
use crate::models::task::{TaskDocument, WordPairing};
use crate::pipeline::backend::{object_schema, string_type, SchemaDescriptor};
use crate::pipeline::error::PipelineError;
use crate::pipeline::stages::{Stage, StageContext, StageOutcome};
use crate::pipeline::transform::{transform_unit, Progress, ShapeTransform, ShapeViolation};

const MAX_TERM_WORDS: usize = 2;
/// Exclusive upper bound on term length.
const MAX_TERM_CHARS: usize = 15;
const MIN_CANDIDATES: usize = 2;

pub struct WordPairingStage {
    name: StageName,
    words: StageField,
    base: StageField,
    result: StageField,
}

impl WordPairingStage {
    pub fn original() -> Self {
        Self {
            name: StageName::TasksTwoWords,
            words: StageField::SentenceTranslationWords,
            base: StageField::TasksHowTo,
            result: StageField::TasksTwoWords,
        }
    }

    pub fn simplified() -> Self {
        Self {
            name: StageName::TasksTwoWordsSimplified,
            words: StageField::SimplifiedSentenceTranslationWords,
            base: StageField::TasksHowToSimplified,
            result: StageField::TasksTwoWordsSimplified,
        }
    }
}

/// Word groups whose translation is a short term.
fn candidates(words: Vec<IndexedWord>) -> Vec<IndexedWord> {
    words
        .into_iter()
        .filter(|w| {
            let term = w.word.original_translation.trim();
            !term.is_empty()
                && term.split_whitespace().count() <= MAX_TERM_WORDS
                && term.chars().count() < MAX_TERM_CHARS
        })
        .collect()
}

impl Stage for WordPairingStage {
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
        let target = ctx.target(self.name)?;
        let backend = ctx.backend(self.name)?;
        let words: Document<SentenceParagraph> = ctx.require_document(self.words)?;
        let base: TaskDocument = ctx.require_document(self.base)?;
        let policy = ctx.task_policy();
        let transform = PairWords { target };

        let mut progress = Progress::new(ctx.book.id, self.name, words.paragraph_count());
        let mut chapters = Vec::with_capacity(words.chapters.len());
        for chapter in &words.chapters {
            let mut paragraphs = Vec::with_capacity(chapter.paragraphs.len());
            for paragraph in &chapter.paragraphs {
                let mut tasks = carry_forward(&base, chapter.chapter_number, paragraph.paragraph_number);
                tasks.how_to_translate.get_or_insert(None);
                let terms = candidates(index_paragraph(chapter.chapter_number, paragraph));

                let task = if terms.len() < MIN_CANDIDATES {
                    tracing::debug!(
                        book_id = ctx.book.id,
                        chapter = chapter.chapter_number,
                        paragraph = paragraph.paragraph_number,
                        candidates = terms.len(),
                        "Not enough short terms for a word pairing"
                    );
                    None
                } else {
                    let coords = ctx
                        .coords(self.name)
                        .chapter(chapter.chapter_number)
                        .paragraph(paragraph.paragraph_number);
                    null_on_exhaustion(transform_unit(&transform, &terms, &[], backend, &policy, &coords))?
                };
                tasks.two_words = Some(task);
                paragraphs.push(tasks);
                progress.advance();
            }
            chapters.push(Chapter::new(chapter.chapter_number, paragraphs));
        }

        let doc = TaskDocument { chapters };
        Ok(StageOutcome::Produced(serde_json::to_string_pretty(&doc)?))
    }
}

struct PairWords {
    target: Language,
}

#[derive(Deserialize)]
struct PairingReply {
    id1: String,
    id2: String,
    invented: String,
}

impl ShapeTransform for PairWords {
    type Unit = [IndexedWord];
    type Reply = PairingReply;
    type Output = WordPairing;

    fn schema(&self) -> SchemaDescriptor {
        SchemaDescriptor::new(
            "two_words",
            object_schema(&[
                ("id1", string_type()),
                ("id2", string_type()),
                ("invented", string_type()),
            ]),
        )
    }

    fn system_prompt(&self) -> String {
        let language = self.target.display_name();
        format!(
            "You get a list of words from a text in {language}.\n\
             1. Find two words of the same kind (for example both actions or both objects) but different in meaning.\n\
             2. Return their ids as id1 and id2.\n\
             3. Invent a third word in {language}, of the same kind, that does not fit the topic of the text, and return it as invented."
        )
    }

    fn user_payload(&self, unit: &[IndexedWord], _context: &[String]) -> Result<String, serde_json::Error> {
        let list: Vec<WordCandidate<'_>> = unit
            .iter()
            .map(|w| WordCandidate {
                id: &w.id,
                o: None,
                o_t: w.word.original_translation.trim(),
            })
            .collect();
        serde_json::to_string(&list)
    }

    fn expected_cardinality(&self, _unit: &[IndexedWord]) -> usize {
        3
    }

    fn reply_cardinality(&self, reply: &PairingReply) -> usize {
        [&reply.id1, &reply.id2, &reply.invented]
            .iter()
            .filter(|v| !v.trim().is_empty())
            .count()
    }

    fn assemble(&self, unit: &[IndexedWord], reply: PairingReply) -> Result<WordPairing, ShapeViolation> {
        let id1 = reply.id1.trim();
        let id2 = reply.id2.trim();
        for id in [id1, id2] {
            if find(unit, id).is_none() {
                return Err(ShapeViolation(format!("unknown word id {id}")));
            }
        }
        if id1 == id2 {
            return Err(ShapeViolation(format!("both words are {id1}")));
        }

        let invented = reply.invented.trim();
        let lowered = invented.to_lowercase();
        let clashes = unit.iter().any(|w| {
            w.word.original_translation.trim().to_lowercase() == lowered
                || w.word.original.trim().to_lowercase() == lowered
        });
        if clashes {
            return Err(ShapeViolation(format!("invented word '{invented}' occurs in the paragraph")));
        }

        Ok(WordPairing {
            word_id_1: id1.to_string(),
            word_id_2: id2.to_string(),
            invented_distractor: invented.to_string(),
        })
    }
}
