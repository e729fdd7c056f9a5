use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{halt, Stage, StageContext, StageOutcome};
use crate::models::document::{Chapter, Document, SentenceParagraph, WordGroup};
use crate::models::enums::{Language, StageField, StageName};
use crate::pipeline::backend::{
    array_of, integer_type, nullable_string, object_schema, string_type, SchemaDescriptor,
};
use crate::pipeline::error::PipelineError;
use crate::pipeline::transform::{transform_unit, Progress, ShapeTransform, ShapeViolation};

/// Break every translated sentence into glossed word groups.
pub struct EnrichStage {
    name: StageName,
    source: StageField,
    result: StageField,
}

impl EnrichStage {
    pub fn original() -> Self {
        Self {
            name: StageName::TranslateWords,
            source: StageField::SentenceTranslation,
            result: StageField::SentenceTranslationWords,
        }
    }

    pub fn simplified() -> Self {
        Self {
            name: StageName::TranslateWordsSimplified,
            source: StageField::SimplifiedSentenceTranslation,
            result: StageField::SimplifiedSentenceTranslationWords,
        }
    }
}

impl Stage for EnrichStage {
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

        let transform = EnrichWords {
            source: ctx.source_lang(),
            target,
        };
        let policy = ctx.policy();
        let mut progress = Progress::new(ctx.book.id, self.name, doc.paragraph_count());
        let mut chapters = Vec::with_capacity(doc.chapters.len());

        for chapter in &doc.chapters {
            let mut paragraphs = Vec::with_capacity(chapter.paragraphs.len());
            for paragraph in &chapter.paragraphs {
                let coords = ctx
                    .coords(self.name)
                    .chapter(chapter.chapter_number)
                    .paragraph(paragraph.paragraph_number);
                match transform_unit(&transform, paragraph, &[], backend, &policy, &coords) {
                    Ok(enriched) => paragraphs.push(enriched),
                    Err(e) => return halt(e),
                }
                progress.advance();
            }
            chapters.push(Chapter::new(chapter.chapter_number, paragraphs));
        }

        let doc = Document { chapters };
        Ok(StageOutcome::Produced(serde_json::to_string_pretty(&doc)?))
    }
}

struct EnrichWords {
    source: Language,
    target: Language,
}

#[derive(Serialize)]
struct SentenceInput<'a> {
    sentence_number: u32,
    sentence_original: &'a str,
    sentence_translation: Option<&'a str>,
}

#[derive(Deserialize)]
struct WordsReply {
    sentences: Vec<SentenceWords>,
}

#[derive(Deserialize)]
struct SentenceWords {
    sentence_number: u32,
    words: Vec<WordGroup>,
}

/// Empty lemma fields mean "same as the surface form".
fn normalize(mut word: WordGroup) -> WordGroup {
    word.original = word.original.trim().to_string();
    word.original_translation = word.original_translation.trim().to_string();
    word.lemma = word.lemma.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
    word.lemma_translation = word
        .lemma_translation
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty());
    if word.lemma.is_none() {
        word.lemma_translation = None;
    }
    word
}

impl ShapeTransform for EnrichWords {
    type Unit = SentenceParagraph;
    type Reply = WordsReply;
    type Output = SentenceParagraph;

    fn schema(&self) -> SchemaDescriptor {
        let word = object_schema(&[
            ("o", string_type()),
            ("o_t", string_type()),
            ("l", nullable_string()),
            ("l_t", nullable_string()),
        ]);
        let sentence = object_schema(&[
            ("sentence_number", integer_type()),
            ("words", array_of(word)),
        ]);
        SchemaDescriptor::new("sentence_words", object_schema(&[("sentences", array_of(sentence))]))
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are a language assistant. For every sentence, drop the punctuation and break the \
             {} text into the shortest meaningful groups, keeping phrasal verbs and idioms together. \
             For each group give:\n\
             - o: the original group\n\
             - o_t: its {} translation as used in this sentence\n\
             - l: the lemma, or null if it equals o\n\
             - l_t: the lemma's translation, or null if l is null\n\
             Return every sentence_number you were given.",
            self.source.display_name(),
            self.target.display_name()
        )
    }

    fn user_payload(&self, unit: &SentenceParagraph, _context: &[String]) -> Result<String, serde_json::Error> {
        let sentences: Vec<SentenceInput<'_>> = unit
            .sentences
            .iter()
            .map(|s| SentenceInput {
                sentence_number: s.sentence_number,
                sentence_original: &s.sentence_original,
                sentence_translation: s.sentence_translation.as_deref(),
            })
            .collect();
        serde_json::to_string(&json!({ "sentences": sentences }))
    }

    fn expected_cardinality(&self, unit: &SentenceParagraph) -> usize {
        unit.sentences.len()
    }

    fn reply_cardinality(&self, reply: &WordsReply) -> usize {
        reply.sentences.len()
    }

    /// Words are matched to sentences by number, not position.
    fn assemble(&self, unit: &SentenceParagraph, reply: WordsReply) -> Result<SentenceParagraph, ShapeViolation> {
        let mut out = unit.clone();
        let mut replies = reply.sentences;
        for sentence in &mut out.sentences {
            let idx = replies
                .iter()
                .position(|r| r.sentence_number == sentence.sentence_number)
                .ok_or_else(|| ShapeViolation(format!("sentence {} missing", sentence.sentence_number)))?;
            let words: Vec<WordGroup> = replies
                .swap_remove(idx)
                .words
                .into_iter()
                .map(normalize)
                .filter(|w| !w.original.is_empty())
                .collect();
            if words.is_empty() && sentence.sentence_original.chars().any(char::is_alphanumeric) {
                return Err(ShapeViolation(format!(
                    "sentence {} has no word groups",
                    sentence.sentence_number
                )));
            }
            sentence.words = words;
        }
        Ok(out)
    }

    fn passthrough(&self, unit: &SentenceParagraph) -> Option<SentenceParagraph> {
        Some(unit.clone())
    }
}
