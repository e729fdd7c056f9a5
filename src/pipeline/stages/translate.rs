//! Sentence-level translation.
//!
//! Each paragraph is split into sentences locally, then translated as one
//! request. The reply must carry one translation per sentence.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{halt, Stage, StageContext, StageOutcome};
use crate::models::document::{Chapter, Document, ParagraphText, Sentence, SentenceParagraph};
use crate::models::enums::{Language, StageField, StageName};
use crate::pipeline::backend::{array_of, integer_type, object_schema, string_type, SchemaDescriptor};
use crate::pipeline::error::PipelineError;
use crate::pipeline::segment;
use crate::pipeline::transform::{
    preceding_context, transform_unit, Progress, ShapeTransform, ShapeViolation,
};

pub struct TranslateStage {
    name: StageName,
    source: StageField,
    result: StageField,
}

impl TranslateStage {
    pub fn original() -> Self {
        Self {
            name: StageName::TranslateSentences,
            source: StageField::TextByChapters,
            result: StageField::SentenceTranslation,
        }
    }

    pub fn simplified() -> Self {
        Self {
            name: StageName::TranslateSentencesSimplified,
            source: StageField::TextByChaptersSimplified,
            result: StageField::SimplifiedSentenceTranslation,
        }
    }
}

impl Stage for TranslateStage {
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
        let source_lang = ctx.source_lang();
        let doc: Document<ParagraphText> = ctx.require_document(self.source)?;

        // Source text of every paragraph in book order, for context windows.
        let flat: Vec<String> = doc
            .chapters
            .iter()
            .flat_map(|c| c.paragraphs.iter().map(|p| p.paragraph_content.clone()))
            .collect();

        let transform = TranslateSentences {
            source: source_lang,
            target,
        };
        let policy = ctx.policy();
        let budget = ctx.settings.limits.context_chars;
        let mut progress = Progress::new(ctx.book.id, self.name, flat.len());
        let mut position = 0usize;
        let mut chapters = Vec::with_capacity(doc.chapters.len());

        for chapter in &doc.chapters {
            let mut paragraphs = Vec::with_capacity(chapter.paragraphs.len());
            for paragraph in &chapter.paragraphs {
                let unit = sentence_paragraph(paragraph, source_lang);
                let context = preceding_context(&flat, position, 2, budget);
                let coords = ctx
                    .coords(self.name)
                    .chapter(chapter.chapter_number)
                    .paragraph(paragraph.paragraph_number);

                match transform_unit(&transform, &unit, &context, backend, &policy, &coords) {
                    Ok(translated) => paragraphs.push(translated),
                    Err(e) => return halt(e),
                }
                position += 1;
                progress.advance();
            }
            chapters.push(Chapter::new(chapter.chapter_number, paragraphs));
        }

        let doc = Document { chapters };
        Ok(StageOutcome::Produced(serde_json::to_string_pretty(&doc)?))
    }
}

/// Split a paragraph into numbered, untranslated sentences.
pub fn sentence_paragraph(paragraph: &ParagraphText, language: Language) -> SentenceParagraph {
    let sentences = segment::split(&paragraph.paragraph_content, language)
        .into_iter()
        .enumerate()
        .map(|(i, text)| Sentence {
            sentence_number: i as u32 + 1,
            sentence_original: text,
            sentence_translation: None,
            words: Vec::new(),
        })
        .collect();
    SentenceParagraph {
        paragraph_number: paragraph.paragraph_number,
        sentences,
    }
}

struct TranslateSentences {
    source: Language,
    target: Language,
}

#[derive(Serialize)]
struct SourceSentence<'a> {
    sentence_number: u32,
    sentence_original: &'a str,
}

#[derive(Deserialize)]
struct TranslationReply {
    sentences: Vec<TranslatedSentence>,
}

#[derive(Deserialize)]
struct TranslatedSentence {
    sentence_number: u32,
    sentence_translation: String,
}

impl ShapeTransform for TranslateSentences {
    type Unit = SentenceParagraph;
    type Reply = TranslationReply;
    type Output = SentenceParagraph;

    fn schema(&self) -> SchemaDescriptor {
        let sentence = object_schema(&[
            ("sentence_number", integer_type()),
            ("sentence_translation", string_type()),
        ]);
        SchemaDescriptor::new("sentence_translations", object_schema(&[("sentences", array_of(sentence))]))
    }

    fn system_prompt(&self) -> String {
        format!(
            "Translate each sentence from {} to {}. Return one `sentence_translation` per \
             `sentence_number`, in order. Do not drop, merge or split sentences. The translation \
             should read naturally. `context` holds the preceding paragraphs for reference only; \
             do not translate it.",
            self.source.display_name(),
            self.target.display_name()
        )
    }

    fn user_payload(&self, unit: &SentenceParagraph, context: &[String]) -> Result<String, serde_json::Error> {
        let sentences: Vec<SourceSentence<'_>> = unit
            .sentences
            .iter()
            .map(|s| SourceSentence {
                sentence_number: s.sentence_number,
                sentence_original: &s.sentence_original,
            })
            .collect();
        serde_json::to_string(&json!({ "context": context, "sentences": sentences }))
    }

    fn expected_cardinality(&self, unit: &SentenceParagraph) -> usize {
        unit.sentences.len()
    }

    fn reply_cardinality(&self, reply: &TranslationReply) -> usize {
        reply.sentences.len()
    }

    fn assemble(
        &self,
        unit: &SentenceParagraph,
        reply: TranslationReply,
    ) -> Result<SentenceParagraph, ShapeViolation> {
        let mut out = unit.clone();
        for (sentence, translated) in out.sentences.iter_mut().zip(reply.sentences) {
            if translated.sentence_number != sentence.sentence_number {
                return Err(ShapeViolation(format!(
                    "sentence {} came back as {}",
                    sentence.sentence_number, translated.sentence_number
                )));
            }
            let text = translated.sentence_translation.trim();
            if text.is_empty() {
                return Err(ShapeViolation(format!(
                    "sentence {} has no translation",
                    sentence.sentence_number
                )));
            }
            sentence.sentence_translation = Some(text.to_string());
        }
        Ok(out)
    }

    fn passthrough(&self, unit: &SentenceParagraph) -> Option<SentenceParagraph> {
        Some(unit.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::backend::ScriptedBackend;
    use crate::pipeline::stages::testing::{run_stage, settings, setup};
    use crate::pipeline::store::RecordStore;

    fn book_text() -> Document<ParagraphText> {
        Document {
            chapters: vec![Chapter::new(
                1,
                vec![ParagraphText {
                    paragraph_number: 1,
                    paragraph_content: "The cat sat. It was happy.".into(),
                }],
            )],
        }
    }

    fn one_sentence() -> serde_json::Value {
        json!({ "sentences": [
            { "sentence_number": 1, "sentence_translation": "El gato se sentó y estaba feliz." }
        ]})
    }

    fn two_sentences() -> serde_json::Value {
        json!({ "sentences": [
            { "sentence_number": 1, "sentence_translation": "El gato se sentó." },
            { "sentence_number": 2, "sentence_translation": "Estaba feliz." }
        ]})
    }

    #[test]
    fn short_reply_triggers_exactly_one_retry() {
        let (conn, book) = setup();
        let settings = settings();
        let store = RecordStore::new(&conn);
        store.write_document(1, None, StageField::TextByChapters, &book_text()).unwrap();

        let backend = ScriptedBackend::new(vec![Ok(one_sentence()), Ok(two_sentences())]);
        let outcome = run_stage(
            &TranslateStage::original(),
            &book,
            &settings,
            &store,
            Some(Language::Spanish),
            Some(&backend),
            None,
        )
        .unwrap();

        assert_eq!(backend.call_count(), 2);
        let StageOutcome::Produced(json) = outcome else {
            panic!("expected Produced");
        };
        let doc: Document<SentenceParagraph> = serde_json::from_str(&json).unwrap();
        let sentences = &doc.chapters[0].paragraphs[0].sentences;
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].sentence_original, "The cat sat.");
        assert_eq!(sentences[1].sentence_translation.as_deref(), Some("Estaba feliz."));
    }

    #[test]
    fn persistent_short_reply_halts() {
        let (conn, book) = setup();
        let settings = settings();
        let store = RecordStore::new(&conn);
        store.write_document(1, None, StageField::TextByChapters, &book_text()).unwrap();

        let backend = ScriptedBackend::with_handler(|_, _, _| Ok(one_sentence()));
        let outcome = run_stage(
            &TranslateStage::original(),
            &book,
            &settings,
            &store,
            Some(Language::Spanish),
            Some(&backend),
            None,
        )
        .unwrap();

        assert!(matches!(outcome, StageOutcome::Halted { .. }));
        assert_eq!(backend.call_count(), settings.retry.max_attempts as usize);
    }

    #[test]
    fn previous_paragraph_sent_as_context() {
        let (conn, book) = setup();
        let settings = settings();
        let store = RecordStore::new(&conn);
        let mut doc = book_text();
        doc.chapters[0].paragraphs.push(ParagraphText {
            paragraph_number: 2,
            paragraph_content: "Then it slept.".into(),
        });
        store.write_document(1, None, StageField::TextByChapters, &doc).unwrap();

        let backend = ScriptedBackend::new(vec![
            Ok(two_sentences()),
            Ok(json!({ "sentences": [{ "sentence_number": 1, "sentence_translation": "Luego durmió." }] })),
        ]);
        run_stage(
            &TranslateStage::original(),
            &book,
            &settings,
            &store,
            Some(Language::Spanish),
            Some(&backend),
            None,
        )
        .unwrap();

        let calls = backend.calls();
        assert!(calls[1].user_payload.contains("The cat sat. It was happy."));
        assert!(calls[1].system_prompt.contains("English to Spanish"));
    }

    fn single(text: &str) -> serde_json::Value {
        json!({ "sentences": [{ "sentence_number": 1, "sentence_translation": text }] })
    }

    fn paragraph(n: u32, text: &str) -> ParagraphText {
        ParagraphText {
            paragraph_number: n,
            paragraph_content: text.into(),
        }
    }

    #[test]
    fn blank_paragraph_skips_the_backend() {
        let (conn, book) = setup();
        let settings = settings();
        let store = RecordStore::new(&conn);
        let doc = Document {
            chapters: vec![Chapter::new(1, vec![paragraph(1, "   \n ")])],
        };
        store.write_document(1, None, StageField::TextByChapters, &doc).unwrap();

        let backend = ScriptedBackend::new(vec![]);
        let outcome = run_stage(
            &TranslateStage::original(),
            &book,
            &settings,
            &store,
            Some(Language::Spanish),
            Some(&backend),
            None,
        )
        .unwrap();

        assert_eq!(backend.call_count(), 0);
        let StageOutcome::Produced(json) = outcome else {
            panic!("expected Produced");
        };
        let out: Document<SentenceParagraph> = serde_json::from_str(&json).unwrap();
        assert_eq!(out.chapters[0].paragraphs.len(), 1);
        assert!(out.chapters[0].paragraphs[0].sentences.is_empty());
    }

    #[test]
    fn context_window_respects_char_budget() {
        let (conn, book) = setup();
        let mut settings = settings();
        settings.limits.context_chars = 15;
        let store = RecordStore::new(&conn);
        let doc = Document {
            chapters: vec![Chapter::new(
                1,
                vec![
                    paragraph(1, "The cat sat. It was happy."),
                    paragraph(2, "Short one."),
                    paragraph(3, "Then it slept."),
                ],
            )],
        };
        store.write_document(1, None, StageField::TextByChapters, &doc).unwrap();

        let backend = ScriptedBackend::new(vec![
            Ok(two_sentences()),
            Ok(single("Corto.")),
            Ok(single("Luego durmió.")),
        ]);
        run_stage(
            &TranslateStage::original(),
            &book,
            &settings,
            &store,
            Some(Language::Spanish),
            Some(&backend),
            None,
        )
        .unwrap();

        let contexts: Vec<Vec<String>> = backend
            .calls()
            .iter()
            .map(|call| {
                let payload: serde_json::Value = serde_json::from_str(&call.user_payload).unwrap();
                serde_json::from_value(payload["context"].clone()).unwrap()
            })
            .collect();
        assert_eq!(contexts.len(), 3);
        assert!(contexts[0].is_empty());
        // 26 chars is over the budget on its own
        assert!(contexts[1].is_empty());
        // The nearer paragraph fits, the one before it would overflow
        assert_eq!(contexts[2], vec!["Short one.".to_string()]);
        let used: usize = contexts.iter().flatten().map(|c| c.chars().count()).max().unwrap_or(0);
        assert!(used <= settings.limits.context_chars);
    }

    #[test]
    fn requires_target_language() {
        let (conn, book) = setup();
        let settings = settings();
        let store = RecordStore::new(&conn);
        let backend = ScriptedBackend::new(vec![]);
        let err = run_stage(&TranslateStage::original(), &book, &settings, &store, None, Some(&backend), None)
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingLanguage(_)));
    }
}
