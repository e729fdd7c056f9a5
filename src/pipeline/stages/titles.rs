//! Chapter summaries, titles and title translations.

use serde::Deserialize;
use serde_json::json;

use super::{halt, Stage, StageContext, StageOutcome};
use crate::models::document::{ChapterTitle, ChapterTitleTranslation, Document, ParagraphText};
use crate::models::enums::{Language, StageField, StageName};
use crate::models::Book;
use crate::pipeline::backend::{object_schema, string_type, SchemaDescriptor};
use crate::pipeline::error::PipelineError;
use crate::pipeline::transform::{transform_unit, Progress, ShapeTransform, ShapeViolation};

const MAX_TITLE_WORDS: usize = 8;
const MAX_TRANSLATED_TITLE_CHARS: usize = 55;
/// Previous summaries shown as context.
const SUMMARY_CONTEXT: usize = 2;

// ═══════════════════════════════════════════
// Summaries and titles
// ═══════════════════════════════════════════

pub struct ChapterTitlesStage;

impl Stage for ChapterTitlesStage {
    fn name(&self) -> StageName {
        StageName::ChaptersTitle
    }

    fn sources(&self) -> Vec<StageField> {
        vec![StageField::TextByChapters]
    }

    fn result(&self) -> Option<StageField> {
        Some(StageField::ChaptersTitles)
    }

    /// Summaries first for the whole book, then one title per summary.
    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, PipelineError> {
        let stage = self.name();
        let backend = ctx.backend(stage)?;
        let doc: Document<ParagraphText> = ctx.require_document(StageField::TextByChapters)?;
        let policy = ctx.policy();
        let language = ctx.source_lang();

        let summarize = Summarize {
            book: ctx.book,
            language,
        };
        let mut progress = Progress::new(ctx.book.id, stage, doc.chapters.len() * 2);
        let mut summaries: Vec<String> = Vec::with_capacity(doc.chapters.len());
        for chapter in &doc.chapters {
            let text = chapter
                .paragraphs
                .iter()
                .map(|p| p.paragraph_content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let context = recent(&summaries);
            let coords = ctx.coords(stage).chapter(chapter.chapter_number);
            match transform_unit(&summarize, &text, context, backend, &policy, &coords) {
                Ok(summary) => summaries.push(summary),
                Err(e) => return halt(e),
            }
            progress.advance();
        }

        let entitle = Entitle {
            book: ctx.book,
            language,
        };
        let mut titles = Vec::with_capacity(summaries.len());
        for (idx, summary) in summaries.iter().enumerate() {
            let context = recent(&summaries[..idx]);
            let coords = ctx.coords(stage).chapter(idx as u32 + 1);
            match transform_unit(&entitle, summary, context, backend, &policy, &coords) {
                Ok(title) => titles.push(ChapterTitle {
                    chapter_number: idx as u32 + 1,
                    summary: summary.clone(),
                    title,
                }),
                Err(e) => return halt(e),
            }
            progress.advance();
        }

        Ok(StageOutcome::Produced(serde_json::to_string_pretty(&titles)?))
    }
}

fn recent(summaries: &[String]) -> &[String] {
    &summaries[summaries.len().saturating_sub(SUMMARY_CONTEXT)..]
}

/// Reply with a single non-empty string field.
#[derive(Deserialize)]
struct SummaryReply {
    summary: String,
}

#[derive(Deserialize)]
struct TitleReply {
    title: String,
}

struct Summarize<'b> {
    book: &'b Book,
    language: Language,
}

impl ShapeTransform for Summarize<'_> {
    type Unit = String;
    type Reply = SummaryReply;
    type Output = String;

    fn schema(&self) -> SchemaDescriptor {
        SchemaDescriptor::new("chapter_summary", object_schema(&[("summary", string_type())]))
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are a literary editor. Read a chapter of '{}' by {} and write a very short summary \
             in {}: the key facts only. `previous` holds summaries of the chapters before it.",
            self.book.title,
            self.book.author,
            self.language.display_name()
        )
    }

    fn user_payload(&self, unit: &String, context: &[String]) -> Result<String, serde_json::Error> {
        serde_json::to_string(&json!({ "previous": context, "chapter": unit }))
    }

    fn expected_cardinality(&self, _unit: &String) -> usize {
        1
    }

    fn reply_cardinality(&self, reply: &SummaryReply) -> usize {
        usize::from(!reply.summary.trim().is_empty())
    }

    fn assemble(&self, _unit: &String, reply: SummaryReply) -> Result<String, ShapeViolation> {
        Ok(reply.summary.trim().to_string())
    }
}

struct Entitle<'b> {
    book: &'b Book,
    language: Language,
}

impl ShapeTransform for Entitle<'_> {
    type Unit = String;
    type Reply = TitleReply;
    type Output = String;

    fn schema(&self) -> SchemaDescriptor {
        SchemaDescriptor::new("chapter_title", object_schema(&[("title", string_type())]))
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are a creative editor. Write a very short, catchy chapter title of at most {} words \
             in {} for a chapter of '{}' by {}, based on its summary. Focus on what hooks ordinary \
             readers: relationships, struggles, doubts, dangers, victories. One simple sentence, no \
             lists, no quotes.",
            MAX_TITLE_WORDS,
            self.language.display_name(),
            self.book.title,
            self.book.author
        )
    }

    fn user_payload(&self, unit: &String, context: &[String]) -> Result<String, serde_json::Error> {
        serde_json::to_string(&json!({ "previous": context, "summary": unit }))
    }

    fn expected_cardinality(&self, _unit: &String) -> usize {
        1
    }

    fn reply_cardinality(&self, reply: &TitleReply) -> usize {
        usize::from(!reply.title.trim().is_empty())
    }

    fn assemble(&self, _unit: &String, reply: TitleReply) -> Result<String, ShapeViolation> {
        let title = clean_title(&reply.title);
        let words = title.split_whitespace().count();
        if words > MAX_TITLE_WORDS {
            return Err(ShapeViolation(format!("title has {words} words")));
        }
        Ok(title)
    }
}

fn clean_title(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '«' | '»' | '“' | '”'))
        .trim()
        .to_string()
}

// ═══════════════════════════════════════════
// Title translation
// ═══════════════════════════════════════════

pub struct TitleTranslateStage;

impl Stage for TitleTranslateStage {
    fn name(&self) -> StageName {
        StageName::ChaptersTitleTranslate
    }

    fn sources(&self) -> Vec<StageField> {
        vec![StageField::ChaptersTitles]
    }

    fn result(&self) -> Option<StageField> {
        Some(StageField::ChaptersTitlesTranslations)
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, PipelineError> {
        let stage = self.name();
        let target = ctx.target(stage)?;
        let backend = ctx.backend(stage)?;
        let titles: Vec<ChapterTitle> = ctx.require_document(StageField::ChaptersTitles)?;

        let transform = TranslateTitle {
            book: ctx.book,
            target,
        };
        let policy = ctx.policy();
        let mut progress = Progress::new(ctx.book.id, stage, titles.len());
        let mut translated = Vec::with_capacity(titles.len());

        for title in &titles {
            let coords = ctx.coords(stage).chapter(title.chapter_number);
            match transform_unit(&transform, title, &[], backend, &policy, &coords) {
                Ok(text) => translated.push(ChapterTitleTranslation {
                    chapter_number: title.chapter_number,
                    title: text,
                }),
                Err(e) => return halt(e),
            }
            progress.advance();
        }

        Ok(StageOutcome::Produced(serde_json::to_string_pretty(&translated)?))
    }
}

struct TranslateTitle<'b> {
    book: &'b Book,
    target: Language,
}

impl ShapeTransform for TranslateTitle<'_> {
    type Unit = ChapterTitle;
    type Reply = TitleReply;
    type Output = String;

    fn schema(&self) -> SchemaDescriptor {
        SchemaDescriptor::new("chapter_title", object_schema(&[("title", string_type())]))
    }

    fn system_prompt(&self) -> String {
        format!(
            "Translate the chapter title of '{}' by {} into {}. Make it natural, lively and concise \
             for a native speaker, at most {} characters, keeping its meaning and appeal. No quotes.",
            self.book.title,
            self.book.author,
            self.target.display_name(),
            MAX_TRANSLATED_TITLE_CHARS
        )
    }

    fn user_payload(&self, unit: &ChapterTitle, _context: &[String]) -> Result<String, serde_json::Error> {
        serde_json::to_string(&json!({ "chapter_number": unit.chapter_number, "title": unit.title }))
    }

    fn expected_cardinality(&self, _unit: &ChapterTitle) -> usize {
        1
    }

    fn reply_cardinality(&self, reply: &TitleReply) -> usize {
        usize::from(!reply.title.trim().is_empty())
    }

    fn assemble(&self, _unit: &ChapterTitle, reply: TitleReply) -> Result<String, ShapeViolation> {
        let title = clean_title(&reply.title);
        let len = title.chars().count();
        if len > MAX_TRANSLATED_TITLE_CHARS {
            return Err(ShapeViolation(format!("translated title has {len} characters")));
        }
        Ok(title)
    }
}
