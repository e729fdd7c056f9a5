//! Free-text rewrite stages: preprocess, sentence split, paragraph split.
//!
//! The text is cut into request-sized chunks on paragraph boundaries and
//! each chunk is rewritten on its own. A rewrite may reflow the text but
//! must keep roughly the same amount of it.

use serde::Deserialize;
use serde_json::json;

use super::{halt, Stage, StageContext, StageOutcome};
use crate::models::enums::{Language, StageField, StageName};
use crate::pipeline::backend::{object_schema, string_type, SchemaDescriptor};
use crate::pipeline::error::PipelineError;
use crate::pipeline::segment::{split_blocks, split_paragraph_manually, strip_whitespace};
use crate::pipeline::transform::{
    preceding_context, transform_unit, Progress, ShapeTransform, ShapeViolation,
};

/// Allowed drift in non-whitespace characters between a chunk and its rewrite.
const MIN_RATIO: f64 = 0.9;
const MAX_RATIO: f64 = 1.1;

const PREPROCESS_PROMPT: &str = "You are a copy editor. Tidy the text without changing its content:\n\
- Remove line breaks inside sentences and paragraphs.\n\
- Remove extra spaces at the start of paragraphs and between sentences.\n\
- Replace double and triple dashes with a single dash surrounded by spaces.\n\
- Do not rewrite, shorten or translate sentences.\n\
- Separate paragraphs with one blank line.\n\
Return the edited text in the `text` field.";

const SENTENCE_SPLIT_PROMPT: &str = "You prepare books for language learners. \
Split every long sentence (more than about 20 words) into several shorter, complete sentences. \
Keep the wording, order and meaning. Leave short sentences unchanged. \
Keep the paragraph structure: paragraphs are separated by one blank line. \
Return the text in the `text` field.";

const PARAGRAPH_SPLIT_PROMPT: &str = "You prepare books for language learners. \
Split the text into short paragraphs of at most about 150 characters, breaking only between sentences \
and at natural pauses in the story. Do not change, add or remove any words. \
Put each paragraph on its own line, separated by one blank line. \
Return the text in the `text` field.";

pub struct TextRewriteStage {
    name: StageName,
    source: StageField,
    result: StageField,
    instructions: &'static str,
}

impl TextRewriteStage {
    pub fn preprocess() -> Self {
        Self {
            name: StageName::Preprocess,
            source: StageField::OriginalText,
            result: StageField::FormattedText,
            instructions: PREPROCESS_PROMPT,
        }
    }

    pub fn sentence_split() -> Self {
        Self {
            name: StageName::SentenceSplit,
            source: StageField::FormattedText,
            result: StageField::SplittedText,
            instructions: SENTENCE_SPLIT_PROMPT,
        }
    }

    pub fn paragraph_split() -> Self {
        Self {
            name: StageName::ParagraphSplit,
            source: StageField::SplittedText,
            result: StageField::SeparatedText,
            instructions: PARAGRAPH_SPLIT_PROMPT,
        }
    }
}

impl Stage for TextRewriteStage {
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
        let backend = ctx.backend(self.name)?;
        let text = ctx.require_text(self.source)?;
        let limits = &ctx.settings.limits;
        let chunks = chunk_text(&text, ctx.source_lang(), limits.max_chars_per_request);

        let transform = RewriteTransform {
            instructions: self.instructions,
            language: ctx.source_lang(),
        };
        let policy = ctx.policy();
        let mut progress = Progress::new(ctx.book.id, self.name, chunks.len());
        let mut rewritten = Vec::with_capacity(chunks.len());

        for (idx, chunk) in chunks.iter().enumerate() {
            let context = match idx.checked_sub(1) {
                Some(prev) => tail_context(&chunks[prev], limits.context_chars),
                None => Vec::new(),
            };
            let coords = ctx.coords(self.name);
            match transform_unit(&transform, chunk, &context, backend, &policy, &coords) {
                Ok(text) => rewritten.push(text),
                Err(e) => return halt(e),
            }
            progress.advance();
        }

        Ok(StageOutcome::Produced(rewritten.join("\n\n")))
    }
}

/// Pack paragraph blocks into chunks of at most `max_chars` characters.
///
/// A block that is too long on its own is cut at sentence boundaries. A
/// single sentence longer than `max_chars` still travels alone.
pub fn chunk_text(text: &str, language: Language, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    for block in split_blocks(text) {
        if block.chars().count() > max_chars {
            pieces.extend(split_paragraph_manually(&block, language, max_chars, 0));
        } else {
            pieces.push(block);
        }
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    for piece in pieces {
        let len = piece.chars().count();
        if !current.is_empty() && current_len + 2 + len > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push_str("\n\n");
            current_len += 2;
        }
        current.push_str(&piece);
        current_len += len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Last paragraphs of the previous chunk, for continuity.
fn tail_context(previous_chunk: &str, budget_chars: usize) -> Vec<String> {
    let blocks = split_blocks(previous_chunk);
    preceding_context(&blocks, blocks.len(), 2, budget_chars)
}

struct RewriteTransform {
    instructions: &'static str,
    language: Language,
}

#[derive(Deserialize)]
struct RewriteReply {
    text: String,
}

impl ShapeTransform for RewriteTransform {
    type Unit = String;
    type Reply = RewriteReply;
    type Output = String;

    fn schema(&self) -> SchemaDescriptor {
        SchemaDescriptor::new("rewritten_text", object_schema(&[("text", string_type())]))
    }

    fn system_prompt(&self) -> String {
        format!(
            "{}\nThe text is in {}; keep it in {}. `context` is the text just before \
             this passage, for reference only; do not return it.",
            self.instructions,
            self.language.display_name(),
            self.language.display_name()
        )
    }

    fn user_payload(&self, unit: &String, context: &[String]) -> Result<String, serde_json::Error> {
        serde_json::to_string(&json!({ "context": context, "text": unit }))
    }

    fn expected_cardinality(&self, unit: &String) -> usize {
        usize::from(!unit.trim().is_empty())
    }

    fn reply_cardinality(&self, reply: &RewriteReply) -> usize {
        usize::from(!reply.text.trim().is_empty())
    }

    fn assemble(&self, unit: &String, reply: RewriteReply) -> Result<String, ShapeViolation> {
        let before = strip_whitespace(unit).chars().count() as f64;
        let after = strip_whitespace(&reply.text).chars().count() as f64;
        let ratio = after / before.max(1.0);
        if !(MIN_RATIO..=MAX_RATIO).contains(&ratio) {
            return Err(ShapeViolation(format!(
                "rewrite kept {:.0}% of the characters",
                ratio * 100.0
            )));
        }
        Ok(reply.text.trim().to_string())
    }

    fn passthrough(&self, unit: &String) -> Option<String> {
        Some(unit.clone())
    }
}
