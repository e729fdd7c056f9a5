//! Paragraph narration to audio files.
//!
//! Output lives on disk, not in the record store, so the stage is guarded
//! by the claim flag. Files already on disk are skipped, which lets a
//! stage stopped by the paragraph limit pick up where it left off.

use std::fs;
use std::path::{Path, PathBuf};

use super::{halt, Stage, StageContext, StageOutcome};
use crate::config::ConfigError;
use crate::models::document::{Document, ParagraphText};
use crate::models::enums::{StageField, StageName};
use crate::pipeline::error::PipelineError;
use crate::pipeline::guard::Guard;
use crate::pipeline::speech::{SpeechRequest, VoiceSettings};
use crate::pipeline::transform::{run_with_retry, Progress};

pub struct NarrationStage {
    name: StageName,
    source: StageField,
    simplified: bool,
}

impl NarrationStage {
    pub fn original() -> Self {
        Self {
            name: StageName::VoiceNarration,
            source: StageField::TextByChapters,
            simplified: false,
        }
    }

    pub fn simplified() -> Self {
        Self {
            name: StageName::VoiceNarrationSimplified,
            source: StageField::TextByChaptersSimplified,
            simplified: true,
        }
    }

    fn file_stem(&self, chapter: u32, paragraph: u32) -> String {
        if self.simplified {
            format!("{chapter}_{paragraph}_s")
        } else {
            format!("{chapter}_{paragraph}")
        }
    }
}

/// Directory holding every audio file of one book.
pub fn book_audio_dir(audio_dir: &Path, book_id: i64) -> PathBuf {
    audio_dir.join(format!("book_{book_id}"))
}

impl Stage for NarrationStage {
    fn name(&self) -> StageName {
        self.name
    }

    fn sources(&self) -> Vec<StageField> {
        vec![self.source]
    }

    fn result(&self) -> Option<StageField> {
        None
    }

    fn guard(&self) -> Guard {
        Guard::Claim
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, PipelineError> {
        let speech = ctx.speech(self.name)?;
        let doc: Document<ParagraphText> = ctx.require_document(self.source)?;
        let config = &ctx.settings.speech;
        let voice_id = config.voice_id.as_deref().ok_or(ConfigError::InvalidValue {
            field: "speech.voice_id",
            reason: "a voice is required for narration".into(),
        })?;
        let settings = VoiceSettings {
            stability: config.stability,
            similarity_boost: config.similarity_boost,
            speed: if self.simplified {
                config.speed_simplified
            } else {
                config.speed
            },
        };

        let dir = book_audio_dir(&ctx.settings.audio_dir, ctx.book.id);
        fs::create_dir_all(&dir)?;

        let policy = ctx.policy();
        let mut progress = Progress::new(ctx.book.id, self.name, doc.paragraph_count());
        let mut narrated = 0usize;

        for chapter in &doc.chapters {
            let paragraphs = &chapter.paragraphs;
            for (idx, paragraph) in paragraphs.iter().enumerate() {
                let stem = self.file_stem(chapter.chapter_number, paragraph.paragraph_number);
                let audio_path = dir.join(format!("{stem}.mp3"));
                if audio_path.exists() {
                    progress.advance();
                    continue;
                }
                if config.max_paragraphs.is_some_and(|max| narrated >= max) {
                    tracing::info!(
                        book_id = ctx.book.id,
                        stage = self.name.as_str(),
                        narrated,
                        "Paragraph limit reached"
                    );
                    return Ok(StageOutcome::Halted {
                        reason: format!("paragraph limit of {narrated} reached"),
                    });
                }

                let request = SpeechRequest {
                    text: &paragraph.paragraph_content,
                    voice_id,
                    settings,
                    previous_text: idx.checked_sub(1).map(|i| paragraphs[i].paragraph_content.as_str()),
                    next_text: paragraphs.get(idx + 1).map(|p| p.paragraph_content.as_str()),
                };
                let coords = ctx
                    .coords(self.name)
                    .chapter(chapter.chapter_number)
                    .paragraph(paragraph.paragraph_number);
                let clip = match run_with_retry(&policy, &coords, |_| speech.synthesize(&request)) {
                    Ok(clip) => clip,
                    Err(e) => return halt(e),
                };

                // The mp3 marks the paragraph as done, so it appears last and whole.
                let partial = dir.join(format!("{stem}.mp3.tmp"));
                fs::write(&partial, &clip.audio)?;
                if let Some(alignment) = &clip.alignment {
                    let timing = serde_json::to_string_pretty(alignment)?;
                    fs::write(dir.join(format!("{stem}_time.json")), timing)?;
                }
                fs::rename(&partial, &audio_path)?;
                tracing::debug!(path = %audio_path.display(), bytes = clip.audio.len(), "Audio saved");
                narrated += 1;
                progress.advance();
            }
        }

        Ok(StageOutcome::Completed)
    }
}
