//! Per-chapter JSON export for one (book, target language) pair.
//!
//! Field names of the exported documents are consumed by other systems and
//! must not change.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{Stage, StageContext, StageOutcome};
use crate::config::Settings;
use crate::models::document::{ChapterTitle, ChapterTitleTranslation, Document, SentenceParagraph};
use crate::models::enums::{Language, StageField, StageName};
use crate::models::task::{ParagraphTasks, TaskDocument, TaskSlot, TranslationChoice, TrueFalse, WordPairing};
use crate::models::Book;
use crate::pipeline::error::PipelineError;
use crate::pipeline::guard::Guard;
use crate::pipeline::store::RecordStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportMetadata {
    pub title: String,
    pub author: String,
    pub year: Option<i32>,
    pub words: Option<i64>,
    pub genre: Option<String>,
    pub set: Option<String>,
}

impl From<&Book> for ExportMetadata {
    fn from(book: &Book) -> Self {
        Self {
            title: book.title.clone(),
            author: book.author.clone(),
            year: book.year,
            words: book.word_count,
            genre: book.genre.clone(),
            set: book.collection.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskEntry<T> {
    pub paragraph_number: u32,
    pub task: Option<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ChapterTasks {
    pub true_or_false: Vec<TaskEntry<TrueFalse>>,
    pub how_to_translate: Vec<TaskEntry<TranslationChoice>>,
    pub two_words: Vec<TaskEntry<WordPairing>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapterExport<'a> {
    pub metadata: &'a ExportMetadata,
    pub source_lang: Language,
    pub target_lang: Language,
    pub chapter_number: u32,
    pub chapter_title: Option<&'a str>,
    pub chapter_title_translation: Option<&'a str>,
    pub sentences_original: &'a [SentenceParagraph],
    pub sentences_simplified: Option<&'a [SentenceParagraph]>,
    pub tasks_original: ChapterTasks,
    pub tasks_simplified: Option<ChapterTasks>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ChapterIndexEntry<'a> {
    chapter_number: u32,
    title: Option<&'a str>,
    title_translation: Option<&'a str>,
    file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct BookIndex<'a> {
    metadata: &'a ExportMetadata,
    source_lang: Language,
    target_lang: Language,
    chapters: Vec<ChapterIndexEntry<'a>>,
}

/// Where the files of one book and language pair land.
pub fn export_path(export_dir: &Path, book_id: i64, source: Language, target: Language) -> PathBuf {
    export_dir
        .join(format!("book_{book_id}"))
        .join(format!("{}_{}", source.as_str(), target.as_str()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub dir: PathBuf,
    pub chapters: usize,
}

/// Most complete task layer available. Layers are cumulative, so the last
/// one carries every earlier task.
fn latest_tasks(
    store: &RecordStore<'_>,
    book_id: i64,
    target: Language,
    layers: [StageField; 3],
) -> Result<Option<TaskDocument>, PipelineError> {
    for field in layers.into_iter().rev() {
        if let Some(doc) = store.read_document(book_id, Some(target), field)? {
            return Ok(Some(doc));
        }
    }
    Ok(None)
}

fn collect<T: Clone>(
    paragraphs: &[ParagraphTasks],
    slot: impl Fn(&ParagraphTasks) -> &TaskSlot<T>,
) -> Vec<TaskEntry<T>> {
    paragraphs
        .iter()
        .filter_map(|p| {
            slot(p).as_ref().map(|task| TaskEntry {
                paragraph_number: p.paragraph_number,
                task: task.clone(),
            })
        })
        .collect()
}

fn chapter_tasks(doc: Option<&TaskDocument>, chapter_number: u32) -> ChapterTasks {
    let Some(chapter) = doc.and_then(|d| d.chapters.iter().find(|c| c.chapter_number == chapter_number)) else {
        return ChapterTasks::default();
    };
    ChapterTasks {
        true_or_false: collect(&chapter.paragraphs, |p| &p.true_or_false),
        how_to_translate: collect(&chapter.paragraphs, |p| &p.how_to_translate),
        two_words: collect(&chapter.paragraphs, |p| &p.two_words),
    }
}

/// Write `chapter_{n}.json` for every chapter plus a `book.json` index.
///
/// Only the word-enriched original translation is required; simplified
/// text, tasks and titles are included when present.
pub fn export_book(
    store: &RecordStore<'_>,
    book: &Book,
    settings: &Settings,
    target: Language,
) -> Result<ExportSummary, PipelineError> {
    let source = settings.source_lang;
    let original: Document<SentenceParagraph> = store
        .read_document(book.id, Some(target), StageField::SentenceTranslationWords)?
        .ok_or_else(|| PipelineError::InvalidField {
            field: StageField::SentenceTranslationWords.as_str().into(),
            reason: "field is not populated".into(),
        })?;
    let simplified: Option<Document<SentenceParagraph>> =
        store.read_document(book.id, Some(target), StageField::SimplifiedSentenceTranslationWords)?;
    let tasks = latest_tasks(
        store,
        book.id,
        target,
        [StageField::TasksTrueOrFalse, StageField::TasksHowTo, StageField::TasksTwoWords],
    )?;
    let tasks_simplified = latest_tasks(
        store,
        book.id,
        target,
        [
            StageField::TasksTrueOrFalseSimplified,
            StageField::TasksHowToSimplified,
            StageField::TasksTwoWordsSimplified,
        ],
    )?;
    let titles: Vec<ChapterTitle> = store
        .read_document(book.id, None, StageField::ChaptersTitles)?
        .unwrap_or_default();
    let translated_titles: Vec<ChapterTitleTranslation> = store
        .read_document(book.id, Some(target), StageField::ChaptersTitlesTranslations)?
        .unwrap_or_default();

    let metadata = ExportMetadata::from(book);
    let dir = export_path(&settings.export_dir, book.id, source, target);
    fs::create_dir_all(&dir)?;

    let mut index = Vec::with_capacity(original.chapters.len());
    for chapter in &original.chapters {
        let n = chapter.chapter_number;
        let title = titles.iter().find(|t| t.chapter_number == n).map(|t| t.title.as_str());
        let title_translation = translated_titles
            .iter()
            .find(|t| t.chapter_number == n)
            .map(|t| t.title.as_str());
        let simplified_chapter = simplified
            .as_ref()
            .and_then(|d| d.chapters.iter().find(|c| c.chapter_number == n));

        let export = ChapterExport {
            metadata: &metadata,
            source_lang: source,
            target_lang: target,
            chapter_number: n,
            chapter_title: title,
            chapter_title_translation: title_translation,
            sentences_original: &chapter.paragraphs,
            sentences_simplified: simplified_chapter.map(|c| c.paragraphs.as_slice()),
            tasks_original: chapter_tasks(tasks.as_ref(), n),
            tasks_simplified: simplified_chapter.map(|_| chapter_tasks(tasks_simplified.as_ref(), n)),
        };
        let file = format!("chapter_{n}.json");
        fs::write(dir.join(&file), serde_json::to_string_pretty(&export)?)?;
        index.push(ChapterIndexEntry {
            chapter_number: n,
            title,
            title_translation,
            file,
        });
    }

    let book_index = BookIndex {
        metadata: &metadata,
        source_lang: source,
        target_lang: target,
        chapters: index,
    };
    fs::write(dir.join("book.json"), serde_json::to_string_pretty(&book_index)?)?;

    tracing::info!(
        book_id = book.id,
        language = target.as_str(),
        chapters = original.chapters.len(),
        dir = %dir.display(),
        "Book exported"
    );
    Ok(ExportSummary {
        dir,
        chapters: original.chapters.len(),
    })
}

pub struct ExportStage;

impl Stage for ExportStage {
    fn name(&self) -> StageName {
        StageName::Export
    }

    fn sources(&self) -> Vec<StageField> {
        vec![StageField::SentenceTranslationWords]
    }

    fn result(&self) -> Option<StageField> {
        None
    }

    /// Re-exporting overwrites the same files.
    fn guard(&self) -> Guard {
        Guard::None
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, PipelineError> {
        let target = ctx.target(self.name())?;
        export_book(ctx.store, ctx.book, ctx.settings, target)?;
        Ok(StageOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::document::{Chapter, Sentence, WordGroup};
    use crate::pipeline::stages::testing::{run_stage, settings, setup};
    use serde_json::Value;

    fn words() -> Document<SentenceParagraph> {
        Document {
            chapters: vec![Chapter::new(
                1,
                vec![SentenceParagraph {
                    paragraph_number: 1,
                    sentences: vec![Sentence {
                        sentence_number: 1,
                        sentence_original: "The cat sat.".into(),
                        sentence_translation: Some("El gato se sentó.".into()),
                        words: vec![WordGroup {
                            original: "cat".into(),
                            original_translation: "gato".into(),
                            lemma: None,
                            lemma_translation: None,
                        }],
                    }],
                }],
            )],
        }
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn chapter_file_carries_contract_fields() {
        let (conn, book) = setup();
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = settings();
        settings.export_dir = tmp.path().to_path_buf();
        let store = RecordStore::new(&conn);
        let es = Some(Language::Spanish);
        store.write_document(1, es, StageField::SentenceTranslationWords, &words()).unwrap();

        let mut tf_only = ParagraphTasks::new(1);
        tf_only.true_or_false = Some(Some(TrueFalse { question: "El gato duerme".into(), answer: false }));
        let mut with_howto = tf_only.clone();
        with_howto.how_to_translate = Some(None);
        store
            .write_document(1, es, StageField::TasksTrueOrFalse, &TaskDocument {
                chapters: vec![Chapter::new(1, vec![tf_only])],
            })
            .unwrap();
        store
            .write_document(1, es, StageField::TasksHowTo, &TaskDocument {
                chapters: vec![Chapter::new(1, vec![with_howto])],
            })
            .unwrap();
        let titles = vec![ChapterTitle { chapter_number: 1, summary: "s".into(), title: "The Cat".into() }];
        store.write_document(1, None, StageField::ChaptersTitles, &titles).unwrap();

        let outcome = run_stage(&ExportStage, &book, &settings, &store, es, None, None).unwrap();
        assert_eq!(outcome, StageOutcome::Completed);

        let dir = export_path(tmp.path(), 1, Language::English, Language::Spanish);
        let chapter = read_json(&dir.join("chapter_1.json"));
        assert_eq!(chapter["metadata"]["title"], "The Cat");
        assert_eq!(chapter["source_lang"], "en");
        assert_eq!(chapter["target_lang"], "es");
        assert_eq!(chapter["chapter_title"], "The Cat");
        assert!(chapter["chapter_title_translation"].is_null());
        assert_eq!(chapter["sentences_original"][0]["sentences"][0]["words"][0]["o"], "cat");
        assert!(chapter["sentences_simplified"].is_null());
        assert_eq!(chapter["tasks_original"]["true_or_false"][0]["task"]["answer"], false);
        assert!(chapter["tasks_original"]["how_to_translate"][0]["task"].is_null());
        assert_eq!(chapter["tasks_original"]["two_words"], Value::Array(vec![]));

        let index = read_json(&dir.join("book.json"));
        assert_eq!(index["chapters"][0]["file"], "chapter_1.json");
    }

    #[test]
    fn missing_words_is_an_error() {
        let (conn, book) = setup();
        let settings = settings();
        let store = RecordStore::new(&conn);
        let err = export_book(&store, &book, &settings, Language::Spanish).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidField { .. }));
    }
}
