//! Command-line surface: run the pipeline, import books, check and export.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;

use crate::config::{parse_language, Settings};
use crate::db::repository::{list_book_ids, require_book, reset_claim, upsert_book};
use crate::db::sqlite::open_database;
use crate::models::enums::{StageField, StageName};
use crate::models::Book;
use crate::pipeline::backend::openai::OpenAiClient;
use crate::pipeline::backend::GenerativeBackend;
use crate::pipeline::pool::{run_books, BookResult};
use crate::pipeline::speech::elevenlabs::ElevenLabsClient;
use crate::pipeline::speech::SpeechBackend;
use crate::pipeline::stages::export::export_book;
use crate::pipeline::stages::preparation::check_preparation;
use crate::pipeline::store::RecordStore;
use crate::pipeline::{Orchestrator, PipelineError};

#[derive(Debug, Parser)]
#[command(name = "bookweave", version, about = "Staged LLM pipeline for book text")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every enabled stage for the given books (all books by default)
    Run(RunArgs),
    /// Register a book and store its raw text
    Import(ImportArgs),
    /// Compare simplified and derived text against the original
    Check(BookArgs),
    /// Write the per-chapter JSON export for one target language
    Export(ExportArgs),
    /// Clear a stale claim so the stage can run again
    ResetClaim(ResetClaimArgs),
}

#[derive(Debug, Args, Clone)]
struct ConfigArg {
    /// Path to the TOML settings file
    #[arg(long, short = 'c')]
    config: PathBuf,
}

#[derive(Debug, Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArg,
    /// Book id; repeat for several books
    #[arg(long = "book")]
    books: Vec<i64>,
}

#[derive(Debug, Args, Clone)]
struct ImportArgs {
    #[command(flatten)]
    config: ConfigArg,
    #[arg(long)]
    book: i64,
    #[arg(long)]
    title: String,
    #[arg(long)]
    author: String,
    #[arg(long)]
    year: Option<i32>,
    #[arg(long)]
    genre: Option<String>,
    #[arg(long)]
    collection: Option<String>,
    /// Plain-text file with the book content
    #[arg(long)]
    text: PathBuf,
}

#[derive(Debug, Args, Clone)]
struct BookArgs {
    #[command(flatten)]
    config: ConfigArg,
    #[arg(long)]
    book: i64,
}

#[derive(Debug, Args, Clone)]
struct ExportArgs {
    #[command(flatten)]
    config: ConfigArg,
    #[arg(long)]
    book: i64,
    /// Target language code, e.g. `es`
    #[arg(long)]
    lang: String,
}

#[derive(Debug, Args, Clone)]
struct ResetClaimArgs {
    #[command(flatten)]
    config: ConfigArg,
    #[arg(long)]
    book: i64,
    /// Stage name as stored in the claims table, e.g. `voice_narration`
    #[arg(long)]
    stage: String,
}

impl Cli {
    pub fn run(self) -> Result<(), PipelineError> {
        match self.command {
            Command::Run(args) => run_pipeline(args),
            Command::Import(args) => import(args),
            Command::Check(args) => check(args),
            Command::Export(args) => export(args),
            Command::ResetClaim(args) => reset(args),
        }
    }
}

fn load(config: &ConfigArg) -> Result<(Settings, Connection), PipelineError> {
    let settings = Settings::load(&config.config)?;
    let conn = open(&settings.database_path)?;
    Ok((settings, conn))
}

fn open(path: &Path) -> Result<Connection, PipelineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(open_database(path)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), PipelineError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_pipeline(args: RunArgs) -> Result<(), PipelineError> {
    let (settings, conn) = load(&args.config)?;
    let book_ids = if args.books.is_empty() {
        list_book_ids(&conn)?
    } else {
        args.books
    };
    drop(conn);

    let backend = if settings.needs_generative_backend() {
        let key = settings.backend_api_key()?;
        Some(
            OpenAiClient::new(&settings.backend, key).map_err(|e| PipelineError::ClientSetup {
                backend: "generative",
                reason: e.to_string(),
            })?,
        )
    } else {
        None
    };
    let speech = if settings.needs_speech_backend() {
        let key = settings.speech_api_key()?;
        Some(
            ElevenLabsClient::new(&settings.speech, key).map_err(|e| PipelineError::ClientSetup {
                backend: "speech",
                reason: e.to_string(),
            })?,
        )
    } else {
        None
    };

    let orchestrator = Orchestrator::new(
        &settings,
        backend.as_ref().map(|b| b as &dyn GenerativeBackend),
        speech.as_ref().map(|s| s as &dyn SpeechBackend),
    );
    let path = settings.database_path.clone();
    let results = run_books(&orchestrator, &book_ids, settings.workers, || open_database(&path));

    for (book_id, result) in &results {
        match result {
            Ok(report) => {
                let incomplete = report.incomplete();
                tracing::info!(book_id, incomplete, "Book finished");
                print_json(report)?;
            }
            Err(e) => {
                tracing::error!(book_id, error = %e, "Book could not be processed");
            }
        }
    }
    run_outcome(&results)
}

/// A run succeeds only if every book ran and no stage halted or failed.
fn run_outcome(results: &[BookResult]) -> Result<(), PipelineError> {
    let unfinished = results
        .iter()
        .filter(|(_, result)| result.as_ref().map_or(true, |report| report.incomplete() > 0))
        .count();
    tracing::info!(books = results.len(), unfinished, "Pipeline run finished");
    if unfinished > 0 {
        return Err(PipelineError::RunIncomplete {
            unfinished,
            total: results.len(),
        });
    }
    Ok(())
}

fn import(args: ImportArgs) -> Result<(), PipelineError> {
    let (_, conn) = load(&args.config)?;
    let text = std::fs::read_to_string(&args.text)?;

    let mut book = Book::new(args.book, &args.title, &args.author);
    book.year = args.year;
    book.genre = args.genre;
    book.collection = args.collection;
    book.word_count = Some(text.split_whitespace().count() as i64);
    upsert_book(&conn, &book)?;

    RecordStore::new(&conn).write_text(book.id, None, StageField::OriginalText, &text)?;
    tracing::info!(book_id = book.id, words = book.word_count.unwrap_or(0), "Book imported");
    Ok(())
}

fn check(args: BookArgs) -> Result<(), PipelineError> {
    let (_, conn) = load(&args.config)?;
    require_book(&conn, args.book)?;
    let report = check_preparation(&RecordStore::new(&conn), args.book)?;
    report.log();
    print_json(&report)
}

fn export(args: ExportArgs) -> Result<(), PipelineError> {
    let (settings, conn) = load(&args.config)?;
    let target = parse_language(&args.lang)?;
    let book = require_book(&conn, args.book)?;
    let summary = export_book(&RecordStore::new(&conn), &book, &settings, target)?;
    tracing::info!(
        book_id = book.id,
        dir = %summary.dir.display(),
        chapters = summary.chapters,
        "Export written"
    );
    Ok(())
}

fn reset(args: ResetClaimArgs) -> Result<(), PipelineError> {
    let (_, conn) = load(&args.config)?;
    let stage = StageName::from_str(&args.stage)?;
    if reset_claim(&conn, args.book, stage)? {
        tracing::info!(book_id = args.book, stage = stage.as_str(), "Claim cleared");
    } else {
        tracing::warn!(book_id = args.book, stage = stage.as_str(), "No claim to clear");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseError;
    use crate::pipeline::orchestrator::{BookReport, StageRecord, StageStatus};

    fn report(book_id: i64, status: StageStatus) -> BookReport {
        BookReport {
            run_id: uuid::Uuid::new_v4(),
            book_id,
            stages: vec![StageRecord {
                stage: StageName::SimplifyText,
                language: None,
                status,
            }],
        }
    }

    #[test]
    fn run_fails_when_a_book_is_unfinished() {
        let all_done: Vec<BookResult> = vec![
            (1, Ok(report(1, StageStatus::Completed))),
            (2, Ok(report(2, StageStatus::AlreadyDone))),
        ];
        assert!(run_outcome(&all_done).is_ok());

        let halted: Vec<BookResult> = vec![
            (1, Ok(report(1, StageStatus::Completed))),
            (2, Ok(report(2, StageStatus::Halted { reason: "retries exhausted".into() }))),
        ];
        assert!(matches!(
            run_outcome(&halted),
            Err(PipelineError::RunIncomplete { unfinished: 1, total: 2 })
        ));

        let errored: Vec<BookResult> = vec![
            (1, Err(PipelineError::MissingLanguage("translate_sentences"))),
            (2, Ok(report(2, StageStatus::Failed { error: "bad json".into() }))),
        ];
        assert!(matches!(
            run_outcome(&errored),
            Err(PipelineError::RunIncomplete { unfinished: 2, total: 2 })
        ));
    }

    #[test]
    fn parses_repeated_book_flags() {
        let cli = Cli::try_parse_from(["bookweave", "run", "-c", "b.toml", "--book", "3", "--book", "7"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.books, vec![3, 7]);
        assert_eq!(args.config.config, PathBuf::from("b.toml"));
    }

    #[test]
    fn reset_claim_subcommand_is_kebab_case() {
        let cli = Cli::try_parse_from([
            "bookweave",
            "reset-claim",
            "--config",
            "b.toml",
            "--book",
            "1",
            "--stage",
            "voice_narration",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::ResetClaim(_)));
    }

    #[test]
    fn import_requires_text_file() {
        assert!(Cli::try_parse_from(["bookweave", "import", "-c", "b.toml", "--book", "1"]).is_err());
    }

    #[test]
    fn import_stores_text_and_word_count() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join("data").join("books.db");
        let config = tmp.path().join("bookweave.toml");
        std::fs::write(
            &config,
            format!(
                "source_lang = \"en\"\ntarget_langs = [\"es\"]\ndatabase_path = {:?}\n",
                db.to_string_lossy()
            ),
        )
        .unwrap();
        let text = tmp.path().join("book.txt");
        std::fs::write(&text, "It was a bright cold day.").unwrap();

        let cli = Cli::try_parse_from([
            "bookweave",
            "import",
            "--config",
            config.to_str().unwrap(),
            "--book",
            "9",
            "--title",
            "Nineteen",
            "--author",
            "Orwell",
            "--text",
            text.to_str().unwrap(),
        ])
        .unwrap();
        cli.run().unwrap();

        let conn = open_database(&db).unwrap();
        let book = require_book(&conn, 9).unwrap();
        assert_eq!(book.word_count, Some(6));
        let stored = RecordStore::new(&conn)
            .read_text(9, None, StageField::OriginalText)
            .unwrap();
        assert_eq!(stored.as_deref(), Some("It was a bright cold day."));
    }

    #[test]
    fn unknown_stage_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join("books.db");
        let config = tmp.path().join("bookweave.toml");
        std::fs::write(
            &config,
            format!("source_lang = \"en\"\ntarget_langs = [\"es\"]\ndatabase_path = {:?}\n", db.to_string_lossy()),
        )
        .unwrap();
        let cli = Cli::try_parse_from([
            "bookweave",
            "reset-claim",
            "--config",
            config.to_str().unwrap(),
            "--book",
            "1",
            "--stage",
            "not_a_stage",
        ])
        .unwrap();
        assert!(matches!(cli.run(), Err(PipelineError::Database(DatabaseError::InvalidEnum { .. }))));
    }
}
