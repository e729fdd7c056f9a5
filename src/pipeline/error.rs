//! Pipeline-level errors.
//!
//! Recoverable failures (backend errors, shape violations) never reach this
//! type: the transform engine absorbs them, and exhaustion surfaces as a
//! halted stage rather than an error.

use thiserror::Error;

use crate::config::ConfigError;
use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stored field {field} is invalid: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Stage {0} runs per target language but none was given")]
    MissingLanguage(&'static str),

    #[error("Stage {stage} needs a {backend} backend but none is configured")]
    BackendMissing {
        stage: &'static str,
        backend: &'static str,
    },

    #[error("Could not set up the {backend} client: {reason}")]
    ClientSetup {
        backend: &'static str,
        reason: String,
    },

    #[error("{unfinished} of {total} books did not finish every stage")]
    RunIncomplete { unfinished: usize, total: usize },
}
