//! Resumption checks run before a stage starts.
//!
//! Text stages are skipped when their result field is already populated.
//! Audio stages use the claim flag instead: their output lives on disk, and
//! a second worker must not start while the first is still narrating.

use crate::db::repository::ClaimState;
use crate::models::enums::{Language, StageField, StageName};
use crate::pipeline::error::PipelineError;
use crate::pipeline::store::{FieldState, RecordStore};

/// How a stage guards against re-running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// Always runs.
    None,
    /// Skipped when the result field is populated.
    ResultField,
    /// Claimed before running, completed on success.
    Claim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Proceed,
    AlreadyDone,
    /// Claim held by another worker, or left behind by a crash.
    Claimed,
}

/// Populated result field means done. Absent and placeholder both proceed.
pub fn check_result_field(
    store: &RecordStore<'_>,
    book_id: i64,
    language: Option<Language>,
    field: StageField,
) -> Result<GuardDecision, PipelineError> {
    match store.state(book_id, language, field)? {
        FieldState::Populated => Ok(GuardDecision::AlreadyDone),
        FieldState::Absent | FieldState::Placeholder => Ok(GuardDecision::Proceed),
    }
}

/// Take the claim for `stage` if nobody has it.
///
/// `Proceed` means this worker now holds the claim and must either
/// complete or release it.
pub fn acquire_claim(
    store: &RecordStore<'_>,
    book_id: i64,
    stage: StageName,
) -> Result<GuardDecision, PipelineError> {
    match store.claim_state(book_id, stage)? {
        ClaimState::Complete => Ok(GuardDecision::AlreadyDone),
        ClaimState::Claimed => {
            tracing::warn!(
                book_id,
                stage = stage.as_str(),
                "Stage is claimed; if no worker is running it, clear it with reset-claim"
            );
            Ok(GuardDecision::Claimed)
        }
        ClaimState::Unset => {
            if store.try_claim(book_id, stage)? {
                tracing::debug!(book_id, stage = stage.as_str(), "Claim acquired");
                Ok(GuardDecision::Proceed)
            } else {
                tracing::info!(book_id, stage = stage.as_str(), "Claim lost to another worker");
                Ok(GuardDecision::Claimed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::upsert_book;
    use crate::db::sqlite::open_memory_database;
    use crate::models::Book;
    use rusqlite::Connection;

    fn setup() -> Connection {
        let conn = open_memory_database().unwrap();
        upsert_book(&conn, &Book::new(1, "Book", "Author")).unwrap();
        conn
    }

    #[test]
    fn result_field_tri_state() {
        let conn = setup();
        let store = RecordStore::new(&conn);
        let lang = Some(Language::Spanish);
        let field = StageField::SentenceTranslation;

        assert_eq!(check_result_field(&store, 1, lang, field).unwrap(), GuardDecision::Proceed);
        store.write_text(1, lang, field, "[]").unwrap();
        assert_eq!(check_result_field(&store, 1, lang, field).unwrap(), GuardDecision::Proceed);
        store.write_text(1, lang, field, "{\"chapters\":[]}").unwrap();
        assert_eq!(check_result_field(&store, 1, lang, field).unwrap(), GuardDecision::AlreadyDone);
        // Other languages are independent records
        assert_eq!(
            check_result_field(&store, 1, Some(Language::Russian), field).unwrap(),
            GuardDecision::Proceed
        );
    }

    #[test]
    fn claim_walks_through_states() {
        let conn = setup();
        let store = RecordStore::new(&conn);
        let stage = StageName::VoiceNarration;

        assert_eq!(acquire_claim(&store, 1, stage).unwrap(), GuardDecision::Proceed);
        // Second worker, or the same book after a crash
        assert_eq!(acquire_claim(&store, 1, stage).unwrap(), GuardDecision::Claimed);

        store.complete_claim(1, stage).unwrap();
        assert_eq!(acquire_claim(&store, 1, stage).unwrap(), GuardDecision::AlreadyDone);
    }

    #[test]
    fn released_claim_can_be_retaken() {
        let conn = setup();
        let store = RecordStore::new(&conn);
        let stage = StageName::VoiceNarrationSimplified;
        assert_eq!(acquire_claim(&store, 1, stage).unwrap(), GuardDecision::Proceed);
        store.release_claim(1, stage).unwrap();
        assert_eq!(acquire_claim(&store, 1, stage).unwrap(), GuardDecision::Proceed);
    }
}
