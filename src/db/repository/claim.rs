//! Claim flags for long-running stages.
//!
//! A row is inserted (state 0) before the stage starts and flipped to
//! state 1 when it finishes. A crash leaves state 0 behind; only an
//! explicit reset clears it.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::DatabaseError;
use crate::models::enums::StageName;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    /// Never attempted.
    Unset,
    /// In progress, or abandoned by a crashed worker.
    Claimed,
    Complete,
}

pub fn get_claim_state(
    conn: &Connection,
    book_id: i64,
    stage: StageName,
) -> Result<ClaimState, DatabaseError> {
    let state = conn
        .query_row(
            "SELECT state FROM stage_claims WHERE book_id = ?1 AND stage = ?2",
            params![book_id, stage.as_str()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    match state {
        None => Ok(ClaimState::Unset),
        Some(0) => Ok(ClaimState::Claimed),
        Some(1) => Ok(ClaimState::Complete),
        Some(other) => Err(DatabaseError::InvalidEnum {
            field: "ClaimState".into(),
            value: other.to_string(),
        }),
    }
}

/// Insert the claim row. Returns false if a row already existed.
pub fn try_claim(conn: &Connection, book_id: i64, stage: StageName) -> Result<bool, DatabaseError> {
    let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO stage_claims (book_id, stage, state, claimed_at)
         VALUES (?1, ?2, 0, ?3)",
        params![book_id, stage.as_str(), now],
    )?;
    Ok(inserted == 1)
}

pub fn complete_claim(conn: &Connection, book_id: i64, stage: StageName) -> Result<(), DatabaseError> {
    let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let updated = conn.execute(
        "UPDATE stage_claims SET state = 1, completed_at = ?3
         WHERE book_id = ?1 AND stage = ?2",
        params![book_id, stage.as_str(), now],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "StageClaim".into(),
            id: format!("{book_id}/{}", stage.as_str()),
        });
    }
    Ok(())
}

/// Operator reset. Returns true if a claim row was removed.
pub fn reset_claim(conn: &Connection, book_id: i64, stage: StageName) -> Result<bool, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM stage_claims WHERE book_id = ?1 AND stage = ?2",
        params![book_id, stage.as_str()],
    )?;
    Ok(removed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::upsert_book;
    use crate::db::sqlite::open_memory_database;
    use crate::models::Book;

    fn setup() -> Connection {
        let conn = open_memory_database().unwrap();
        upsert_book(&conn, &Book::new(5, "Book", "Author")).unwrap();
        conn
    }

    #[test]
    fn claim_lifecycle() {
        let conn = setup();
        let stage = StageName::VoiceNarration;
        assert_eq!(get_claim_state(&conn, 5, stage).unwrap(), ClaimState::Unset);

        assert!(try_claim(&conn, 5, stage).unwrap());
        assert_eq!(get_claim_state(&conn, 5, stage).unwrap(), ClaimState::Claimed);

        complete_claim(&conn, 5, stage).unwrap();
        assert_eq!(get_claim_state(&conn, 5, stage).unwrap(), ClaimState::Complete);
    }

    #[test]
    fn second_claim_loses() {
        let conn = setup();
        assert!(try_claim(&conn, 5, StageName::VoiceNarration).unwrap());
        assert!(!try_claim(&conn, 5, StageName::VoiceNarration).unwrap());
        // Independent per stage
        assert!(try_claim(&conn, 5, StageName::VoiceNarrationSimplified).unwrap());
    }

    #[test]
    fn reset_clears_stuck_claim() {
        let conn = setup();
        try_claim(&conn, 5, StageName::VoiceNarration).unwrap();
        assert!(reset_claim(&conn, 5, StageName::VoiceNarration).unwrap());
        assert_eq!(
            get_claim_state(&conn, 5, StageName::VoiceNarration).unwrap(),
            ClaimState::Unset
        );
        assert!(!reset_claim(&conn, 5, StageName::VoiceNarration).unwrap());
    }

    #[test]
    fn completing_unclaimed_stage_fails() {
        let conn = setup();
        assert!(matches!(
            complete_claim(&conn, 5, StageName::VoiceNarration),
            Err(DatabaseError::NotFound { .. })
        ));
    }
}
