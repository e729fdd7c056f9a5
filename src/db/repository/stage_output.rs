use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::DatabaseError;
use crate::models::enums::{FieldScope, Language, StageField};

/// Book-level fields are stored with an empty language key.
fn language_key(field: StageField, language: Option<Language>) -> Result<&'static str, DatabaseError> {
    match (field.scope(), language) {
        (FieldScope::Book, None) => Ok(""),
        (FieldScope::Translation, Some(lang)) => Ok(lang.as_str()),
        (scope, _) => Err(DatabaseError::ScopeMismatch {
            field: field.as_str().into(),
            scope: scope.as_str().into(),
        }),
    }
}

pub fn get_stage_output(
    conn: &Connection,
    book_id: i64,
    language: Option<Language>,
    field: StageField,
) -> Result<Option<String>, DatabaseError> {
    let lang = language_key(field, language)?;
    let value = conn
        .query_row(
            "SELECT value FROM stage_outputs
             WHERE book_id = ?1 AND language = ?2 AND field = ?3",
            params![book_id, lang, field.as_str()],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(value)
}

/// Insert or overwrite one field. Each call commits independently.
pub fn upsert_stage_output(
    conn: &Connection,
    book_id: i64,
    language: Option<Language>,
    field: StageField,
    value: &str,
) -> Result<(), DatabaseError> {
    let lang = language_key(field, language)?;
    let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    conn.execute(
        "INSERT INTO stage_outputs (book_id, language, field, value, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(book_id, language, field) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at",
        params![book_id, lang, field.as_str(), value, now],
    )?;
    Ok(())
}
