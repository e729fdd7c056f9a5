use rusqlite::{params, Connection, OptionalExtension};

use crate::db::DatabaseError;
use crate::models::Book;

pub fn upsert_book(conn: &Connection, book: &Book) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO books (id, title, author, year, genre, word_count, collection)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            author = excluded.author,
            year = excluded.year,
            genre = excluded.genre,
            word_count = excluded.word_count,
            collection = excluded.collection",
        params![
            book.id,
            book.title,
            book.author,
            book.year,
            book.genre,
            book.word_count,
            book.collection,
        ],
    )?;
    Ok(())
}

pub fn get_book(conn: &Connection, id: i64) -> Result<Option<Book>, DatabaseError> {
    let book = conn
        .query_row(
            "SELECT id, title, author, year, genre, word_count, collection
             FROM books WHERE id = ?1",
            params![id],
            |row| {
                Ok(Book {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    author: row.get(2)?,
                    year: row.get(3)?,
                    genre: row.get(4)?,
                    word_count: row.get(5)?,
                    collection: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(book)
}

/// Like `get_book` but a missing row is an error.
pub fn require_book(conn: &Connection, id: i64) -> Result<Book, DatabaseError> {
    get_book(conn, id)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "Book".into(),
        id: id.to_string(),
    })
}

pub fn list_book_ids(conn: &Connection) -> Result<Vec<i64>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT id FROM books ORDER BY id ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}
