use serde::{Deserialize, Serialize};

/// Catalogue row for one book. Stage outputs hang off `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub year: Option<i32>,
    pub genre: Option<String>,
    pub word_count: Option<i64>,
    pub collection: Option<String>,
}

impl Book {
    pub fn new(id: i64, title: &str, author: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
            author: author.to_string(),
            year: None,
            genre: None,
            word_count: None,
            collection: None,
        }
    }
}
