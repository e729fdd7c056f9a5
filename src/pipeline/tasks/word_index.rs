//! Stable identifiers for word groups.
//!
//! A word group is addressed as `{chapter}_{paragraph}_{sentence}_{index}`
//! with a 1-based index inside its sentence. Tasks store these ids, so they
//! must be reproducible from the document shape alone.

use serde::Serialize;

use crate::models::document::{SentenceParagraph, WordGroup};

pub fn word_id(chapter: u32, paragraph: u32, sentence: u32, index: usize) -> String {
    format!("{chapter}_{paragraph}_{sentence}_{}", index + 1)
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedWord {
    pub id: String,
    pub word: WordGroup,
}

/// Every word group of a paragraph in reading order.
pub fn index_paragraph(chapter: u32, paragraph: &SentenceParagraph) -> Vec<IndexedWord> {
    paragraph
        .sentences
        .iter()
        .flat_map(|sentence| {
            sentence.words.iter().enumerate().map(move |(idx, word)| IndexedWord {
                id: word_id(chapter, paragraph.paragraph_number, sentence.sentence_number, idx),
                word: word.clone(),
            })
        })
        .collect()
}

/// Candidate as shown to the backend.
#[derive(Debug, Serialize)]
pub struct WordCandidate<'a> {
    pub id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub o: Option<&'a str>,
    pub o_t: &'a str,
}

pub fn find<'w>(words: &'w [IndexedWord], id: &str) -> Option<&'w IndexedWord> {
    words.iter().find(|w| w.id == id)
}
