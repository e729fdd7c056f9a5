//! Comprehension tasks attached to paragraphs.
//!
//! Task layers are cumulative: the how-to-translate layer carries the
//! true/false task of each paragraph forward, and the two-words layer
//! carries both. A slot that was never generated is omitted from the JSON,
//! a slot that was attempted but skipped is `null`.

use serde::{Deserialize, Deserializer, Serialize};

use super::document::{Document, Numbered};

/// `None` = layer not generated yet, `Some(None)` = skipped, `Some(Some(t))` = done.
pub type TaskSlot<T> = Option<Option<T>>;

pub type TaskDocument = Document<ParagraphTasks>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrueFalse {
    pub question: String,
    pub answer: bool,
}

/// Which of three words from the paragraph translates a given term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationChoice {
    #[serde(rename = "c")]
    pub correct_id: String,
    #[serde(rename = "i1")]
    pub distractor_id_1: String,
    #[serde(rename = "i2")]
    pub distractor_id_2: String,
}

/// Two related words from the paragraph plus an invented odd one out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordPairing {
    #[serde(rename = "id1")]
    pub word_id_1: String,
    #[serde(rename = "id2")]
    pub word_id_2: String,
    #[serde(rename = "invented")]
    pub invented_distractor: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParagraphTasks {
    pub paragraph_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub true_or_false: TaskSlot<TrueFalse>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub how_to_translate: TaskSlot<TranslationChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub two_words: TaskSlot<WordPairing>,
}

impl ParagraphTasks {
    pub fn new(paragraph_number: u32) -> Self {
        Self {
            paragraph_number,
            true_or_false: None,
            how_to_translate: None,
            two_words: None,
        }
    }
}

impl Numbered for ParagraphTasks {
    fn number(&self) -> u32 {
        self.paragraph_number
    }
}

// A present key (even `null`) deserializes to `Some(..)`; serde's `default`
// covers the missing key.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl TaskDocument {
    /// Tasks of one paragraph, if that paragraph has an entry.
    pub fn paragraph(&self, chapter_number: u32, paragraph_number: u32) -> Option<&ParagraphTasks> {
        self.chapters
            .iter()
            .find(|c| c.chapter_number == chapter_number)?
            .paragraphs
            .iter()
            .find(|p| p.paragraph_number == paragraph_number)
    }
}
