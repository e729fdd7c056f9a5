//! Hierarchical book document: Chapter → Paragraph → Sentence → WordGroup.
//!
//! Every derived field of a book (simplified text, sentence translation,
//! word glosses) is a separate `Document` that must keep the chapter and
//! paragraph numbering of the document it was derived from.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeError {
    #[error("Chapter numbering broken: expected {expected}, found {found}")]
    ChapterNumber { expected: u32, found: u32 },

    #[error("Chapter {chapter}: paragraph numbering broken, expected {expected}, found {found}")]
    ParagraphNumber { chapter: u32, expected: u32, found: u32 },

    #[error("Chapter {chapter} paragraph {paragraph}: sentence numbering broken, expected {expected}, found {found}")]
    SentenceNumber {
        chapter: u32,
        paragraph: u32,
        expected: u32,
        found: u32,
    },

    #[error("Chapter count differs: {left} vs {right}")]
    ChapterCount { left: usize, right: usize },

    #[error("Chapter {chapter}: paragraph count differs, {left} vs {right}")]
    ParagraphCount {
        chapter: u32,
        left: usize,
        right: usize,
    },
}

/// Anything addressed by a 1-based position inside its parent.
pub trait Numbered {
    fn number(&self) -> u32;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document<P> {
    pub chapters: Vec<Chapter<P>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter<P> {
    pub chapter_number: u32,
    pub paragraphs: Vec<P>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl<P> Chapter<P> {
    pub fn new(chapter_number: u32, paragraphs: Vec<P>) -> Self {
        Self {
            chapter_number,
            paragraphs,
            title: None,
            summary: None,
        }
    }
}

/// Paragraph before sentence splitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParagraphText {
    pub paragraph_number: u32,
    pub paragraph_content: String,
}

/// Paragraph after sentence splitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceParagraph {
    pub paragraph_number: u32,
    pub sentences: Vec<Sentence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentence {
    pub sentence_number: u32,
    pub sentence_original: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentence_translation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<WordGroup>,
}

impl Sentence {
    pub fn is_enriched(&self) -> bool {
        !self.words.is_empty()
    }
}

/// Minimal glossable span: token, phrasal verb or idiom.
///
/// Wire names are short (`o`, `o_t`, `l`, `l_t`) because these objects are
/// repeated for every word of the book in the exported JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordGroup {
    #[serde(rename = "o")]
    pub original: String,
    #[serde(rename = "o_t")]
    pub original_translation: String,
    #[serde(rename = "l", default, skip_serializing_if = "Option::is_none")]
    pub lemma: Option<String>,
    #[serde(rename = "l_t", default, skip_serializing_if = "Option::is_none")]
    pub lemma_translation: Option<String>,
}

/// Generated per-chapter summary and title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterTitle {
    pub chapter_number: u32,
    pub summary: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterTitleTranslation {
    pub chapter_number: u32,
    pub title: String,
}

impl Numbered for ParagraphText {
    fn number(&self) -> u32 {
        self.paragraph_number
    }
}

impl Numbered for SentenceParagraph {
    fn number(&self) -> u32 {
        self.paragraph_number
    }
}

impl Numbered for Sentence {
    fn number(&self) -> u32 {
        self.sentence_number
    }
}

fn check_contiguous<T: Numbered>(
    items: &[T],
    err: impl Fn(u32, u32) -> ShapeError,
) -> Result<(), ShapeError> {
    for (idx, item) in items.iter().enumerate() {
        let expected = idx as u32 + 1;
        if item.number() != expected {
            return Err(err(expected, item.number()));
        }
    }
    Ok(())
}

impl<P: Numbered> Document<P> {
    /// Chapters and paragraphs are numbered 1..n without gaps.
    pub fn validate_numbering(&self) -> Result<(), ShapeError> {
        for (idx, chapter) in self.chapters.iter().enumerate() {
            let expected = idx as u32 + 1;
            if chapter.chapter_number != expected {
                return Err(ShapeError::ChapterNumber {
                    expected,
                    found: chapter.chapter_number,
                });
            }
            check_contiguous(&chapter.paragraphs, |expected, found| {
                ShapeError::ParagraphNumber {
                    chapter: chapter.chapter_number,
                    expected,
                    found,
                }
            })?;
        }
        Ok(())
    }

    pub fn paragraph_count(&self) -> usize {
        self.chapters.iter().map(|c| c.paragraphs.len()).sum()
    }

    /// Same chapter count and same paragraph count in every chapter.
    pub fn check_aligned<Q>(&self, other: &Document<Q>) -> Result<(), ShapeError> {
        if self.chapters.len() != other.chapters.len() {
            return Err(ShapeError::ChapterCount {
                left: self.chapters.len(),
                right: other.chapters.len(),
            });
        }
        for (left, right) in self.chapters.iter().zip(&other.chapters) {
            if left.paragraphs.len() != right.paragraphs.len() {
                return Err(ShapeError::ParagraphCount {
                    chapter: left.chapter_number,
                    left: left.paragraphs.len(),
                    right: right.paragraphs.len(),
                });
            }
        }
        Ok(())
    }
}

impl Document<SentenceParagraph> {
    /// Paragraph numbering plus 1..n sentence numbering in every paragraph.
    pub fn validate_sentences(&self) -> Result<(), ShapeError> {
        self.validate_numbering()?;
        for chapter in &self.chapters {
            for paragraph in &chapter.paragraphs {
                check_contiguous(&paragraph.sentences, |expected, found| {
                    ShapeError::SentenceNumber {
                        chapter: chapter.chapter_number,
                        paragraph: paragraph.paragraph_number,
                        expected,
                        found,
                    }
                })?;
            }
        }
        Ok(())
    }

    pub fn sentence_count(&self) -> usize {
        self.chapters
            .iter()
            .flat_map(|c| &c.paragraphs)
            .map(|p| p.sentences.len())
            .sum()
    }
}

impl SentenceParagraph {
    /// Space-joined translations of every sentence.
    pub fn joined_translation(&self) -> String {
        self.sentences
            .iter()
            .filter_map(|s| s.sentence_translation.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
