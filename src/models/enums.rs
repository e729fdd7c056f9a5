use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern.
/// Serde uses the same wire string as the database column.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }

            pub fn all() -> &'static [$name] {
                &[$(Self::$variant),+]
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

// ═══════════════════════════════════════════
// Languages
// ═══════════════════════════════════════════

str_enum!(Language {
    English => "en",
    Spanish => "es",
    French => "fr",
    German => "de",
    Italian => "it",
    Portuguese => "pt",
    Russian => "ru",
    Turkish => "tr",
    Chinese => "zh",
    Japanese => "ja",
    Korean => "ko",
});

impl Language {
    /// English name used inside prompts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::English => "English",
            Self::Spanish => "Spanish",
            Self::French => "French",
            Self::German => "German",
            Self::Italian => "Italian",
            Self::Portuguese => "Portuguese",
            Self::Russian => "Russian",
            Self::Turkish => "Turkish",
            Self::Chinese => "Chinese",
            Self::Japanese => "Japanese",
            Self::Korean => "Korean",
        }
    }

    /// Languages whose sentences end on full-width punctuation without a following space.
    pub fn is_cjk(&self) -> bool {
        matches!(self, Self::Chinese | Self::Japanese | Self::Korean)
    }
}

// ═══════════════════════════════════════════
// Stages
// ═══════════════════════════════════════════

str_enum!(StageName {
    Preprocess => "preprocess",
    SentenceSplit => "sentence_split",
    ParagraphSplit => "paragraph_split",
    ParagraphVerify => "paragraph_verify",
    ChapterSplit => "chapter_split",
    SimplifyText => "simplify_text",
    ChaptersTitle => "chapters_title",
    CheckPreparation => "check_preparation",
    VoiceNarration => "voice_narration",
    VoiceNarrationSimplified => "voice_narration_simplified",
    TranslateSentences => "translate_sentences",
    TranslateSentencesSimplified => "translate_sentences_simplified",
    TranslateWords => "translate_words",
    TranslateWordsSimplified => "translate_words_simplified",
    TasksTrueOrFalse => "tasks_true_or_false",
    TasksTrueOrFalseSimplified => "tasks_true_or_false_simplified",
    TasksHowToTranslate => "tasks_how_to_translate",
    TasksHowToTranslateSimplified => "tasks_how_to_translate_simplified",
    TasksTwoWords => "tasks_two_words",
    TasksTwoWordsSimplified => "tasks_two_words_simplified",
    ChaptersTitleTranslate => "chapters_title_translate",
    Export => "export",
});

impl StageName {
    /// Stages that run once per target language.
    pub fn is_per_language(&self) -> bool {
        matches!(
            self,
            Self::TranslateSentences
                | Self::TranslateSentencesSimplified
                | Self::TranslateWords
                | Self::TranslateWordsSimplified
                | Self::TasksTrueOrFalse
                | Self::TasksTrueOrFalseSimplified
                | Self::TasksHowToTranslate
                | Self::TasksHowToTranslateSimplified
                | Self::TasksTwoWords
                | Self::TasksTwoWordsSimplified
                | Self::ChaptersTitleTranslate
                | Self::Export
        )
    }
}

// ═══════════════════════════════════════════
// Stage output fields
// ═══════════════════════════════════════════

/// Whether a field lives on the book row or on a (book, language) row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldScope {
    Book,
    Translation,
}

impl FieldScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Book => "book",
            Self::Translation => "translation",
        }
    }
}

/// Plain text or a JSON document validated on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Json,
}

str_enum!(StageField {
    OriginalText => "original_text",
    FormattedText => "formatted_text",
    SplittedText => "splitted_text",
    SeparatedText => "separated_text",
    SeparatedTextVerified => "separated_text_verified",
    TextByChapters => "text_by_chapters",
    TextByChaptersSimplified => "text_by_chapters_simplified",
    ChaptersTitles => "chapters_titles",
    SentenceTranslation => "text_by_chapters_sentence_translation",
    SimplifiedSentenceTranslation => "text_by_chapters_simplified_sentence_translation",
    SentenceTranslationWords => "text_by_chapters_sentence_translation_words",
    SimplifiedSentenceTranslationWords => "text_by_chapters_simplified_sentence_translation_words",
    TasksTrueOrFalse => "tasks_true_or_false",
    TasksTrueOrFalseSimplified => "tasks_true_or_false_simplified",
    TasksHowTo => "tasks_truefalse_howto",
    TasksHowToSimplified => "tasks_truefalse_howto_simplified",
    TasksTwoWords => "tasks_truefalse_howto_words",
    TasksTwoWordsSimplified => "tasks_truefalse_howto_words_simplified",
    ChaptersTitlesTranslations => "chapters_titles_translations",
});

impl StageField {
    pub fn scope(&self) -> FieldScope {
        match self {
            Self::OriginalText
            | Self::FormattedText
            | Self::SplittedText
            | Self::SeparatedText
            | Self::SeparatedTextVerified
            | Self::TextByChapters
            | Self::TextByChaptersSimplified
            | Self::ChaptersTitles => FieldScope::Book,
            _ => FieldScope::Translation,
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Self::OriginalText
            | Self::FormattedText
            | Self::SplittedText
            | Self::SeparatedText
            | Self::SeparatedTextVerified => FieldKind::Text,
            _ => FieldKind::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn language_round_trips_through_str() {
        for lang in Language::all() {
            assert_eq!(Language::from_str(lang.as_str()).unwrap(), *lang);
        }
    }

    #[test]
    fn unknown_language_is_invalid_enum() {
        let err = Language::from_str("xx").unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidEnum { .. }));
    }

    #[test]
    fn only_cjk_languages_flagged() {
        let cjk: Vec<_> = Language::all().iter().filter(|l| l.is_cjk()).collect();
        assert_eq!(cjk, vec![&Language::Chinese, &Language::Japanese, &Language::Korean]);
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&StageName::TasksTwoWords).unwrap();
        assert_eq!(json, "\"tasks_two_words\"");
        let lang: Language = serde_json::from_str("\"de\"").unwrap();
        assert_eq!(lang, Language::German);
    }

    #[test]
    fn text_fields_are_book_scoped() {
        for field in StageField::all() {
            if field.kind() == FieldKind::Text {
                assert_eq!(field.scope(), FieldScope::Book, "{field}");
            }
        }
        assert_eq!(StageField::TasksHowTo.scope(), FieldScope::Translation);
        assert_eq!(StageField::ChaptersTitles.scope(), FieldScope::Book);
    }

    #[test]
    fn export_and_tasks_are_per_language() {
        assert!(StageName::Export.is_per_language());
        assert!(StageName::TasksTrueOrFalseSimplified.is_per_language());
        assert!(!StageName::ChapterSplit.is_per_language());
        assert!(!StageName::VoiceNarration.is_per_language());
    }
}
