//! Sentence-level segmentation of paragraph text.
//!
//! Space-delimited languages use the UAX #29 sentence boundary rules from
//! `unicode-segmentation`. CJK text is cut after full-width terminal
//! punctuation, keeping the punctuation and any closing quote with the
//! sentence it ends.

use unicode_segmentation::UnicodeSegmentation;

use crate::models::enums::Language;

/// Terminal punctuation for CJK sentences.
const CJK_TERMINALS: [char; 5] = ['。', '！', '？', '!', '?'];

/// Closing marks that stay attached to the sentence they follow.
const CJK_CLOSERS: [char; 7] = ['」', '』', '”', '’', '）', '"', ')'];

/// Split a paragraph into trimmed sentence spans.
///
/// Spans are never empty and, with whitespace ignored, concatenate back to
/// the input.
pub fn split(text: &str, language: Language) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if language.is_cjk() {
        split_cjk(text)
    } else {
        split_spaced(text)
    }
}

fn split_spaced(text: &str) -> Vec<String> {
    let mut sentences: Vec<String> = Vec::new();
    for piece in text.split_sentence_bounds() {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        // A stray quote or dash run is glued to the sentence before it.
        let has_content = piece.chars().any(char::is_alphanumeric);
        match sentences.last_mut() {
            Some(prev) if !has_content => {
                prev.push(' ');
                prev.push_str(piece);
            }
            _ => sentences.push(piece.to_string()),
        }
    }
    sentences
}

fn split_cjk(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if !CJK_TERMINALS.contains(&c) {
            continue;
        }
        while let Some(&next) = chars.peek() {
            if CJK_CLOSERS.contains(&next) || CJK_TERMINALS.contains(&next) {
                current.push(next);
                chars.next();
            } else {
                break;
            }
        }
        push_trimmed(&mut sentences, &current);
        current.clear();
    }
    push_trimmed(&mut sentences, &current);
    sentences
}

fn push_trimmed(out: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece.to_string());
    }
}

/// Pack the sentences of an over-long paragraph into chunks of at most
/// `max_length` characters.
///
/// Short accumulations (< `min_chunk_len`) always take the next sentence,
/// and a short tail is appended to the last chunk rather than left on its
/// own. A single sentence longer than `max_length` becomes its own chunk.
pub fn split_paragraph_manually(
    paragraph: &str,
    language: Language,
    max_length: usize,
    min_chunk_len: usize,
) -> Vec<String> {
    let sentences = split(paragraph, language);
    let lengths: Vec<usize> = sentences.iter().map(|s| s.chars().count()).collect();
    let joiner = if language.is_cjk() { "" } else { " " };

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for (i, sentence) in sentences.iter().enumerate() {
        let remaining: usize = lengths[i..].iter().sum();
        let fits = current_len + lengths[i] + joiner.len() <= max_length;

        if current_len < min_chunk_len || remaining < min_chunk_len || fits {
            if !current.is_empty() {
                current.push_str(joiner);
                current_len += joiner.len();
            }
            current.push_str(sentence);
            current_len += lengths[i];
        } else {
            chunks.push(std::mem::take(&mut current));
            current.push_str(sentence);
            current_len = lengths[i];
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Non-empty lines of `text`, trimmed. Each line is one paragraph.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Blocks separated by blank lines, with their inner line breaks kept.
pub fn split_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }
    blocks
}

/// Characters of `text` with all whitespace removed.
pub fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_simple_english_paragraph() {
        assert_eq!(
            split("The cat sat. It was happy.", Language::English),
            vec!["The cat sat.", "It was happy."]
        );
    }

    #[test]
    fn keeps_question_and_exclamation_marks() {
        assert_eq!(
            split("Where is it? Over there! Fine.", Language::English),
            vec!["Where is it?", "Over there!", "Fine."]
        );
    }

    #[test]
    fn closing_quote_stays_with_sentence() {
        let sentences = split("\"Run!\" she said. He ran.", Language::English);
        assert_eq!(sentences.last().unwrap(), "He ran.");
        assert!(sentences[0].starts_with("\"Run!\""));
    }

    #[test]
    fn no_terminal_punctuation_is_one_sentence() {
        assert_eq!(
            split("  a line without an ending  ", Language::German),
            vec!["a line without an ending"]
        );
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(split("   \n ", Language::English).is_empty());
        assert!(split("", Language::Japanese).is_empty());
    }

    #[test]
    fn splits_japanese_on_full_width_marks() {
        assert_eq!(
            split("猫が座った。とても幸せだった！本当？", Language::Japanese),
            vec!["猫が座った。", "とても幸せだった！", "本当？"]
        );
    }

    #[test]
    fn cjk_closing_bracket_stays_attached() {
        assert_eq!(
            split("「行こう。」彼は言った。", Language::Chinese),
            vec!["「行こう。」", "彼は言った。"]
        );
    }

    #[test]
    fn concatenation_reconstructs_content() {
        let text = "Mr. Brown opened the door.  \"Who's there?\" he asked... Nobody answered!\nSilence.";
        for lang in [Language::English, Language::French] {
            let joined: String = split(text, lang).concat();
            assert_eq!(strip_whitespace(&joined), strip_whitespace(text));
        }
        let cjk = "他来了。  我们走吧！好。";
        assert_eq!(strip_whitespace(&split(cjk, Language::Chinese).concat()), strip_whitespace(cjk));
    }

    #[test]
    fn manual_split_respects_max_length() {
        let sentence = "This sentence is exactly long enough to matter here.";
        let paragraph = vec![sentence; 8].join(" ");
        let chunks = split_paragraph_manually(&paragraph, Language::English, 200, 30);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 200, "{chunk}");
        }
        assert_eq!(strip_whitespace(&chunks.concat()), strip_whitespace(&paragraph));
    }

    #[test]
    fn manual_split_keeps_short_tail_attached() {
        let long = "A".repeat(150) + ".";
        let paragraph = format!("{long} {long} Ok.");
        let chunks = split_paragraph_manually(&paragraph, Language::English, 200, 30);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].ends_with("Ok."));
    }

    #[test]
    fn paragraphs_are_non_empty_lines() {
        assert_eq!(split_paragraphs("One.\n\n  Two.  \nThree."), vec!["One.", "Two.", "Three."]);
    }

    #[test]
    fn blocks_keep_inner_line_breaks() {
        let text = "first line\nstill first\n\n\nsecond\n";
        assert_eq!(split_blocks(text), vec!["first line\nstill first", "second"]);
    }

    #[test]
    fn manual_split_single_sentence_is_one_chunk() {
        let paragraph = "word ".repeat(60);
        let chunks = split_paragraph_manually(&paragraph, Language::English, 200, 30);
        assert_eq!(chunks.len(), 1);
    }
}
