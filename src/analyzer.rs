//! Analyzers are treated as a black box by the rest of the crate: a function
//! from `(text, mode)` to a stream of `Token`s (spec's Non-goals explicitly
//! exclude concrete stemmers/stopword filters). This module defines the
//! `Token`/`Analyzer` contract and the couple of minimal analyzers tests and
//! examples need, generalized from the teacher's `TokenizerStyle` enum
//! (`mem/document.rs`) and the punctuation-splitting table in
//! `galago_tokenizer.rs`'s `SPLIT_CHARS`.

use once_cell::sync::Lazy;

/// Whether an analyzer is running over a document being indexed (positions
/// and char offsets matter) or over a query string (usually just text).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AnalyzeMode {
    Index,
    Query,
}

/// One emitted token: its text plus the position/char-offset metadata the
/// indexing pipeline needs when the field's `indexed_form` asks for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    /// 0-based ordinal within the field's token stream.
    pub position: u32,
    /// Half-open byte range in the original field value.
    pub start_char: u32,
    pub end_char: u32,
}

pub trait Analyzer: Send + Sync {
    fn analyze(&self, text: &str, mode: AnalyzeMode) -> Vec<Token>;
}

/// Splits on Unicode whitespace, lowercases. Matches the teacher's
/// `TokenizerStyle::Whitespace`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceAnalyzer;

impl Analyzer for WhitespaceAnalyzer {
    fn analyze(&self, text: &str, _mode: AnalyzeMode) -> Vec<Token> {
        let lowered = text.to_lowercase();
        split_on(&lowered, |ch: char| ch.is_whitespace())
    }
}

static SPLIT_TABLE: Lazy<[bool; 256]> = Lazy::new(|| {
    fn is_punct(ch: char) -> bool {
        matches!(
            ch,
            ';' | '"' | '&' | '/' | ':' | '!' | '#' | '?' | '$' | '%' | '(' | ')' | '@' | '^'
                | '*' | '+' | ',' | '=' | '>' | '<' | '[' | ']' | '{' | '}' | '|' | '`' | '~'
        )
    }
    let mut table = [false; 256];
    for (n, slot) in table.iter_mut().enumerate() {
        *slot = n <= 32 || is_punct(n as u8 as char);
    }
    table
});

/// Splits on whitespace and ASCII punctuation, lowercases, drops empty
/// tokens; a step up from `WhitespaceAnalyzer` for prose fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardAnalyzer;

impl Analyzer for StandardAnalyzer {
    fn analyze(&self, text: &str, _mode: AnalyzeMode) -> Vec<Token> {
        let lowered = text.to_lowercase();
        split_on(&lowered, |ch: char| (ch as u32) < 256 && SPLIT_TABLE[ch as usize])
    }
}

/// Treats the entire input as a single atomic token (teacher's `Categorical`
/// field handling): used for `Id`/`Keyword` field types, which never split.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordAnalyzer;

impl Analyzer for KeywordAnalyzer {
    fn analyze(&self, text: &str, _mode: AnalyzeMode) -> Vec<Token> {
        if text.is_empty() {
            return Vec::new();
        }
        vec![Token {
            text: text.to_owned(),
            position: 0,
            start_char: 0,
            end_char: text.len() as u32,
        }]
    }
}

fn split_on(text: &str, is_split: impl Fn(char) -> bool) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut position = 0u32;
    let mut start: Option<usize> = None;
    let mut last_byte = 0usize;
    for (idx, ch) in text.char_indices() {
        last_byte = idx + ch.len_utf8();
        if is_split(ch) {
            if let Some(s) = start.take() {
                tokens.push(Token {
                    text: text[s..idx].to_owned(),
                    position,
                    start_char: s as u32,
                    end_char: idx as u32,
                });
                position += 1;
            }
        } else if start.is_none() {
            start = Some(idx);
        }
    }
    if let Some(s) = start {
        tokens.push(Token {
            text: text[s..last_byte].to_owned(),
            position,
            start_char: s as u32,
            end_char: last_byte as u32,
        });
    }
    tokens
}

/// Resolve an analyzer by the name stored on a `FieldType::Text` variant.
/// Schemas persist analyzer choice as a string (see `crate::schema`) so that
/// the analyzer registry can grow without touching the on-disk format.
pub fn by_name(name: &str) -> Box<dyn Analyzer> {
    match name {
        "keyword" => Box::new(KeywordAnalyzer),
        "whitespace" => Box::new(WhitespaceAnalyzer),
        _ => Box::new(StandardAnalyzer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn whitespace_lowercases_and_splits() {
        let tokens = WhitespaceAnalyzer.analyze("Hello   World", AnalyzeMode::Index);
        assert_eq!(texts(&tokens), vec!["hello", "world"]);
        assert_eq!(tokens[1].position, 1);
    }

    #[test]
    fn standard_splits_on_punctuation() {
        let tokens = StandardAnalyzer.analyze("one, two; three!", AnalyzeMode::Index);
        assert_eq!(texts(&tokens), vec!["one", "two", "three"]);
    }

    #[test]
    fn standard_records_char_offsets() {
        let tokens = StandardAnalyzer.analyze("ab cd", AnalyzeMode::Index);
        assert_eq!(tokens[0].start_char, 0);
        assert_eq!(tokens[0].end_char, 2);
        assert_eq!(tokens[1].start_char, 3);
        assert_eq!(tokens[1].end_char, 5);
    }

    #[test]
    fn keyword_is_atomic() {
        let tokens = KeywordAnalyzer.analyze("Some Title", AnalyzeMode::Index);
        assert_eq!(texts(&tokens), vec!["Some Title"]);
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(WhitespaceAnalyzer.analyze("   ", AnalyzeMode::Index).is_empty());
        assert!(KeywordAnalyzer.analyze("", AnalyzeMode::Index).is_empty());
    }
}
