//! Text analyzers selectable per account

use std::fmt;

use log::warn;
use tantivy::tokenizer::{
    AsciiFoldingFilter, Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer,
    TextAnalyzer,
};

/// Tokens longer than this are dropped
const MAX_TOKEN_LEN: usize = 40;

/// Turns document and query text into index tokens
///
/// The engine indexes the tokens produced here, so documents and queries go
/// through the same analyzer.
#[derive(Clone)]
pub struct Analyzer {
    name: &'static str,
    inner: TextAnalyzer,
}

impl Analyzer {
    pub const STANDARD: &'static str = "standard";
    pub const ENGLISH: &'static str = "english";
    pub const FOLDING: &'static str = "folding";

    /// Lowercasing tokenizer that splits on non-alphanumerics
    pub fn standard() -> Self {
        let inner = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
            .filter(LowerCaser)
            .build();
        Self {
            name: Self::STANDARD,
            inner,
        }
    }

    /// Standard analyzer plus English stemming
    pub fn english() -> Self {
        let inner = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
            .filter(LowerCaser)
            .filter(Stemmer::new(Language::English))
            .build();
        Self {
            name: Self::ENGLISH,
            inner,
        }
    }

    /// Standard analyzer plus accent folding (`café` matches `cafe`)
    pub fn folding() -> Self {
        let inner = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
            .filter(LowerCaser)
            .filter(AsciiFoldingFilter)
            .build();
        Self {
            name: Self::FOLDING,
            inner,
        }
    }

    /// Look up an analyzer by configured name
    pub fn by_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "standard" | "standardanalyzer" | "default" => Some(Self::standard()),
            "english" | "en_stem" => Some(Self::english()),
            "folding" | "asciifolding" => Some(Self::folding()),
            _ => None,
        }
    }

    /// Resolve the account's analyzer setting, defaulting to standard
    pub fn resolve(name: Option<&str>) -> Self {
        match name {
            None => Self::standard(),
            Some(name) => Self::by_name(name).unwrap_or_else(|| {
                warn!("Unknown text analyzer '{}', using {}", name, Self::STANDARD);
                Self::standard()
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Analyze text into tokens
    pub fn tokens(&self, text: &str) -> Vec<String> {
        let mut analyzer = self.inner.clone();
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        tokens
    }

    /// Analyze text into a whitespace-joined token string
    pub(crate) fn token_text(&self, text: &str) -> String {
        self.tokens(text).join(" ")
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyzer").field("name", &self.name).finish()
    }
}

impl PartialEq for Analyzer {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_lowercases_and_splits() {
        let tokens = Analyzer::standard().tokens("Quarterly REPORT, draft-2");
        assert_eq!(tokens, vec!["quarterly", "report", "draft", "2"]);
    }

    #[test]
    fn test_english_stems() {
        let tokens = Analyzer::english().tokens("meetings running");
        assert_eq!(tokens, vec!["meet", "run"]);
    }

    #[test]
    fn test_folding_strips_accents() {
        let tokens = Analyzer::folding().tokens("Café Zürich");
        assert_eq!(tokens, vec!["cafe", "zurich"]);
    }

    #[test]
    fn test_long_tokens_are_dropped() {
        let long = "x".repeat(MAX_TOKEN_LEN + 5);
        let tokens = Analyzer::standard().tokens(&format!("short {long} word"));
        assert_eq!(tokens, vec!["short", "word"]);
    }

    #[test]
    fn test_resolve_unknown_falls_back() {
        assert_eq!(Analyzer::resolve(Some("klingon")).name(), Analyzer::STANDARD);
        assert_eq!(Analyzer::resolve(None).name(), Analyzer::STANDARD);
        assert_eq!(Analyzer::resolve(Some("en_stem")).name(), Analyzer::ENGLISH);
    }
}
