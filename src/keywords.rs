//! Keyword matching over post text.
//!
//! Matching is case-insensitive substring containment against a fixed,
//! deduplicated keyword set built once at startup. The matcher reports which
//! keywords hit with their original configured casing and in configured
//! order, so downstream output shows keywords the way the user wrote them.

use itertools::Itertools;

/// A fixed set of keywords compiled for repeated matching.
///
/// Construction lower-cases every keyword, drops empty entries, and removes
/// case-insensitive duplicates while keeping the first-seen casing and the
/// configured order.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    /// `(original casing, lower-cased)` pairs in configured order.
    keywords: Vec<(String, String)>,
}

impl KeywordMatcher {
    /// Build a matcher from the configured keyword list.
    pub fn new(configured: &[String]) -> Self {
        let keywords = configured
            .iter()
            .map(|kw| kw.trim())
            .filter(|kw| !kw.is_empty())
            .map(|kw| (kw.to_string(), kw.to_lowercase()))
            .unique_by(|(_, lower)| lower.clone())
            .collect();
        Self { keywords }
    }

    /// True iff the text contains at least one keyword.
    ///
    /// Empty text never matches.
    pub fn is_match(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        let lower = text.to_lowercase();
        self.keywords.iter().any(|(_, kw)| lower.contains(kw.as_str()))
    }

    /// The keywords contained in the text, original casing, configured order.
    pub fn matched_keywords(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        let lower = text.to_lowercase();
        self.keywords
            .iter()
            .filter(|(_, kw)| lower.contains(kw.as_str()))
            .map(|(original, _)| original.clone())
            .collect()
    }

    /// Number of distinct keywords.
    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// The configured keywords, deduplicated, original casing.
    pub fn configured(&self) -> Vec<&str> {
        self.keywords.iter().map(|(original, _)| original.as_str()).collect()
    }
}
