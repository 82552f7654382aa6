//! Data shapes for search results and context bundles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a result was matched by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Semantic,
    Keyword,
    Hybrid,
}

/// One search hit, ordered by descending relevance; ties keep engine order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchResult {
    pub path: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_range: Option<(usize, usize)>,
    /// In `[0, 1]`. Filled with `1 − i/top_k` when the engine gives no score.
    pub relevance: f32,
    pub match_type: MatchType,
    pub retrieved_at: DateTime<Utc>,
}

/// Rough code shape detected for a snippet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeType {
    Function,
    Class,
    Interface,
    TypeDef,
    Import,
    Doc,
    Other,
}

/// One bounded excerpt inside a [`FileContext`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snippet {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<(usize, usize)>,
    pub relevance: f32,
    pub token_count: usize,
    pub code_type: CodeType,
}

/// All selected snippets for one file, plus related siblings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileContext {
    pub path: String,
    pub relevance: f32,
    pub snippets: Vec<Snippet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_files: Vec<String>,
}

/// Accounting attached to every bundle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub total_files: usize,
    pub total_snippets: usize,
    pub total_tokens: usize,
    pub token_budget: usize,
    /// True only when a candidate was dropped for budget reasons.
    pub truncated: bool,
    pub search_time_ms: u64,
}

/// Token-budgeted, relevance-sorted context for a query.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextBundle {
    pub summary: String,
    pub query: String,
    pub files: Vec<FileContext>,
    pub hints: Vec<String>,
    pub metadata: BundleMetadata,
}

/// Bundler knobs; zero-ish values fall back to the documented defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BundleOptions {
    /// Clamped to `1..=20`.
    pub max_files: usize,
    pub token_budget: usize,
    pub include_related: bool,
    pub min_relevance: f32,
    pub include_summaries: bool,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            max_files: 5,
            token_budget: 8_000,
            include_related: true,
            min_relevance: 0.3,
            include_summaries: true,
        }
    }
}

impl BundleOptions {
    pub fn clamped(mut self) -> Self {
        self.max_files = self.max_files.clamp(1, 20);
        if self.token_budget == 0 {
            self.token_budget = Self::default().token_budget;
        }
        self
    }
}

/// Conservative token estimate: 4 characters per token. The single source of
/// truth for all budget accounting.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn options_clamp() {
        let opts = BundleOptions {
            max_files: 99,
            token_budget: 0,
            ..Default::default()
        }
        .clamped();
        assert_eq!(opts.max_files, 20);
        assert_eq!(opts.token_budget, 8_000);
    }
}
