//! Heuristic commit-id scraping from agent output.
//!
//! Results are a hint for the UI only and never drive job state.

use std::sync::LazyLock;

use regex::Regex;

pub const MAX_COMMITS: usize = 5;

static HEX_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9a-f]{7,40}\b").expect("valid commit regex"));

pub trait CommitExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Vec<String>;
}

/// Picks hex tokens of 7 to 40 characters, deduplicated in order of first
/// appearance.
pub struct HexCommitExtractor {
    limit: usize,
}

impl HexCommitExtractor {
    pub fn new() -> Self {
        Self { limit: MAX_COMMITS }
    }
}

impl Default for HexCommitExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitExtractor for HexCommitExtractor {
    fn extract(&self, text: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for m in HEX_TOKEN.find_iter(text) {
            let token = m.as_str();
            // all-digit runs are line numbers, sizes, timestamps
            if token.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            if !out.iter().any(|c| c == token) {
                out.push(token.to_string());
                if out.len() >= self.limit {
                    break;
                }
            }
        }
        out
    }
}

pub struct NoCommitExtractor;

impl CommitExtractor for NoCommitExtractor {
    fn extract(&self, _text: &str) -> Vec<String> {
        Vec::new()
    }
}
