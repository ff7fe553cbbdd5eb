//! Search result types.

use serde::{Deserialize, Serialize};

use crate::task::RepoId;

/// One matching file returned by a search backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub repo_id: RepoId,
    /// Byte offset of the keyword hit within `content`
    pub start_index: usize,
    /// Byte offset one past the keyword hit within `content`
    pub end_index: usize,
    /// Path of the file relative to the repository root
    pub filename: String,
    /// Lines of the file surrounding the hit
    pub content: String,
    /// 1-based line number of the first line of `content`
    pub start_line: usize,
}

impl SearchResult {
    /// The matched text, or an empty string if the offsets are out of range.
    pub fn matched(&self) -> &str {
        self.content
            .get(self.start_index..self.end_index)
            .unwrap_or("")
    }
}

/// A page of search results with the total hit count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    /// Number of matching files across all pages
    pub total: u64,
    pub results: Vec<SearchResult>,
}

impl SearchPage {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
