//! Repository content supplied to the search backend.

use code_index_types::RepoId;

use crate::error::SearchError;

/// Number of leading bytes inspected when sniffing for binary content
const BINARY_SNIFF_LEN: usize = 8000;

/// One text file of a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFile {
    /// Path relative to the repository root, `/`-separated
    pub path: String,
    pub content: String,
}

impl RepoFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Supplies the files of a repository.
pub trait ContentSource: Send + Sync {
    /// Files of the repository, or `None` if the repository no longer exists.
    fn repo_files(&self, repo_id: RepoId) -> Result<Option<Vec<RepoFile>>, SearchError>;
}

/// Whether a file should be indexed: not larger than `max_size` and
/// without NUL bytes near the start.
pub fn is_indexable(bytes: &[u8], max_size: u64) -> bool {
    if bytes.len() as u64 > max_size {
        return false;
    }
    let head = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    !head.contains(&0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_is_indexable() {
        assert!(is_indexable(b"fn main() {}\n", 1024));
        assert!(is_indexable(b"", 1024));
    }

    #[test]
    fn test_binary_is_not_indexable() {
        assert!(!is_indexable(b"\x7fELF\x00\x01", 1024));
    }

    #[test]
    fn test_oversized_is_not_indexable() {
        assert!(!is_indexable(&[b'a'; 11], 10));
        assert!(is_indexable(&[b'a'; 10], 10));
    }
}
