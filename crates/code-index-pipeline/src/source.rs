//! Content source reading repository working directories from disk.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use code_index_search::{is_indexable, ContentSource, RepoFile, SearchError};
use code_index_storage::RepoStore;
use code_index_types::RepoId;

/// Directories never descended into
const SKIPPED_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// Resolves a repository id to its working directory through the metadata
/// store and returns the indexable files below it.
pub struct StorageContentSource {
    store: Arc<dyn RepoStore>,
    max_file_size: u64,
}

impl StorageContentSource {
    pub fn new(store: Arc<dyn RepoStore>, max_file_size: u64) -> Self {
        Self {
            store,
            max_file_size,
        }
    }

    fn read_file(&self, root: &Path, entry: &DirEntry) -> Option<RepoFile> {
        let size = entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX);
        if size > self.max_file_size {
            debug!(path = ?entry.path(), size, "Skipping oversized file");
            return None;
        }

        let bytes = match std::fs::read(entry.path()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = ?entry.path(), error = %e, "Failed to read file");
                return None;
            }
        };
        if !is_indexable(&bytes, self.max_file_size) {
            return None;
        }
        let content = String::from_utf8(bytes).ok()?;

        let relative = entry.path().strip_prefix(root).ok()?;
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        Some(RepoFile { path, content })
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIPPED_DIRS.contains(&name))
            .unwrap_or(false)
}

impl ContentSource for StorageContentSource {
    fn repo_files(&self, repo_id: RepoId) -> Result<Option<Vec<RepoFile>>, SearchError> {
        let repo = self
            .store
            .get_repo(repo_id)
            .map_err(|e| SearchError::Content(e.to_string()))?;
        let Some(repo) = repo else {
            return Ok(None);
        };

        let root = Path::new(&repo.path);
        if !root.is_dir() {
            return Err(SearchError::Content(format!(
                "working directory of {} not found: {}",
                repo.full_name(),
                repo.path
            )));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_skipped_dir(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(repo_id, error = %e, "Failed to walk repository entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(file) = self.read_file(root, &entry) {
                files.push(file);
            }
        }

        debug!(
            repo_id,
            repo = %repo.full_name(),
            files = files.len(),
            "Collected repository files"
        );
        Ok(Some(files))
    }
}
