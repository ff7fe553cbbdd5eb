//! The search backend capability and its Tantivy implementation.

use std::sync::Arc;

use tracing::{debug, info};

use code_index_types::{RepoId, SearchPage};

use crate::content::ContentSource;
use crate::error::SearchError;
use crate::index::{SearchIndex, SearchIndexConfig};
use crate::indexer::RepoIndexWriter;
use crate::searcher::CodeSearcher;

/// Full-text engine driven by the indexing pipeline.
///
/// Calls are synchronous and may block on disk I/O; async callers run them
/// on the blocking pool.
pub trait SearchBackend: Send + Sync {
    /// (Re)index everything stored for the repository.
    fn index(&self, repo_id: RepoId) -> Result<(), SearchError>;

    /// Remove the repository from the index.
    fn delete(&self, repo_id: RepoId) -> Result<(), SearchError>;

    /// Search `keyword` in `repo_ids` (all repositories when empty).
    fn search(
        &self,
        repo_ids: &[RepoId],
        keyword: &str,
        page: usize,
        page_size: usize,
    ) -> Result<SearchPage, SearchError>;

    /// Release the backend's resources. Later calls report
    /// [`SearchError::Closed`].
    fn close(&self) -> Result<(), SearchError>;
}

/// Tantivy-backed [`SearchBackend`].
pub struct TantivyBackend {
    index: SearchIndex,
    writer: RepoIndexWriter,
    searcher: CodeSearcher,
    source: Arc<dyn ContentSource>,
}

impl TantivyBackend {
    /// Open the index at the configured path or create it.
    ///
    /// The returned flag is true when the index did not exist before.
    pub fn open_or_create(
        config: SearchIndexConfig,
        source: Arc<dyn ContentSource>,
    ) -> Result<(Self, bool), SearchError> {
        let index = SearchIndex::open_or_create(config)?;
        let writer = RepoIndexWriter::new(&index)?;
        let searcher = CodeSearcher::new(&index)?;
        let created = index.was_created();

        Ok((
            Self {
                index,
                writer,
                searcher,
                source,
            },
            created,
        ))
    }

    /// Get the number of indexed files.
    pub fn num_docs(&self) -> u64 {
        self.searcher.num_docs()
    }
}

impl SearchBackend for TantivyBackend {
    fn index(&self, repo_id: RepoId) -> Result<(), SearchError> {
        match self.source.repo_files(repo_id)? {
            Some(files) => {
                self.writer.replace_repo(repo_id, &files)?;
            }
            None => {
                debug!(repo_id, "Repository no longer exists, removing from index");
                self.writer.delete_repo(repo_id)?;
            }
        }
        self.searcher.reload()
    }

    fn delete(&self, repo_id: RepoId) -> Result<(), SearchError> {
        self.writer.delete_repo(repo_id)?;
        self.searcher.reload()
    }

    fn search(
        &self,
        repo_ids: &[RepoId],
        keyword: &str,
        page: usize,
        page_size: usize,
    ) -> Result<SearchPage, SearchError> {
        if self.writer.is_closed() {
            return Err(SearchError::Closed);
        }
        self.searcher.search(repo_ids, keyword, page, page_size)
    }

    fn close(&self) -> Result<(), SearchError> {
        if self.writer.close()? {
            info!(path = ?self.index.path(), "Closed search backend");
        }
        Ok(())
    }
}
