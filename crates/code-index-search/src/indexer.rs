//! Writer side of the code search index.
//!
//! Every operation replaces or removes all documents of one repository and
//! commits before returning. The writer lives behind a `Mutex<Option<_>>`
//! so it can be released once on close; afterwards every call reports
//! [`SearchError::Closed`].

use std::sync::Mutex;

use tantivy::{IndexWriter, Term};
use tracing::{debug, info, warn};

use code_index_types::RepoId;

use crate::content::RepoFile;
use crate::document::file_to_doc;
use crate::error::SearchError;
use crate::index::SearchIndex;
use crate::schema::SearchSchema;

/// Applies repository-level replace and delete operations.
pub struct RepoIndexWriter {
    writer: Mutex<Option<IndexWriter>>,
    schema: SearchSchema,
    max_file_size: u64,
}

impl RepoIndexWriter {
    /// Create a new writer from a SearchIndex.
    pub fn new(index: &SearchIndex) -> Result<Self, SearchError> {
        let writer = index.writer()?;
        Ok(Self {
            writer: Mutex::new(Some(writer)),
            schema: index.schema().clone(),
            max_file_size: index.config().max_file_size,
        })
    }

    /// Run `op` against the writer and commit, rolling back if `op` fails.
    fn apply<F>(&self, op: F) -> Result<u64, SearchError>
    where
        F: FnOnce(&mut IndexWriter, &SearchSchema) -> Result<(), SearchError>,
    {
        let mut guard = self
            .writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;
        let writer = guard.as_mut().ok_or(SearchError::Closed)?;

        if let Err(e) = op(writer, &self.schema) {
            if let Err(rollback_err) = writer.rollback() {
                warn!(error = %rollback_err, "Rollback after failed update also failed");
            }
            return Err(e);
        }

        let opstamp = writer.commit()?;
        Ok(opstamp)
    }

    /// Replace every document of the repository with `files`.
    ///
    /// Files above the size limit are skipped. Returns the number of files
    /// written.
    pub fn replace_repo(&self, repo_id: RepoId, files: &[RepoFile]) -> Result<usize, SearchError> {
        let max_file_size = self.max_file_size;
        let mut written = 0;

        let opstamp = self.apply(|writer, schema| {
            writer.delete_term(Term::from_field_i64(schema.repo_id, repo_id));
            for file in files {
                if file.content.len() as u64 > max_file_size {
                    debug!(repo_id, file = %file.path, "Skipping oversized file");
                    continue;
                }
                writer.add_document(file_to_doc(schema, repo_id, file))?;
                written += 1;
            }
            Ok(())
        })?;

        info!(repo_id, files = written, opstamp, "Indexed repository");
        Ok(written)
    }

    /// Remove every document of the repository.
    pub fn delete_repo(&self, repo_id: RepoId) -> Result<(), SearchError> {
        let opstamp = self.apply(|writer, schema| {
            writer.delete_term(Term::from_field_i64(schema.repo_id, repo_id));
            Ok(())
        })?;

        info!(repo_id, opstamp, "Deleted repository from index");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        match self.writer.lock() {
            Ok(guard) => guard.is_none(),
            Err(_) => true,
        }
    }

    /// Release the writer, waiting for pending merges.
    ///
    /// Returns false if it had already been released.
    pub fn close(&self) -> Result<bool, SearchError> {
        let writer = self
            .writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?
            .take();

        match writer {
            Some(writer) => {
                writer.wait_merging_threads()?;
                debug!("Index writer released");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
