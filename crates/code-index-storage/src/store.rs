//! Table-level view of the metadata store used by the indexing pipeline.
//!
//! The pipeline only needs a handful of queries, so it depends on this
//! trait rather than on [`Storage`] directly. Tests substitute in-memory
//! implementations.

use code_index_types::{FailureRecord, IndexerKind, RepoId, RepoRecord, Table};

use crate::db::Storage;
use crate::error::StorageError;

/// Metadata store queries the indexer relies on.
pub trait RepoStore: Send + Sync {
    /// Whether the table has at least one row.
    fn is_table_not_empty(&self, table: Table) -> Result<bool, StorageError>;

    /// Highest id in the table, or 0 when it is empty.
    fn max_id(&self, table: Table) -> Result<RepoId, StorageError>;

    /// Delete every row of the table. Returns the number of rows removed.
    fn delete_all_records(&self, table: Table) -> Result<usize, StorageError>;

    /// Repository ids `<= max_id` without a status row for `kind`, newest first.
    fn unindexed_repo_ids(
        &self,
        kind: IndexerKind,
        max_id: RepoId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RepoId>, StorageError>;

    fn get_repo(&self, repo_id: RepoId) -> Result<Option<RepoRecord>, StorageError>;

    fn mark_indexed(&self, kind: IndexerKind, repo_id: RepoId) -> Result<(), StorageError>;

    fn clear_indexed(&self, kind: IndexerKind, repo_id: RepoId) -> Result<(), StorageError>;

    fn record_failure(&self, failure: &FailureRecord) -> Result<(), StorageError>;

    fn clear_failure(&self, repo_id: RepoId) -> Result<(), StorageError>;

    /// Remove and return every recorded failure.
    fn take_failures(&self) -> Result<Vec<FailureRecord>, StorageError>;

    /// Whether a backfill was started and has not completed.
    fn backfill_pending(&self) -> Result<bool, StorageError>;

    fn set_backfill_pending(&self, pending: bool) -> Result<(), StorageError>;
}

impl RepoStore for Storage {
    fn is_table_not_empty(&self, table: Table) -> Result<bool, StorageError> {
        match table {
            Table::Repository => self.has_repos(),
            Table::RepoIndexerStatus => self.has_status_rows(),
        }
    }

    fn max_id(&self, table: Table) -> Result<RepoId, StorageError> {
        match table {
            Table::Repository => self.max_repo_id(),
            Table::RepoIndexerStatus => self.max_status_repo_id(),
        }
    }

    fn delete_all_records(&self, table: Table) -> Result<usize, StorageError> {
        match table {
            Table::Repository => self.delete_all_repos(),
            Table::RepoIndexerStatus => self.delete_all_status(),
        }
    }

    fn unindexed_repo_ids(
        &self,
        kind: IndexerKind,
        max_id: RepoId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RepoId>, StorageError> {
        Storage::unindexed_repo_ids(self, kind, max_id, offset, limit)
    }

    fn get_repo(&self, repo_id: RepoId) -> Result<Option<RepoRecord>, StorageError> {
        Storage::get_repo(self, repo_id)
    }

    fn mark_indexed(&self, kind: IndexerKind, repo_id: RepoId) -> Result<(), StorageError> {
        Storage::mark_indexed(self, kind, repo_id)
    }

    fn clear_indexed(&self, kind: IndexerKind, repo_id: RepoId) -> Result<(), StorageError> {
        Storage::clear_indexed(self, kind, repo_id)
    }

    fn record_failure(&self, failure: &FailureRecord) -> Result<(), StorageError> {
        Storage::record_failure(self, failure)
    }

    fn clear_failure(&self, repo_id: RepoId) -> Result<(), StorageError> {
        Storage::clear_failure(self, repo_id)
    }

    fn take_failures(&self) -> Result<Vec<FailureRecord>, StorageError> {
        Storage::take_failures(self)
    }

    fn backfill_pending(&self) -> Result<bool, StorageError> {
        Storage::is_backfill_pending(self)
    }

    fn set_backfill_pending(&self, pending: bool) -> Result<(), StorageError> {
        Storage::set_backfill_pending(self, pending)
    }
}
