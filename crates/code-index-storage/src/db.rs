//! RocksDB wrapper for code-index storage.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Repository metadata CRUD
//! - Indexer status bookkeeping
//! - The persistent queue journal and the dead-letter list

use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use code_index_types::{FailureRecord, IndexTask, IndexerKind, IndexerStatus, RepoId, RepoRecord};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_INDEXER_META, CF_INDEX_FAILURES, CF_INDEX_QUEUE,
    CF_REPOSITORIES, CF_REPO_INDEXER_STATUS,
};
use crate::error::StorageError;
use crate::keys::{FailureKey, QueueKey, RepoKey, StatusKey};

const ALL_KINDS: [IndexerKind; 2] = [IndexerKind::Code, IndexerKind::Stats];

/// Set while a backfill of a freshly created index has not completed
const BACKFILL_PENDING_KEY: &[u8] = b"backfill_pending";

/// Main storage interface for code-index
pub struct Storage {
    db: DB,
    /// Queue journal sequence counter for monotonic ordering
    queue_sequence: AtomicU64,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let queue_sequence = Self::load_queue_sequence(&db)?;

        Ok(Self {
            db,
            queue_sequence: AtomicU64::new(queue_sequence),
        })
    }

    /// Load the next queue sequence number from the highest journaled key
    fn load_queue_sequence(db: &DB) -> Result<u64, StorageError> {
        let cf = db
            .cf_handle(CF_INDEX_QUEUE)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_INDEX_QUEUE.to_string()))?;

        let mut iter = db.iterator_cf(cf, IteratorMode::End);
        if let Some(result) = iter.next() {
            let (key, _) = result?;
            let queue_key = QueueKey::from_bytes(&key)?;
            return Ok(queue_key.sequence + 1);
        }
        Ok(0)
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    // ==================== Repository Methods ====================

    /// Insert or replace a repository row.
    pub fn put_repo(&self, repo: &RepoRecord) -> Result<(), StorageError> {
        if repo.id <= 0 {
            return Err(StorageError::Key(format!(
                "repository id must be positive, got {}",
                repo.id
            )));
        }
        let cf = self.cf(CF_REPOSITORIES)?;
        self.db
            .put_cf(cf, RepoKey::new(repo.id).to_bytes(), repo.to_bytes()?)?;
        debug!(repo_id = repo.id, name = %repo.full_name(), "Stored repository");
        Ok(())
    }

    /// Get a repository row by id.
    pub fn get_repo(&self, repo_id: RepoId) -> Result<Option<RepoRecord>, StorageError> {
        let cf = self.cf(CF_REPOSITORIES)?;
        match self.db.get_cf(cf, RepoKey::new(repo_id).to_bytes())? {
            Some(bytes) => Ok(Some(RepoRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete a repository row together with its indexer status rows.
    ///
    /// Returns false if the repository did not exist.
    pub fn delete_repo(&self, repo_id: RepoId) -> Result<bool, StorageError> {
        let repos_cf = self.cf(CF_REPOSITORIES)?;
        let status_cf = self.cf(CF_REPO_INDEXER_STATUS)?;

        let key = RepoKey::new(repo_id).to_bytes();
        if self.db.get_cf(repos_cf, &key)?.is_none() {
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        batch.delete_cf(repos_cf, &key);
        for kind in ALL_KINDS {
            batch.delete_cf(status_cf, StatusKey::new(kind, repo_id).to_bytes());
        }
        self.db.write(batch)?;

        debug!(repo_id, "Deleted repository");
        Ok(true)
    }

    /// All repositories in ascending id order.
    pub fn list_repos(&self) -> Result<Vec<RepoRecord>, StorageError> {
        let cf = self.cf(CF_REPOSITORIES)?;
        let mut repos = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            repos.push(RepoRecord::from_bytes(&value)?);
        }
        Ok(repos)
    }

    /// Whether the repository table has at least one row.
    pub fn has_repos(&self) -> Result<bool, StorageError> {
        self.cf_not_empty(CF_REPOSITORIES)
    }

    /// Highest repository id, or 0 when there are none.
    pub fn max_repo_id(&self) -> Result<RepoId, StorageError> {
        let cf = self.cf(CF_REPOSITORIES)?;
        let mut iter = self.db.iterator_cf(cf, IteratorMode::End);
        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(RepoKey::from_bytes(&key)?.repo_id)
            }
            None => Ok(0),
        }
    }

    /// Repository ids `<= max_id` that have no status row for `kind`,
    /// in descending order, skipping the first `offset` matches.
    pub fn unindexed_repo_ids(
        &self,
        kind: IndexerKind,
        max_id: RepoId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RepoId>, StorageError> {
        if max_id <= 0 || limit == 0 {
            return Ok(Vec::new());
        }

        let repos_cf = self.cf(CF_REPOSITORIES)?;
        let status_cf = self.cf(CF_REPO_INDEXER_STATUS)?;

        let start_key = RepoKey::new(max_id).to_bytes();
        let iter = self.db.iterator_cf(
            repos_cf,
            IteratorMode::From(&start_key, Direction::Reverse),
        );

        let mut skipped = 0;
        let mut ids = Vec::with_capacity(limit);
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(RepoKey::PREFIX.as_bytes()) {
                break;
            }
            let repo_id = RepoKey::from_bytes(&key)?.repo_id;

            let status_key = StatusKey::new(kind, repo_id).to_bytes();
            if self.db.get_cf(status_cf, status_key)?.is_some() {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }

            ids.push(repo_id);
            if ids.len() >= limit {
                break;
            }
        }

        Ok(ids)
    }

    // ==================== Indexer Status Methods ====================

    /// Record that `kind` has indexed the repository.
    pub fn mark_indexed(&self, kind: IndexerKind, repo_id: RepoId) -> Result<(), StorageError> {
        let cf = self.cf(CF_REPO_INDEXER_STATUS)?;
        let status = IndexerStatus::new(repo_id, kind);
        self.db
            .put_cf(cf, StatusKey::new(kind, repo_id).to_bytes(), status.to_bytes()?)?;
        Ok(())
    }

    /// Forget that `kind` has indexed the repository.
    pub fn clear_indexed(&self, kind: IndexerKind, repo_id: RepoId) -> Result<(), StorageError> {
        let cf = self.cf(CF_REPO_INDEXER_STATUS)?;
        self.db.delete_cf(cf, StatusKey::new(kind, repo_id).to_bytes())?;
        Ok(())
    }

    /// Get the status row of a repository for one indexer kind.
    pub fn get_status(
        &self,
        kind: IndexerKind,
        repo_id: RepoId,
    ) -> Result<Option<IndexerStatus>, StorageError> {
        let cf = self.cf(CF_REPO_INDEXER_STATUS)?;
        match self.db.get_cf(cf, StatusKey::new(kind, repo_id).to_bytes())? {
            Some(bytes) => Ok(Some(IndexerStatus::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether any status row exists.
    pub fn has_status_rows(&self) -> Result<bool, StorageError> {
        self.cf_not_empty(CF_REPO_INDEXER_STATUS)
    }

    /// Highest repository id with a status row of any kind, or 0.
    pub fn max_status_repo_id(&self) -> Result<RepoId, StorageError> {
        let cf = self.cf(CF_REPO_INDEXER_STATUS)?;
        let mut max = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            max = max.max(StatusKey::from_bytes(&key)?.repo_id);
        }
        Ok(max)
    }

    /// Delete every status row. Returns the number of rows removed.
    pub fn delete_all_status(&self) -> Result<usize, StorageError> {
        self.clear_cf(CF_REPO_INDEXER_STATUS)
    }

    /// Delete every repository row. Returns the number of rows removed.
    pub fn delete_all_repos(&self) -> Result<usize, StorageError> {
        self.clear_cf(CF_REPOSITORIES)
    }

    // ==================== Queue Journal Methods ====================

    fn next_queue_sequence(&self) -> u64 {
        self.queue_sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Sequence number the next journaled entry will get.
    pub fn queue_sequence_bound(&self) -> u64 {
        self.queue_sequence.load(Ordering::SeqCst)
    }

    /// Append raw bytes to the queue journal, returning their sequence.
    pub fn put_queue_entry(&self, bytes: &[u8]) -> Result<u64, StorageError> {
        let cf = self.cf(CF_INDEX_QUEUE)?;
        let key = QueueKey::new(self.next_queue_sequence());
        self.db.put_cf(cf, key.to_bytes(), bytes)?;
        Ok(key.sequence)
    }

    /// Journal a task, returning its sequence.
    pub fn enqueue_task(&self, task: &IndexTask) -> Result<u64, StorageError> {
        let sequence = self.put_queue_entry(&task.to_bytes()?)?;
        debug!(sequence, task = %task, "Journaled task");
        Ok(sequence)
    }

    /// Journal entries starting from a sequence number, in sequence order.
    ///
    /// Values are returned undecoded so the caller decides what to do with
    /// rows it cannot parse.
    pub fn get_queue_entries(
        &self,
        start_sequence: u64,
        limit: usize,
    ) -> Result<Vec<(u64, Vec<u8>)>, StorageError> {
        let cf = self.cf(CF_INDEX_QUEUE)?;
        let start_key = QueueKey::new(start_sequence).to_bytes();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start_key, Direction::Forward));

        let mut results = Vec::new();
        for item in iter.take(limit) {
            let (key, value) = item?;
            let queue_key = QueueKey::from_bytes(&key)?;
            results.push((queue_key.sequence, value.to_vec()));
        }
        Ok(results)
    }

    /// Delete the given journal entries. Returns how many were deleted.
    pub fn ack_queue_entries(&self, sequences: &[u64]) -> Result<usize, StorageError> {
        if sequences.is_empty() {
            return Ok(0);
        }
        let cf = self.cf(CF_INDEX_QUEUE)?;
        let mut batch = WriteBatch::default();
        for sequence in sequences {
            batch.delete_cf(cf, QueueKey::new(*sequence).to_bytes());
        }
        self.db.write(batch)?;
        debug!(count = sequences.len(), "Acknowledged queue entries");
        Ok(sequences.len())
    }

    /// Number of journaled entries not yet acknowledged.
    pub fn queue_len(&self) -> Result<usize, StorageError> {
        self.count_cf(CF_INDEX_QUEUE)
    }

    // ==================== Dead Letter Methods ====================

    /// Store a failed task. A newer failure for the same repository
    /// replaces the older one.
    pub fn record_failure(&self, failure: &FailureRecord) -> Result<(), StorageError> {
        let cf = self.cf(CF_INDEX_FAILURES)?;
        self.db.put_cf(
            cf,
            FailureKey::new(failure.repo_id).to_bytes(),
            failure.to_bytes()?,
        )?;
        warn!(
            repo_id = failure.repo_id,
            is_delete = failure.is_delete,
            error = %failure.error,
            "Recorded indexing failure"
        );
        Ok(())
    }

    /// All recorded failures in repository id order.
    pub fn list_failures(&self) -> Result<Vec<FailureRecord>, StorageError> {
        let cf = self.cf(CF_INDEX_FAILURES)?;
        let mut failures = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            failures.push(FailureRecord::from_bytes(&value)?);
        }
        Ok(failures)
    }

    /// Remove the failure recorded for a repository, if any.
    pub fn clear_failure(&self, repo_id: RepoId) -> Result<(), StorageError> {
        let cf = self.cf(CF_INDEX_FAILURES)?;
        self.db.delete_cf(cf, FailureKey::new(repo_id).to_bytes())?;
        Ok(())
    }

    /// Remove and return every recorded failure.
    pub fn take_failures(&self) -> Result<Vec<FailureRecord>, StorageError> {
        let failures = self.list_failures()?;
        if failures.is_empty() {
            return Ok(failures);
        }
        let cf = self.cf(CF_INDEX_FAILURES)?;
        let mut batch = WriteBatch::default();
        for failure in &failures {
            batch.delete_cf(cf, FailureKey::new(failure.repo_id).to_bytes());
        }
        self.db.write(batch)?;
        Ok(failures)
    }

    /// Remove every recorded failure. Returns how many were removed.
    pub fn clear_failures(&self) -> Result<usize, StorageError> {
        self.clear_cf(CF_INDEX_FAILURES)
    }

    // ==================== Indexer Flags ====================

    /// Whether a backfill was started and has not completed.
    pub fn is_backfill_pending(&self) -> Result<bool, StorageError> {
        let cf = self.cf(CF_INDEXER_META)?;
        Ok(self.db.get_cf(cf, BACKFILL_PENDING_KEY)?.is_some())
    }

    pub fn set_backfill_pending(&self, pending: bool) -> Result<(), StorageError> {
        let cf = self.cf(CF_INDEXER_META)?;
        if pending {
            self.db.put_cf(cf, BACKFILL_PENDING_KEY, [1u8])?;
        } else {
            self.db.delete_cf(cf, BACKFILL_PENDING_KEY)?;
        }
        debug!(pending, "Updated backfill flag");
        Ok(())
    }

    // ==================== Generic Helpers ====================

    fn cf_not_empty(&self, cf_name: &str) -> Result<bool, StorageError> {
        let cf = self.cf(cf_name)?;
        match self.db.iterator_cf(cf, IteratorMode::Start).next() {
            Some(item) => {
                item?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn count_cf(&self, cf_name: &str) -> Result<usize, StorageError> {
        let cf = self.cf(cf_name)?;
        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn clear_cf(&self, cf_name: &str) -> Result<usize, StorageError> {
        let cf = self.cf(cf_name)?;
        let mut batch = WriteBatch::default();
        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete_cf(cf, &key);
            count += 1;
        }
        if count > 0 {
            self.db.write(batch)?;
            debug!(cf = cf_name, count, "Cleared column family");
        }
        Ok(count)
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(cf)?;
            }
        }
        Ok(())
    }

    /// Row counts per column family.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            repo_count: self.count_cf(CF_REPOSITORIES)?,
            status_count: self.count_cf(CF_REPO_INDEXER_STATUS)?,
            queued_count: self.count_cf(CF_INDEX_QUEUE)?,
            failure_count: self.count_cf(CF_INDEX_FAILURES)?,
        })
    }
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub repo_count: usize,
    pub status_count: usize,
    pub queued_count: usize,
    pub failure_count: usize,
}
