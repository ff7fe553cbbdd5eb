//! In-memory collaborators shared by the unit tests.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use code_index_search::{SearchBackend, SearchError};
use code_index_storage::{RepoStore, StorageError};
use code_index_types::{
    FailureRecord, IndexTask, IndexerKind, RepoId, RepoRecord, SearchPage, SearchResult, Table,
};

/// Backend that records applied tasks and keeps the set of indexed repos.
#[derive(Default)]
pub struct MockBackend {
    ops: Mutex<Vec<IndexTask>>,
    indexed: Mutex<BTreeSet<RepoId>>,
    failing: Mutex<HashSet<RepoId>>,
    closes: AtomicUsize,
}

impl MockBackend {
    pub fn fail_repo(&self, repo_id: RepoId) {
        self.failing.lock().unwrap().insert(repo_id);
    }

    pub fn heal_repo(&self, repo_id: RepoId) {
        self.failing.lock().unwrap().remove(&repo_id);
    }

    pub fn ops(&self) -> Vec<IndexTask> {
        self.ops.lock().unwrap().clone()
    }

    pub fn indexed_repos(&self) -> Vec<RepoId> {
        self.indexed.lock().unwrap().iter().copied().collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn check(&self, repo_id: RepoId) -> Result<(), SearchError> {
        if self.close_count() > 0 {
            return Err(SearchError::Closed);
        }
        if self.failing.lock().unwrap().contains(&repo_id) {
            return Err(SearchError::Content(format!("injected failure for {}", repo_id)));
        }
        Ok(())
    }
}

impl SearchBackend for MockBackend {
    fn index(&self, repo_id: RepoId) -> Result<(), SearchError> {
        self.check(repo_id)?;
        self.ops.lock().unwrap().push(IndexTask::index(repo_id));
        self.indexed.lock().unwrap().insert(repo_id);
        Ok(())
    }

    fn delete(&self, repo_id: RepoId) -> Result<(), SearchError> {
        self.check(repo_id)?;
        self.ops.lock().unwrap().push(IndexTask::delete(repo_id));
        self.indexed.lock().unwrap().remove(&repo_id);
        Ok(())
    }

    fn search(
        &self,
        repo_ids: &[RepoId],
        keyword: &str,
        page: usize,
        page_size: usize,
    ) -> Result<SearchPage, SearchError> {
        if self.close_count() > 0 {
            return Err(SearchError::Closed);
        }
        let hits: Vec<SearchResult> = self
            .indexed_repos()
            .into_iter()
            .filter(|id| repo_ids.is_empty() || repo_ids.contains(id))
            .map(|repo_id| SearchResult {
                repo_id,
                start_index: 0,
                end_index: keyword.len(),
                filename: "README".to_string(),
                content: keyword.to_string(),
                start_line: 1,
            })
            .collect();
        let total = hits.len() as u64;
        let results = hits
            .into_iter()
            .skip((page.max(1) - 1) * page_size)
            .take(page_size)
            .collect();
        Ok(SearchPage { total, results })
    }

    fn close(&self) -> Result<(), SearchError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Metadata store kept in memory.
#[derive(Default)]
pub struct MemoryStore {
    repos: Mutex<BTreeMap<RepoId, RepoRecord>>,
    status: Mutex<HashSet<(IndexerKind, RepoId)>>,
    failures: Mutex<BTreeMap<RepoId, FailureRecord>>,
    backfill_pending: AtomicBool,
}

impl MemoryStore {
    pub fn with_repos(ids: &[RepoId]) -> Self {
        let store = Self::default();
        for id in ids {
            store.add_repo(*id);
        }
        store
    }

    pub fn add_repo(&self, repo_id: RepoId) {
        self.repos.lock().unwrap().insert(
            repo_id,
            RepoRecord::new(repo_id, "owner", format!("repo-{}", repo_id), "/nonexistent"),
        );
    }

    pub fn is_marked(&self, kind: IndexerKind, repo_id: RepoId) -> bool {
        self.status.lock().unwrap().contains(&(kind, repo_id))
    }

    pub fn failures(&self) -> Vec<FailureRecord> {
        self.failures.lock().unwrap().values().cloned().collect()
    }
}

impl RepoStore for MemoryStore {
    fn is_table_not_empty(&self, table: Table) -> Result<bool, StorageError> {
        Ok(match table {
            Table::Repository => !self.repos.lock().unwrap().is_empty(),
            Table::RepoIndexerStatus => !self.status.lock().unwrap().is_empty(),
        })
    }

    fn max_id(&self, table: Table) -> Result<RepoId, StorageError> {
        Ok(match table {
            Table::Repository => self.repos.lock().unwrap().keys().max().copied(),
            Table::RepoIndexerStatus => self.status.lock().unwrap().iter().map(|s| s.1).max(),
        }
        .unwrap_or(0))
    }

    fn delete_all_records(&self, table: Table) -> Result<usize, StorageError> {
        Ok(match table {
            Table::Repository => std::mem::take(&mut *self.repos.lock().unwrap()).len(),
            Table::RepoIndexerStatus => std::mem::take(&mut *self.status.lock().unwrap()).len(),
        })
    }

    fn unindexed_repo_ids(
        &self,
        kind: IndexerKind,
        max_id: RepoId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RepoId>, StorageError> {
        let status = self.status.lock().unwrap();
        Ok(self
            .repos
            .lock()
            .unwrap()
            .keys()
            .rev()
            .filter(|id| **id <= max_id && !status.contains(&(kind, **id)))
            .skip(offset)
            .take(limit)
            .copied()
            .collect())
    }

    fn get_repo(&self, repo_id: RepoId) -> Result<Option<RepoRecord>, StorageError> {
        Ok(self.repos.lock().unwrap().get(&repo_id).cloned())
    }

    fn mark_indexed(&self, kind: IndexerKind, repo_id: RepoId) -> Result<(), StorageError> {
        self.status.lock().unwrap().insert((kind, repo_id));
        Ok(())
    }

    fn clear_indexed(&self, kind: IndexerKind, repo_id: RepoId) -> Result<(), StorageError> {
        self.status.lock().unwrap().remove(&(kind, repo_id));
        Ok(())
    }

    fn record_failure(&self, failure: &FailureRecord) -> Result<(), StorageError> {
        self.failures
            .lock()
            .unwrap()
            .insert(failure.repo_id, failure.clone());
        Ok(())
    }

    fn clear_failure(&self, repo_id: RepoId) -> Result<(), StorageError> {
        self.failures.lock().unwrap().remove(&repo_id);
        Ok(())
    }

    fn take_failures(&self) -> Result<Vec<FailureRecord>, StorageError> {
        Ok(std::mem::take(&mut *self.failures.lock().unwrap())
            .into_values()
            .collect())
    }

    fn backfill_pending(&self) -> Result<bool, StorageError> {
        Ok(self.backfill_pending.load(Ordering::SeqCst))
    }

    fn set_backfill_pending(&self, pending: bool) -> Result<(), StorageError> {
        self.backfill_pending.store(pending, Ordering::SeqCst);
        Ok(())
    }
}
