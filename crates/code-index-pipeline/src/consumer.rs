//! The queue consumer that applies index tasks to the search backend.
//!
//! Tasks that cannot be applied, either because the backend failed or
//! because it was not ready, are recorded as dead letters. Tasks deferred
//! while the backend is still opening are retried once it becomes ready.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use code_index_search::SearchBackend;
use code_index_storage::RepoStore;
use code_index_types::{FailureRecord, IndexTask, IndexerKind};

use crate::blocking::run_blocking;
use crate::error::IndexerError;
use crate::handle::IndexerHandle;
use crate::queue::BatchHandler;

/// Outcome of handling one batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Index tasks applied
    pub indexed: usize,
    /// Delete tasks applied
    pub deleted: usize,
    /// Tasks not attempted because the indexer was not ready
    pub skipped: usize,
    /// Tasks whose application failed
    pub failed: usize,
}

impl BatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an applied task.
    pub fn record_success(&mut self, task: &IndexTask) {
        if task.is_delete {
            self.deleted += 1;
        } else {
            self.indexed += 1;
        }
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn record_error(&mut self) {
        self.failed += 1;
    }

    /// Total number of tasks handled (applied + skipped + failed).
    pub fn total(&self) -> usize {
        self.indexed + self.deleted + self.skipped + self.failed
    }
}

/// Applies batches of tasks through the [`IndexerHandle`].
pub struct IndexTaskHandler {
    handle: Arc<IndexerHandle>,
    store: Arc<dyn RepoStore>,
}

impl IndexTaskHandler {
    pub fn new(handle: Arc<IndexerHandle>, store: Arc<dyn RepoStore>) -> Self {
        Self { handle, store }
    }

    /// Apply a batch on the blocking pool.
    pub async fn handle_batch(
        &self,
        batch: Vec<IndexTask>,
    ) -> Result<BatchReport, IndexerError> {
        let handle = self.handle.clone();
        let store = self.store.clone();
        run_blocking(move || Ok(apply_batch(&handle, store.as_ref(), batch))).await
    }
}

#[async_trait]
impl BatchHandler for IndexTaskHandler {
    async fn handle(&self, batch: Vec<IndexTask>) {
        let count = batch.len();
        match self.handle_batch(batch).await {
            Ok(report) if report.failed > 0 || report.skipped > 0 => {
                warn!(
                    indexed = report.indexed,
                    deleted = report.deleted,
                    skipped = report.skipped,
                    failed = report.failed,
                    "Batch finished with dead letters"
                );
            }
            Ok(report) => {
                debug!(
                    indexed = report.indexed,
                    deleted = report.deleted,
                    "Batch applied"
                );
            }
            Err(e) => error!(count, error = %e, "Batch handler failed"),
        }
    }
}

fn dead_letter(store: &dyn RepoStore, task: IndexTask, reason: &str) {
    if let Err(e) = store.record_failure(&FailureRecord::new(task, reason)) {
        error!(task = %task, error = %e, "Failed to record dead letter");
    }
}

fn apply_task(
    store: &dyn RepoStore,
    backend: &dyn SearchBackend,
    task: IndexTask,
) -> Result<(), IndexerError> {
    if task.is_delete {
        backend.delete(task.repo_id)?;
        store.clear_indexed(IndexerKind::Code, task.repo_id)?;
    } else {
        backend.index(task.repo_id)?;
        store.mark_indexed(IndexerKind::Code, task.repo_id)?;
    }
    store.clear_failure(task.repo_id)?;
    Ok(())
}

fn apply_batch(
    handle: &IndexerHandle,
    store: &dyn RepoStore,
    batch: Vec<IndexTask>,
) -> BatchReport {
    let mut report = BatchReport::new();

    let backend = match handle.get() {
        Some(backend) => backend,
        None => {
            error!(count = batch.len(), "Indexer is not ready, deferring batch");
            for task in &batch {
                dead_letter(store, *task, "indexer not ready");
                report.record_skip();
            }
            // The retry pass may have run between the check and the writes.
            match handle.get() {
                Some(backend) => {
                    debug!(count = batch.len(), "Indexer became ready, applying deferred batch");
                    report = BatchReport::new();
                    backend
                }
                None => return report,
            }
        }
    };

    for task in batch {
        match apply_task(store, backend.as_ref(), task) {
            Ok(()) => report.record_success(&task),
            Err(e) => {
                error!(task = %task, error = %e, "Failed to apply index task");
                dead_letter(store, task, &e.to_string());
                report.record_error();
            }
        }
    }

    if report.indexed + report.deleted > 0 {
        info!(
            indexed = report.indexed,
            deleted = report.deleted,
            "Applied index tasks"
        );
    }
    report
}
