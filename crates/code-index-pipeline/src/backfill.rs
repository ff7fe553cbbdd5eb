//! One-time walk over pre-existing repositories after the index was
//! freshly created.
//!
//! The walk moves a cursor downward from the highest repository id and
//! enqueues an index task for every repository without a code status row.
//! It polls the shutdown token between steps; repositories created while
//! it runs are covered by their own update calls.
//!
//! A walk is resumable. The caller flags the backfill pending in the store
//! before the first run and the flag is cleared only once the walk
//! completes. A resumed walk keeps the status rows written so far, so it
//! enqueues only what the interrupted walk did not get indexed.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use code_index_storage::RepoStore;
use code_index_types::{IndexTask, IndexerKind, RepoId, Table};

use crate::blocking::run_blocking;
use crate::error::IndexerError;
use crate::queue::TaskQueue;

/// Default number of repository ids fetched per page
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Destination of the tasks produced by the walk.
#[async_trait]
pub trait TaskSink: Send + Sync {
    async fn push(&self, task: IndexTask) -> Result<(), IndexerError>;
}

#[async_trait]
impl TaskSink for TaskQueue {
    async fn push(&self, task: IndexTask) -> Result<(), IndexerError> {
        TaskQueue::push(self, task).await
    }
}

/// Observer notified after every enqueued task.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, report: &BackfillReport);
}

/// How a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// The repository table was empty
    Empty,
    /// Every unindexed repository was enqueued
    Completed,
    /// Shutdown interrupted the walk
    Cancelled,
}

/// Summary of a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    pub outcome: BackfillOutcome,
    /// Tasks enqueued, in order
    pub enqueued: Vec<RepoId>,
    /// Highest repository id observed at the start
    pub max_repo_id: RepoId,
    /// Cursor when the walk ended
    pub cursor: RepoId,
}

impl BackfillReport {
    fn new(outcome: BackfillOutcome) -> Self {
        Self {
            outcome,
            enqueued: Vec::new(),
            max_repo_id: 0,
            cursor: 0,
        }
    }
}

/// Enqueues index tasks for repositories the index has not seen.
pub struct BackfillWalker {
    store: Arc<dyn RepoStore>,
    sink: Arc<dyn TaskSink>,
    shutdown: CancellationToken,
    page_size: usize,
    resume: bool,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl BackfillWalker {
    pub fn new(
        store: Arc<dyn RepoStore>,
        sink: Arc<dyn TaskSink>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            sink,
            shutdown,
            page_size: DEFAULT_PAGE_SIZE,
            resume: false,
            progress: None,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Continue an interrupted walk instead of starting over.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    async fn finish_pending(&self) -> Result<(), IndexerError> {
        let store = self.store.clone();
        run_blocking(move || Ok(store.set_backfill_pending(false)?)).await
    }

    /// Run the walk to completion or until shutdown.
    pub async fn run(&self) -> Result<BackfillReport, IndexerError> {
        let store = self.store.clone();
        let has_repos =
            run_blocking(move || Ok(store.is_table_not_empty(Table::Repository)?)).await?;
        if !has_repos {
            debug!("No repositories, skipping backfill");
            self.finish_pending().await?;
            return Ok(BackfillReport::new(BackfillOutcome::Empty));
        }

        let cleared = if self.resume {
            0
        } else {
            let store = self.store.clone();
            run_blocking(move || Ok(store.delete_all_records(Table::RepoIndexerStatus)?)).await?
        };

        let store = self.store.clone();
        let max_repo_id = run_blocking(move || Ok(store.max_id(Table::Repository)?)).await?;

        info!(
            max_repo_id,
            cleared,
            resume = self.resume,
            page_size = self.page_size,
            "Starting backfill"
        );

        let mut report = BackfillReport::new(BackfillOutcome::Completed);
        report.max_repo_id = max_repo_id;
        report.cursor = max_repo_id;

        while report.cursor > 0 {
            if self.shutdown.is_cancelled() {
                return Ok(self.cancelled(report));
            }

            let store = self.store.clone();
            let (cursor, limit) = (report.cursor, self.page_size);
            let ids = run_blocking(move || {
                Ok(store.unindexed_repo_ids(IndexerKind::Code, cursor, 0, limit)?)
            })
            .await?;
            if ids.is_empty() {
                break;
            }

            for id in ids {
                if self.shutdown.is_cancelled() {
                    return Ok(self.cancelled(report));
                }
                if let Err(e) = self.sink.push(IndexTask::index(id)).await {
                    if self.shutdown.is_cancelled() {
                        return Ok(self.cancelled(report));
                    }
                    return Err(e);
                }
                report.enqueued.push(id);
                report.cursor = id - 1;
                if let Some(progress) = &self.progress {
                    progress.on_progress(&report);
                }
            }
        }

        self.finish_pending().await?;
        info!(enqueued = report.enqueued.len(), "Backfill complete");
        Ok(report)
    }

    fn cancelled(&self, mut report: BackfillReport) -> BackfillReport {
        info!(
            enqueued = report.enqueued.len(),
            cursor = report.cursor,
            "Backfill interrupted by shutdown"
        );
        report.outcome = BackfillOutcome::Cancelled;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        pushed: Mutex<Vec<IndexTask>>,
        cancel_after: Option<(usize, CancellationToken)>,
        create_on_push: Option<(Arc<MemoryStore>, RepoId)>,
    }

    #[async_trait]
    impl TaskSink for RecordingSink {
        async fn push(&self, task: IndexTask) -> Result<(), IndexerError> {
            let mut pushed = self.pushed.lock().unwrap();
            pushed.push(task);
            if let Some((count, token)) = &self.cancel_after {
                if pushed.len() >= *count {
                    token.cancel();
                }
            }
            if let Some((store, repo_id)) = &self.create_on_push {
                store.add_repo(*repo_id);
            }
            Ok(())
        }
    }

    impl RecordingSink {
        fn ids(&self) -> Vec<RepoId> {
            self.pushed.lock().unwrap().iter().map(|t| t.repo_id).collect()
        }
    }

    fn walker(
        store: Arc<MemoryStore>,
        sink: Arc<RecordingSink>,
        token: CancellationToken,
    ) -> BackfillWalker {
        BackfillWalker::new(store, sink, token)
    }

    #[tokio::test]
    async fn test_empty_table_enqueues_nothing() {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::default());

        let report = walker(store, sink.clone(), CancellationToken::new())
            .run()
            .await
            .unwrap();
        assert_eq!(report.outcome, BackfillOutcome::Empty);
        assert!(sink.ids().is_empty());
    }

    #[derive(Default)]
    struct CursorLog(Mutex<Vec<RepoId>>);

    impl ProgressCallback for CursorLog {
        fn on_progress(&self, report: &BackfillReport) {
            self.0.lock().unwrap().push(report.cursor);
        }
    }

    #[tokio::test]
    async fn test_walks_descending_with_page_size_one() {
        let store = Arc::new(MemoryStore::with_repos(&[1, 2, 3]));
        store.set_backfill_pending(true).unwrap();
        let sink = Arc::new(RecordingSink::default());
        let cursors = Arc::new(CursorLog::default());

        let report = walker(store.clone(), sink.clone(), CancellationToken::new())
            .with_page_size(1)
            .with_progress(cursors.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(report.outcome, BackfillOutcome::Completed);
        assert_eq!(sink.ids(), vec![3, 2, 1]);
        assert_eq!(report.enqueued, vec![3, 2, 1]);
        assert_eq!(*cursors.0.lock().unwrap(), vec![2, 1, 0]);
        assert_eq!(report.cursor, 0);
        assert!(!store.backfill_pending().unwrap());
    }

    #[tokio::test]
    async fn test_clears_status_rows_first() {
        let store = Arc::new(MemoryStore::with_repos(&[1, 2, 3]));
        store.mark_indexed(IndexerKind::Code, 2).unwrap();
        let sink = Arc::new(RecordingSink::default());

        walker(store.clone(), sink.clone(), CancellationToken::new())
            .run()
            .await
            .unwrap();

        assert_eq!(sink.ids(), vec![3, 2, 1]);
        assert!(!store.is_marked(IndexerKind::Code, 2));
    }

    #[tokio::test]
    async fn test_sparse_ids_paged() {
        let store = Arc::new(MemoryStore::with_repos(&[2, 5, 9, 10, 40]));
        let sink = Arc::new(RecordingSink::default());

        let report = walker(store, sink.clone(), CancellationToken::new())
            .with_page_size(2)
            .run()
            .await
            .unwrap();

        assert_eq!(sink.ids(), vec![40, 10, 9, 5, 2]);
        assert_eq!(report.max_repo_id, 40);
        assert_eq!(report.cursor, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_walk() {
        let store = Arc::new(MemoryStore::with_repos(&[1, 2, 3]));
        store.set_backfill_pending(true).unwrap();
        let token = CancellationToken::new();
        let sink = Arc::new(RecordingSink {
            cancel_after: Some((1, token.clone())),
            ..Default::default()
        });

        let report = walker(store.clone(), sink.clone(), token)
            .with_page_size(1)
            .run()
            .await
            .unwrap();

        assert_eq!(report.outcome, BackfillOutcome::Cancelled);
        assert_eq!(sink.ids(), vec![3]);
        assert_eq!(report.cursor, 2);
        assert!(store.backfill_pending().unwrap());
    }

    #[tokio::test]
    async fn test_resumed_walk_keeps_status_rows() {
        let store = Arc::new(MemoryStore::with_repos(&[1, 2, 3]));
        store.set_backfill_pending(true).unwrap();
        store.mark_indexed(IndexerKind::Code, 3).unwrap();
        let sink = Arc::new(RecordingSink::default());

        let report = walker(store.clone(), sink.clone(), CancellationToken::new())
            .with_resume(true)
            .run()
            .await
            .unwrap();

        assert_eq!(report.outcome, BackfillOutcome::Completed);
        assert_eq!(sink.ids(), vec![2, 1]);
        assert!(store.is_marked(IndexerKind::Code, 3));
        assert!(!store.backfill_pending().unwrap());
    }

    #[tokio::test]
    async fn test_repos_created_during_walk_are_not_enqueued() {
        let store = Arc::new(MemoryStore::with_repos(&[1, 2]));
        let sink = Arc::new(RecordingSink {
            create_on_push: Some((store.clone(), 3)),
            ..Default::default()
        });

        let report = walker(store, sink.clone(), CancellationToken::new())
            .with_page_size(1)
            .run()
            .await
            .unwrap();

        assert_eq!(report.max_repo_id, 2);
        assert_eq!(sink.ids(), vec![2, 1]);
    }
}
