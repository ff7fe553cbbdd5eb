//! Public entry point of the code indexer.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::{debug, info};

use code_index_search::{ContentSource, SearchBackend};
use code_index_storage::{RepoStore, Storage};
use code_index_types::{IndexTask, IndexerSettings, QueueKind, RepoId, SearchPage};

use crate::blocking::run_blocking;
use crate::error::IndexerError;
use crate::graceful::GracefulManager;
use crate::handle::IndexerHandle;
use crate::lifecycle::{LifecycleConfig, LifecycleController, LifecycleState, StartupHandle};
use crate::queue::TaskQueue;
use crate::registry::{BackendOptions, BackendRegistry};
use crate::source::StorageContentSource;

const QUEUE_NAME: &str = "code_indexer";

/// Code indexer: queue producers, search, and startup.
pub struct CodeIndexer {
    settings: IndexerSettings,
    handle: Arc<IndexerHandle>,
    queue: Arc<TaskQueue>,
    store: Arc<dyn RepoStore>,
    registry: Arc<BackendRegistry>,
    source: Arc<dyn ContentSource>,
    graceful: GracefulManager,
    startup_timeout: Option<Duration>,
    controller: OnceLock<Arc<LifecycleController>>,
    initialized: AtomicBool,
}

impl CodeIndexer {
    /// Build an indexer over `store`.
    ///
    /// `journal` backs the persistent queue kind and is ignored otherwise.
    pub fn new(
        settings: IndexerSettings,
        store: Arc<dyn RepoStore>,
        journal: Option<Arc<Storage>>,
        graceful: GracefulManager,
    ) -> Self {
        let queue = Arc::new(TaskQueue::new(
            QUEUE_NAME,
            &settings.queue,
            journal,
            graceful.shutdown_token(),
        ));
        let source: Arc<dyn ContentSource> = Arc::new(StorageContentSource::new(
            store.clone(),
            settings.max_file_size,
        ));
        let startup_timeout = settings.startup_timeout();

        Self {
            settings,
            handle: Arc::new(IndexerHandle::new()),
            queue,
            store,
            registry: Arc::new(BackendRegistry::with_defaults()),
            source,
            graceful,
            startup_timeout,
            controller: OnceLock::new(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Build an indexer over the metadata store, which also journals the
    /// queue when the persistent kind is configured.
    pub fn open(
        settings: IndexerSettings,
        storage: Arc<Storage>,
        graceful: GracefulManager,
    ) -> Result<Self, IndexerError> {
        settings.validate().map_err(IndexerError::BackendInit)?;
        let journal = match settings.queue.kind {
            QueueKind::Persistent => Some(storage.clone()),
            QueueKind::Channel => None,
        };
        Ok(Self::new(settings, storage, journal, graceful))
    }

    pub fn with_registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_content_source(mut self, source: Arc<dyn ContentSource>) -> Self {
        self.source = source;
        self
    }

    /// Override the configured startup timeout. `None` waits forever.
    pub fn with_startup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Start the indexer in the background.
    ///
    /// Returns immediately; the returned handle resolves once the backend
    /// is ready or startup has failed. Callable once.
    pub fn init(&self) -> Result<StartupHandle, IndexerError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(IndexerError::AlreadyInitialized);
        }

        let options = BackendOptions {
            path: PathBuf::from(&self.settings.repo_path),
            max_file_size: self.settings.max_file_size,
            source: self.source.clone(),
        };
        let config = LifecycleConfig::new(self.settings.repo_type.clone(), options)
            .with_enabled(self.settings.repo_indexer_enabled)
            .with_startup_timeout(self.startup_timeout)
            .with_backfill_page_size(self.settings.backfill_page_size);

        let controller = Arc::new(LifecycleController::new(
            config,
            self.handle.clone(),
            self.queue.clone(),
            self.store.clone(),
            self.registry.clone(),
            self.graceful.clone(),
        ));
        let startup = controller.start()?;
        let _ = self.controller.set(controller);

        info!(
            enabled = self.settings.repo_indexer_enabled,
            backend = %self.settings.repo_type,
            queue = %self.settings.queue.kind,
            "Code indexer initializing"
        );
        Ok(startup)
    }

    /// Schedule (re)indexing of a repository.
    pub async fn update_repo_indexer(&self, repo_id: RepoId) -> Result<(), IndexerError> {
        self.enqueue(IndexTask::index(repo_id)).await
    }

    /// Schedule removal of a repository from the index.
    pub async fn delete_repo_from_indexer(&self, repo_id: RepoId) -> Result<(), IndexerError> {
        self.enqueue(IndexTask::delete(repo_id)).await
    }

    async fn enqueue(&self, task: IndexTask) -> Result<(), IndexerError> {
        if !self.settings.repo_indexer_enabled {
            debug!(%task, "Code indexing disabled, dropping task");
            return Ok(());
        }
        self.queue.push(task).await
    }

    /// Search the index. Pages are 1-based; `page <= 0` means the first.
    pub async fn search(
        &self,
        repo_ids: &[RepoId],
        keyword: &str,
        page: i64,
        page_size: usize,
    ) -> Result<SearchPage, IndexerError> {
        let backend: Arc<dyn SearchBackend> = self.handle.get().ok_or(IndexerError::NotReady)?;
        let repo_ids = repo_ids.to_vec();
        let keyword = keyword.to_string();
        let page = usize::try_from(page).unwrap_or(0).max(1);

        run_blocking(move || Ok(backend.search(&repo_ids, &keyword, page, page_size)?)).await
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.repo_indexer_enabled
    }

    pub fn handle(&self) -> &Arc<IndexerHandle> {
        &self.handle
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.controller
            .get()
            .map(|controller| *controller.subscribe().borrow())
            .unwrap_or(LifecycleState::NotStarted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryStore, MockBackend};
    use code_index_types::{IndexerKind, QueueSettings};

    struct Fixture {
        graceful: GracefulManager,
        store: Arc<MemoryStore>,
        backend: Arc<MockBackend>,
        indexer: CodeIndexer,
    }

    fn fixture(enabled: bool, created: bool) -> Fixture {
        let graceful = GracefulManager::new();
        let store = Arc::new(MemoryStore::with_repos(&[1, 2]));
        let backend = Arc::new(MockBackend::default());

        let mut registry = BackendRegistry::new();
        let opened = backend.clone();
        registry.register(
            "mock",
            Arc::new(move |_: &BackendOptions| {
                let backend: Arc<dyn SearchBackend> = opened.clone();
                Ok::<_, IndexerError>((backend, created))
            }),
        );

        let settings = IndexerSettings {
            repo_indexer_enabled: enabled,
            repo_type: "mock".to_string(),
            queue: QueueSettings::default().with_kind(QueueKind::Channel),
            ..IndexerSettings::default()
        };
        let indexer = CodeIndexer::new(settings, store.clone(), None, graceful.clone())
            .with_registry(registry);

        Fixture {
            graceful,
            store,
            backend,
            indexer,
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    #[tokio::test]
    async fn test_init_twice_is_rejected() {
        let f = fixture(true, false);
        f.indexer.init().unwrap();
        assert!(matches!(
            f.indexer.init(),
            Err(IndexerError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn test_state_before_init() {
        let f = fixture(true, false);
        assert_eq!(f.indexer.state(), LifecycleState::NotStarted);
    }

    #[tokio::test]
    async fn test_disabled_discards_updates() {
        let f = fixture(false, true);
        let startup = f.indexer.init().unwrap();
        assert_eq!(startup.wait().await.unwrap(), Duration::ZERO);

        f.indexer.update_repo_indexer(1).await.unwrap();
        f.indexer.delete_repo_from_indexer(2).await.unwrap();

        assert_eq!(f.indexer.queue().buffered(), 0);
        assert_eq!(f.indexer.state(), LifecycleState::Closed);
        assert!(matches!(
            f.indexer.search(&[], "x", 1, 10).await,
            Err(IndexerError::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_search_before_ready_is_not_ready() {
        let f = fixture(true, false);
        assert!(matches!(
            f.indexer.search(&[1], "widget", 1, 10).await,
            Err(IndexerError::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_update_then_search() {
        let f = fixture(true, false);
        f.indexer.init().unwrap().wait().await.unwrap();
        assert_eq!(f.indexer.state(), LifecycleState::Ready);

        f.indexer.update_repo_indexer(2).await.unwrap();
        let store = f.store.clone();
        assert!(eventually(|| store.is_marked(IndexerKind::Code, 2)).await);

        let page = f.indexer.search(&[2], "widget", 0, 10).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.results[0].repo_id, 2);

        f.indexer.delete_repo_from_indexer(2).await.unwrap();
        let backend = f.backend.clone();
        assert!(eventually(|| backend.indexed_repos().is_empty()).await);
        assert!(!f.store.is_marked(IndexerKind::Code, 2));
    }

    #[tokio::test]
    async fn test_fresh_index_backfills_existing_repos() {
        let f = fixture(true, true);
        f.indexer.init().unwrap().wait().await.unwrap();

        let backend = f.backend.clone();
        assert!(eventually(|| backend.indexed_repos() == vec![1, 2]).await);
    }

    #[tokio::test]
    async fn test_invalid_repo_id_is_rejected() {
        let f = fixture(true, false);
        assert!(matches!(
            f.indexer.update_repo_indexer(0).await,
            Err(IndexerError::InvalidTask(_))
        ));
    }

    #[tokio::test]
    async fn test_update_after_shutdown_fails() {
        let f = fixture(true, false);
        f.indexer.init().unwrap().wait().await.unwrap();
        f.graceful.shutdown();

        assert!(matches!(
            f.indexer.update_repo_indexer(1).await,
            Err(IndexerError::QueueClosed)
        ));
    }
}
