//! End-to-end test infrastructure for code-index.
//!
//! Provides a shared TestHarness and helper functions for E2E tests
//! covering the path from repository mutation to search results.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use code_index_pipeline::{CodeIndexer, GracefulManager};
use code_index_storage::Storage;
use code_index_types::{IndexerKind, IndexerSettings, QueueKind, QueueSettings, RepoId, RepoRecord};

/// Shared test harness for E2E tests.
///
/// Owns a metadata store, a search index directory and a directory of
/// repository working copies, all under one temp dir.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Shared storage instance
    pub storage: Arc<Storage>,
    /// Path for the search index files
    pub index_path: PathBuf,
    /// Parent of the repository working copies
    pub repos_dir: PathBuf,
}

impl TestHarness {
    /// Create a new test harness with temp directory and storage.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage = Arc::new(
            Storage::open(&temp_dir.path().join("db")).expect("Failed to open test storage"),
        );

        let index_path = temp_dir.path().join("code-index");
        let repos_dir = temp_dir.path().join("repos");
        std::fs::create_dir_all(&repos_dir).expect("Failed to create repos dir");

        Self {
            _temp_dir: temp_dir,
            storage,
            index_path,
            repos_dir,
        }
    }

    /// Write a working copy with `files` and register it.
    pub fn add_repo(&self, repo_id: RepoId, name: &str, files: &[(&str, &str)]) -> RepoRecord {
        let dir = self.repos_dir.join(name);
        for (path, content) in files {
            let file = dir.join(path);
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent).expect("Failed to create repo dir");
            }
            std::fs::write(&file, content).expect("Failed to write repo file");
        }
        std::fs::create_dir_all(&dir).expect("Failed to create repo dir");

        let repo = RepoRecord::new(repo_id, "e2e", name, dir.to_string_lossy());
        self.storage.put_repo(&repo).expect("Failed to store repo");
        repo
    }

    /// Indexer settings pointing at the harness index.
    pub fn settings(&self, kind: QueueKind) -> IndexerSettings {
        IndexerSettings {
            repo_indexer_enabled: true,
            repo_path: self.index_path.to_string_lossy().into_owned(),
            startup_timeout_secs: 10,
            queue: QueueSettings::default().with_kind(kind),
            ..IndexerSettings::default()
        }
    }

    /// An indexer over the harness store.
    pub fn indexer(&self, kind: QueueKind, graceful: &GracefulManager) -> CodeIndexer {
        CodeIndexer::open(self.settings(kind), self.storage.clone(), graceful.clone())
            .expect("Failed to build indexer")
    }

    /// Whether the code indexer has processed the repository.
    pub fn is_indexed(&self, repo_id: RepoId) -> bool {
        self.storage
            .get_status(IndexerKind::Code, repo_id)
            .expect("Failed to read status")
            .is_some()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Run termination hooks the way the daemon does at exit.
pub async fn terminate(graceful: &GracefulManager) {
    let graceful = graceful.clone();
    tokio::task::spawn_blocking(move || graceful.terminate())
        .await
        .expect("Termination panicked");
}
