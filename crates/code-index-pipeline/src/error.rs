//! Error types for the indexing pipeline.

use std::time::Duration;

use code_index_search::SearchError;
use code_index_storage::StorageError;
use thiserror::Error;

/// Errors that can occur in the indexing pipeline
#[derive(Error, Debug)]
pub enum IndexerError {
    /// Metadata store operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Search backend operation failed
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// The backend has not finished opening yet
    #[error("Indexer is not ready")]
    NotReady,

    /// The handle was closed; no backend will ever be served
    #[error("Indexer is closed")]
    Closed,

    /// A backend was already installed
    #[error("Indexer backend already set")]
    AlreadySet,

    /// `init` was called more than once
    #[error("Indexer already initialized")]
    AlreadyInitialized,

    /// Queue buffer is full
    #[error("Queue is full")]
    QueueFull,

    /// Queue no longer accepts tasks
    #[error("Queue is closed")]
    QueueClosed,

    /// A consumer is already attached to the queue
    #[error("Queue consumer already registered")]
    ConsumerAlreadyRegistered,

    /// Task failed validation
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    /// No backend registered under the configured name
    #[error("Unknown search backend: {0}")]
    UnknownBackend(String),

    /// The backend could not be opened or created
    #[error("Backend initialization failed: {0}")]
    BackendInit(String),

    /// The backend did not open within the startup timeout
    #[error("Indexer startup timed out after {0:?}")]
    StartupTimeout(Duration),

    /// Shutdown was requested before the backend was ready
    #[error("Shutdown requested before indexer was ready")]
    ShutdownBeforeReady,

    /// A blocking task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for IndexerError {
    fn from(err: tokio::task::JoinError) -> Self {
        IndexerError::Join(err.to_string())
    }
}
