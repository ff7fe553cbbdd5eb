//! Storage layer for code-index.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for repository metadata, indexer status rows,
//!   the persistent task queue journal and dead-lettered tasks
//! - Zero-padded keys so repository ids sort numerically
//! - The [`RepoStore`] interface consumed by the indexing pipeline

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod store;

pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use keys::{FailureKey, QueueKey, RepoKey, StatusKey};
pub use store::RepoStore;
