//! # code-index-types
//!
//! Shared domain types for the code-index system.
//!
//! This crate defines the data structures passed between the pipeline crates:
//! - Tasks: units of indexing work flowing through the queue
//! - Repositories: metadata rows, indexer status rows and dead letters
//! - Search results: hits returned by a search backend
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use code_index_types::IndexTask;
//!
//! let task = IndexTask::index(42);
//! assert!(!task.is_delete);
//! ```

pub mod config;
pub mod error;
pub mod repo;
pub mod search;
pub mod task;

pub use config::{IndexerSettings, QueueKind, QueueSettings, Settings};
pub use error::CodeIndexError;
pub use repo::{FailureRecord, IndexerKind, IndexerStatus, RepoRecord, Table};
pub use search::{SearchPage, SearchResult};
pub use task::{IndexTask, RepoId};
