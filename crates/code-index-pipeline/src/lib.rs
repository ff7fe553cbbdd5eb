//! Asynchronous code indexing pipeline.
//!
//! Keeps the code search index eventually consistent with repository
//! mutations without blocking the callers that report them.
//!
//! ## Key Components
//!
//! - [`IndexerHandle`]: holder of the single active search backend
//! - [`TaskQueue`]: bounded, batched queue of [`IndexTask`]s with one consumer
//! - [`IndexTaskHandler`]: the consumer applying tasks to the backend
//! - [`LifecycleController`]: startup race between backend open, shutdown
//!   and the startup timeout
//! - [`BackfillWalker`]: enqueues every pre-existing repository after the
//!   index is freshly created
//! - [`GracefulManager`]: shutdown signal and termination hooks
//! - [`CodeIndexer`]: the public entry point
//!
//! ## Example
//!
//! ```ignore
//! let graceful = GracefulManager::new();
//! let indexer = CodeIndexer::open(settings.indexer, storage, graceful.clone())?;
//! let startup = indexer.init()?;
//!
//! indexer.update_repo_indexer(42).await?;
//! startup.wait().await?;
//! let page = indexer.search(&[42], "fn main", 1, 10).await?;
//! ```
//!
//! [`IndexTask`]: code_index_types::IndexTask

mod blocking;

pub mod backfill;
pub mod consumer;
pub mod error;
pub mod graceful;
pub mod handle;
pub mod indexer;
pub mod lifecycle;
pub mod queue;
pub mod registry;
pub mod source;

#[cfg(test)]
pub(crate) mod test_support;

pub use backfill::{BackfillOutcome, BackfillReport, BackfillWalker, ProgressCallback, TaskSink};
pub use consumer::{BatchReport, IndexTaskHandler};
pub use error::IndexerError;
pub use graceful::GracefulManager;
pub use handle::{HandleStatus, IndexerHandle};
pub use indexer::CodeIndexer;
pub use lifecycle::{LifecycleConfig, LifecycleController, LifecycleState, StartupHandle};
pub use queue::{BatchHandler, TaskQueue};
pub use registry::{BackendFactory, BackendOptions, BackendRegistry};
pub use source::StorageContentSource;
