//! Running synchronous storage and backend calls from async code.

use crate::error::IndexerError;

/// Run `f` on the blocking pool and flatten its result.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, IndexerError>
where
    F: FnOnce() -> Result<T, IndexerError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
