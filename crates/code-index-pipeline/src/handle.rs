//! Holder of the single active search backend.
//!
//! The handle starts `Unset`, becomes `Ready` at most once and ends
//! `Closed`. Nothing leaves `Closed`, so a backend that finishes opening
//! after shutdown or after the startup timeout is closed instead of served.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use code_index_search::SearchBackend;

use crate::error::IndexerError;

/// Observable state of an [`IndexerHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    Unset,
    Ready,
    Closed,
}

enum Slot {
    Unset,
    Ready(Arc<dyn SearchBackend>),
    Closed,
}

/// Concurrency-safe holder for the active search backend.
pub struct IndexerHandle {
    slot: RwLock<Slot>,
}

impl Default for IndexerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexerHandle {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Slot::Unset),
        }
    }

    // The slot is replaced wholesale, so a poisoned lock still holds a
    // consistent value.
    fn read(&self) -> RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(|e| e.into_inner())
    }

    /// The active backend, or `None` if it is not ready. Never waits.
    pub fn get(&self) -> Option<Arc<dyn SearchBackend>> {
        match &*self.read() {
            Slot::Ready(backend) => Some(backend.clone()),
            Slot::Unset | Slot::Closed => None,
        }
    }

    /// Install the backend.
    ///
    /// On a closed handle the backend is closed right away and
    /// [`IndexerError::Closed`] is returned.
    pub fn set(&self, backend: Arc<dyn SearchBackend>) -> Result<(), IndexerError> {
        let mut slot = self.write();
        match *slot {
            Slot::Unset => {
                *slot = Slot::Ready(backend);
                debug!("Indexer backend installed");
                return Ok(());
            }
            Slot::Ready(_) => return Err(IndexerError::AlreadySet),
            Slot::Closed => {}
        }
        drop(slot);

        info!("Indexer already closed, closing late backend");
        if let Err(e) = backend.close() {
            warn!(error = %e, "Failed to close late backend");
        }
        Err(IndexerError::Closed)
    }

    /// Close the handle, releasing the backend if one was installed.
    ///
    /// Idempotent. Returns true for the call that performed the transition.
    pub fn close(&self) -> bool {
        let previous = std::mem::replace(&mut *self.write(), Slot::Closed);
        match previous {
            Slot::Ready(backend) => {
                if let Err(e) = backend.close() {
                    warn!(error = %e, "Failed to close indexer backend");
                }
                info!("Indexer closed");
                true
            }
            Slot::Unset => {
                info!("Indexer closed before it was ready");
                true
            }
            Slot::Closed => false,
        }
    }

    pub fn status(&self) -> HandleStatus {
        match &*self.read() {
            Slot::Unset => HandleStatus::Unset,
            Slot::Ready(_) => HandleStatus::Ready,
            Slot::Closed => HandleStatus::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockBackend;

    #[test]
    fn test_get_before_set() {
        let handle = IndexerHandle::new();
        assert!(handle.get().is_none());
        assert_eq!(handle.status(), HandleStatus::Unset);
    }

    #[test]
    fn test_set_then_get_same_backend() {
        let handle = IndexerHandle::new();
        let backend = Arc::new(MockBackend::default());
        handle.set(backend.clone()).unwrap();

        assert_eq!(handle.status(), HandleStatus::Ready);
        handle.get().unwrap().index(5).unwrap();
        handle.get().unwrap().index(6).unwrap();
        assert_eq!(backend.indexed_repos(), vec![5, 6]);
    }

    #[test]
    fn test_second_set_rejected() {
        let handle = IndexerHandle::new();
        handle.set(Arc::new(MockBackend::default())).unwrap();
        let second = Arc::new(MockBackend::default());

        assert!(matches!(
            handle.set(second.clone()),
            Err(IndexerError::AlreadySet)
        ));
        assert_eq!(second.close_count(), 0);
    }

    #[test]
    fn test_set_after_close_closes_backend() {
        let handle = IndexerHandle::new();
        assert!(handle.close());

        let late = Arc::new(MockBackend::default());
        assert!(matches!(handle.set(late.clone()), Err(IndexerError::Closed)));
        assert_eq!(late.close_count(), 1);
        assert!(handle.get().is_none());
        assert_eq!(handle.status(), HandleStatus::Closed);
    }

    #[test]
    fn test_close_is_idempotent() {
        let handle = IndexerHandle::new();
        let backend = Arc::new(MockBackend::default());
        handle.set(backend.clone()).unwrap();

        assert!(handle.close());
        assert!(!handle.close());
        assert!(handle.get().is_none());
        assert_eq!(backend.close_count(), 1);
    }

    #[test]
    fn test_concurrent_close_releases_once() {
        let handle = Arc::new(IndexerHandle::new());
        let backend = Arc::new(MockBackend::default());
        handle.set(backend.clone()).unwrap();

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                std::thread::spawn(move || handle.close())
            })
            .collect();
        let closed: usize = threads
            .into_iter()
            .map(|t| t.join().unwrap() as usize)
            .sum();

        assert_eq!(closed, 1);
        assert_eq!(backend.close_count(), 1);
    }
}
