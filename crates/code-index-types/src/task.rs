//! Index task type flowing through the work queue.
//!
//! Tasks are produced by repository mutations and by the backfill walk,
//! and consumed by the single indexing consumer.

use serde::{Deserialize, Serialize};

use crate::error::CodeIndexError;

/// Repository identifier as assigned by the metadata store.
pub type RepoId = i64;

/// A unit of indexing work for one repository.
///
/// Immutable once enqueued. Applying a task is idempotent: an index task
/// replaces everything stored for the repository, a delete task removes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexTask {
    /// Repository to (re)index or remove
    pub repo_id: RepoId,

    /// Remove the repository from the index instead of indexing it
    pub is_delete: bool,
}

impl IndexTask {
    /// Create a task that (re)indexes a repository.
    pub fn index(repo_id: RepoId) -> Self {
        Self {
            repo_id,
            is_delete: false,
        }
    }

    /// Create a task that removes a repository from the index.
    pub fn delete(repo_id: RepoId) -> Self {
        Self {
            repo_id,
            is_delete: true,
        }
    }

    /// Repository ids start at 1; anything else is a malformed task.
    pub fn is_valid(&self) -> bool {
        self.repo_id > 0
    }

    /// Check the task is well formed.
    pub fn validate(&self) -> Result<(), CodeIndexError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(CodeIndexError::InvalidInput(format!(
                "repository id must be positive, got {}",
                self.repo_id
            )))
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl std::fmt::Display for IndexTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_delete {
            write!(f, "delete({})", self.repo_id)
        } else {
            write!(f, "index({})", self.repo_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        assert_eq!(
            IndexTask::index(7),
            IndexTask {
                repo_id: 7,
                is_delete: false
            }
        );
        assert!(IndexTask::delete(7).is_delete);
    }

    #[test]
    fn test_validate() {
        assert!(IndexTask::index(1).validate().is_ok());
        assert!(IndexTask::index(0).validate().is_err());
        assert!(!IndexTask::delete(-3).is_valid());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(IndexTask::from_bytes(b"not json").is_err());
        assert!(IndexTask::from_bytes(br#"{"repo_id":"x","is_delete":false}"#).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(IndexTask::index(3).to_string(), "index(3)");
        assert_eq!(IndexTask::delete(3).to_string(), "delete(3)");
    }
}
