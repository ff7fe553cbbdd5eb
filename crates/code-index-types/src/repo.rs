//! Repository metadata rows.
//!
//! These are the records the metadata store keeps about repositories and
//! about which of them the indexer has already processed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{IndexTask, RepoId};

/// Tables of the metadata store that the pipeline inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Repository metadata rows
    Repository,
    /// Per-repository indexer bookkeeping rows
    RepoIndexerStatus,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Repository => "repository",
            Table::RepoIndexerStatus => "repo_indexer_status",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of indexer a status row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexerKind {
    /// Full-text code search
    Code,
    /// Language statistics
    Stats,
}

impl IndexerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexerKind::Code => "code",
            IndexerKind::Stats => "stats",
        }
    }
}

impl std::fmt::Display for IndexerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A repository known to the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRecord {
    pub id: RepoId,
    pub owner: String,
    pub name: String,
    /// Working directory whose files get indexed
    pub path: String,
}

impl RepoRecord {
    pub fn new(
        id: RepoId,
        owner: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            id,
            owner: owner.into(),
            name: name.into(),
            path: path.into(),
        }
    }

    /// "owner/name"
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Marks a repository as indexed by one indexer kind.
///
/// Absence of a row means the repository still needs indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerStatus {
    pub repo_id: RepoId,
    pub kind: IndexerKind,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub indexed_at: DateTime<Utc>,
}

impl IndexerStatus {
    pub fn new(repo_id: RepoId, kind: IndexerKind) -> Self {
        Self {
            repo_id,
            kind,
            indexed_at: Utc::now(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A task that could not be applied, kept for a later retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub repo_id: RepoId,
    pub is_delete: bool,
    pub error: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub failed_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(task: IndexTask, error: impl Into<String>) -> Self {
        Self {
            repo_id: task.repo_id,
            is_delete: task.is_delete,
            error: error.into(),
            failed_at: Utc::now(),
        }
    }

    /// The task to replay for this failure.
    pub fn task(&self) -> IndexTask {
        IndexTask {
            repo_id: self.repo_id,
            is_delete: self.is_delete,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
