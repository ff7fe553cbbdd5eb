//! Key encoding and decoding for storage layer.
//!
//! Numeric parts are zero-padded to 20 digits so lexicographic RocksDB order
//! matches numeric order. Repository ids are positive, so the padded form
//! never needs a sign.

use code_index_types::{IndexerKind, RepoId};

use crate::error::StorageError;

const ID_WIDTH: usize = 20;

fn parse_number<T: std::str::FromStr>(part: &str, what: &str) -> Result<T, StorageError>
where
    T::Err: std::fmt::Display,
{
    part.parse()
        .map_err(|e| StorageError::Key(format!("Invalid {}: {}", what, e)))
}

fn key_str(bytes: &[u8]) -> Result<&str, StorageError> {
    std::str::from_utf8(bytes).map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))
}

/// Key for repository metadata rows
/// Format: repo:{id:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepoKey {
    pub repo_id: RepoId,
}

impl RepoKey {
    pub const PREFIX: &'static str = "repo:";

    pub fn new(repo_id: RepoId) -> Self {
        Self { repo_id }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}{:0width$}", Self::PREFIX, self.repo_id, width = ID_WIDTH).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = key_str(bytes)?;
        let id = s
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| StorageError::Key(format!("Invalid repository key format: {}", s)))?;
        Ok(Self::new(parse_number(id, "repository id")?))
    }
}

/// Key for indexer status rows
/// Format: status:{kind}:{id:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusKey {
    pub kind: IndexerKind,
    pub repo_id: RepoId,
}

impl StatusKey {
    pub fn new(kind: IndexerKind, repo_id: RepoId) -> Self {
        Self { kind, repo_id }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "status:{}:{:0width$}",
            self.kind,
            self.repo_id,
            width = ID_WIDTH
        )
        .into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = key_str(bytes)?;
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts[0] != "status" {
            return Err(StorageError::Key(format!("Invalid status key format: {}", s)));
        }
        let kind = match parts[1] {
            "code" => IndexerKind::Code,
            "stats" => IndexerKind::Stats,
            other => return Err(StorageError::Key(format!("Unknown indexer kind: {}", other))),
        };
        Ok(Self::new(kind, parse_number(parts[2], "repository id")?))
    }
}

/// Key for persistent queue journal entries
/// Format: queue:{sequence:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueKey {
    /// Monotonic sequence number
    pub sequence: u64,
}

impl QueueKey {
    pub fn new(sequence: u64) -> Self {
        Self { sequence }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("queue:{:0width$}", self.sequence, width = ID_WIDTH).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = key_str(bytes)?;
        let seq = s
            .strip_prefix("queue:")
            .ok_or_else(|| StorageError::Key(format!("Invalid queue key format: {}", s)))?;
        Ok(Self::new(parse_number(seq, "sequence")?))
    }
}

/// Key for dead-lettered tasks, one per repository
/// Format: failure:{id:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureKey {
    pub repo_id: RepoId,
}

impl FailureKey {
    pub fn new(repo_id: RepoId) -> Self {
        Self { repo_id }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("failure:{:0width$}", self.repo_id, width = ID_WIDTH).into_bytes()
    }
}
