//! Column family definitions for RocksDB.
//!
//! Each column family isolates data with different access patterns:
//! - repositories: repository metadata rows keyed by id
//! - repo_indexer_status: which repositories each indexer kind has processed
//! - index_queue: journal of pending index tasks (FIFO compaction)
//! - index_failures: dead-lettered tasks awaiting a retry
//! - indexer_meta: small flags that must survive a restart

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for repository metadata
pub const CF_REPOSITORIES: &str = "repositories";

/// Column family name for indexer bookkeeping rows
pub const CF_REPO_INDEXER_STATUS: &str = "repo_indexer_status";

/// Column family name for the persistent queue journal
pub const CF_INDEX_QUEUE: &str = "index_queue";

/// Column family name for dead-lettered tasks
pub const CF_INDEX_FAILURES: &str = "index_failures";

/// Column family name for indexer flags
pub const CF_INDEXER_META: &str = "indexer_meta";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[
    CF_REPOSITORIES,
    CF_REPO_INDEXER_STATUS,
    CF_INDEX_QUEUE,
    CF_INDEX_FAILURES,
    CF_INDEXER_META,
];

/// Queue journal rows are written once and deleted soon after
fn queue_options() -> Options {
    let mut opts = Options::default();
    opts.set_compaction_style(rocksdb::DBCompactionStyle::Fifo);
    opts.set_fifo_compaction_options(&rocksdb::FifoCompactOptions::default());
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_REPOSITORIES, Options::default()),
        ColumnFamilyDescriptor::new(CF_REPO_INDEXER_STATUS, Options::default()),
        ColumnFamilyDescriptor::new(CF_INDEX_QUEUE, queue_options()),
        ColumnFamilyDescriptor::new(CF_INDEX_FAILURES, Options::default()),
        ColumnFamilyDescriptor::new(CF_INDEXER_META, Options::default()),
    ]
}
