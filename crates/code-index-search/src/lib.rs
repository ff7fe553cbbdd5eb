//! # code-index-search
//!
//! Full-text code search for code-index using Tantivy.
//!
//! One document is stored per indexed file. Indexing a repository replaces
//! every document previously stored for it, so repeated index and delete
//! tasks converge on the state produced by the last one.
//!
//! ## Features
//! - [`SearchBackend`]: the Index/Delete/Search/Close capability the
//!   pipeline drives
//! - [`TantivyBackend`]: embedded Tantivy index with MmapDirectory persistence
//! - [`ContentSource`]: where the files of a repository come from
//! - Repository-scoped queries with pagination and snippet extraction

pub mod backend;
pub mod content;
pub mod document;
pub mod error;
pub mod index;
pub mod indexer;
pub mod schema;
pub mod searcher;

pub use backend::{SearchBackend, TantivyBackend};
pub use content::{is_indexable, ContentSource, RepoFile};
pub use document::file_to_doc;
pub use error::SearchError;
pub use index::{open_or_create_index, SearchIndex, SearchIndexConfig};
pub use indexer::RepoIndexWriter;
pub use schema::{build_code_schema, SearchSchema};
pub use searcher::{extract_snippet, CodeSearcher};
