//! Search backends selectable by name.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use code_index_search::{ContentSource, SearchBackend, SearchIndexConfig, TantivyBackend};

use crate::error::IndexerError;

/// Name of the built-in Tantivy backend
pub const TANTIVY_BACKEND: &str = "tantivy";

/// Everything a factory needs to open a backend.
#[derive(Clone)]
pub struct BackendOptions {
    /// Directory holding the backend's files
    pub path: PathBuf,
    /// Files larger than this are not indexed
    pub max_file_size: u64,
    pub source: Arc<dyn ContentSource>,
}

/// Opens or creates a backend. The flag is true when it was created.
///
/// Factories run on the blocking pool.
pub type BackendFactory = Arc<
    dyn Fn(&BackendOptions) -> Result<(Arc<dyn SearchBackend>, bool), IndexerError> + Send + Sync,
>;

/// Registry of backend factories keyed by name.
#[derive(Clone)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with the built-in backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(TANTIVY_BACKEND, Arc::new(open_tantivy));
        registry
    }

    /// Register a factory, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Open the backend registered under `name`.
    pub fn open(
        &self,
        name: &str,
        options: &BackendOptions,
    ) -> Result<(Arc<dyn SearchBackend>, bool), IndexerError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| IndexerError::UnknownBackend(name.to_string()))?;
        factory(options)
    }
}

fn open_tantivy(options: &BackendOptions) -> Result<(Arc<dyn SearchBackend>, bool), IndexerError> {
    let config =
        SearchIndexConfig::new(&options.path).with_max_file_size(options.max_file_size);
    let (backend, created) = TantivyBackend::open_or_create(config, options.source.clone())?;
    Ok((Arc::new(backend), created))
}
