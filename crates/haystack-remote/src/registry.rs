//! Backend registry
//!
//! Maps a backend kind to the maker that builds its clients.

use crate::client::{RemoteConf, RemoteStorageClient, RemoteStorageMaker};
use crate::memory::MemoryRemoteStorageMaker;
use haystack_common::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Resolves a [`RemoteConf`] to a client for its backend
#[derive(Clone, Default)]
pub struct RemoteStorageRegistry {
    makers: HashMap<String, Arc<dyn RemoteStorageMaker>>,
}

impl RemoteStorageRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(MemoryRemoteStorageMaker::default());
        registry
    }

    /// Register a maker, replacing any maker for the same kind
    pub fn register<M: RemoteStorageMaker + 'static>(&mut self, maker: M) -> &mut Self {
        self.register_arc(Arc::new(maker))
    }

    /// Register a maker wrapped in Arc
    pub fn register_arc(&mut self, maker: Arc<dyn RemoteStorageMaker>) -> &mut Self {
        self.makers.insert(maker.kind().to_string(), maker);
        self
    }

    /// Registered backend kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<_> = self.makers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Build a client for `conf`
    ///
    /// Unknown kinds fail with `UnsupportedBackend` without contacting
    /// anything.
    pub fn make_client(&self, conf: &RemoteConf) -> Result<Arc<dyn RemoteStorageClient>> {
        let maker = self
            .makers
            .get(&conf.kind)
            .ok_or_else(|| Error::UnsupportedBackend(conf.kind.clone()))?;
        debug!("Using remote storage backend {} for {}", conf.kind, conf.name);
        maker.make(conf)
    }
}

impl std::fmt::Debug for RemoteStorageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStorageRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MEMORY_KIND, MemoryRemoteStorage};

    #[test]
    fn test_defaults_include_memory() {
        let registry = RemoteStorageRegistry::with_defaults();
        assert_eq!(registry.kinds(), vec![MEMORY_KIND]);
        assert!(
            registry
                .make_client(&RemoteConf::new(MEMORY_KIND, "dev"))
                .is_ok()
        );
    }

    #[test]
    fn test_unknown_kind_is_unsupported() {
        let registry = RemoteStorageRegistry::with_defaults();
        let err = registry
            .make_client(&RemoteConf::new("tape", "archive"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnsupportedBackend(kind) if kind == "tape"));
    }

    #[test]
    fn test_register_replaces_same_kind() {
        let mut registry = RemoteStorageRegistry::new();
        registry.register(MemoryRemoteStorageMaker::default());
        registry.register(
            MemoryRemoteStorageMaker::new(MemoryRemoteStorage::new()).with_credentials("a", "b"),
        );
        assert_eq!(registry.kinds().len(), 1);

        let err = registry
            .make_client(&RemoteConf::new(MEMORY_KIND, "dev"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Authentication(_)));
    }
}
