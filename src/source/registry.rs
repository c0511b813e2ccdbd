//! In-memory registry of known sources.
//!
//! The registry is not synchronized on its own; the coordinator keeps it
//! behind its state lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::adapter::{SourceAdapter, SourceConfig};

/// Whether a registration added a new source or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Identifier was not known before.
    Added,
    /// Identifier existed and its adapter was replaced.
    Replaced,
}

/// Mapping from source identifier to adapter. Identifiers are unique.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or re-registers) a source built from `config`.
    pub fn register(&mut self, config: SourceConfig) -> Registration {
        let adapter = config.build_adapter();
        match self.sources.insert(config.identifier, adapter) {
            Some(_) => Registration::Replaced,
            None => Registration::Added,
        }
    }

    /// Adapter of a registered source.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<&Arc<dyn SourceAdapter>> {
        self.sources.get(identifier)
    }

    /// Returns true if the identifier is registered.
    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.sources.contains_key(identifier)
    }

    /// Registered identifiers in sorted order.
    #[must_use]
    pub fn identifiers(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }
}
