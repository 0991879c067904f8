// crates/srg-retrieval/src/registry.rs
// ============================================================================
// Module: Connector Registry
// Description: Name-keyed registry of retrieval connectors.
// Purpose: Let the orchestrator look up a connector by name without knowing
//          its concrete type.
// Dependencies: srg-core
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use srg_core::traits::Connector;

/// Registry of named retrieval connectors.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: BTreeMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connector under `name`, replacing any prior entry.
    pub fn register(&mut self, name: impl Into<String>, connector: Arc<dyn Connector>) {
        self.connectors.insert(name.into(), connector);
    }

    /// Looks up a connector by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(name).cloned()
    }

    /// Lists registered connector names in sorted order.
    #[must_use]
    pub fn list_names(&self) -> Vec<String> {
        self.connectors.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectorRegistry;
    use crate::filesystem::FilesystemConnector;
    use std::sync::Arc;

    #[test]
    fn lists_registered_names_sorted() {
        let mut registry = ConnectorRegistry::new();
        registry.register("zeta", Arc::new(FilesystemConnector::new("/tmp/zeta.ndjson", "zeta")));
        registry.register("alpha", Arc::new(FilesystemConnector::new("/tmp/alpha.ndjson", "alpha")));
        assert_eq!(registry.list_names(), vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
