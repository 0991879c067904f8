// crates/srg-retrieval/src/orchestrator.rs
// ============================================================================
// Module: Retrieval Orchestrator
// Description: Enforces connector allow-listing and default top-k before
//              delegating to a registered connector's `search`.
// Purpose: Single seam the pipeline calls for RAG retrieval.
// Dependencies: srg-core
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use srg_core::error::AppError;
use srg_core::model::DocumentChunk;

use crate::registry::ConnectorRegistry;

/// One retrieval request bound for a named connector.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query: String,
    pub connector: String,
    pub k: u32,
    pub filters: BTreeMap<String, String>,
}

/// Orchestrates connector allow-listing, default top-k, and dispatch.
pub struct RetrievalOrchestrator {
    default_k: u32,
}

impl RetrievalOrchestrator {
    /// Builds an orchestrator using `default_k` when a request's `k` is
    /// zero.
    #[must_use]
    pub const fn new(default_k: u32) -> Self {
        Self { default_k }
    }

    /// Resolves and queries the requested connector, honoring
    /// `allowed_connectors` (`None` permits any registered connector).
    ///
    /// # Errors
    /// Returns [`AppError::retrieval_forbidden`] if the connector is not in
    /// `allowed_connectors`, [`AppError::connector_not_found`] if it is not
    /// registered, or whatever the connector's `search` returns.
    pub async fn retrieve(
        &self,
        registry: &ConnectorRegistry,
        request: &RetrievalRequest,
        allowed_connectors: Option<&BTreeSet<String>>,
    ) -> Result<Vec<DocumentChunk>, AppError> {
        if let Some(allowed) = allowed_connectors {
            if !allowed.contains(&request.connector) {
                return Err(AppError::retrieval_forbidden());
            }
        }

        let connector = registry.get(&request.connector).ok_or_else(|| AppError::connector_not_found(&request.connector))?;
        let top_k = if request.k > 0 { request.k } else { self.default_k };
        connector.search(&request.query, &request.filters, top_k).await
    }
}

#[cfg(test)]
mod tests {
    use super::RetrievalOrchestrator;
    use super::RetrievalRequest;
    use crate::filesystem::FilesystemConnector;
    use crate::registry::ConnectorRegistry;
    use std::collections::BTreeMap;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn registry() -> ConnectorRegistry {
        let mut registry = ConnectorRegistry::new();
        registry.register("docs", Arc::new(FilesystemConnector::new("/tmp/does-not-exist.ndjson", "docs")));
        registry
    }

    #[tokio::test]
    async fn denies_connector_outside_allow_list() {
        let orchestrator = RetrievalOrchestrator::new(3);
        let request =
            RetrievalRequest { query: "q".to_string(), connector: "docs".to_string(), k: 0, filters: BTreeMap::new() };
        let allowed: BTreeSet<String> = ["other".to_string()].into_iter().collect();
        let result = orchestrator.retrieve(&registry(), &request, Some(&allowed)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unknown_connector_errors() {
        let orchestrator = RetrievalOrchestrator::new(3);
        let request =
            RetrievalRequest { query: "q".to_string(), connector: "missing".to_string(), k: 0, filters: BTreeMap::new() };
        let result = orchestrator.retrieve(&registry(), &request, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn zero_k_falls_back_to_default() {
        let orchestrator = RetrievalOrchestrator::new(5);
        let request =
            RetrievalRequest { query: "q".to_string(), connector: "docs".to_string(), k: 0, filters: BTreeMap::new() };
        let result = orchestrator.retrieve(&registry(), &request, None).await;
        assert!(result.is_ok());
    }
}
