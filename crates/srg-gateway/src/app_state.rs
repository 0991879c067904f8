// crates/srg-gateway/src/app_state.rs
// ============================================================================
// Module: Application State
// Description: The collaborators the pipeline and route handlers share,
//              wired up once at startup behind trait objects.
// Purpose: Keep every handler free of concrete-backend knowledge; only
//          `srg-cli`'s startup code knows which implementations are behind
//          these `Arc<dyn Trait>`s.
// Dependencies: srg-core, srg-config, srg-providers, srg-retrieval,
//               srg-redaction, srg-tracing
// ============================================================================

//! ## Overview
//! One [`AppState`] is built at startup and shared behind an `Arc` across
//! every axum handler. It never holds a mutex across a suspension point —
//! each collaborator manages its own internal locking.

use std::collections::BTreeSet;
use std::sync::Arc;

use srg_config::ContractSchemas;
use srg_config::GatewayConfig;
use srg_core::model::PolicyMode;
use srg_core::traits::AuditSink;
use srg_core::traits::BudgetTracker;
use srg_core::traits::PolicyClient;
use srg_core::traits::WebhookSink;
use srg_providers::ProviderRegistry;
use srg_redaction::RedactionEngine;
use srg_retrieval::ConnectorRegistry;
use srg_retrieval::RetrievalOrchestrator;
use srg_tracing::SpanCollector;

/// Every collaborator the pipeline orchestrator calls out to, plus the
/// resolved startup configuration.
pub struct AppState {
    /// Resolved environment configuration.
    pub config: GatewayConfig,
    /// Compiled contract schemas (loaded once at startup).
    pub schemas: ContractSchemas,
    /// Policy engine: in-process or remote OPA-shaped.
    pub policy: Arc<dyn PolicyClient>,
    /// Enforcement mode applied to policy timeouts/contract failures.
    pub policy_mode: PolicyMode,
    /// Fixed redaction pattern engine; stateless.
    pub redaction: RedactionEngine,
    /// Retrieval orchestrator: allow-listing, default top-k, dispatch.
    pub retrieval: RetrievalOrchestrator,
    /// Registered retrieval connectors.
    pub connectors: ConnectorRegistry,
    /// Connectors permitted absent a policy-supplied allow-list.
    pub default_allowed_connectors: BTreeSet<String>,
    /// Registered chat/embeddings providers with fallback metadata.
    pub providers: ProviderRegistry,
    /// Provider name tried first, absent a policy override.
    pub default_provider: String,
    /// Upstream statuses that trigger a fallback attempt.
    pub retryable_statuses: Vec<u16>,
    /// Sliding-window token budget tracker, if enabled.
    pub budget: Option<Arc<dyn BudgetTracker>>,
    /// Hash-chained audit sink. Always present: every accepted or rejected
    /// request produces exactly one audit line.
    pub audit: Arc<dyn AuditSink>,
    /// Webhook dispatcher, if configured.
    pub webhook: Option<Arc<dyn WebhookSink>>,
    /// Span collector, if tracing is enabled.
    pub tracing: Option<Arc<SpanCollector>>,
}

impl AppState {
    /// True when the caller's classification requires redaction and the
    /// engine is enabled.
    #[must_use]
    pub fn redaction_active(&self, classification: srg_core::model::Classification) -> bool {
        self.config.redaction_enabled && classification.requires_redaction()
    }
}
