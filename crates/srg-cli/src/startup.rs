// crates/srg-cli/src/startup.rs
// ============================================================================
// Module: Application Startup
// Description: Resolves a loaded `GatewayConfig` into a fully wired
//              `AppState`, choosing one concrete backend per trait seam.
// Purpose: Keep every choice of concrete backend in one place; nothing
//          downstream of `AppState` knows these decisions were made.
// Dependencies: srg-config, srg-gateway, srg-providers, srg-retrieval,
//               srg-policy, srg-budget, srg-audit, srg-webhook, srg-tracing
// ============================================================================

//! ## Overview
//! [`build_app_state`] mirrors the reference deployment's wiring: an
//! in-process policy decider unless `SRG_OPA_URL` is set, a `stub` chat
//! provider unless `SRG_PROVIDER_NAME` names something else, a single
//! filesystem retrieval connector, an in-memory or Redis budget tracker
//! gated on `SRG_BUDGET_ENABLED`, an always-present audit writer, and
//! webhook dispatch/tracing export gated on their own enabled flags.

use std::collections::BTreeSet;
use std::sync::Arc;

use srg_config::ContractSchemas;
use srg_config::GatewayConfig;
use srg_core::model::PolicyMode;
use srg_core::traits::AuditSink;
use srg_core::traits::BudgetTracker;
use srg_core::traits::DeadLetterStore;
use srg_core::traits::PolicyClient;
use srg_core::traits::TraceExporter;
use srg_core::traits::WebhookSink;
use srg_gateway::AppState;
use srg_providers::HttpChatProvider;
use srg_providers::HttpChatProviderConfig;
use srg_providers::ProviderCapabilities;
use srg_providers::ProviderCost;
use srg_providers::ProviderEntry;
use srg_providers::ProviderRegistry;
use srg_providers::StubProvider;
use srg_providers::DEFAULT_RETRYABLE_STATUSES;
use srg_redaction::RedactionEngine;
use srg_retrieval::ConnectorRegistry;
use srg_retrieval::FilesystemConnector;
use srg_retrieval::RetrievalOrchestrator;
use srg_tracing::HttpTraceExporter;
use srg_tracing::LoggingTraceExporter;
use srg_tracing::SpanCollector;
use srg_webhook::JsonlDeadLetterStore;
use srg_webhook::RetryPolicy;
use srg_webhook::SqliteDeadLetterStore;
use srg_webhook::WebhookDispatcher;
use srg_webhook::WebhookEndpoint;

/// A constant embedding dimension used by the deterministic stub provider.
/// Arbitrary; chosen to be large enough to exercise cosine-similarity
/// scoring in tests without inflating fixture sizes.
const STUB_EMBEDDING_DIM: usize = 16;

/// A stub fallback is always registered behind any HTTP-backed primary
/// provider so fallback routing has somewhere retryable to land, since the
/// stub provider never itself fails.
const STUB_FALLBACK_NAME: &str = "stub-fallback";

/// Failure building one piece of startup wiring.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// A provider's `SRG_PROVIDER_CONFIG` JSON blob was missing a required
    /// field or the provider itself rejected its configuration.
    #[error("provider configuration invalid: {0}")]
    ProviderConfig(String),
    /// The Redis budget backend could not be reached.
    #[error("budget backend unavailable: {0}")]
    Budget(String),
    /// The sqlite dead-letter store could not be opened.
    #[error("dead-letter store unavailable: {0}")]
    DeadLetter(String),
    /// A contract schema failed to load or compile.
    #[error(transparent)]
    Schema(#[from] srg_config::SchemaError),
}

/// Builds the fully wired [`AppState`] described by `config`.
///
/// Contract schemas are compiled twice: once for the audit writer's own
/// copy (consumed by value) and once for [`AppState::schemas`], since
/// [`jsonschema::Validator`] does not implement `Clone`.
///
/// # Errors
/// Returns [`StartupError`] if any configured backend fails to construct
/// (malformed provider JSON, an unreachable Redis/sqlite backend, an
/// uncompilable contract schema).
pub fn build_app_state(config: GatewayConfig) -> Result<AppState, StartupError> {
    let audit_schemas = ContractSchemas::load(&config.contracts_dir)?;
    let schemas = ContractSchemas::load(&config.contracts_dir)?;
    let policy_mode = resolve_policy_mode(&config.policy.mode);
    let policy_bundle_text = format!("{}:{}", config.policy.mode, config.contracts_dir.display());
    let default_allowed_connectors: BTreeSet<String> = config.rag.allowed_connectors.iter().cloned().collect();

    let policy: Arc<dyn PolicyClient> = match &config.policy.opa_url {
        Some(opa_url) => Arc::new(srg_policy::RemotePolicyClient::new(opa_url.clone(), config.policy.timeout_ms, &policy_bundle_text)),
        None => Arc::new(srg_policy::InProcessPolicyClient::new(default_allowed_connectors.clone(), &policy_bundle_text)),
    };

    let providers = build_provider_registry(&config)?;

    let mut connectors = ConnectorRegistry::new();
    if config.rag.enabled {
        for name in &config.rag.allowed_connectors {
            connectors.register(name.clone(), Arc::new(FilesystemConnector::new(config.rag.filesystem_index_path.clone(), name.clone())));
        }
    }

    let budget: Option<Arc<dyn BudgetTracker>> = if config.budget.enabled {
        Some(build_budget_tracker(&config)?)
    } else {
        None
    };

    let audit: Arc<dyn AuditSink> = Arc::new(srg_audit::FileAuditWriter::new(config.audit.log_path.clone(), audit_schemas.audit_event));

    let webhook: Option<Arc<dyn WebhookSink>> = if config.webhook.enabled {
        Some(build_webhook_dispatcher(&config)?)
    } else {
        None
    };

    let tracing = if config.tracing.enabled {
        Some(Arc::new(build_span_collector(&config)))
    } else {
        None
    };

    Ok(AppState {
        default_provider: config.provider.name.clone(),
        retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        config,
        schemas,
        policy,
        policy_mode,
        redaction: RedactionEngine::new(),
        retrieval: RetrievalOrchestrator::new(config.rag.default_top_k),
        connectors,
        default_allowed_connectors,
        providers,
        budget,
        audit,
        webhook,
        tracing,
    })
}

/// Maps the `SRG_OPA_MODE` string onto [`PolicyMode`], defaulting to
/// enforce for any value other than `"observe"`.
fn resolve_policy_mode(mode: &str) -> PolicyMode {
    if mode.eq_ignore_ascii_case("observe") {
        PolicyMode::Observe
    } else {
        PolicyMode::Enforce
    }
}

/// Registers the configured primary provider, plus a stub fallback when
/// fallback is enabled for a non-stub primary.
fn build_provider_registry(config: &GatewayConfig) -> Result<ProviderRegistry, StartupError> {
    let mut registry = ProviderRegistry::new();

    if config.provider.name == "stub" {
        registry.register(ProviderEntry {
            name: "stub".to_string(),
            provider: Arc::new(StubProvider::new(STUB_EMBEDDING_DIM)),
            cost: ProviderCost::default(),
            priority: 0,
            enabled: true,
            capabilities: ProviderCapabilities::default(),
        });
        return Ok(registry);
    }

    let http_config = parse_http_provider_config(&config.provider.config_json)?;
    let provider = HttpChatProvider::new(http_config).map_err(|err| StartupError::ProviderConfig(err.to_string()))?;
    registry.register(ProviderEntry {
        name: config.provider.name.clone(),
        provider: Arc::new(provider),
        cost: ProviderCost::default(),
        priority: 0,
        enabled: true,
        capabilities: ProviderCapabilities::default(),
    });

    if config.provider.fallback_enabled {
        registry.register(ProviderEntry {
            name: STUB_FALLBACK_NAME.to_string(),
            provider: Arc::new(StubProvider::new(STUB_EMBEDDING_DIM)),
            cost: ProviderCost::default(),
            priority: 10,
            enabled: true,
            capabilities: ProviderCapabilities::default(),
        });
    }

    Ok(registry)
}

/// Parses `SRG_PROVIDER_CONFIG`'s JSON blob into an
/// [`HttpChatProviderConfig`]. An empty blob parses as an empty object,
/// so only a non-default `base_url` is strictly required.
fn parse_http_provider_config(raw: &str) -> Result<HttpChatProviderConfig, StartupError> {
    let parsed: serde_json::Value = if raw.trim().is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(raw).map_err(|err| StartupError::ProviderConfig(err.to_string()))?
    };

    let base_url = parsed
        .get("base_url")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| StartupError::ProviderConfig("missing base_url".to_string()))?
        .to_string();
    let api_key = parsed.get("api_key").and_then(serde_json::Value::as_str).unwrap_or_default().to_string();
    let timeout_s = parsed.get("timeout_s").and_then(serde_json::Value::as_f64).unwrap_or(30.0);
    let allow_http = parsed.get("allow_http").and_then(serde_json::Value::as_bool).unwrap_or(false);

    Ok(HttpChatProviderConfig { base_url, api_key, timeout: std::time::Duration::from_secs_f64(timeout_s), allow_http })
}

/// Builds the budget tracker named by `SRG_BUDGET_BACKEND`.
fn build_budget_tracker(config: &GatewayConfig) -> Result<Arc<dyn BudgetTracker>, StartupError> {
    let budget = &config.budget;
    if budget.backend == "redis" {
        let redis_url = budget.redis_url.clone().ok_or_else(|| StartupError::Budget("SRG_BUDGET_REDIS_URL not set".to_string()))?;
        let tracker = srg_budget::RedisBudgetTracker::new(
            &redis_url,
            budget.redis_prefix.clone(),
            budget.default_ceiling,
            budget.window_seconds,
            budget.tenant_ceilings.clone(),
        )
        .map_err(|err| StartupError::Budget(err.0))?;
        Ok(Arc::new(tracker))
    } else {
        Ok(Arc::new(srg_budget::InMemoryBudgetTracker::new(budget.default_ceiling, budget.window_seconds, budget.tenant_ceilings.clone())))
    }
}

/// Builds a dispatcher over every configured endpoint, backed by the
/// configured dead-letter store.
fn build_webhook_dispatcher(config: &GatewayConfig) -> Result<Arc<dyn WebhookSink>, StartupError> {
    let webhook = &config.webhook;
    let endpoints: Vec<WebhookEndpoint> = webhook
        .endpoints
        .iter()
        .map(|url| WebhookEndpoint { url: url.clone(), secret: String::new(), event_types: Vec::new(), enabled: true })
        .collect();

    let dead_letter: Option<Arc<dyn DeadLetterStore>> = build_dead_letter_store(config)?;

    let retry_policy = RetryPolicy {
        max_attempts: webhook.max_retries,
        backoff_base: std::time::Duration::from_secs_f64(webhook.backoff_base_s),
        backoff_max: std::time::Duration::from_secs_f64(webhook.backoff_max_s),
    };

    Ok(Arc::new(WebhookDispatcher::new(endpoints, std::time::Duration::from_secs_f64(webhook.timeout_s), retry_policy, dead_letter)))
}

/// Builds the dead-letter store named by `SRG_WEBHOOK_DEAD_LETTER_BACKEND`,
/// returning `None` only when no path is configured at all.
pub fn build_dead_letter_store(config: &GatewayConfig) -> Result<Option<Arc<dyn DeadLetterStore>>, StartupError> {
    let webhook = &config.webhook;
    let Some(path) = &webhook.dead_letter_path else {
        return Ok(None);
    };

    if webhook.dead_letter_backend == "jsonl" {
        Ok(Some(Arc::new(JsonlDeadLetterStore::new(path.clone(), Some(webhook.dead_letter_retention_days)))))
    } else {
        let store = SqliteDeadLetterStore::open(path.clone(), Some(webhook.dead_letter_retention_days))
            .map_err(|err| StartupError::DeadLetter(err.to_string()))?;
        Ok(Some(Arc::new(store)))
    }
}

/// Builds a span collector exporting over OTLP/HTTP when configured, or
/// logging spans locally otherwise.
fn build_span_collector(config: &GatewayConfig) -> SpanCollector {
    let tracing = &config.tracing;
    if tracing.otlp_enabled {
        if let Some(endpoint) = &tracing.otlp_endpoint {
            let exporter: Arc<dyn TraceExporter> =
                Arc::new(HttpTraceExporter::new(endpoint.clone(), std::time::Duration::from_secs_f64(tracing.otlp_timeout_s)));
            return SpanCollector::with_exporter(tracing.max_traces, exporter);
        }
    }
    SpanCollector::with_exporter(tracing.max_traces, Arc::new(LoggingTraceExporter))
}
