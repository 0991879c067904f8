// system-tests/tests/helpers/harness.rs
// ============================================================================
// Module: Gateway Test Harness
// Description: Hand-wires a `GatewayConfig`/`AppState` per scenario and
//              serves it over a real loopback listener.
// Purpose: Let every scenario test drive the gateway exactly as a client
//          would, over HTTP, without going through `srg-cli`'s env-driven
//          startup path.
// Dependencies: axum-server, tokio, srg-config, srg-gateway, srg-providers
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "test-only harness code favors explicit panics over propagating setup failures"
)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::time::Duration;

use srg_config::AuditConfig;
use srg_config::BudgetConfig;
use srg_config::ContractSchemas;
use srg_config::GatewayConfig;
use srg_config::PolicyConfig;
use srg_config::ProviderConfig;
use srg_config::RagConfig;
use srg_config::TracingConfig;
use srg_config::WebhookConfig;
use srg_core::model::PolicyMode;
use srg_core::traits::AuditSink;
use srg_core::traits::BudgetTracker;
use srg_core::traits::PolicyClient;
use srg_gateway::AppState;
use srg_providers::ProviderCapabilities;
use srg_providers::ProviderCost;
use srg_providers::ProviderEntry;
use srg_providers::ProviderRegistry;
use srg_providers::StubProvider;
use srg_providers::DEFAULT_RETRYABLE_STATUSES;
use srg_redaction::RedactionEngine;
use srg_retrieval::ConnectorRegistry;
use srg_retrieval::RetrievalOrchestrator;

/// Bearer token every scenario test authenticates with.
pub const TEST_API_KEY: &str = "test-key";

/// Embedding dimension for every stub provider a scenario registers.
const STUB_EMBEDDING_DIM: usize = 16;

/// Process-wide table of ports reserved by [`allocate_bind_addr`] but not
/// yet released back for the real server to bind.
fn reservations() -> &'static Mutex<HashMap<u16, TcpListener>> {
    static RESERVED: OnceLock<Mutex<HashMap<u16, TcpListener>>> = OnceLock::new();
    RESERVED.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Reserves an ephemeral loopback port by actually binding it, so two
/// concurrently-starting scenario tests never race onto the same port.
fn allocate_bind_addr() -> (SocketAddr, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind an ephemeral loopback port");
    let addr = listener.local_addr().expect("listener has a local address");
    let port = addr.port();
    reservations().lock().expect("reservations lock poisoned").insert(port, listener);
    (addr, port)
}

/// Releases a previously reserved port immediately before the real server
/// binds it, keeping the race window as small as possible.
fn release_bind_addr(port: u16) {
    reservations().lock().expect("reservations lock poisoned").remove(&port);
}

/// A running gateway instance plus the means to reach and stop it.
pub struct GatewayServerHandle {
    /// `http://127.0.0.1:<port>` the gateway is listening on.
    pub base_url: String,
    join: tokio::task::JoinHandle<()>,
}

impl GatewayServerHandle {
    /// Builds a plain `reqwest::Client` suitable for talking to this server.
    #[must_use]
    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::new()
    }

    /// A request builder pre-bound to `path` under this server's base URL.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Standard authenticated request headers for the given principal.
    #[must_use]
    pub fn auth_headers(tenant_id: &str, user_id: &str, classification: &str) -> Vec<(&'static str, String)> {
        vec![
            ("authorization", format!("Bearer {TEST_API_KEY}")),
            ("x-srg-tenant-id", tenant_id.to_string()),
            ("x-srg-user-id", user_id.to_string()),
            ("x-srg-classification", classification.to_string()),
        ]
    }

    /// Aborts the server task. The bound listener is dropped with it.
    pub async fn shutdown(self) {
        self.join.abort();
        let _ = self.join.await;
    }
}

/// Spawns `state` behind a real `axum-server` listener and waits briefly
/// for it to start accepting connections.
pub async fn spawn_gateway(state: AppState) -> GatewayServerHandle {
    let (addr, port) = allocate_bind_addr();
    release_bind_addr(port);

    let router = srg_gateway::build_router(Arc::new(state));
    let join = tokio::spawn(async move {
        let _ = axum_server::bind(addr).serve(router.into_make_service()).await;
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    GatewayServerHandle { base_url: format!("http://{addr}"), join }
}

/// Resolves the real shipped contract schema directory, two directories up
/// from this crate's manifest.
#[must_use]
pub fn contracts_dir() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/../crates/srg-config/contracts/v1"))
}

/// Everything a scenario needs to vary about the otherwise-fixed
/// `GatewayConfig`/`AppState` pair.
pub struct ScenarioBuilder {
    /// Policy decider the assembled `AppState` consults.
    pub policy: Arc<dyn PolicyClient>,
    /// Enforcement mode passed straight through to `AppState`.
    pub policy_mode: PolicyMode,
    /// Registered chat/embeddings providers and their routing priority.
    pub providers: ProviderRegistry,
    /// Name of the provider routing starts from.
    pub default_provider: String,
    /// Budget tracker, if this scenario enforces a token ceiling.
    pub budget: Option<Arc<dyn BudgetTracker>>,
    /// NDJSON path the audit writer appends to.
    pub audit_log_path: PathBuf,
    /// Whether the redaction engine runs over request/response content.
    pub redaction_enabled: bool,
}

impl ScenarioBuilder {
    /// Builds a scenario whose sole registered provider is a `"stub"`
    /// `StubProvider`, with no budget enforcement and no fallback.
    #[must_use]
    pub fn stub_only(policy: Arc<dyn PolicyClient>, audit_log_path: PathBuf) -> Self {
        let mut providers = ProviderRegistry::new();
        providers.register(ProviderEntry {
            name: "stub".to_string(),
            provider: Arc::new(StubProvider::new(STUB_EMBEDDING_DIM)),
            cost: ProviderCost::default(),
            priority: 0,
            enabled: true,
            capabilities: ProviderCapabilities::default(),
        });

        Self {
            policy,
            policy_mode: PolicyMode::Enforce,
            providers,
            default_provider: "stub".to_string(),
            budget: None,
            audit_log_path,
            redaction_enabled: true,
        }
    }

    /// Assembles the `GatewayConfig`/`AppState` pair this scenario describes.
    #[must_use]
    pub fn build(self) -> AppState {
        let contracts = contracts_dir();
        let audit_schemas = ContractSchemas::load(&contracts).expect("shipped contract schemas compile");
        let schemas = ContractSchemas::load(&contracts).expect("shipped contract schemas compile");

        let config = GatewayConfig {
            api_keys: vec![TEST_API_KEY.to_string()],
            default_model: "gpt-4o-mini".to_string(),
            model_catalog: vec!["gpt-4o-mini".to_string()],
            rag: RagConfig {
                enabled: false,
                default_top_k: 3,
                allowed_connectors: Vec::new(),
                filesystem_index_path: PathBuf::from("unused.jsonl"),
            },
            policy: PolicyConfig { opa_url: None, mode: "enforce".to_string(), timeout_ms: 150 },
            log_level: "info".to_string(),
            redaction_enabled: self.redaction_enabled,
            provider: ProviderConfig { name: self.default_provider.clone(), config_json: String::new(), fallback_enabled: false },
            audit: AuditConfig { log_path: self.audit_log_path.clone() },
            budget: BudgetConfig {
                enabled: self.budget.is_some(),
                backend: "memory".to_string(),
                default_ceiling: 100_000,
                window_seconds: 3600,
                tenant_ceilings: HashMap::new(),
                redis_url: None,
                redis_prefix: "srg:budget".to_string(),
                redis_ttl_seconds: 7200,
            },
            webhook: WebhookConfig {
                enabled: false,
                endpoints: Vec::new(),
                timeout_s: 5.0,
                max_retries: 1,
                backoff_base_s: 0.2,
                backoff_max_s: 2.0,
                dead_letter_backend: "jsonl".to_string(),
                dead_letter_path: None,
                dead_letter_retention_days: 30,
            },
            tracing: TracingConfig {
                enabled: false,
                max_traces: 100,
                otlp_enabled: false,
                otlp_endpoint: None,
                otlp_timeout_s: 2.0,
                otlp_headers: HashMap::new(),
                service_name: "sovereign-rag-gateway-tests".to_string(),
            },
            contracts_dir: contracts,
        };

        let default_allowed_connectors = config.rag.allowed_connectors.iter().cloned().collect();
        let audit: Arc<dyn AuditSink> = Arc::new(srg_audit::FileAuditWriter::new(self.audit_log_path, audit_schemas.audit_event));

        AppState {
            default_provider: self.default_provider,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
            config,
            schemas,
            policy: self.policy,
            policy_mode: self.policy_mode,
            redaction: RedactionEngine::new(),
            retrieval: RetrievalOrchestrator::new(3),
            connectors: ConnectorRegistry::new(),
            default_allowed_connectors,
            providers: self.providers,
            budget: self.budget,
            audit,
            webhook: None,
            tracing: None,
        }
    }
}
