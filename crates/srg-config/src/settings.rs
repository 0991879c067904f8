// crates/srg-config/src/settings.rs
// ============================================================================
// Module: Gateway Settings
// Description: Typed, fail-closed environment-variable configuration.
// Purpose: Load every runtime-tunable knob from `SRG_`-prefixed environment
//          variables without panicking on malformed input.
// Dependencies: srg-core, std::env
// ============================================================================

//! ## Overview
//! [`GatewayConfig::load`] reads every `SRG_*` variable into a typed struct,
//! applying the same defaults as the reference implementation's
//! `Settings` model. Unlike that implementation (which fails at process
//! start on a bad value via pydantic), malformed scalars here are reported
//! through [`ConfigError`] from `load`, and comma/colon-delimited list and
//! map fields silently skip malformed entries exactly as the reference
//! implementation's property parsers do — only type-level (bool/int/float)
//! parse failures are fail-closed.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use thiserror::Error;

const ENV_PREFIX: &str = "SRG_";

/// Configuration load failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed as
    /// its expected type.
    #[error("environment variable {name} is invalid: {message}")]
    InvalidValue {
        /// Variable name, without prefix.
        name: &'static str,
        /// Description of why the value was rejected.
        message: String,
    },
}

/// Top-level gateway configuration, assembled from environment variables.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Accepted bearer API keys.
    pub api_keys: Vec<String>,
    /// Default model used when a request omits one.
    pub default_model: String,
    /// Full catalog of models advertised by `/v1/models`.
    pub model_catalog: Vec<String>,
    /// Retrieval-augmented-generation configuration.
    pub rag: RagConfig,
    /// Policy client configuration.
    pub policy: PolicyConfig,
    /// Minimum tracing-subscriber log level.
    pub log_level: String,
    /// Enables the redaction engine.
    pub redaction_enabled: bool,
    /// Primary chat/embeddings provider configuration.
    pub provider: ProviderConfig,
    /// Audit log configuration.
    pub audit: AuditConfig,
    /// Budget tracker configuration.
    pub budget: BudgetConfig,
    /// Webhook dispatcher configuration.
    pub webhook: WebhookConfig,
    /// Span collector and OTLP export configuration.
    pub tracing: TracingConfig,
    /// Directory holding the four versioned contract schemas.
    pub contracts_dir: PathBuf,
}

/// RAG toggles and filesystem connector coordinates.
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// Whether retrieval augmentation is offered at all.
    pub enabled: bool,
    /// Default `top_k` when a request omits one.
    pub default_top_k: u32,
    /// Connector names permitted absent a policy-supplied allow-list.
    pub allowed_connectors: Vec<String>,
    /// Path to the filesystem connector's NDJSON index.
    pub filesystem_index_path: PathBuf,
}

/// Policy client configuration.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// OPA-shaped HTTP endpoint; `None` selects the in-process decider.
    pub opa_url: Option<String>,
    /// Enforcement mode: `enforce` or `observe`.
    pub mode: String,
    /// Policy call timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Primary provider selection and fallback configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Provider name (`stub`, `openai`, ...).
    pub name: String,
    /// Raw JSON configuration blob for HTTP-backed providers.
    pub config_json: String,
    /// Whether fallback to secondary providers is attempted.
    pub fallback_enabled: bool,
}

/// Audit writer configuration.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// NDJSON audit log path.
    pub log_path: PathBuf,
}

/// Sliding-window budget tracker configuration.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    /// Whether budget enforcement is active.
    pub enabled: bool,
    /// Backend selection: `memory` or `redis`.
    pub backend: String,
    /// Default per-tenant token ceiling.
    pub default_ceiling: u64,
    /// Sliding window width in seconds.
    pub window_seconds: u64,
    /// Per-tenant ceiling overrides.
    pub tenant_ceilings: HashMap<String, u64>,
    /// Redis connection URL, required when `backend == "redis"`.
    pub redis_url: Option<String>,
    /// Redis key prefix.
    pub redis_prefix: String,
    /// Redis entry TTL in seconds.
    pub redis_ttl_seconds: u64,
}

/// Webhook dispatcher configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Whether webhook dispatch is active.
    pub enabled: bool,
    /// Endpoint URLs, comma-separated in the source variable.
    pub endpoints: Vec<String>,
    /// Per-attempt request timeout in seconds.
    pub timeout_s: f64,
    /// Maximum delivery attempts.
    pub max_retries: u32,
    /// Base backoff in seconds.
    pub backoff_base_s: f64,
    /// Maximum backoff in seconds.
    pub backoff_max_s: f64,
    /// Dead-letter backend: `sqlite` or `jsonl`.
    pub dead_letter_backend: String,
    /// Dead-letter store path.
    pub dead_letter_path: Option<PathBuf>,
    /// Dead-letter retention window in days.
    pub dead_letter_retention_days: i64,
}

/// Span collector and OTLP export configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether the span collector is active.
    pub enabled: bool,
    /// Maximum number of distinct traces retained in memory.
    pub max_traces: usize,
    /// Whether spans are additionally exported over OTLP/HTTP.
    pub otlp_enabled: bool,
    /// OTLP collector endpoint URL.
    pub otlp_endpoint: Option<String>,
    /// OTLP export request timeout in seconds.
    pub otlp_timeout_s: f64,
    /// Additional headers sent with each OTLP export request.
    pub otlp_headers: HashMap<String, String>,
    /// Service name attached to exported spans.
    pub service_name: String,
}

impl GatewayConfig {
    /// Loads configuration from `SRG_*` environment variables, applying
    /// the same defaults as the reference implementation.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when a scalar variable is set but cannot be
    /// parsed as its expected type.
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            api_keys: split_csv(&env_str("API_KEYS", "dev-key")),
            default_model: env_str("DEFAULT_MODEL", "gpt-4o-mini"),
            model_catalog: split_csv(&env_str("MODEL_CATALOG", "gpt-4o-mini,text-embedding-3-small")),
            rag: RagConfig {
                enabled: env_bool("RAG_ENABLED", true)?,
                default_top_k: env_u32("RAG_DEFAULT_TOP_K", 3)?,
                allowed_connectors: split_csv(&env_str("RAG_ALLOWED_CONNECTORS", "filesystem")),
                filesystem_index_path: env_path("RAG_FILESYSTEM_INDEX_PATH", "artifacts/rag/filesystem_index.jsonl"),
            },
            policy: PolicyConfig {
                opa_url: env_opt_str("OPA_URL"),
                mode: env_str("OPA_MODE", "enforce"),
                timeout_ms: env_u64("OPA_TIMEOUT_MS", 150)?,
            },
            log_level: env_str("LOG_LEVEL", "INFO"),
            redaction_enabled: env_bool("REDACTION_ENABLED", true)?,
            provider: ProviderConfig {
                name: env_str("PROVIDER_NAME", "stub"),
                config_json: env_str("PROVIDER_CONFIG", ""),
                fallback_enabled: env_bool("PROVIDER_FALLBACK_ENABLED", true)?,
            },
            audit: AuditConfig { log_path: env_path("AUDIT_LOG_PATH", "artifacts/audit/events.jsonl") },
            budget: BudgetConfig {
                enabled: env_bool("BUDGET_ENABLED", false)?,
                backend: env_str("BUDGET_BACKEND", "memory").to_lowercase(),
                default_ceiling: env_u64("BUDGET_DEFAULT_CEILING", 100_000)?,
                window_seconds: env_u64("BUDGET_WINDOW_SECONDS", 3600)?,
                tenant_ceilings: parse_tenant_ceilings(&env_str("BUDGET_TENANT_CEILINGS", "")),
                redis_url: env_opt_str("BUDGET_REDIS_URL"),
                redis_prefix: env_str("BUDGET_REDIS_PREFIX", "srg:budget"),
                redis_ttl_seconds: env_u64("BUDGET_REDIS_TTL_SECONDS", 7200)?,
            },
            webhook: WebhookConfig {
                enabled: env_bool("WEBHOOK_ENABLED", false)?,
                endpoints: split_csv(&env_str("WEBHOOK_ENDPOINTS", "")),
                timeout_s: env_f64("WEBHOOK_TIMEOUT_S", 5.0)?,
                max_retries: env_u32("WEBHOOK_MAX_RETRIES", 1)?,
                backoff_base_s: env_f64("WEBHOOK_BACKOFF_BASE_S", 0.2)?,
                backoff_max_s: env_f64("WEBHOOK_BACKOFF_MAX_S", 2.0)?,
                dead_letter_backend: env_str("WEBHOOK_DEAD_LETTER_BACKEND", "sqlite").to_lowercase(),
                dead_letter_path: Some(env_path("WEBHOOK_DEAD_LETTER_PATH", "artifacts/audit/webhook_dead_letter.db")),
                dead_letter_retention_days: env_i64("WEBHOOK_DEAD_LETTER_RETENTION_DAYS", 30)?,
            },
            tracing: TracingConfig {
                enabled: env_bool("TRACING_ENABLED", false)?,
                max_traces: env_u32("TRACING_MAX_TRACES", 1000)? as usize,
                otlp_enabled: env_bool("TRACING_OTLP_ENABLED", false)?,
                otlp_endpoint: env_opt_str("TRACING_OTLP_ENDPOINT"),
                otlp_timeout_s: env_f64("TRACING_OTLP_TIMEOUT_S", 2.0)?,
                otlp_headers: parse_header_map(&env_str("TRACING_OTLP_HEADERS", "")),
                service_name: env_str("TRACING_SERVICE_NAME", "sovereign-rag-gateway"),
            },
            contracts_dir: env_path("CONTRACTS_DIR", "docs/contracts/v1"),
        })
    }
}

fn var_name(suffix: &'static str) -> String {
    format!("{ENV_PREFIX}{suffix}")
}

fn env_str(suffix: &'static str, default: &str) -> String {
    env::var(var_name(suffix)).unwrap_or_else(|_| default.to_string())
}

fn env_opt_str(suffix: &'static str) -> Option<String> {
    env::var(var_name(suffix)).ok().filter(|value| !value.trim().is_empty())
}

fn env_path(suffix: &'static str, default: &str) -> PathBuf {
    PathBuf::from(env_str(suffix, default))
}

fn env_bool(suffix: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(var_name(suffix)) {
        Err(_err) => Ok(default),
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue { name: suffix, message: format!("{raw:?} is not a boolean") }),
        },
    }
}

fn env_u32(suffix: &'static str, default: u32) -> Result<u32, ConfigError> {
    env_parsed(suffix, default)
}

fn env_u64(suffix: &'static str, default: u64) -> Result<u64, ConfigError> {
    env_parsed(suffix, default)
}

fn env_i64(suffix: &'static str, default: i64) -> Result<i64, ConfigError> {
    env_parsed(suffix, default)
}

fn env_f64(suffix: &'static str, default: f64) -> Result<f64, ConfigError> {
    env_parsed(suffix, default)
}

fn env_parsed<T: std::str::FromStr>(suffix: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var_name(suffix)) {
        Err(_err) => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_err| ConfigError::InvalidValue { name: suffix, message: format!("{raw:?} is not a valid number") }),
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|item| !item.is_empty()).map(str::to_string).collect()
}

fn parse_tenant_ceilings(raw: &str) -> HashMap<String, u64> {
    let mut result = HashMap::new();
    for item in raw.split(',') {
        let item = item.trim();
        let Some((tenant, ceiling_str)) = item.split_once(':') else {
            continue;
        };
        let tenant = tenant.trim();
        let Ok(ceiling) = ceiling_str.trim().parse::<u64>() else {
            continue;
        };
        if tenant.is_empty() || ceiling == 0 {
            continue;
        }
        result.insert(tenant.to_string(), ceiling);
    }
    result
}

fn parse_header_map(raw: &str) -> HashMap<String, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return HashMap::new();
    }
    if raw.starts_with('{') {
        let Ok(parsed) = serde_json::from_str::<serde_json::Value>(raw) else {
            return HashMap::new();
        };
        let Some(object) = parsed.as_object() else {
            return HashMap::new();
        };
        return object
            .iter()
            .filter_map(|(key, value)| {
                let key = key.trim();
                if key.is_empty() {
                    return None;
                }
                Some((key.to_string(), value.as_str().unwrap_or_default().trim().to_string()))
            })
            .collect();
    }
    let mut result = HashMap::new();
    for item in raw.split(',') {
        let item = item.trim();
        let Some((key, value)) = item.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        result.insert(key.to_string(), value.trim().to_string());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::parse_header_map;
    use super::parse_tenant_ceilings;
    use super::split_csv;

    #[test]
    fn splits_and_trims_csv_entries() {
        assert_eq!(split_csv(" a, b ,,c"), vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn parses_tenant_ceiling_pairs_skipping_malformed() {
        let parsed = parse_tenant_ceilings("acme:500, broken, bad:zero:extra, tiny:0");
        assert_eq!(parsed.get("acme"), Some(&500));
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn parses_header_map_from_json_object() {
        let parsed = parse_header_map(r#"{"x-api-key": "secret"}"#);
        assert_eq!(parsed.get("x-api-key"), Some(&"secret".to_string()));
    }

    #[test]
    fn parses_header_map_from_colon_pairs() {
        let parsed = parse_header_map("x-api-key:secret, x-env:prod");
        assert_eq!(parsed.get("x-env"), Some(&"prod".to_string()));
    }
}
