// crates/srg-core/src/traits.rs
// ============================================================================
// Module: Seam Traits
// Description: The pluggable interfaces every concrete backend crate
//              implements, and the pipeline orchestrator depends on only
//              through `Arc<dyn Trait>`.
// Purpose: Keep `srg-gateway` free of any concrete provider/connector/
//          policy/audit/budget implementation detail.
// Dependencies: async-trait, serde_json
// ============================================================================

//! ## Overview
//! Every external collaborator the pipeline calls out to — the provider, the
//! policy engine, a retrieval connector, the audit sink, the budget tracker,
//! the trace exporter, and the webhook/dead-letter stores — is expressed
//! here as a `Send + Sync` trait object. Concrete implementations live in
//! their own crates; `srg-gateway` only ever sees `Arc<dyn Trait>`.

use async_trait::async_trait;

use crate::error::AppError;
use crate::model::AuditEvent;
use crate::model::BudgetSummary;
use crate::model::ChatCompletionResponse;
use crate::model::ChatMessage;
use crate::model::Document;
use crate::model::DocumentChunk;
use crate::model::EmbeddingsResponse;
use crate::model::PolicyDecision;
use crate::model::TraceSpan;
use crate::model::WebhookDeliveryRecord;

/// Raised by a [`ChatProvider`] when an upstream call fails. Carries enough
/// information for the pipeline to map it onto an [`AppError`] per the
/// retryable-status-set policy.
#[derive(Debug, Clone)]
pub struct ProviderError {
    /// HTTP-shaped status the provider reported (or a synthesized one for
    /// connection/timeout failures).
    pub status: u16,
    /// Stable machine-readable code.
    pub code: &'static str,
    /// Human-readable message, safe to surface to callers.
    pub message: String,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status, self.message)
    }
}

impl std::error::Error for ProviderError {}

/// The default set of upstream statuses the fallback router treats as
/// retryable, per spec.md §4.3.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 3] = [429, 502, 503];

/// A single streamed chat completion chunk.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatCompletionChunk {
    /// Response identifier, stable across all chunks of one completion.
    pub id: String,
    /// Always `"chat.completion.chunk"`.
    pub object: String,
    /// Unix timestamp this chunk was produced.
    pub created: i64,
    /// Model serving this completion.
    pub model: String,
    /// Incremental delta content, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_content: Option<String>,
    /// Finish reason, present only on the terminal chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Usage, present only when the provider reports it (typically the
    /// terminal chunk).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<crate::model::Usage>,
}

/// A live stream of completion chunks from a provider.
pub type ChatCompletionStream =
    std::pin::Pin<Box<dyn futures_core::Stream<Item = Result<ChatCompletionChunk, ProviderError>> + Send>>;

/// A chat/embeddings backend a [`ChatProvider`] talks to.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Performs a non-streaming chat completion.
    ///
    /// # Errors
    /// Returns [`ProviderError`] on any upstream failure.
    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
    ) -> Result<ChatCompletionResponse, ProviderError>;

    /// Begins a streaming chat completion, returning the first chunk
    /// alongside the live stream so stream-init errors are a fail-over
    /// point for the router (spec.md §4.3 "Streaming routing").
    ///
    /// # Errors
    /// Returns [`ProviderError`] if the stream could not be initiated.
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
    ) -> Result<(ChatCompletionChunk, ChatCompletionStream), ProviderError>;

    /// Performs an embeddings call.
    ///
    /// # Errors
    /// Returns [`ProviderError`] on any upstream failure.
    async fn embeddings(&self, model: &str, inputs: &[String]) -> Result<EmbeddingsResponse, ProviderError>;

    /// Returns true when this provider supports streaming chat completions.
    fn supports_streaming(&self) -> bool;
}

/// Outcome of evaluating an inbound policy-input bundle.
#[derive(Debug, Clone)]
pub enum PolicyOutcome {
    /// A well-formed decision was produced by the policy engine.
    Decided(PolicyDecision),
    /// The policy call timed out.
    Timeout,
    /// The policy response did not match the policy-decision schema.
    ContractInvalid,
}

/// A policy engine the pipeline consults before routing a request.
#[async_trait]
pub trait PolicyClient: Send + Sync {
    /// Evaluates a policy-input bundle and returns its outcome.
    async fn evaluate(&self, input: &serde_json::Value) -> PolicyOutcome;
}

/// A corpus adapter exposing `search`/`fetch` over external content.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Searches this connector's corpus for chunks relevant to `query`.
    ///
    /// # Errors
    /// Returns [`AppError`] when the backing store is unavailable.
    async fn search(
        &self,
        query: &str,
        filters: &std::collections::BTreeMap<String, String>,
        k: u32,
    ) -> Result<Vec<DocumentChunk>, AppError>;

    /// Fetches a single full document by id, if it exists.
    ///
    /// # Errors
    /// Returns [`AppError`] when the backing store is unavailable.
    async fn fetch(&self, doc_id: &str) -> Result<Option<Document>, AppError>;
}

/// Sink an [`AuditEvent`] is appended to.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Augments, validates, and durably appends one audit event.
    ///
    /// # Errors
    /// Returns [`AppError::audit_write_failed`] on schema-validation or I/O
    /// failure.
    async fn write_event(&self, event: serde_json::Value) -> Result<AuditEvent, AppError>;
}

/// Raised when a tenant's sliding-window budget would be exceeded.
#[derive(Debug, Clone)]
pub struct BudgetExceeded {
    /// Tenant that exceeded its budget.
    pub tenant_id: String,
    /// Tokens used within the current window before this request.
    pub used: u64,
    /// Configured ceiling.
    pub ceiling: u64,
    /// Configured window, in seconds.
    pub window_seconds: u64,
}

/// Raised when the budget backend (e.g. Redis) is unreachable.
#[derive(Debug, Clone)]
pub struct BudgetBackendError(pub String);

/// Outcome of a budget check.
#[derive(Debug, Clone)]
pub enum BudgetCheckOutcome {
    /// The request may proceed.
    Allowed(BudgetSummary),
    /// The request would exceed the tenant's ceiling.
    Exceeded(BudgetExceeded),
}

/// Per-tenant sliding-window token budget tracker.
#[async_trait]
pub trait BudgetTracker: Send + Sync {
    /// Checks whether `requested` additional tokens fit within the
    /// tenant's ceiling, raising rather than recording.
    ///
    /// # Errors
    /// Returns [`BudgetBackendError`] if the backend is unreachable.
    async fn check(&self, tenant_id: &str, requested: u64) -> Result<BudgetCheckOutcome, BudgetBackendError>;

    /// Non-raising variant used by the streaming pipeline's mid-stream
    /// check.
    ///
    /// # Errors
    /// Returns [`BudgetBackendError`] if the backend is unreachable.
    async fn check_running(&self, tenant_id: &str, requested: u64) -> Result<bool, BudgetBackendError>;

    /// Records actual usage after a successful call.
    ///
    /// # Errors
    /// Returns [`BudgetBackendError`] if the backend is unreachable.
    async fn record(&self, tenant_id: &str, tokens: u64) -> Result<(), BudgetBackendError>;

    /// Returns the current summary for a tenant.
    ///
    /// # Errors
    /// Returns [`BudgetBackendError`] if the backend is unreachable.
    async fn summary(&self, tenant_id: &str) -> Result<BudgetSummary, BudgetBackendError>;
}

/// Exports a snapshot of spans for one trace to an external collector.
#[async_trait]
pub trait TraceExporter: Send + Sync {
    /// Exports the given spans. Failures are logged by the caller and never
    /// propagate into the request path.
    async fn export(&self, spans: &[TraceSpan]);
}

/// Destination a webhook envelope is POSTed to.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    /// Delivers one event to every configured endpoint, returning
    /// per-endpoint results. Callers typically fire this on a background
    /// task rather than awaiting it inline.
    async fn dispatch(&self, event_type: &str, payload: serde_json::Value) -> Vec<WebhookDeliveryResult>;
}

/// Outcome of one webhook delivery attempt sequence to a single endpoint.
#[derive(Debug, Clone)]
pub struct WebhookDeliveryResult {
    /// Destination URL.
    pub endpoint_url: String,
    /// Whether delivery eventually succeeded.
    pub delivered: bool,
    /// Number of attempts made.
    pub attempts: u32,
    /// Last observed status code, if any.
    pub status_code: Option<u16>,
}

/// Durable store for webhook deliveries that exhausted their retries.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Appends a dead-letter record, pruning entries past the configured
    /// retention window.
    ///
    /// # Errors
    /// Returns [`AppError`] on I/O failure.
    async fn append(&self, record: WebhookDeliveryRecord) -> Result<(), AppError>;

    /// Loads all currently retained dead-letter records.
    ///
    /// # Errors
    /// Returns [`AppError`] on I/O failure.
    async fn load(&self) -> Result<Vec<WebhookDeliveryRecord>, AppError>;
}
