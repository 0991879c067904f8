// crates/srg-core/src/model.rs
// ============================================================================
// Module: Data Model
// Description: Value objects shared across every gateway crate.
// Purpose: Give every pipeline stage a single, fully enumerated set of
//          request/response/audit/trace types with no dynamic attribute
//          access.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Every entity here is a plain, fully enumerated struct or enum — no
//! dynamic maps stand in for a documented field. Field names mirror the
//! wire shape exactly so `serde_json`/`serde_jcs` round-trip without a
//! translation layer.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::error::AppError;
use crate::identifiers::EventId;
use crate::identifiers::RequestId;
use crate::identifiers::TenantId;
use crate::identifiers::TraceId;
use crate::identifiers::UserId;

/// Caller-asserted data-sensitivity label that gates redaction and guardrails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// No special handling required.
    Public,
    /// Personally identifiable information; redaction applies.
    Pii,
    /// Protected health information; redaction applies.
    Phi,
}

impl Classification {
    /// Returns true when this classification requires redaction when enabled.
    #[must_use]
    pub const fn requires_redaction(self) -> bool {
        matches!(self, Self::Pii | Self::Phi)
    }
}

impl std::str::FromStr for Classification {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "public" => Ok(Self::Public),
            "pii" => Ok(Self::Pii),
            "phi" => Ok(Self::Phi),
            _ => Err(()),
        }
    }
}

/// Immutable per-request context attached at ingress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Identifier preserved in every downstream record and response header.
    pub request_id: RequestId,
    /// Tenant the request is billed/scoped against.
    pub tenant_id: TenantId,
    /// Caller identifier within the tenant.
    pub user_id: UserId,
    /// Caller-asserted sensitivity classification.
    pub classification: Classification,
    /// Request path, e.g. `/v1/chat/completions`.
    pub endpoint: String,
    /// RFC 3339 UTC timestamp the request began.
    pub started_at: String,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker role.
    pub role: ChatRole,
    /// Message text. Invariant: non-empty.
    pub content: String,
    /// Citations attached by the retrieval stage, present only on the
    /// final assistant message of a successful response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
}

/// Role of a chat message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// System/guardrail instruction.
    System,
    /// End-user message.
    User,
    /// Model-generated message.
    Assistant,
}

/// Retrieval-augmented-generation options attached to a chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagOptions {
    /// Whether retrieval should run for this request.
    pub enabled: bool,
    /// Named connector to query.
    pub connector: String,
    /// Maximum chunks to retrieve; invariant `1..=20`.
    pub top_k: u32,
    /// Exact-match metadata filters.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

/// An inbound chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Requested model identifier.
    pub model: String,
    /// Ordered conversation messages. Invariant: at least one entry.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature, invariant `0.0..=2.0`.
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Maximum completion tokens, invariant `1..=8192`.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Whether the response should be streamed as SSE.
    #[serde(default)]
    pub stream: bool,
    /// Optional retrieval-augmented-generation options.
    #[serde(default)]
    pub rag: Option<RagOptions>,
}

impl ChatCompletionRequest {
    /// Enforces the request-shape invariants: at least one message, every
    /// message's content non-empty, `temperature` in `0.0..=2.0`,
    /// `max_tokens` in `1..=8192`, and (if RAG is attached) `top_k` in
    /// `1..=20`.
    ///
    /// # Errors
    /// Returns [`AppError::request_validation_failed`] on the first
    /// violated invariant.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.messages.is_empty() {
            return Err(AppError::request_validation_failed("messages must contain at least one entry"));
        }
        if self.messages.iter().any(|message| message.content.is_empty()) {
            return Err(AppError::request_validation_failed("message content must be non-empty"));
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(AppError::request_validation_failed("temperature must be between 0 and 2"));
            }
        }
        if let Some(max_tokens) = self.max_tokens {
            if !(1..=8192).contains(&max_tokens) {
                return Err(AppError::request_validation_failed("max_tokens must be between 1 and 8192"));
            }
        }
        if let Some(rag) = &self.rag {
            if !(1..=20).contains(&rag.top_k) {
                return Err(AppError::request_validation_failed("rag.top_k must be between 1 and 20"));
            }
        }
        Ok(())
    }
}

/// Token usage reported by (or estimated for) a completion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u64,
    /// Tokens consumed by the completion.
    pub completion_tokens: u64,
    /// Sum of prompt and completion tokens.
    pub total_tokens: u64,
}

impl Usage {
    /// Builds a usage record, computing the total from its parts.
    #[must_use]
    pub const fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A single completion choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChoice {
    /// Index of this choice within the response.
    pub index: u32,
    /// The generated message.
    pub message: ChatMessage,
    /// Reason generation stopped, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// An OpenAI-compatible chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Response identifier assigned by the provider.
    pub id: String,
    /// Always `"chat.completion"`.
    pub object: String,
    /// Unix timestamp the completion was created.
    pub created: i64,
    /// Model that actually served the request.
    pub model: String,
    /// Completion choices.
    pub choices: Vec<ChatCompletionChoice>,
    /// Token usage for this completion.
    pub usage: Usage,
}

/// An inbound embeddings request. `input` accepts either a single string or
/// a list, normalized internally to a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsRequest {
    /// Requested model identifier.
    pub model: String,
    /// One or more input strings to embed.
    pub input: EmbeddingsInput,
}

/// Wire shape of an embeddings request's `input` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingsInput {
    /// A single input string.
    Single(String),
    /// Multiple input strings.
    Many(Vec<String>),
}

impl EmbeddingsInput {
    /// Normalizes this input to an owned list of strings.
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::Single(text) => vec![text],
            Self::Many(items) => items,
        }
    }
}

impl EmbeddingsRequest {
    /// Enforces the request-shape invariants: at least one input string,
    /// every input string non-empty.
    ///
    /// # Errors
    /// Returns [`AppError::request_validation_failed`] on the first
    /// violated invariant.
    pub fn validate(&self) -> Result<(), AppError> {
        match &self.input {
            EmbeddingsInput::Single(text) if text.is_empty() => {
                Err(AppError::request_validation_failed("input must be non-empty"))
            }
            EmbeddingsInput::Many(items) if items.is_empty() => {
                Err(AppError::request_validation_failed("input must contain at least one entry"))
            }
            EmbeddingsInput::Many(items) if items.iter().any(String::is_empty) => {
                Err(AppError::request_validation_failed("input entries must be non-empty"))
            }
            EmbeddingsInput::Single(_) | EmbeddingsInput::Many(_) => Ok(()),
        }
    }
}

/// A single embeddings result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsDatum {
    /// Index of this datum among the request's inputs.
    pub index: u32,
    /// The embedding vector.
    pub embedding: Vec<f32>,
}

/// An OpenAI-compatible embeddings response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsResponse {
    /// Always `"list"`.
    pub object: String,
    /// Model that served the request.
    pub model: String,
    /// Embedding data, one per input.
    pub data: Vec<EmbeddingsDatum>,
    /// Token usage for this request.
    pub usage: Usage,
}

/// A single transform action from a policy decision, applied in the order
/// the decision lists them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformAction {
    /// Transform kind.
    #[serde(rename = "type")]
    pub kind: TransformKind,
    /// Transform-specific arguments.
    #[serde(default)]
    pub args: BTreeMap<String, serde_json::Value>,
}

/// The set of transform kinds a policy decision may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Prepend a system guardrail message.
    PrependSystemGuardrail,
    /// Override the requested model.
    OverrideModel,
    /// Cap `max_tokens`.
    SetMaxTokens,
}

/// Provider/model allow-list constraints from a policy decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConstraints {
    /// Providers the request may be routed to, if restricted.
    #[serde(default)]
    pub allowed_providers: Option<Vec<String>>,
    /// Models the request may target, if restricted.
    #[serde(default)]
    pub allowed_models: Option<Vec<String>>,
}

/// Connector allow-list constraints from a policy decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorConstraints {
    /// Connectors retrieval may target, if restricted.
    #[serde(default)]
    pub allowed_connectors: Option<Vec<String>>,
}

/// The structured verdict returned by the policy client for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// Identifier for this specific decision.
    pub decision_id: String,
    /// Whether the request is allowed to proceed.
    pub allow: bool,
    /// Reason given when `allow` is false, or when an `observe`-mode
    /// failure synthesized an allow.
    #[serde(default)]
    pub deny_reason: Option<String>,
    /// Hash of the policy bundle that produced this decision.
    pub policy_hash: String,
    /// RFC 3339 timestamp the decision was evaluated.
    pub evaluated_at: String,
    /// Ordered transforms to apply to the request.
    #[serde(default)]
    pub transforms: Vec<TransformAction>,
    /// Provider/model constraints, if any.
    #[serde(default)]
    pub provider_constraints: Option<ProviderConstraints>,
    /// Connector constraints, if any.
    #[serde(default)]
    pub connector_constraints: Option<ConnectorConstraints>,
    /// Hard cap on `max_tokens`, if any.
    #[serde(default)]
    pub max_tokens_override: Option<u32>,
}

/// Label recorded on the audit event for the outcome of policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecisionLabel {
    /// Allowed with no transforms applied.
    Allow,
    /// Allowed with one or more transforms applied.
    Transform,
    /// Policy outage was converted to an allow under `observe` mode.
    Observe,
    /// Request was denied.
    Deny,
}

/// Policy enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    /// Denies and outages are enforced as failures.
    Enforce,
    /// Outages synthesize an allow; denials are still honored.
    Observe,
}

/// A single retrieved document chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Identifier of the originating document.
    pub source_id: String,
    /// Connector that produced this chunk.
    pub connector: String,
    /// Locator for the source document.
    pub uri: String,
    /// Identifier of this chunk within its document.
    pub chunk_id: String,
    /// Chunk text.
    pub text: String,
    /// Relevance score, invariant `0.0..=1.0`.
    pub score: f64,
    /// Arbitrary connector-supplied metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A full document returned by a connector's `fetch` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Document identifier.
    pub doc_id: String,
    /// Connector that owns this document.
    pub connector: String,
    /// Locator for the document.
    pub uri: String,
    /// Full document text.
    pub text: String,
    /// Arbitrary connector-supplied metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Citation projection of a [`DocumentChunk`], attached to a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Identifier of the originating document.
    pub source_id: String,
    /// Connector that produced this chunk.
    pub connector: String,
    /// Locator for the source document.
    pub uri: String,
    /// Identifier of this chunk within its document.
    pub chunk_id: String,
    /// Relevance score.
    pub score: f64,
}

impl From<&DocumentChunk> for Citation {
    fn from(chunk: &DocumentChunk) -> Self {
        Self {
            source_id: chunk.source_id.clone(),
            connector: chunk.connector.clone(),
            uri: chunk.uri.clone(),
            chunk_id: chunk.chunk_id.clone(),
            score: chunk.score,
        }
    }
}

/// A single tenant token-usage entry, pruned once older than the budget
/// tracker's configured window.
#[derive(Debug, Clone, Copy)]
pub struct UsageEntry {
    /// Monotonic timestamp (seconds) this entry was recorded at.
    pub timestamp: f64,
    /// Tokens charged by this entry.
    pub tokens: u64,
}

/// Point-in-time summary of a tenant's sliding-window budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSummary {
    /// Tenant this summary describes.
    pub tenant_id: String,
    /// Window size in seconds.
    pub window_seconds: u64,
    /// Configured ceiling for the window.
    pub ceiling: u64,
    /// Tokens used within the current window.
    pub used: u64,
    /// Tokens remaining before the ceiling is hit.
    pub remaining: u64,
    /// `used / ceiling * 100`, rounded to two decimal places.
    pub utilization_pct: f64,
}

/// A fully assembled, schema-validated audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Identifier for this audit event.
    pub event_id: String,
    /// Identifier of the originating request.
    pub request_id: String,
    /// Tenant the request was scoped to.
    pub tenant_id: String,
    /// User the request was scoped to.
    pub user_id: String,
    /// Request path.
    pub endpoint: String,
    /// Model the caller requested.
    pub requested_model: String,
    /// Model actually used, after transforms.
    pub selected_model: String,
    /// Provider name that served (or would have served) the request.
    pub provider: String,
    /// Outcome label for the policy stage.
    pub policy_decision: PolicyDecisionLabel,
    /// Identifier of the policy decision evaluated for this request.
    pub policy_decision_id: String,
    /// Timestamp the policy decision was evaluated.
    pub policy_evaluated_at: String,
    /// Raw `allow` verdict from the policy decision.
    pub policy_allow: bool,
    /// Policy mode in effect for this request.
    pub policy_mode: PolicyMode,
    /// Transform kinds applied, in application order.
    pub transforms_applied: Vec<TransformKind>,
    /// Total redaction hits (input + output).
    pub redaction_count: u32,
    /// Redaction hits on inbound content.
    pub input_redaction_count: u32,
    /// Redaction hits on outbound content.
    pub output_redaction_count: u32,
    /// Hash of the request payload before any transform/redaction.
    pub request_payload_hash: String,
    /// Hash of the request payload after redaction.
    pub redacted_payload_hash: String,
    /// Hash of the exact payload sent to the provider, if a call was made.
    #[serde(default)]
    pub provider_request_hash: Option<String>,
    /// Hash of the provider's raw response, if a call succeeded.
    #[serde(default)]
    pub provider_response_hash: Option<String>,
    /// Citations attached to the response, if retrieval ran.
    #[serde(default)]
    pub retrieval_citations: Vec<Citation>,
    /// Whether this request was served as an SSE stream.
    pub streaming: bool,
    /// Exception class name if the stream failed mid-flight.
    #[serde(default)]
    pub stream_error: Option<String>,
    /// Prompt tokens charged.
    pub tokens_in: u64,
    /// Completion tokens charged.
    pub tokens_out: u64,
    /// Cost in US dollars, per the fixed-scalar cost model.
    pub cost_usd: f64,
    /// Number of provider attempts made by the fallback router.
    pub provider_attempts: u32,
    /// Ordered provider names the router attempted.
    pub fallback_chain: Vec<String>,
    /// Trace identifier for this request.
    pub trace_id: String,
    /// Budget summary captured at the point of the budget check, if the
    /// budget tracker is configured.
    #[serde(default)]
    pub budget: Option<BudgetSummary>,
    /// Whether the mid-stream budget check terminated the stream early.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub budget_mid_stream_terminated: bool,
    /// Event types queued for webhook dispatch as a result of this request.
    #[serde(default)]
    pub webhook_events: Vec<String>,
    /// Reason the request was denied, if it was.
    #[serde(default)]
    pub deny_reason: Option<String>,
    /// Hash of the previous line's `payload_hash`, or empty string if first.
    pub prev_hash: String,
    /// `SHA-256(canonical_json(event \ {payload_hash}))`.
    pub payload_hash: String,
    /// RFC 3339 UTC timestamp this event was written.
    pub created_at: String,
}

/// Status of a single recorded span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    /// The operation completed without error.
    Ok,
    /// The operation raised or propagated an error.
    Error,
}

/// A single timed span recorded by the span collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSpan {
    /// Trace this span belongs to; equal to the owning request's id.
    pub trace_id: String,
    /// Identifier of this span.
    pub span_id: String,
    /// Identifier of the enclosing span, if any.
    #[serde(default)]
    pub parent_span_id: Option<String>,
    /// Operation name, e.g. `"gateway.request"`.
    pub operation: String,
    /// Start time in Unix nanoseconds.
    pub start_time_unix_ns: u128,
    /// End time in Unix nanoseconds.
    pub end_time_unix_ns: u128,
    /// Duration in milliseconds, for convenience.
    pub duration_ms: f64,
    /// Outcome status.
    pub status: SpanStatus,
    /// Arbitrary attributes recorded on this span.
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Point-in-time events recorded during the span's lifetime.
    #[serde(default)]
    pub events: Vec<SpanEvent>,
}

/// A point-in-time event recorded within a span's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanEvent {
    /// Event name.
    pub name: String,
    /// Unix nanosecond timestamp.
    pub time_unix_ns: u128,
    /// Arbitrary attributes for this event.
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// A dead-letter record for a webhook delivery that exhausted its retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDeliveryRecord {
    /// RFC 3339 timestamp of the final failed attempt.
    pub timestamp: String,
    /// Event type that was being delivered.
    pub event_type: String,
    /// Destination URL.
    pub endpoint_url: String,
    /// Last observed HTTP status, if any response was received.
    #[serde(default)]
    pub status_code: Option<u16>,
    /// Error description, if the failure was a connection error.
    #[serde(default)]
    pub error: Option<String>,
    /// Number of attempts made before giving up.
    pub attempt_count: u32,
    /// Idempotency key sent on every attempt.
    pub idempotency_key: String,
    /// The envelope body that failed to deliver.
    pub body: serde_json::Value,
}

/// Helper re-exports for consumers that want the request-context triple
/// (`request_id`, `tenant_id`, `user_id`) without depending on the whole
/// struct.
pub type ContextTriple = (RequestId, TenantId, UserId);

/// Identifies a trace by its owning request.
#[must_use]
pub fn trace_id_for_request(request_id: &RequestId) -> TraceId {
    TraceId::new(request_id.as_str())
}

/// Generates a fresh audit event id.
#[must_use]
pub fn new_audit_event_id() -> EventId {
    crate::identifiers::generate_event_id()
}

#[cfg(test)]
mod tests {
    use super::Classification;
    use std::str::FromStr;

    #[test]
    fn classification_gates_redaction() {
        assert!(Classification::from_str("phi").expect("parses").requires_redaction());
        assert!(Classification::from_str("pii").expect("parses").requires_redaction());
        assert!(!Classification::from_str("public").expect("parses").requires_redaction());
    }
}
