// crates/srg-gateway/src/pipeline/mod.rs
// ============================================================================
// Module: Pipeline Shared Helpers
// Description: Token estimation, cost calculation, and audit-event assembly
//              shared by the streaming and non-streaming orchestrators.
// Purpose: Keep the two orchestrators from duplicating the arithmetic and
//          bookkeeping rules spec'd precisely once each.
// Dependencies: srg-core
// ============================================================================

//! ## Overview
//! [`estimate_tokens`] counts whitespace-separated words, floored at one.
//! [`chat_cost_usd`]/[`embeddings_cost_usd`] apply the gateway's fixed cost
//! scalars — never a provider's own per-token pricing, which is
//! observability-only. [`AuditEventBuilder`] accumulates the fields every
//! pipeline stage contributes and renders the final `serde_json::Value`
//! the audit sink validates and chains.

pub mod nonstreaming;
pub mod streaming;

use std::collections::BTreeMap;

use serde_json::json;
use serde_json::Value;
use srg_core::model::BudgetSummary;
use srg_core::model::Citation;
use srg_core::model::Classification;
use srg_core::model::PolicyDecisionLabel;
use srg_core::model::PolicyMode;
use srg_core::model::RequestContext;
use srg_core::model::TransformKind;

/// Chat-token cost scalar, USD per combined prompt+completion token.
const CHAT_COST_PER_TOKEN: f64 = 1e-6;
/// Embeddings-token cost scalar, USD per prompt token.
const EMBEDDINGS_COST_PER_TOKEN: f64 = 2e-7;
/// How often (in chunks) the streaming pipeline re-checks the running
/// budget mid-stream.
pub const MID_STREAM_BUDGET_CHECK_EVERY: usize = 5;

/// Estimates token count as whitespace-separated word count, floored at 1
/// for any non-empty input and 0 for empty input.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    let count = text.split_whitespace().count() as u64;
    if text.trim().is_empty() {
        0
    } else {
        count.max(1)
    }
}

/// Sums [`estimate_tokens`] across every message's content.
#[must_use]
pub fn estimate_tokens_for_messages(messages: &[srg_core::model::ChatMessage]) -> u64 {
    messages.iter().map(|message| estimate_tokens(&message.content)).sum::<u64>().max(1)
}

/// Chat completion cost, `round((tokens_in+tokens_out) * 1e-6, 8)`.
#[must_use]
pub fn chat_cost_usd(tokens_in: u64, tokens_out: u64) -> f64 {
    round8((tokens_in + tokens_out) as f64 * CHAT_COST_PER_TOKEN)
}

/// Embeddings cost, `round(tokens_in * 2e-7, 8)`.
#[must_use]
pub fn embeddings_cost_usd(tokens_in: u64) -> f64 {
    round8(tokens_in as f64 * EMBEDDINGS_COST_PER_TOKEN)
}

fn round8(value: f64) -> f64 {
    (value * 1e8).round() / 1e8
}

/// Builds the policy-input bundle sent to the configured [`PolicyClient`](srg_core::traits::PolicyClient).
#[must_use]
pub fn policy_input(
    context: &RequestContext,
    requested_model: &str,
    connector_targets: &[String],
    estimated_tokens: u64,
) -> Value {
    json!({
        "request_id": context.request_id.as_str(),
        "tenant_id": context.tenant_id.as_str(),
        "user_id": context.user_id.as_str(),
        "classification": classification_str(context.classification),
        "endpoint": context.endpoint,
        "requested_model": requested_model,
        "estimated_tokens": estimated_tokens,
        "connector_targets": connector_targets,
    })
}

fn classification_str(classification: Classification) -> &'static str {
    match classification {
        Classification::Public => "public",
        Classification::Pii => "pii",
        Classification::Phi => "phi",
    }
}

/// Synthesizes an allow decision for a policy-service outage under
/// `observe` mode, carrying the original failure in `deny_reason`.
#[must_use]
pub fn synthesize_observe_decision(outage_reason: &str) -> srg_core::model::PolicyDecision {
    srg_core::model::PolicyDecision {
        decision_id: srg_core::identifiers::generate_uuid_v4(),
        allow: true,
        deny_reason: Some(outage_reason.to_string()),
        policy_hash: "unavailable".to_string(),
        evaluated_at: now_rfc3339(),
        transforms: Vec::new(),
        provider_constraints: None,
        connector_constraints: None,
        max_tokens_override: None,
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Fires a webhook dispatch on a background task if a dispatcher is
/// configured, never blocking the request path.
pub fn queue_webhook(state: &crate::app_state::AppState, event_type: &'static str, payload: Value) {
    if let Some(webhook) = state.webhook.clone() {
        tokio::spawn(async move {
            webhook.dispatch(event_type, payload).await;
        });
    }
}

/// Accumulates every field contributed across pipeline stages into one
/// audit-event JSON value, ready for [`srg_core::traits::AuditSink::write_event`].
#[derive(Debug, Default)]
pub struct AuditEventBuilder {
    fields: BTreeMap<String, Value>,
}

impl AuditEventBuilder {
    /// Starts a builder seeded with the fields known at ingress.
    #[must_use]
    pub fn new(context: &RequestContext, requested_model: &str, streaming: bool) -> Self {
        let mut builder = Self::default();
        builder
            .set("request_id", context.request_id.as_str())
            .set("tenant_id", context.tenant_id.as_str())
            .set("user_id", context.user_id.as_str())
            .set("endpoint", &context.endpoint)
            .set("requested_model", requested_model)
            .set("selected_model", requested_model)
            .set("provider", "")
            .set("transforms_applied", Vec::<TransformKind>::new())
            .set("redaction_count", 0u32)
            .set("input_redaction_count", 0u32)
            .set("output_redaction_count", 0u32)
            .set("retrieval_citations", Vec::<Citation>::new())
            .set("streaming", streaming)
            .set("tokens_in", 0u64)
            .set("tokens_out", 0u64)
            .set("cost_usd", 0.0f64)
            .set("provider_attempts", 0u32)
            .set("fallback_chain", Vec::<String>::new())
            .set("trace_id", context.request_id.as_str())
            .set("webhook_events", Vec::<String>::new());
        builder
    }

    /// Sets one field by key, serializing `value`.
    pub fn set(&mut self, key: &str, value: impl serde::Serialize) -> &mut Self {
        self.fields.insert(key.to_string(), serde_json::to_value(value).unwrap_or(Value::Null));
        self
    }

    /// Records the policy stage's outcome.
    pub fn policy(
        &mut self,
        label: PolicyDecisionLabel,
        decision_id: &str,
        evaluated_at: &str,
        allow: bool,
        mode: PolicyMode,
        deny_reason: Option<&str>,
    ) -> &mut Self {
        self.set("policy_decision", label)
            .set("policy_decision_id", decision_id)
            .set("policy_evaluated_at", evaluated_at)
            .set("policy_allow", allow)
            .set("policy_mode", mode)
            .set("deny_reason", deny_reason)
    }

    /// Records hashes computed across the request's lifecycle.
    pub fn hashes(&mut self, request_payload_hash: &str, redacted_payload_hash: &str) -> &mut Self {
        self.set("request_payload_hash", request_payload_hash).set("redacted_payload_hash", redacted_payload_hash)
    }

    /// Records the routing outcome.
    pub fn routing(&mut self, provider: &str, selected_model: &str, attempts: u32, fallback_chain: &[String]) -> &mut Self {
        self.set("provider", provider).set("selected_model", selected_model).set("provider_attempts", attempts).set("fallback_chain", fallback_chain)
    }

    /// Records token/cost accounting.
    pub fn usage(&mut self, tokens_in: u64, tokens_out: u64, cost_usd: f64) -> &mut Self {
        self.set("tokens_in", tokens_in).set("tokens_out", tokens_out).set("cost_usd", cost_usd)
    }

    /// Records the budget summary captured at check time, if budgeting is
    /// active.
    pub fn budget(&mut self, summary: Option<&BudgetSummary>) -> &mut Self {
        self.set("budget", summary)
    }

    /// Appends one queued webhook event type to the running list.
    pub fn queue_webhook(&mut self, event_type: &str) -> &mut Self {
        let mut events: Vec<String> =
            self.fields.get("webhook_events").and_then(|value| serde_json::from_value(value.clone()).ok()).unwrap_or_default();
        events.push(event_type.to_string());
        self.set("webhook_events", events)
    }

    /// Renders the accumulated fields as one JSON object.
    #[must_use]
    pub fn build(self) -> Value {
        Value::Object(self.fields.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::chat_cost_usd;
    use super::embeddings_cost_usd;
    use super::estimate_tokens;

    #[test]
    fn token_estimate_floors_at_one_for_nonempty_text() {
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("a b c"), 3);
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("   "), 0);
    }

    #[test]
    fn cost_formulas_match_fixed_scalars() {
        assert!((chat_cost_usd(1_000, 500) - 0.0015).abs() < 1e-12);
        assert!((embeddings_cost_usd(1_000) - 0.0002).abs() < 1e-12);
    }
}
