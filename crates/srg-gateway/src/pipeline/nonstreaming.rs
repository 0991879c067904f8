// crates/srg-gateway/src/pipeline/nonstreaming.rs
// ============================================================================
// Module: Non-Streaming Pipeline Orchestrator
// Description: Drives one chat-completions or embeddings request through
//              policy, retrieval, redaction, budget, routing, and audit.
// Purpose: The single seam `/v1/chat/completions` (non-streaming) and
//          `/v1/embeddings` route handlers call into.
// Dependencies: srg-core, srg-policy, srg-providers, srg-redaction,
//               srg-retrieval, srg-budget
// ============================================================================

//! ## Overview
//! [`chat_completions`] and [`embeddings`] always write exactly one audit
//! event for every request that reaches the policy stage; an error
//! returned before policy evaluation completes (malformed body, policy
//! outage under `enforce`) is the one carve-out that writes nothing, since
//! no request was "accepted" yet.

use std::collections::BTreeSet;

use serde_json::json;
use srg_core::error::AppError;
use srg_core::hashing::hash_canonical_json;
use srg_core::hashing::HashAlgorithm;
use srg_core::model::ChatCompletionRequest;
use srg_core::model::ChatCompletionResponse;
use srg_core::model::ChatMessage;
use srg_core::model::ChatRole;
use srg_core::model::Citation;
use srg_core::model::EmbeddingsRequest;
use srg_core::model::EmbeddingsResponse;
use srg_core::model::PolicyDecision;
use srg_core::model::PolicyDecisionLabel;
use srg_core::model::PolicyMode;
use srg_core::model::RequestContext;
use srg_core::traits::BudgetCheckOutcome;
use srg_core::traits::PolicyOutcome;
use srg_policy::transforms::apply_transforms;
use srg_providers::registry::route_chat_with_fallback;
use srg_providers::registry::route_embeddings_with_fallback;
use srg_retrieval::RetrievalRequest;

use crate::app_state::AppState;
use crate::pipeline::chat_cost_usd;
use crate::pipeline::embeddings_cost_usd;
use crate::pipeline::estimate_tokens;
use crate::pipeline::estimate_tokens_for_messages;
use crate::pipeline::policy_input;
use crate::pipeline::queue_webhook;
use crate::pipeline::synthesize_observe_decision;
use crate::pipeline::AuditEventBuilder;

/// Runs a policy evaluation, resolving outage semantics per `policy_mode`.
///
/// # Errors
/// Returns [`AppError::policy_unavailable`]/[`AppError::policy_contract_invalid`]
/// when the outage occurs under `enforce` mode. No audit event is written
/// for this path — the request was never accepted.
async fn evaluate_policy(
    state: &AppState,
    input: &serde_json::Value,
) -> Result<(PolicyDecision, PolicyDecisionLabel), AppError> {
    match state.policy.evaluate(input).await {
        PolicyOutcome::Decided(decision) => {
            let label = if !decision.allow {
                PolicyDecisionLabel::Deny
            } else if decision.transforms.is_empty() {
                PolicyDecisionLabel::Allow
            } else {
                PolicyDecisionLabel::Transform
            };
            Ok((decision, label))
        }
        PolicyOutcome::Timeout => {
            if state.policy_mode == PolicyMode::Observe {
                Ok((synthesize_observe_decision("policy_timeout"), PolicyDecisionLabel::Observe))
            } else {
                Err(AppError::policy_unavailable())
            }
        }
        PolicyOutcome::ContractInvalid => {
            if state.policy_mode == PolicyMode::Observe {
                Ok((synthesize_observe_decision("policy_contract_invalid"), PolicyDecisionLabel::Observe))
            } else {
                Err(AppError::policy_contract_invalid())
            }
        }
    }
}

fn allowed_connectors_for(state: &AppState, decision: &PolicyDecision) -> BTreeSet<String> {
    decision
        .connector_constraints
        .as_ref()
        .and_then(|constraints| constraints.allowed_connectors.clone())
        .map(|allowed| allowed.into_iter().collect())
        .unwrap_or_else(|| state.default_allowed_connectors.clone())
}

fn last_user_message(messages: &[ChatMessage]) -> String {
    messages.iter().rev().find(|message| message.role == ChatRole::User).map(|message| message.content.clone()).unwrap_or_default()
}

fn model_allowed(decision: &PolicyDecision, model: &str) -> bool {
    decision
        .provider_constraints
        .as_ref()
        .and_then(|constraints| constraints.allowed_models.as_ref())
        .is_none_or(|allowed| allowed.iter().any(|allowed_model| allowed_model == model))
}

fn provider_allowed(decision: &PolicyDecision, provider_name: &str) -> bool {
    decision
        .provider_constraints
        .as_ref()
        .and_then(|constraints| constraints.allowed_providers.as_ref())
        .is_none_or(|allowed| allowed.iter().any(|allowed_provider| allowed_provider == provider_name))
}

/// Runs the full non-streaming chat-completions pipeline.
///
/// # Errors
/// Returns [`AppError`] on any terminal failure; see module overview for
/// which paths also write an audit event before returning.
pub async fn chat_completions(
    state: &AppState,
    context: RequestContext,
    request: ChatCompletionRequest,
) -> Result<ChatCompletionResponse, AppError> {
    let mut audit = AuditEventBuilder::new(&context, &request.model, false);

    let request_payload_hash = hash_canonical_json(HashAlgorithm::Sha256, &request).map(|digest| digest.value).unwrap_or_default();

    let connector_targets: Vec<String> = request.rag.as_ref().map(|rag| vec![rag.connector.clone()]).into_iter().flatten().collect();
    let estimated_tokens = estimate_tokens_for_messages(&request.messages);
    let input = policy_input(&context, &request.model, &connector_targets, estimated_tokens);
    let (decision, label) = evaluate_policy(state, &input).await?;

    if !decision.allow {
        let reason = decision.deny_reason.clone().unwrap_or_else(|| "denied".to_string());
        queue_webhook(state, "policy_denied", json!({"tenant_id": context.tenant_id.as_str(), "reason": reason}));
        audit
            .policy(PolicyDecisionLabel::Deny, &decision.decision_id, &decision.evaluated_at, false, state.policy_mode, Some(&reason))
            .hashes(&request_payload_hash, &request_payload_hash)
            .set("provider", "policy-gate");
        state.audit.write_event(audit.build()).await?;
        return Err(AppError::policy_denied(reason));
    }

    audit.policy(label, &decision.decision_id, &decision.evaluated_at, decision.allow, state.policy_mode, decision.deny_reason.as_deref());
    audit.set("transforms_applied", decision.transforms.iter().map(|transform| transform.kind).collect::<Vec<_>>());

    let mut transformed = apply_transforms(request, &decision.transforms);
    let mut citations: Vec<Citation> = Vec::new();

    if let Some(rag) = transformed.rag.clone().filter(|rag| rag.enabled && state.config.rag.enabled) {
        let allowed = allowed_connectors_for(state, &decision);
        let retrieval_request = RetrievalRequest {
            query: last_user_message(&transformed.messages),
            connector: rag.connector.clone(),
            k: rag.top_k,
            filters: rag.filters.clone(),
        };
        let chunks = state.retrieval.retrieve(&state.connectors, &retrieval_request, Some(&allowed)).await?;
        if !chunks.is_empty() {
            let context_text = chunks
                .iter()
                .map(|chunk| format!("[{}] {}", chunk.chunk_id, chunk.text))
                .collect::<Vec<_>>()
                .join("\n");
            transformed.messages.push(ChatMessage {
                role: ChatRole::System,
                content: format!("Retrieved context chunks:\n{context_text}"),
                citations: None,
            });
            citations = chunks.iter().map(Citation::from).collect();
        }
    }
    audit.set("retrieval_citations", citations.clone());

    let mut input_redaction_count = 0usize;
    if state.redaction_active(context.classification) {
        let result = state.redaction.redact_messages(&transformed.messages);
        input_redaction_count = result.redaction_count;
        transformed.messages = result.messages;
    }
    audit.set("input_redaction_count", u32::try_from(input_redaction_count).unwrap_or(u32::MAX));

    if !model_allowed(&decision, &transformed.model) {
        state.audit.write_event(audit.build()).await?;
        return Err(AppError::model_forbidden());
    }

    let requested_budget_tokens = estimate_tokens_for_messages(&transformed.messages).max(1) + u64::from(transformed.max_tokens.unwrap_or(0));
    let mut budget_summary = None;
    if let Some(budget) = &state.budget {
        match budget.check(context.tenant_id.as_str(), requested_budget_tokens).await {
            Err(_backend_error) => {
                state.audit.write_event(audit.build()).await?;
                return Err(AppError::budget_backend_unavailable());
            }
            Ok(BudgetCheckOutcome::Exceeded(_exceeded)) => {
                queue_webhook(state, "budget_exceeded", json!({"tenant_id": context.tenant_id.as_str()}));
                audit.set("provider", "budget-gate").set("deny_reason", "budget_exceeded");
                state.audit.write_event(audit.build()).await?;
                return Err(AppError::budget_exceeded());
            }
            Ok(BudgetCheckOutcome::Allowed(summary)) => budget_summary = Some(summary),
        }
    }
    audit.budget(budget_summary.as_ref());

    let redacted_payload_hash = hash_canonical_json(HashAlgorithm::Sha256, &transformed.messages).map(|digest| digest.value).unwrap_or_default();
    let provider_request_payload = json!({"model": transformed.model, "messages": transformed.messages, "max_tokens": transformed.max_tokens});
    let provider_request_hash = hash_canonical_json(HashAlgorithm::Sha256, &provider_request_payload).map(|digest| digest.value).unwrap_or_default();
    audit.hashes(&request_payload_hash, &redacted_payload_hash).set("provider_request_hash", &provider_request_hash);

    let routed = route_chat_with_fallback(
        &state.providers,
        &state.default_provider,
        &transformed.model,
        &transformed.messages,
        transformed.max_tokens,
        &state.retryable_statuses,
    )
    .await;

    let routed = match routed {
        Ok(routed) => routed,
        Err(error) => {
            queue_webhook(state, "provider_error", json!({"code": error.code, "status": error.status}));
            audit.set("provider", state.default_provider.as_str());
            state.audit.write_event(audit.build()).await?;
            return Err(AppError::from_provider_status(error.status, error.message));
        }
    };

    if !provider_allowed(&decision, &routed.provider_name) {
        state.audit.write_event(audit.build()).await?;
        return Err(AppError::provider_forbidden());
    }

    let mut response = routed.result;
    let mut output_redaction_count = 0usize;
    if state.redaction_active(context.classification) {
        for choice in &mut response.choices {
            let result = state.redaction.redact_text(&choice.message.content);
            output_redaction_count += result.count;
            choice.message.content = result.text;
        }
    }
    if let Some(first_choice) = response.choices.first_mut() {
        if !citations.is_empty() {
            first_choice.message.citations = Some(citations.clone());
        }
    }
    let provider_response_hash = hash_canonical_json(HashAlgorithm::Sha256, &response).map(|digest| digest.value).unwrap_or_default();

    let total_redaction_count = input_redaction_count + output_redaction_count;
    audit
        .set("output_redaction_count", u32::try_from(output_redaction_count).unwrap_or(u32::MAX))
        .set("redaction_count", u32::try_from(total_redaction_count).unwrap_or(u32::MAX))
        .set("provider_response_hash", &provider_response_hash)
        .routing(&routed.provider_name, &transformed.model, routed.attempts, &routed.fallback_chain);

    let tokens_in = response.usage.prompt_tokens;
    let tokens_out = response.usage.completion_tokens;
    let cost_usd = chat_cost_usd(tokens_in, tokens_out);
    audit.usage(tokens_in, tokens_out, cost_usd);

    if let Some(budget) = &state.budget {
        let _ = budget.record(context.tenant_id.as_str(), tokens_in + tokens_out).await;
        if let Ok(summary) = budget.summary(context.tenant_id.as_str()).await {
            audit.budget(Some(&summary));
        }
    }
    if total_redaction_count > 0 {
        queue_webhook(state, "redaction_hit", json!({"tenant_id": context.tenant_id.as_str(), "count": total_redaction_count}));
        audit.queue_webhook("redaction_hit");
    }
    if routed.attempts > 1 {
        queue_webhook(
            state,
            "provider_fallback",
            json!({"tenant_id": context.tenant_id.as_str(), "fallback_chain": routed.fallback_chain}),
        );
        audit.queue_webhook("provider_fallback");
    }

    state.audit.write_event(audit.build()).await?;
    Ok(response)
}

/// Runs the embeddings pipeline: policy, budget, routing, and audit, with
/// no retrieval or redaction stage.
///
/// # Errors
/// Returns [`AppError`] on any terminal failure.
pub async fn embeddings(
    state: &AppState,
    context: RequestContext,
    request: EmbeddingsRequest,
) -> Result<EmbeddingsResponse, AppError> {
    let mut audit = AuditEventBuilder::new(&context, &request.model, false);

    let request_payload_hash = hash_canonical_json(HashAlgorithm::Sha256, &request).map(|digest| digest.value).unwrap_or_default();
    let inputs = request.input.into_vec();
    let estimated_tokens = inputs.iter().map(|text| estimate_tokens(text)).sum::<u64>().max(1);
    let input = policy_input(&context, &request.model, &[], estimated_tokens);
    let (decision, label) = evaluate_policy(state, &input).await?;

    if !decision.allow {
        let reason = decision.deny_reason.clone().unwrap_or_else(|| "denied".to_string());
        queue_webhook(state, "policy_denied", json!({"tenant_id": context.tenant_id.as_str(), "reason": reason}));
        audit
            .policy(PolicyDecisionLabel::Deny, &decision.decision_id, &decision.evaluated_at, false, state.policy_mode, Some(&reason))
            .hashes(&request_payload_hash, &request_payload_hash)
            .set("provider", "policy-gate");
        state.audit.write_event(audit.build()).await?;
        return Err(AppError::policy_denied(reason));
    }

    audit.policy(label, &decision.decision_id, &decision.evaluated_at, decision.allow, state.policy_mode, decision.deny_reason.as_deref());

    if !model_allowed(&decision, &request.model) {
        state.audit.write_event(audit.build()).await?;
        return Err(AppError::model_forbidden());
    }

    let mut budget_summary = None;
    if let Some(budget) = &state.budget {
        match budget.check(context.tenant_id.as_str(), estimated_tokens).await {
            Err(_backend_error) => {
                state.audit.write_event(audit.build()).await?;
                return Err(AppError::budget_backend_unavailable());
            }
            Ok(BudgetCheckOutcome::Exceeded(_exceeded)) => {
                queue_webhook(state, "budget_exceeded", json!({"tenant_id": context.tenant_id.as_str()}));
                audit.set("provider", "budget-gate").set("deny_reason", "budget_exceeded");
                state.audit.write_event(audit.build()).await?;
                return Err(AppError::budget_exceeded());
            }
            Ok(BudgetCheckOutcome::Allowed(summary)) => budget_summary = Some(summary),
        }
    }
    audit.budget(budget_summary.as_ref()).hashes(&request_payload_hash, &request_payload_hash);

    let routed = route_embeddings_with_fallback(&state.providers, &state.default_provider, &request.model, &inputs, &state.retryable_statuses).await;
    let routed = match routed {
        Ok(routed) => routed,
        Err(error) => {
            queue_webhook(state, "provider_error", json!({"code": error.code, "status": error.status}));
            audit.set("provider", state.default_provider.as_str());
            state.audit.write_event(audit.build()).await?;
            return Err(AppError::from_provider_status(error.status, error.message));
        }
    };

    if !provider_allowed(&decision, &routed.provider_name) {
        state.audit.write_event(audit.build()).await?;
        return Err(AppError::provider_forbidden());
    }

    let response = routed.result;
    audit.routing(&routed.provider_name, &request.model, routed.attempts, &routed.fallback_chain);

    let tokens_in = response.usage.prompt_tokens;
    let cost_usd = embeddings_cost_usd(tokens_in);
    audit.usage(tokens_in, 0, cost_usd);

    if let Some(budget) = &state.budget {
        let _ = budget.record(context.tenant_id.as_str(), tokens_in).await;
        if let Ok(summary) = budget.summary(context.tenant_id.as_str()).await {
            audit.budget(Some(&summary));
        }
    }
    if routed.attempts > 1 {
        queue_webhook(
            state,
            "provider_fallback",
            json!({"tenant_id": context.tenant_id.as_str(), "fallback_chain": routed.fallback_chain}),
        );
        audit.queue_webhook("provider_fallback");
    }

    state.audit.write_event(audit.build()).await?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::last_user_message;
    use super::model_allowed;
    use super::provider_allowed;
    use srg_core::model::ChatMessage;
    use srg_core::model::ChatRole;
    use srg_core::model::PolicyDecision;
    use srg_core::model::ProviderConstraints;

    fn decision_with(constraints: Option<ProviderConstraints>) -> PolicyDecision {
        PolicyDecision {
            decision_id: "d1".to_string(),
            allow: true,
            deny_reason: None,
            policy_hash: "h".to_string(),
            evaluated_at: "2024-01-01T00:00:00Z".to_string(),
            transforms: Vec::new(),
            provider_constraints: constraints,
            connector_constraints: None,
            max_tokens_override: None,
        }
    }

    #[test]
    fn absent_constraints_allow_anything() {
        let decision = decision_with(None);
        assert!(model_allowed(&decision, "any-model"));
        assert!(provider_allowed(&decision, "any-provider"));
    }

    #[test]
    fn constraints_restrict_to_allow_listed_values() {
        let decision = decision_with(Some(ProviderConstraints {
            allowed_models: Some(vec!["gpt-safe".to_string()]),
            allowed_providers: Some(vec!["stub".to_string()]),
        }));
        assert!(model_allowed(&decision, "gpt-safe"));
        assert!(!model_allowed(&decision, "gpt-other"));
        assert!(provider_allowed(&decision, "stub"));
        assert!(!provider_allowed(&decision, "other"));
    }

    #[test]
    fn finds_last_user_message_skipping_trailing_system() {
        let messages = vec![
            ChatMessage { role: ChatRole::User, content: "first".to_string(), citations: None },
            ChatMessage { role: ChatRole::Assistant, content: "reply".to_string(), citations: None },
            ChatMessage { role: ChatRole::User, content: "second".to_string(), citations: None },
            ChatMessage { role: ChatRole::System, content: "guardrail".to_string(), citations: None },
        ];
        assert_eq!(last_user_message(&messages), "second");
    }
}
