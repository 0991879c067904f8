// crates/srg-gateway/src/pipeline/streaming.rs
// ============================================================================
// Module: Streaming Pipeline Orchestrator
// Description: Runs the same pre-flight stages as the non-streaming pipeline,
//              then forwards a provider's token stream as Server-Sent Events.
// Purpose: The single seam `/v1/chat/completions` (stream=true) calls into.
// Dependencies: srg-core, srg-policy, srg-providers, srg-redaction,
//               srg-retrieval, srg-budget, axum, async-stream, tokio-stream
// ============================================================================

//! ## Overview
//! Pre-flight (policy through routing) is identical to
//! [`crate::pipeline::nonstreaming::chat_completions`]; only the response
//! shape and the audit-write timing differ. Because a client can disconnect
//! mid-stream, the audit event is written from an [`AuditGuard`] whose
//! `Drop` fires exactly once regardless of how the stream ends — normal
//! completion takes the fast path inline, everything else falls through to
//! the guard.

use std::sync::Arc;
use std::sync::Mutex;

use async_stream::stream;
use axum::response::sse::Event;
use axum::response::Sse;
use futures_util::Stream;
use serde_json::json;
use serde_json::Value;
use srg_core::error::AppError;
use srg_core::hashing::hash_canonical_json;
use srg_core::hashing::HashAlgorithm;
use srg_core::model::ChatCompletionRequest;
use srg_core::model::ChatMessage;
use srg_core::model::Citation;
use srg_core::model::PolicyDecision;
use srg_core::model::PolicyDecisionLabel;
use srg_core::model::RequestContext;
use srg_core::traits::ChatCompletionChunk;
use srg_core::traits::BudgetCheckOutcome;
use srg_providers::registry::route_chat_stream_with_fallback;
use srg_retrieval::RetrievalRequest;

use crate::app_state::AppState;
use crate::pipeline::chat_cost_usd;
use crate::pipeline::estimate_tokens;
use crate::pipeline::estimate_tokens_for_messages;
use crate::pipeline::policy_input;
use crate::pipeline::queue_webhook;
use crate::pipeline::synthesize_observe_decision;
use crate::pipeline::AuditEventBuilder;
use crate::pipeline::MID_STREAM_BUDGET_CHECK_EVERY;

/// Runs the same policy decision as the non-streaming pipeline; extracted
/// here too since the two modules must not depend on each other.
async fn evaluate_policy(state: &AppState, input: &Value) -> Result<(PolicyDecision, PolicyDecisionLabel), AppError> {
    use srg_core::model::PolicyMode;
    use srg_core::traits::PolicyOutcome;

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

fn last_user_message(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .rev()
        .find(|message| message.role == srg_core::model::ChatRole::User)
        .map(|message| message.content.clone())
        .unwrap_or_default()
}

/// Takes the audit event out of a shared slot and fires the write, never
/// blocking the caller. Used both at normal stream completion and, via
/// [`AuditGuard`], at early disconnection.
fn finalize_audit(state: &Arc<AppState>, slot: &Arc<Mutex<Option<AuditEventBuilder>>>) {
    #[allow(clippy::unwrap_used, reason = "lock is only ever held briefly and never poisoned by a panicking critical section")]
    let taken = slot.lock().unwrap().take();
    if let Some(builder) = taken {
        let state = state.clone();
        tokio::spawn(async move {
            let _ = state.audit.write_event(builder.build()).await;
        });
    }
}

/// Guard whose `Drop` writes the pending audit event exactly once, covering
/// the case where a client disconnects before the stream's body reaches its
/// normal end.
struct AuditGuard {
    state: Arc<AppState>,
    slot: Arc<Mutex<Option<AuditEventBuilder>>>,
}

impl Drop for AuditGuard {
    fn drop(&mut self) {
        finalize_audit(&self.state, &self.slot);
    }
}

fn chunk_event(chunk: &ChatCompletionChunk, citations: Option<&[Citation]>) -> Event {
    let mut value = serde_json::to_value(chunk).unwrap_or(Value::Null);
    if let (Some(object), Some(citations)) = (value.as_object_mut(), citations) {
        if !citations.is_empty() {
            object.insert("citations".to_string(), json!(citations));
        }
    }
    Event::default().data(value.to_string())
}

/// Runs the full streaming chat-completions pipeline, returning an SSE
/// response whose body forwards the routed provider's token stream.
///
/// # Errors
/// Returns [`AppError`] for any pre-flight failure (policy, retrieval,
/// redaction, budget, or routing-initiation). Failures once the stream is
/// already flowing are reported in-band as a terminal SSE payload, never as
/// a `Result::Err`.
pub async fn chat_completions_stream(
    state: Arc<AppState>,
    context: RequestContext,
    request: ChatCompletionRequest,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, AppError> {
    let mut audit = AuditEventBuilder::new(&context, &request.model, true);

    let request_payload_hash = hash_canonical_json(HashAlgorithm::Sha256, &request).map(|digest| digest.value).unwrap_or_default();
    let connector_targets: Vec<String> = request.rag.as_ref().map(|rag| vec![rag.connector.clone()]).into_iter().flatten().collect();
    let estimated_tokens = estimate_tokens_for_messages(&request.messages);
    let input = policy_input(&context, &request.model, &connector_targets, estimated_tokens);
    let (decision, label) = evaluate_policy(&state, &input).await?;

    if !decision.allow {
        let reason = decision.deny_reason.clone().unwrap_or_else(|| "denied".to_string());
        queue_webhook(&state, "policy_denied", json!({"tenant_id": context.tenant_id.as_str(), "reason": reason}));
        audit
            .policy(PolicyDecisionLabel::Deny, &decision.decision_id, &decision.evaluated_at, false, state.policy_mode, Some(&reason))
            .hashes(&request_payload_hash, &request_payload_hash)
            .set("provider", "policy-gate");
        state.audit.write_event(audit.build()).await?;
        return Err(AppError::policy_denied(reason));
    }

    audit.policy(label, &decision.decision_id, &decision.evaluated_at, decision.allow, state.policy_mode, decision.deny_reason.as_deref());
    audit.set("transforms_applied", decision.transforms.iter().map(|transform| transform.kind).collect::<Vec<_>>());

    let mut transformed = srg_policy::transforms::apply_transforms(request, &decision.transforms);
    let mut citations: Vec<Citation> = Vec::new();

    if let Some(rag) = transformed.rag.clone().filter(|rag| rag.enabled && state.config.rag.enabled) {
        let allowed = decision
            .connector_constraints
            .as_ref()
            .and_then(|constraints| constraints.allowed_connectors.clone())
            .map(|allowed| allowed.into_iter().collect())
            .unwrap_or_else(|| state.default_allowed_connectors.clone());
        let retrieval_request = RetrievalRequest {
            query: last_user_message(&transformed.messages),
            connector: rag.connector.clone(),
            k: rag.top_k,
            filters: rag.filters.clone(),
        };
        let chunks = state.retrieval.retrieve(&state.connectors, &retrieval_request, Some(&allowed)).await?;
        if !chunks.is_empty() {
            let context_text = chunks.iter().map(|chunk| format!("[{}] {}", chunk.chunk_id, chunk.text)).collect::<Vec<_>>().join("\n");
            transformed.messages.push(ChatMessage {
                role: srg_core::model::ChatRole::System,
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
    audit.set("input_redaction_count", input_redaction_count as u32);

    let model_allowed = decision
        .provider_constraints
        .as_ref()
        .and_then(|constraints| constraints.allowed_models.as_ref())
        .is_none_or(|allowed| allowed.iter().any(|allowed_model| allowed_model == &transformed.model));
    if !model_allowed {
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
                queue_webhook(&state, "budget_exceeded", json!({"tenant_id": context.tenant_id.as_str()}));
                audit.set("provider", "budget-gate").set("deny_reason", "budget_exceeded");
                state.audit.write_event(audit.build()).await?;
                return Err(AppError::budget_exceeded());
            }
            Ok(BudgetCheckOutcome::Allowed(summary)) => budget_summary = Some(summary),
        }
    }
    audit.budget(budget_summary.as_ref());

    let redacted_payload_hash = hash_canonical_json(HashAlgorithm::Sha256, &transformed.messages).map(|digest| digest.value).unwrap_or_default();
    audit.hashes(&request_payload_hash, &redacted_payload_hash);

    let routed = route_chat_stream_with_fallback(
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
            queue_webhook(&state, "provider_error", json!({"code": error.code, "status": error.status}));
            audit.set("provider", state.default_provider.as_str());
            state.audit.write_event(audit.build()).await?;
            return Err(AppError::from_provider_status(error.status, error.message));
        }
    };

    audit.routing(&routed.provider_name, &transformed.model, routed.attempts, &routed.fallback_chain);
    if routed.attempts > 1 {
        queue_webhook(&state, "provider_fallback", json!({"tenant_id": context.tenant_id.as_str(), "fallback_chain": routed.fallback_chain}));
        audit.queue_webhook("provider_fallback");
    }

    let redact_output = state.redaction_active(context.classification);
    let tenant_id = context.tenant_id.as_str().to_string();
    let tokens_in_estimate = estimated_tokens;
    let slot = Arc::new(Mutex::new(Some(audit)));
    let guard = AuditGuard { state: state.clone(), slot: slot.clone() };

    let body = stream! {
        let _guard = guard;
        let mut tokens_out = 0u64;
        let mut content_chunks_seen = 0usize;
        let mut saw_finish = false;
        let mut citations_sent = false;
        let mut mid_stream_terminated = false;
        let mut stream_error: Option<String> = None;

        let first = routed.first_chunk;
        if first.finish_reason.is_some() {
            saw_finish = true;
        }
        if let Some(usage) = &first.usage {
            tokens_out = tokens_out.max(usage.completion_tokens);
        }
        yield Ok(chunk_event(&first, if citations.is_empty() { None } else { Some(&citations) }));
        if !citations.is_empty() {
            citations_sent = true;
        }

        let mut provider_stream = routed.stream;
        while let Some(item) = futures_util::StreamExt::next(&mut provider_stream).await {
            match item {
                Ok(chunk) => {
                    if chunk.delta_content.is_some() {
                        tokens_out += estimate_tokens(chunk.delta_content.as_deref().unwrap_or_default());
                        content_chunks_seen += 1;
                    }
                    if let Some(usage) = &chunk.usage {
                        tokens_out = tokens_out.max(usage.completion_tokens);
                    }
                    if chunk.finish_reason.is_some() {
                        saw_finish = true;
                    }

                    let attach_citations = !citations_sent && !citations.is_empty();
                    yield Ok(chunk_event(&chunk, if attach_citations { Some(&citations) } else { None }));
                    if attach_citations {
                        citations_sent = true;
                    }

                    if let Some(budget) = &state.budget {
                        if content_chunks_seen > 0 && content_chunks_seen % MID_STREAM_BUDGET_CHECK_EVERY == 0 {
                            let accrued = tokens_in_estimate + tokens_out;
                            match budget.check_running(&tenant_id, accrued).await {
                                Ok(true) | Err(_) => {}
                                Ok(false) => {
                                    mid_stream_terminated = true;
                                    let final_chunk = ChatCompletionChunk {
                                        id: chunk.id.clone(),
                                        object: chunk.object.clone(),
                                        created: chunk.created,
                                        model: chunk.model.clone(),
                                        delta_content: None,
                                        finish_reason: Some("length".to_string()),
                                        usage: None,
                                    };
                                    yield Ok(chunk_event(&final_chunk, None));
                                    saw_finish = true;
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(error) => {
                    stream_error = Some(error.code.to_string());
                    break;
                }
            }
        }

        if !saw_finish && stream_error.is_none() {
            let final_chunk = ChatCompletionChunk {
                id: "stream-final".to_string(),
                object: "chat.completion.chunk".to_string(),
                created: 0,
                model: String::new(),
                delta_content: None,
                finish_reason: Some("stop".to_string()),
                usage: None,
            };
            yield Ok(chunk_event(&final_chunk, if citations_sent { None } else { Some(&citations) }));
        }

        let cost_usd = chat_cost_usd(tokens_in_estimate, tokens_out);
        if let Some(budget) = &state.budget {
            let _ = budget.record(&tenant_id, tokens_in_estimate + tokens_out).await;
        }

        {
            #[allow(clippy::unwrap_used, reason = "lock is only ever held briefly and never poisoned by a panicking critical section")]
            let mut guard_slot = slot.lock().unwrap();
            if let Some(builder) = guard_slot.as_mut() {
                builder.usage(tokens_in_estimate, tokens_out, cost_usd);
                builder.set("budget_mid_stream_terminated", mid_stream_terminated);
                if let Some(error_code) = &stream_error {
                    builder.set("stream_error", error_code.as_str());
                }
            }
        }
        finalize_audit(&state, &slot);

        if stream_error.is_none() {
            yield Ok(Event::default().data("[DONE]"));
        }
    };

    Ok(Sse::new(body))
}

#[cfg(test)]
mod tests {
    use super::chunk_event;
    use srg_core::model::Citation;
    use srg_core::traits::ChatCompletionChunk;

    #[test]
    fn attaches_citations_only_when_present() {
        let chunk = ChatCompletionChunk {
            id: "c1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "gpt".to_string(),
            delta_content: Some("hi".to_string()),
            finish_reason: None,
            usage: None,
        };
        let citations = vec![Citation {
            source_id: "s1".to_string(),
            connector: "docs".to_string(),
            uri: "file://doc".to_string(),
            chunk_id: "chunk-1".to_string(),
            score: 0.9,
        }];
        let event_with = chunk_event(&chunk, Some(&citations));
        let event_without = chunk_event(&chunk, None);
        assert_ne!(format!("{event_with:?}"), format!("{event_without:?}"));
    }
}
