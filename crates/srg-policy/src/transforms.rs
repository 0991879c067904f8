// crates/srg-policy/src/transforms.rs
// ============================================================================
// Module: Transform Application
// Description: Applies a policy decision's ordered transforms to an inbound
//              chat completion request.
// Purpose: Let policy reshape a request (guardrail injection, model
//          override, token cap) without the pipeline knowing transform
//          internals.
// Dependencies: srg-core
// ============================================================================

//! ## Overview
//! Transforms are applied in the order the decision lists them, not by
//! kind — a decision that prepends a guardrail twice applies it twice.
//! Unknown argument shapes fall back to the request's current value rather
//! than failing the request.

use srg_core::model::ChatCompletionRequest;
use srg_core::model::ChatMessage;
use srg_core::model::ChatRole;
use srg_core::model::TransformAction;
use srg_core::model::TransformKind;

/// Applies `transforms` to `request` in order, returning the transformed
/// request.
#[must_use]
pub fn apply_transforms(mut request: ChatCompletionRequest, transforms: &[TransformAction]) -> ChatCompletionRequest {
    for transform in transforms {
        match transform.kind {
            TransformKind::SetMaxTokens => {
                let value = transform
                    .args
                    .get("value")
                    .and_then(serde_json::Value::as_u64)
                    .and_then(|value| u32::try_from(value).ok())
                    .unwrap_or(request.max_tokens.unwrap_or(256));
                request.max_tokens = Some(value);
            }
            TransformKind::OverrideModel => {
                let model = transform
                    .args
                    .get("model")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| request.model.clone());
                request.model = model;
            }
            TransformKind::PrependSystemGuardrail => {
                let text = transform.args.get("text").and_then(serde_json::Value::as_str).unwrap_or_default();
                if text.is_empty() {
                    continue;
                }
                request.messages.insert(0, ChatMessage { role: ChatRole::System, content: text.to_string(), citations: None });
            }
        }
    }
    request
}

#[cfg(test)]
mod tests {
    use super::apply_transforms;
    use serde_json::json;
    use srg_core::model::ChatCompletionRequest;
    use srg_core::model::ChatMessage;
    use srg_core::model::ChatRole;
    use srg_core::model::TransformAction;
    use srg_core::model::TransformKind;
    use std::collections::BTreeMap;

    fn base_request() -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "gpt".to_string(),
            messages: vec![ChatMessage { role: ChatRole::User, content: "hi".to_string(), citations: None }],
            temperature: None,
            max_tokens: None,
            stream: false,
            rag: None,
        }
    }

    #[test]
    fn prepends_guardrail_then_caps_tokens_in_order() {
        let transforms = vec![
            TransformAction {
                kind: TransformKind::PrependSystemGuardrail,
                args: BTreeMap::from([("text".to_string(), json!("be careful"))]),
            },
            TransformAction { kind: TransformKind::SetMaxTokens, args: BTreeMap::from([("value".to_string(), json!(64))]) },
        ];

        let transformed = apply_transforms(base_request(), &transforms);
        assert_eq!(transformed.messages.len(), 2);
        assert_eq!(transformed.messages[0].role, ChatRole::System);
        assert_eq!(transformed.max_tokens, Some(64));
    }

    #[test]
    fn overrides_model() {
        let transforms =
            vec![TransformAction { kind: TransformKind::OverrideModel, args: BTreeMap::from([("model".to_string(), json!("gpt-safe"))]) }];
        let transformed = apply_transforms(base_request(), &transforms);
        assert_eq!(transformed.model, "gpt-safe");
    }
}
