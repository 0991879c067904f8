// crates/srg-policy/src/client.rs
// ============================================================================
// Module: Policy Clients
// Description: Remote OPA-shaped policy evaluator and an in-process
//              reference decider used when no policy endpoint is configured.
// Purpose: Let the gateway consult a policy engine without depending on any
//          concrete backend.
// Dependencies: reqwest, serde_json, sha2, srg-core
// ============================================================================

//! ## Overview
//! [`RemotePolicyClient`] POSTs `{"input": payload}` to a configured OPA
//! endpoint and unwraps its `result` envelope. [`InProcessPolicyClient`] is
//! a deterministic reference decider used in tests and single-process
//! deployments: it denies requests whose `requested_model` starts with
//! `"forbidden"` or whose `connector_targets` include a connector outside
//! its allowed set, and attaches a guardrail/token-cap transform pair to
//! any allowed request classified `pii` or `phi`.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sha2::Digest as _;
use sha2::Sha256;
use srg_core::model::ConnectorConstraints;
use srg_core::model::PolicyDecision;
use srg_core::model::ProviderConstraints;
use srg_core::model::TransformAction;
use srg_core::model::TransformKind;
use srg_core::traits::PolicyClient;
use srg_core::traits::PolicyOutcome;

/// Evaluates policy input against a remote OPA-shaped HTTP endpoint.
pub struct RemotePolicyClient {
    client: reqwest::Client,
    opa_url: String,
    policy_hash: String,
}

impl RemotePolicyClient {
    /// Builds a client against `opa_url`, timing evaluations out at
    /// `timeout_ms`. `policy_bundle_text` is hashed to produce the
    /// `policy_hash` stamped on decisions missing one.
    #[must_use]
    pub fn new(opa_url: impl Into<String>, timeout_ms: u64, policy_bundle_text: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            client,
            opa_url: opa_url.into(),
            policy_hash: hex_sha256(policy_bundle_text.as_bytes()),
        }
    }

    fn finalize(&self, mut decision: Value) -> PolicyOutcome {
        let Value::Object(map) = &mut decision else {
            return PolicyOutcome::ContractInvalid;
        };
        map.entry("decision_id").or_insert_with(|| Value::String(srg_core::identifiers::generate_uuid_v4()));
        map.entry("policy_hash").or_insert_with(|| Value::String(self.policy_hash.clone()));
        map.entry("evaluated_at").or_insert_with(|| Value::String(now_rfc3339()));
        map.entry("transforms").or_insert_with(|| Value::Array(Vec::new()));

        match serde_json::from_value::<PolicyDecision>(decision) {
            Ok(parsed) => PolicyOutcome::Decided(parsed),
            Err(_err) => PolicyOutcome::ContractInvalid,
        }
    }
}

#[async_trait]
impl PolicyClient for RemotePolicyClient {
    async fn evaluate(&self, input: &Value) -> PolicyOutcome {
        let response = self.client.post(&self.opa_url).json(&serde_json::json!({ "input": input })).send().await;

        let response = match response {
            Ok(response) => response,
            Err(err) if err.is_timeout() => return PolicyOutcome::Timeout,
            Err(_err) => return PolicyOutcome::ContractInvalid,
        };

        if !response.status().is_success() {
            return PolicyOutcome::ContractInvalid;
        }

        let Ok(parsed) = response.json::<Value>().await else {
            return PolicyOutcome::ContractInvalid;
        };

        let result = parsed.get("result").cloned().unwrap_or(parsed);
        self.finalize(result)
    }
}

/// Deterministic in-process policy decider, used when no `opa_url` is
/// configured. Mirrors the reference engine's local evaluation rules.
pub struct InProcessPolicyClient {
    allowed_connectors: BTreeSet<String>,
    policy_hash: String,
}

impl InProcessPolicyClient {
    /// Builds a decider that permits only `allowed_connectors`.
    #[must_use]
    pub fn new(allowed_connectors: BTreeSet<String>, policy_bundle_text: &str) -> Self {
        Self { allowed_connectors, policy_hash: hex_sha256(policy_bundle_text.as_bytes()) }
    }
}

#[async_trait]
impl PolicyClient for InProcessPolicyClient {
    async fn evaluate(&self, input: &Value) -> PolicyOutcome {
        let requested_model = input.get("requested_model").and_then(Value::as_str).unwrap_or_default();
        let classification = input.get("classification").and_then(Value::as_str).unwrap_or("public");
        let connector_targets: Vec<String> = input
            .get("connector_targets")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|item| item.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let mut allow = !requested_model.starts_with("forbidden");
        let mut deny_reason = if allow { None } else { Some("model_not_allowed".to_string()) };

        if allow && connector_targets.iter().any(|target| !self.allowed_connectors.contains(target)) {
            allow = false;
            deny_reason = Some("connector_not_allowed".to_string());
        }

        let mut transforms = Vec::new();
        if allow && matches!(classification, "phi" | "pii") {
            transforms.push(TransformAction {
                kind: TransformKind::PrependSystemGuardrail,
                args: BTreeMap::from([(
                    "text".to_string(),
                    Value::String("Do not expose sensitive identifiers. Use masked placeholders.".to_string()),
                )]),
            });
            transforms.push(TransformAction {
                kind: TransformKind::SetMaxTokens,
                args: BTreeMap::from([("value".to_string(), Value::from(256))]),
            });
        }

        let allowed_connectors: Vec<String> = self.allowed_connectors.iter().cloned().collect();
        let decision = PolicyDecision {
            decision_id: srg_core::identifiers::generate_uuid_v4(),
            allow,
            deny_reason,
            policy_hash: self.policy_hash.clone(),
            evaluated_at: now_rfc3339(),
            transforms,
            provider_constraints: Some(ProviderConstraints {
                allowed_providers: Some(vec!["stub".to_string()]),
                allowed_models: Some(vec![requested_model.to_string()]),
            }),
            connector_constraints: Some(ConnectorConstraints { allowed_connectors: Some(allowed_connectors) }),
            max_tokens_override: if allow { Some(256) } else { None },
        };

        PolicyOutcome::Decided(decision)
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::InProcessPolicyClient;
    use serde_json::json;
    use srg_core::traits::PolicyClient;
    use srg_core::traits::PolicyOutcome;
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn denies_forbidden_model() {
        let client = InProcessPolicyClient::new(BTreeSet::new(), "{}");
        let outcome = client.evaluate(&json!({"requested_model": "forbidden-x"})).await;
        match outcome {
            PolicyOutcome::Decided(decision) => {
                assert!(!decision.allow);
                assert_eq!(decision.deny_reason.as_deref(), Some("model_not_allowed"));
            }
            _ => panic!("expected a decision"),
        }
    }

    #[tokio::test]
    async fn attaches_guardrail_transforms_for_pii() {
        let mut allowed = BTreeSet::new();
        allowed.insert("docs".to_string());
        let client = InProcessPolicyClient::new(allowed, "{}");
        let outcome = client
            .evaluate(&json!({"requested_model": "gpt", "classification": "pii", "connector_targets": ["docs"]}))
            .await;
        match outcome {
            PolicyOutcome::Decided(decision) => {
                assert!(decision.allow);
                assert_eq!(decision.transforms.len(), 2);
            }
            _ => panic!("expected a decision"),
        }
    }
}
