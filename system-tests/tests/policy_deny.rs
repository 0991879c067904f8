// system-tests/tests/policy_deny.rs
// ============================================================================
// Scenario: Policy Deny
// Description: A request targeting a forbidden model is denied by the
//              policy stage before any provider is ever called, and an
//              audit event records the denial.
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::missing_docs_in_private_items,
    reason = "Test-only framing assertions."
)]

#[path = "helpers/mod.rs"]
mod helpers;

use helpers::harness::spawn_gateway;
use helpers::harness::GatewayServerHandle;
use helpers::harness::ScenarioBuilder;
use srg_policy::InProcessPolicyClient;
use std::collections::BTreeSet;
use std::sync::Arc;

#[tokio::test]
async fn forbidden_model_is_denied_with_audit_record() {
    let log_dir = tempfile::tempdir().expect("tempdir");
    let audit_log_path = log_dir.path().join("audit.jsonl");
    let policy = Arc::new(InProcessPolicyClient::new(BTreeSet::new(), "enforce:tests"));
    let state = ScenarioBuilder::stub_only(policy, audit_log_path.clone()).build();
    let server = spawn_gateway(state).await;

    let headers = GatewayServerHandle::auth_headers("acme", "alice", "public");
    let mut request = server.client().post(server.url("/v1/chat/completions"));
    for (name, value) in headers {
        request = request.header(name, value);
    }
    let response = request
        .json(&serde_json::json!({
            "model": "forbidden-model",
            "messages": [{"role": "user", "content": "tell me something"}],
        }))
        .send()
        .await
        .expect("request completes");

    assert_eq!(response.status(), 403);
    let body: serde_json::Value = response.json().await.expect("error envelope parses");
    assert_eq!(body["error"]["code"], "policy_denied");

    let contents = std::fs::read_to_string(&audit_log_path).expect("audit log readable");
    let lines: Vec<&str> = contents.lines().filter(|line| !line.trim().is_empty()).collect();
    assert_eq!(lines.len(), 1, "exactly one audit event expected for the denied request");
    let event: serde_json::Value = serde_json::from_str(lines[0]).expect("audit line is valid json");
    assert_eq!(event["provider"], "policy-gate");
    assert_eq!(event["policy_decision"], "deny");
    assert_eq!(event["policy_allow"], false);

    server.shutdown().await;
}
