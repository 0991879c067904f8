// system-tests/tests/observe_mode.rs
// ============================================================================
// Scenario: Observe Mode
// Description: Under `observe` policy mode, a policy-engine outage is
//              converted into a synthesized allow decision instead of a
//              hard failure, with the outage reason preserved in the
//              audit event.
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

use helpers::doubles::TimeoutPolicyClient;
use helpers::harness::spawn_gateway;
use helpers::harness::GatewayServerHandle;
use helpers::harness::ScenarioBuilder;
use srg_core::model::PolicyMode;
use std::sync::Arc;

#[tokio::test]
async fn policy_outage_under_observe_mode_allows_the_request() {
    let log_dir = tempfile::tempdir().expect("tempdir");
    let audit_log_path = log_dir.path().join("audit.jsonl");

    let mut builder = ScenarioBuilder::stub_only(Arc::new(TimeoutPolicyClient), audit_log_path.clone());
    builder.policy_mode = PolicyMode::Observe;
    let state = builder.build();
    let server = spawn_gateway(state).await;

    let headers = GatewayServerHandle::auth_headers("acme", "alice", "public");
    let mut request = server.client().post(server.url("/v1/chat/completions"));
    for (name, value) in headers {
        request = request.header(name, value);
    }
    let response = request
        .json(&serde_json::json!({
            "model": "gpt-4o-mini",
            "messages": [{"role": "user", "content": "is anyone home"}],
        }))
        .send()
        .await
        .expect("request completes");

    assert_eq!(response.status(), 200);

    let contents = std::fs::read_to_string(&audit_log_path).expect("audit log readable");
    let lines: Vec<&str> = contents.lines().filter(|line| !line.trim().is_empty()).collect();
    assert_eq!(lines.len(), 1);
    let event: serde_json::Value = serde_json::from_str(lines[0]).expect("audit line is valid json");
    assert_eq!(event["policy_decision"], "observe");
    assert_eq!(event["policy_allow"], true);
    assert_eq!(event["deny_reason"], "policy_timeout");

    server.shutdown().await;
}

#[tokio::test]
async fn policy_outage_under_enforce_mode_is_unavailable() {
    let log_dir = tempfile::tempdir().expect("tempdir");
    let audit_log_path = log_dir.path().join("audit.jsonl");

    let state = ScenarioBuilder::stub_only(Arc::new(TimeoutPolicyClient), audit_log_path.clone()).build();
    let server = spawn_gateway(state).await;

    let headers = GatewayServerHandle::auth_headers("acme", "alice", "public");
    let mut request = server.client().post(server.url("/v1/chat/completions"));
    for (name, value) in headers {
        request = request.header(name, value);
    }
    let response = request
        .json(&serde_json::json!({
            "model": "gpt-4o-mini",
            "messages": [{"role": "user", "content": "is anyone home"}],
        }))
        .send()
        .await
        .expect("request completes");

    assert_eq!(response.status(), 503);
    let body: serde_json::Value = response.json().await.expect("error envelope parses");
    assert_eq!(body["error"]["code"], "policy_unavailable");

    assert!(!audit_log_path.exists() || std::fs::read_to_string(&audit_log_path).unwrap_or_default().trim().is_empty());

    server.shutdown().await;
}
