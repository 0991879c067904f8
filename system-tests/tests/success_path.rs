// system-tests/tests/success_path.rs
// ============================================================================
// Scenario: Success Path
// Description: A valid authenticated chat completion request is allowed,
//              routed to the "stub" provider, and produces exactly one
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

use helpers::harness::spawn_gateway;
use helpers::harness::GatewayServerHandle;
use helpers::harness::ScenarioBuilder;
use srg_policy::InProcessPolicyClient;
use std::collections::BTreeSet;
use std::sync::Arc;

fn read_audit_lines(path: &std::path::Path) -> Vec<serde_json::Value> {
    let contents = std::fs::read_to_string(path).unwrap_or_default();
    contents.lines().filter(|line| !line.trim().is_empty()).map(|line| serde_json::from_str(line).expect("audit line is valid json")).collect()
}

#[tokio::test]
async fn valid_chat_completion_succeeds_and_audits_exactly_once() {
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
            "model": "gpt-4o-mini",
            "messages": [{"role": "user", "content": "What is the capital of France?"}],
        }))
        .send()
        .await
        .expect("request completes");

    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));
    let body: serde_json::Value = response.json().await.expect("response body parses");
    assert_eq!(body["object"], "chat.completion");
    let content = body["choices"][0]["message"]["content"].as_str().expect("message content present");
    assert!(content.contains("Stub response"));

    let events = read_audit_lines(&audit_log_path);
    assert_eq!(events.len(), 1, "exactly one audit event expected, got {events:?}");
    assert_eq!(events[0]["tenant_id"], "acme");
    assert_eq!(events[0]["provider"], "stub");

    server.shutdown().await;
}
