// system-tests/tests/smoke.rs
// ============================================================================
// Scenario: Smoke
// Description: Unauthenticated liveness/readiness/metrics endpoints respond
//              without requiring a bearer token or principal headers.
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
use helpers::harness::ScenarioBuilder;
use srg_policy::InProcessPolicyClient;
use std::collections::BTreeSet;
use std::sync::Arc;

#[tokio::test]
async fn healthz_readyz_and_metrics_require_no_auth() {
    let log_dir = tempfile::tempdir().expect("tempdir");
    let policy = Arc::new(InProcessPolicyClient::new(BTreeSet::new(), "enforce:tests"));
    let state = ScenarioBuilder::stub_only(policy, log_dir.path().join("audit.jsonl")).build();
    let server = spawn_gateway(state).await;
    let client = server.client();

    let healthz = client.get(server.url("/healthz")).send().await.expect("healthz reachable");
    assert_eq!(healthz.status(), 200);
    let body: serde_json::Value = healthz.json().await.expect("healthz body parses");
    assert_eq!(body["status"], "ok");

    let readyz = client.get(server.url("/readyz")).send().await.expect("readyz reachable");
    assert_eq!(readyz.status(), 200);

    let metrics = client.get(server.url("/metrics")).send().await.expect("metrics reachable");
    assert_eq!(metrics.status(), 200);
    let text = metrics.text().await.expect("metrics body reads");
    assert!(text.contains("srg_gateway_up 1"));

    server.shutdown().await;
}

#[tokio::test]
async fn chat_completions_without_bearer_token_is_unauthenticated() {
    let log_dir = tempfile::tempdir().expect("tempdir");
    let policy = Arc::new(InProcessPolicyClient::new(BTreeSet::new(), "enforce:tests"));
    let state = ScenarioBuilder::stub_only(policy, log_dir.path().join("audit.jsonl")).build();
    let server = spawn_gateway(state).await;

    let response = server
        .client()
        .post(server.url("/v1/chat/completions"))
        .json(&serde_json::json!({"model": "gpt-4o-mini", "messages": []}))
        .send()
        .await
        .expect("request completes");

    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await.expect("error envelope parses");
    assert_eq!(body["error"]["code"], "auth_missing");

    server.shutdown().await;
}
