// system-tests/tests/streaming.rs
// ============================================================================
// Scenario: Streaming
// Description: A streaming chat completion request returns an SSE body
//              terminated by `[DONE]`, and exactly one audit event is
//              still written for the whole stream.
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

use futures_util::StreamExt;
use helpers::harness::spawn_gateway;
use helpers::harness::GatewayServerHandle;
use helpers::harness::ScenarioBuilder;
use srg_policy::InProcessPolicyClient;
use std::collections::BTreeSet;
use std::sync::Arc;

#[tokio::test]
async fn streamed_completion_ends_with_done_and_audits_once() {
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
            "messages": [{"role": "user", "content": "stream me a reasonably long answer please"}],
            "stream": true,
        }))
        .send()
        .await
        .expect("request completes");

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers().get("cache-control").map(|v| v.to_str().unwrap_or_default()), Some("no-cache"));

    let mut body = response.bytes_stream();
    let mut collected = String::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.expect("stream chunk reads");
        collected.push_str(&String::from_utf8_lossy(&chunk));
    }

    assert!(collected.contains("data: [DONE]"), "expected a terminal [DONE] event, got:\n{collected}");

    let contents = std::fs::read_to_string(&audit_log_path).expect("audit log readable");
    let lines: Vec<&str> = contents.lines().filter(|line| !line.trim().is_empty()).collect();
    assert_eq!(lines.len(), 1, "exactly one audit event expected for a fully-consumed stream");
    let event: serde_json::Value = serde_json::from_str(lines[0]).expect("audit line is valid json");
    assert_eq!(event["streaming"], true);
    assert_eq!(event["provider"], "stub");

    server.shutdown().await;
}
