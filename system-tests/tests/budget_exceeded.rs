// system-tests/tests/budget_exceeded.rs
// ============================================================================
// Scenario: Budget Exceeded
// Description: A tenant whose estimated token usage exceeds a tight
//              ceiling is rejected by the budget gate before any provider
//              call, with the denial recorded in the audit log.
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
use srg_budget::InMemoryBudgetTracker;
use srg_core::traits::BudgetTracker;
use srg_policy::InProcessPolicyClient;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::test]
async fn request_exceeding_tenant_ceiling_is_rejected() {
    let log_dir = tempfile::tempdir().expect("tempdir");
    let audit_log_path = log_dir.path().join("audit.jsonl");
    let policy = Arc::new(InProcessPolicyClient::new(BTreeSet::new(), "enforce:tests"));
    let budget: Arc<dyn BudgetTracker> = Arc::new(InMemoryBudgetTracker::new(5, 3600, HashMap::new()));

    let mut builder = ScenarioBuilder::stub_only(policy, audit_log_path.clone());
    builder.budget = Some(budget);
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
            "messages": [{"role": "user", "content": "a question with rather more than five words in it"}],
        }))
        .send()
        .await
        .expect("request completes");

    assert_eq!(response.status(), 429);
    let body: serde_json::Value = response.json().await.expect("error envelope parses");
    assert_eq!(body["error"]["code"], "budget_exceeded");

    let contents = std::fs::read_to_string(&audit_log_path).expect("audit log readable");
    let lines: Vec<&str> = contents.lines().filter(|line| !line.trim().is_empty()).collect();
    assert_eq!(lines.len(), 1);
    let event: serde_json::Value = serde_json::from_str(lines[0]).expect("audit line is valid json");
    assert_eq!(event["provider"], "budget-gate");
    assert_eq!(event["deny_reason"], "budget_exceeded");

    server.shutdown().await;
}
