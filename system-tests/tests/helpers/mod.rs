// system-tests/tests/helpers/mod.rs
// ============================================================================
// Module: Scenario Test Helpers
// Description: Shared harness for black-box HTTP scenario tests.
// ============================================================================

/// Collaborator test doubles (`FailingProvider`, `TimeoutPolicyClient`).
pub mod doubles;
/// Scenario builder and loopback server spawner.
pub mod harness;
