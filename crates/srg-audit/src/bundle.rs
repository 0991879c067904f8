// crates/srg-audit/src/bundle.rs
// ============================================================================
// Module: Evidence Bundle Export
// Description: Assembles a single request's audit trail into a
//              self-contained, schema-validated evidence bundle.
// Purpose: Let an operator hand a regulator or incident responder one JSON
//          document proving what happened for one request, without
//          granting access to the full audit log.
// Dependencies: jsonschema, serde_json, srg-core
// ============================================================================

//! ## Overview
//! [`build_bundle`] locates the last audit event recorded for a
//! `request_id` (requests may append more than one event, e.g. a retried
//! stream), verifies its position in the hash chain, and projects it into
//! the `evidence-bundle` schema shape. Bundle generation never signs or
//! writes files itself — that belongs to the CLI subcommand that calls it.

use std::path::Path;

use jsonschema::Validator;
use serde_json::json;
use serde_json::Value;

use crate::verify::verify_chain;

/// Evidence bundle assembly failure.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// No audit event matched the requested `request_id`.
    #[error("no audit event found for request_id {0:?}")]
    RequestNotFound(String),
    /// The audit log could not be read.
    #[error("failed to read audit log: {0}")]
    Io(#[from] std::io::Error),
    /// The assembled bundle failed schema validation.
    #[error("evidence bundle failed schema validation: {0}")]
    SchemaInvalid(String),
}

/// Reads every NDJSON line of `audit_log_path` as a loosely-typed JSON
/// object, skipping blank and unparseable lines (the last line may be an
/// in-flight write, matching [`verify_chain`]'s tolerance).
fn load_events(audit_log_path: &Path) -> std::io::Result<Vec<Value>> {
    let Ok(contents) = std::fs::read_to_string(audit_log_path) else {
        return Ok(Vec::new());
    };
    Ok(contents.lines().filter(|line| !line.trim().is_empty()).filter_map(|line| serde_json::from_str(line).ok()).collect())
}

fn find_last_event_for_request<'events>(events: &'events [Value], request_id: &str) -> Option<(usize, &'events Value)> {
    events.iter().enumerate().rev().find(|(_index, event)| event.get("request_id").and_then(Value::as_str) == Some(request_id))
}

fn str_field(event: &Value, field: &str) -> String {
    event.get(field).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn u64_field(event: &Value, field: &str) -> u64 {
    event.get(field).and_then(Value::as_u64).unwrap_or(0)
}

/// Builds the `evidence-bundle` JSON document for one request, without
/// validating it against a schema.
#[must_use]
pub fn build_bundle(event: &Value, chain_verified: bool, audit_log_path: &Path) -> Value {
    let citations = event.get("retrieval_citations").and_then(Value::as_array).cloned().unwrap_or_default();
    let connector = citations.first().and_then(|citation| citation.get("connector")).and_then(Value::as_str).map(str::to_string);

    let generated_at = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default();

    json!({
        "bundle_version": "v1",
        "request_id": str_field(event, "request_id"),
        "generated_at": generated_at,
        "policy": {
            "decision_id": str_field(event, "policy_decision_id"),
            "policy_hash": event.get("policy_hash").cloned().unwrap_or(Value::Null),
            "policy_mode": str_field(event, "policy_mode"),
            "allow": event.get("policy_allow").and_then(Value::as_bool).unwrap_or(false),
            "deny_reason": event.get("deny_reason").cloned().unwrap_or(Value::Null),
        },
        "redaction": {
            "count": u64_field(event, "redaction_count"),
            "request_payload_hash": str_field(event, "request_payload_hash"),
            "redacted_payload_hash": str_field(event, "redacted_payload_hash"),
        },
        "retrieval": {
            "enabled": !citations.is_empty(),
            "connector": connector,
            "citations": citations,
        },
        "provider": {
            "provider": str_field(event, "provider"),
            "selected_model": str_field(event, "selected_model"),
            "attempts": u64_field(event, "provider_attempts").max(1),
            "fallback_chain": event.get("fallback_chain").cloned().unwrap_or_else(|| json!([])),
            "provider_request_hash": event.get("provider_request_hash").cloned().unwrap_or(Value::Null),
            "provider_response_hash": event.get("provider_response_hash").cloned().unwrap_or(Value::Null),
        },
        "usage": {
            "tokens_in": u64_field(event, "tokens_in"),
            "tokens_out": u64_field(event, "tokens_out"),
            "cost_usd": event.get("cost_usd").and_then(Value::as_f64).unwrap_or(0.0),
        },
        "integrity": {
            "prev_hash": str_field(event, "prev_hash"),
            "payload_hash": str_field(event, "payload_hash"),
            "chain_verified": chain_verified,
        },
        "source": {
            "audit_log_path": audit_log_path.to_string_lossy(),
            "event_id": str_field(event, "event_id"),
        },
    })
}

/// Finds the last audit event for `request_id`, assembles its evidence
/// bundle, and validates it against `schema`.
///
/// `include_chain_verify` mirrors the original tool's two verification
/// depths: when `true`, the whole log's hash chain is walked; when
/// `false`, only this event's own link to its predecessor is checked.
///
/// # Errors
/// Returns [`BundleError::RequestNotFound`] if no event matches, or
/// [`BundleError::SchemaInvalid`] if the assembled bundle does not conform
/// to `schema`.
pub fn generate_bundle(
    request_id: &str,
    audit_log_path: &Path,
    schema: &Validator,
    include_chain_verify: bool,
) -> Result<Value, BundleError> {
    let events = load_events(audit_log_path)?;
    let Some((index, event)) = find_last_event_for_request(&events, request_id) else {
        return Err(BundleError::RequestNotFound(request_id.to_string()));
    };

    let chain_verified = if include_chain_verify {
        verify_chain(audit_log_path)?.is_intact()
    } else {
        links_to_predecessor(&events, index)
    };

    let bundle = build_bundle(event, chain_verified, audit_log_path);
    schema.validate(&bundle).map_err(|err| BundleError::SchemaInvalid(err.to_string()))?;
    Ok(bundle)
}

fn links_to_predecessor(events: &[Value], index: usize) -> bool {
    let event = &events[index];
    let expected_prev = if index == 0 { String::new() } else { str_field(&events[index - 1], "payload_hash") };
    str_field(event, "prev_hash") == expected_prev
}

#[cfg(test)]
mod tests {
    use super::build_bundle;
    use super::find_last_event_for_request;
    use super::generate_bundle;
    use jsonschema::Draft;
    use serde_json::json;
    use std::io::Write as _;
    use std::path::Path;
    use tempfile::NamedTempFile;

    fn sample_event(request_id: &str) -> serde_json::Value {
        json!({
            "request_id": request_id,
            "policy_decision_id": "d1",
            "policy_mode": "enforce",
            "policy_allow": true,
            "redaction_count": 0,
            "request_payload_hash": "h1",
            "redacted_payload_hash": "h1",
            "provider": "stub",
            "selected_model": "gpt-4o-mini",
            "provider_attempts": 1,
            "tokens_in": 10,
            "tokens_out": 5,
            "cost_usd": 0.00002,
            "prev_hash": "",
            "payload_hash": "abc",
            "event_id": "evt-1",
        })
    }

    #[test]
    fn builds_bundle_with_expected_shape() {
        let event = sample_event("req-1");
        let bundle = build_bundle(&event, true, Path::new("events.jsonl"));
        assert_eq!(bundle["request_id"], "req-1");
        assert_eq!(bundle["usage"]["tokens_in"], 10);
        assert_eq!(bundle["integrity"]["chain_verified"], true);
    }

    #[test]
    fn finds_last_matching_event_for_request() {
        let events = vec![sample_event("req-1"), sample_event("req-2"), sample_event("req-1")];
        let (index, _event) = find_last_event_for_request(&events, "req-1").expect("found");
        assert_eq!(index, 2);
    }

    #[test]
    fn generate_bundle_errors_when_request_missing() {
        let file = NamedTempFile::new().expect("tempfile");
        let schema = jsonschema::options().with_draft(Draft::Draft202012).build(&json!({"type": "object"})).expect("compiles");
        let result = generate_bundle("missing", file.path(), &schema, false);
        assert!(result.is_err());
    }

    #[test]
    fn generate_bundle_succeeds_for_matching_request() {
        let mut file = NamedTempFile::new().expect("tempfile");
        writeln!(file, "{}", sample_event("req-1")).expect("write");
        let schema = jsonschema::options().with_draft(Draft::Draft202012).build(&json!({"type": "object"})).expect("compiles");
        let bundle = generate_bundle("req-1", file.path(), &schema, false).expect("bundle built");
        assert_eq!(bundle["request_id"], "req-1");
    }
}
