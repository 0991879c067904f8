// crates/srg-audit/src/writer.rs
// ============================================================================
// Module: File Audit Writer
// Description: Hash-chained, schema-validated NDJSON audit log writer.
// Purpose: Append exactly one durable audit event per accepted request,
//          regardless of success or failure path.
// Dependencies: srg-core, jsonschema, serde_json, tokio
// ============================================================================

//! ## Overview
//! `write_event` augments the caller's partial event with `event_id`,
//! `created_at`, `prev_hash` (the previous line's `payload_hash`, read via
//! a reverse byte-scan so large logs aren't fully buffered), and
//! `payload_hash` itself, validates the result against the audit-event
//! schema, and appends it as one line. Writes are serialized through a
//! single [`tokio::sync::Mutex`] — fsync is deliberately not used, per
//! spec.md §9 ("Audit durability").

use std::io::Read as _;
use std::io::Seek as _;
use std::io::SeekFrom;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use jsonschema::Validator;
use serde_json::Map;
use serde_json::Value;
use srg_core::error::AppError;
use srg_core::hashing::canonical_json_bytes;
use srg_core::hashing::hash_bytes;
use srg_core::hashing::HashAlgorithm;
use srg_core::identifiers::generate_uuid_v4;
use srg_core::model::AuditEvent;
use srg_core::traits::AuditSink;
use tokio::sync::Mutex;

/// Hash-chained append-only audit writer.
pub struct FileAuditWriter {
    log_path: PathBuf,
    schema: Validator,
    write_lock: Mutex<()>,
}

impl FileAuditWriter {
    /// Builds a writer appending to `log_path`, validating every event
    /// against the compiled audit-event schema.
    #[must_use]
    pub fn new(log_path: impl Into<PathBuf>, schema: Validator) -> Self {
        Self {
            log_path: log_path.into(),
            schema,
            write_lock: Mutex::new(()),
        }
    }

    fn last_payload_hash(path: &Path) -> String {
        let Some(last_line) = read_last_line(path) else {
            return String::new();
        };
        let Ok(parsed) = serde_json::from_str::<Value>(&last_line) else {
            return String::new();
        };
        parsed
            .get("payload_hash")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default()
    }

    fn augment_and_validate(&self, event: Value, prev_hash: String) -> Result<Value, AppError> {
        let Value::Object(mut map) = event else {
            return Err(AppError::audit_write_failed());
        };

        map.entry("event_id").or_insert_with(|| Value::String(generate_uuid_v4()));
        map.entry("created_at").or_insert_with(|| Value::String(now_rfc3339()));
        map.insert("prev_hash".to_string(), Value::String(prev_hash));

        let payload_hash = compute_payload_hash(&map)?;
        map.insert("payload_hash".to_string(), Value::String(payload_hash));

        let payload = Value::Object(map);
        if let Err(error) = self.schema.validate(&payload) {
            tracing::warn!(error = %error, "audit event failed schema validation");
            return Err(AppError::audit_write_failed());
        }
        Ok(payload)
    }

    fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

fn compute_payload_hash(map: &Map<String, Value>) -> Result<String, AppError> {
    let without_hash = Value::Object(map.clone());
    let bytes = canonical_json_bytes(&without_hash).map_err(|_err| AppError::audit_write_failed())?;
    Ok(hash_bytes(HashAlgorithm::Sha256, &bytes).value)
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Reads the last complete line of a file via a reverse byte-scan, so the
/// whole file never needs to be buffered. Returns `None` if the file is
/// absent, empty, or unreadable.
fn read_last_line(path: &Path) -> Option<String> {
    let mut file = std::fs::File::open(path).ok()?;
    let size = file.seek(SeekFrom::End(0)).ok()?;
    if size == 0 {
        return None;
    }

    let mut position = size.saturating_sub(1);
    while position > 0 {
        file.seek(SeekFrom::Start(position)).ok()?;
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte).ok()?;
        if byte[0] == b'\n' {
            position += 1;
            break;
        }
        position -= 1;
    }

    file.seek(SeekFrom::Start(position)).ok()?;
    let mut rest = String::new();
    file.read_to_string(&mut rest).ok()?;
    let trimmed = rest.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[async_trait]
impl AuditSink for FileAuditWriter {
    async fn write_event(&self, event: Value) -> Result<AuditEvent, AppError> {
        let _guard = self.write_lock.lock().await;
        let log_path = self.log_path.clone();

        let prev_hash = {
            let path = log_path.clone();
            tokio::task::spawn_blocking(move || Self::last_payload_hash(&path))
                .await
                .map_err(|_join_error| AppError::audit_write_failed())?
        };

        let payload = self.augment_and_validate(event, prev_hash)?;
        let line = serde_json::to_string(&payload).map_err(|_err| AppError::audit_write_failed())?;

        tokio::task::spawn_blocking(move || Self::append_line(&log_path, &line))
            .await
            .map_err(|_join_error| AppError::audit_write_failed())?
            .map_err(|_io_error| AppError::audit_write_failed())?;

        serde_json::from_value(payload).map_err(|_err| AppError::audit_write_failed())
    }
}

#[cfg(test)]
mod tests {
    use super::FileAuditWriter;
    use jsonschema::Draft;
    use serde_json::json;
    use srg_core::traits::AuditSink;
    use tempfile::tempdir;

    fn permissive_schema() -> jsonschema::Validator {
        jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&json!({"type": "object"}))
            .expect("schema compiles")
    }

    #[tokio::test]
    async fn chains_payload_hash_across_appends() {
        let dir = tempdir().expect("tempdir");
        let log_path = dir.path().join("audit.ndjson");
        let writer = FileAuditWriter::new(log_path, permissive_schema());

        let first = writer
            .write_event(json!({"request_id": "r1", "tenant_id": "t1"}))
            .await
            .expect("writes first event");
        assert_eq!(first.prev_hash, "");

        let second = writer
            .write_event(json!({"request_id": "r2", "tenant_id": "t1"}))
            .await
            .expect("writes second event");
        assert_eq!(second.prev_hash, first.payload_hash);
    }
}
