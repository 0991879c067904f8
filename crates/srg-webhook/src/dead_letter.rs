// crates/srg-webhook/src/dead_letter.rs
// ============================================================================
// Module: Webhook Dead-Letter Stores
// Description: JSONL and SQLite persistence for webhook deliveries that
//              exhausted their retries.
// Purpose: Let an operator inspect and replay failed webhook deliveries.
// Dependencies: rusqlite, serde_json, srg-core, tokio
// ============================================================================

//! ## Overview
//! Both backends append one record per exhausted delivery and prune
//! entries older than an optional retention window on every write, mirroring
//! the reference implementation's per-write prune rather than a background
//! sweep.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::params;
use rusqlite::Connection;
use srg_core::error::AppError;
use srg_core::model::WebhookDeliveryRecord;
use srg_core::traits::DeadLetterStore;

const SCHEMA_VERSION: i64 = 1;

/// JSONL-backed dead-letter store.
pub struct JsonlDeadLetterStore {
    path: PathBuf,
    retention_days: Option<i64>,
}

impl JsonlDeadLetterStore {
    /// Builds a store appending to `path`, pruning records older than
    /// `retention_days` on every write (`None` disables pruning).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, retention_days: Option<i64>) -> Self {
        Self { path: path.into(), retention_days }
    }
}

#[async_trait]
impl DeadLetterStore for JsonlDeadLetterStore {
    async fn append(&self, record: WebhookDeliveryRecord) -> Result<(), AppError> {
        let path = self.path.clone();
        let line = serde_json::to_string(&record).map_err(|_err| AppError::internal())?;
        let retention_days = self.retention_days;

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let existing = std::fs::read_to_string(&path).unwrap_or_default();
            let mut lines: Vec<String> = existing.lines().map(str::to_string).collect();
            lines.push(line);

            let lines = if retention_days.is_some_and(|days| days > 0) {
                prune_lines(&lines, retention_days.expect("checked is_some_and above"))
            } else {
                lines
            };

            let mut contents = lines.join("\n");
            contents.push('\n');
            std::fs::write(&path, contents)
        })
        .await
        .map_err(|_join_error| AppError::internal())?
        .map_err(|_io_error| AppError::internal())
    }

    async fn load(&self) -> Result<Vec<WebhookDeliveryRecord>, AppError> {
        let path = self.path.clone();
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(_err) => return Err(AppError::internal()),
        };

        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<WebhookDeliveryRecord>(line).ok())
            .collect())
    }
}

fn prune_lines(lines: &[String], retention_days: i64) -> Vec<String> {
    let cutoff = time::OffsetDateTime::now_utc() - time::Duration::days(retention_days);
    lines
        .iter()
        .filter(|line| {
            let Ok(parsed) = serde_json::from_str::<serde_json::Value>(line) else {
                return true;
            };
            let Some(timestamp) = parsed.get("timestamp").and_then(serde_json::Value::as_str) else {
                return true;
            };
            match time::OffsetDateTime::parse(timestamp, &time::format_description::well_known::Rfc3339) {
                Ok(parsed_timestamp) => parsed_timestamp >= cutoff,
                Err(_err) => true,
            }
        })
        .cloned()
        .collect()
}

/// SQLite-backed dead-letter store.
pub struct SqliteDeadLetterStore {
    connection: Mutex<Connection>,
    retention_days: Option<i64>,
}

impl SqliteDeadLetterStore {
    /// Opens (creating if absent) a SQLite dead-letter store at `path`.
    ///
    /// # Errors
    /// Returns [`AppError::internal`] if the database cannot be opened or
    /// its schema created.
    pub fn open(path: impl Into<PathBuf>, retention_days: Option<i64>) -> Result<Self, AppError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|_err| AppError::internal())?;
        }
        let connection = Connection::open(&path).map_err(|_err| AppError::internal())?;
        connection
            .execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);
                 CREATE TABLE IF NOT EXISTS webhook_dead_letter (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     timestamp TEXT NOT NULL,
                     event_type TEXT NOT NULL,
                     endpoint_url TEXT NOT NULL,
                     status_code INTEGER,
                     error TEXT,
                     attempt_count INTEGER NOT NULL,
                     idempotency_key TEXT NOT NULL,
                     body_json TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_webhook_dead_letter_timestamp
                     ON webhook_dead_letter(timestamp);",
            )
            .map_err(|_err| AppError::internal())?;
        connection
            .execute("INSERT INTO store_meta (version) SELECT ?1 WHERE NOT EXISTS (SELECT 1 FROM store_meta)", params![SCHEMA_VERSION])
            .map_err(|_err| AppError::internal())?;

        Ok(Self { connection: Mutex::new(connection), retention_days })
    }

    #[allow(clippy::unwrap_used, reason = "lock is only ever held briefly within one blocking call and never poisoned")]
    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.connection.lock().unwrap()
    }
}

#[async_trait]
impl DeadLetterStore for SqliteDeadLetterStore {
    async fn append(&self, record: WebhookDeliveryRecord) -> Result<(), AppError> {
        let connection = self.lock();
        let body_json = serde_json::to_string(&record.body).map_err(|_err| AppError::internal())?;
        connection
            .execute(
                "INSERT INTO webhook_dead_letter
                 (timestamp, event_type, endpoint_url, status_code, error, attempt_count, idempotency_key, body_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.timestamp,
                    record.event_type,
                    record.endpoint_url,
                    record.status_code,
                    record.error,
                    record.attempt_count,
                    record.idempotency_key,
                    body_json,
                ],
            )
            .map_err(|_err| AppError::internal())?;

        if let Some(retention_days) = self.retention_days.filter(|days| *days > 0) {
            let cutoff = time::OffsetDateTime::now_utc() - time::Duration::days(retention_days);
            let cutoff_text = cutoff
                .format(&time::format_description::well_known::Rfc3339)
                .map_err(|_err| AppError::internal())?;
            connection
                .execute("DELETE FROM webhook_dead_letter WHERE timestamp < ?1", params![cutoff_text])
                .map_err(|_err| AppError::internal())?;
        }

        Ok(())
    }

    async fn load(&self) -> Result<Vec<WebhookDeliveryRecord>, AppError> {
        let connection = self.lock();
        let mut statement = connection
            .prepare(
                "SELECT timestamp, event_type, endpoint_url, status_code, error, attempt_count, idempotency_key, body_json
                 FROM webhook_dead_letter ORDER BY id ASC",
            )
            .map_err(|_err| AppError::internal())?;

        let rows = statement
            .query_map([], |row| {
                let body_json: String = row.get(7)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<u16>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, String>(6)?,
                    body_json,
                ))
            })
            .map_err(|_err| AppError::internal())?;

        let mut records = Vec::new();
        for row in rows {
            let (timestamp, event_type, endpoint_url, status_code, error, attempt_count, idempotency_key, body_json) =
                row.map_err(|_err| AppError::internal())?;
            let body = serde_json::from_str(&body_json).unwrap_or(serde_json::Value::Null);
            records.push(WebhookDeliveryRecord { timestamp, event_type, endpoint_url, status_code, error, attempt_count, idempotency_key, body });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::JsonlDeadLetterStore;
    use super::SqliteDeadLetterStore;
    use serde_json::json;
    use srg_core::model::WebhookDeliveryRecord;
    use srg_core::traits::DeadLetterStore;
    use tempfile::tempdir;

    fn sample_record() -> WebhookDeliveryRecord {
        WebhookDeliveryRecord {
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            event_type: "policy_denied".to_string(),
            endpoint_url: "https://example.test/hook".to_string(),
            status_code: Some(503),
            error: Some("status 503".to_string()),
            attempt_count: 3,
            idempotency_key: "abc".to_string(),
            body: json!({"k": "v"}),
        }
    }

    #[tokio::test]
    async fn jsonl_store_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = JsonlDeadLetterStore::new(dir.path().join("dlq.ndjson"), None);
        store.append(sample_record()).await.expect("append succeeds");
        let loaded = store.load().await.expect("load succeeds");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].endpoint_url, "https://example.test/hook");
    }

    #[tokio::test]
    async fn sqlite_store_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = SqliteDeadLetterStore::open(dir.path().join("dlq.sqlite"), None).expect("opens store");
        store.append(sample_record()).await.expect("append succeeds");
        let loaded = store.load().await.expect("load succeeds");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].attempt_count, 3);
    }
}
