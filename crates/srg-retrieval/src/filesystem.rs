// crates/srg-retrieval/src/filesystem.rs
// ============================================================================
// Module: Filesystem Connector
// Description: Token-overlap scored connector over an NDJSON chunk index.
// Purpose: Provide a dependency-free retrieval backend usable in tests and
//          single-node deployments.
// Dependencies: srg-core, tokio
// ============================================================================

//! ## Overview
//! The index is a newline-delimited JSON file, one chunk record per line.
//! `search` scores each candidate by `|query_tokens ∩ chunk_tokens| /
//! |query_tokens|`, tokenizing on runs of non-word characters, lowercased.
//! Records are loaded fresh on every call — acceptable for the index sizes
//! this connector targets; a hot-reloading index is out of scope.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use srg_core::error::AppError;
use srg_core::model::Document;
use srg_core::model::DocumentChunk;
use srg_core::traits::Connector;

#[derive(Debug, Deserialize)]
struct IndexRecord {
    #[serde(default)]
    source_id: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    chunk_id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

/// Connector over a local NDJSON chunk index.
pub struct FilesystemConnector {
    index_path: PathBuf,
    connector_name: String,
}

impl FilesystemConnector {
    /// Builds a connector reading `index_path`, tagging every returned
    /// chunk with `connector_name`.
    #[must_use]
    pub fn new(index_path: impl Into<PathBuf>, connector_name: impl Into<String>) -> Self {
        Self { index_path: index_path.into(), connector_name: connector_name.into() }
    }

    async fn load_records(&self) -> Result<Vec<IndexRecord>, AppError> {
        let contents = match tokio::fs::read_to_string(&self.index_path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(AppError::retrieval_unavailable(err.to_string())),
        };

        let mut records = Vec::new();
        for line in contents.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<IndexRecord>(trimmed) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase().split(|character: char| !character.is_alphanumeric()).filter(|token| !token.is_empty()).map(str::to_string).collect()
}

fn matches_filters(metadata: &BTreeMap<String, String>, filters: &BTreeMap<String, String>) -> bool {
    filters.iter().all(|(key, expected)| metadata.get(key) == Some(expected))
}

#[async_trait]
impl Connector for FilesystemConnector {
    async fn search(
        &self,
        query: &str,
        filters: &BTreeMap<String, String>,
        k: u32,
    ) -> Result<Vec<DocumentChunk>, AppError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_tokens = tokenize(query);
        let records = self.load_records().await?;

        let mut ranked: Vec<DocumentChunk> = records
            .into_iter()
            .filter(|record| matches_filters(&record.metadata, filters))
            .filter_map(|record| {
                let text = record.text.trim().to_string();
                if text.is_empty() {
                    return None;
                }
                let chunk_tokens = tokenize(&text);
                let overlap = query_tokens.intersection(&chunk_tokens).count();
                let score = if query_tokens.is_empty() { 0.0 } else { overlap as f64 / query_tokens.len() as f64 };
                Some(DocumentChunk {
                    source_id: record.source_id,
                    connector: self.connector_name.clone(),
                    uri: record.uri,
                    chunk_id: record.chunk_id,
                    text,
                    score: (score * 1_000_000.0).round() / 1_000_000.0,
                    metadata: record.metadata,
                })
            })
            .collect();

        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(k as usize);
        Ok(ranked)
    }

    async fn fetch(&self, doc_id: &str) -> Result<Option<Document>, AppError> {
        let records = self.load_records().await?;
        let matching: Vec<IndexRecord> = records.into_iter().filter(|record| record.source_id == doc_id).collect();
        let Some(first) = matching.first() else {
            return Ok(None);
        };

        let text = matching.iter().filter(|record| !record.text.is_empty()).map(|record| record.text.as_str()).collect::<Vec<_>>().join("\n");

        Ok(Some(Document {
            doc_id: doc_id.to_string(),
            connector: self.connector_name.clone(),
            uri: first.uri.clone(),
            text,
            metadata: first.metadata.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::FilesystemConnector;
    use srg_core::traits::Connector;
    use std::collections::BTreeMap;
    use std::io::Write as _;

    fn index_with(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        for line in lines {
            writeln!(file, "{line}").expect("write");
        }
        file.flush().expect("flush");
        file
    }

    #[tokio::test]
    async fn ranks_by_token_overlap_and_truncates_to_k() {
        let file = index_with(&[
            r#"{"source_id":"a","uri":"file://a","chunk_id":"a1","text":"rust ownership and borrowing"}"#,
            r#"{"source_id":"b","uri":"file://b","chunk_id":"b1","text":"python dynamic typing"}"#,
        ]);
        let connector = FilesystemConnector::new(file.path(), "filesystem");
        let results = connector.search("rust borrowing", &BTreeMap::new(), 1).await.expect("search succeeds");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_id, "a");
    }

    #[tokio::test]
    async fn zero_k_returns_empty() {
        let file = index_with(&[r#"{"source_id":"a","text":"hello"}"#]);
        let connector = FilesystemConnector::new(file.path(), "filesystem");
        let results = connector.search("hello", &BTreeMap::new(), 0).await.expect("search succeeds");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn missing_index_file_yields_empty_results() {
        let connector = FilesystemConnector::new("/nonexistent/index.ndjson", "filesystem");
        let results = connector.search("hello", &BTreeMap::new(), 3).await.expect("search succeeds");
        assert!(results.is_empty());
    }
}
