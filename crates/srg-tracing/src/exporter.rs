// crates/srg-tracing/src/exporter.rs
// ============================================================================
// Module: Trace Exporter
// Description: Best-effort HTTP JSON export of collected spans.
// Purpose: Forward trace batches to an external collector without ever
//          letting export failures affect the request path.
// Dependencies: reqwest, srg-core, tracing
// ============================================================================

//! ## Overview
//! [`HttpTraceExporter`] POSTs a JSON batch of spans to a configured
//! endpoint. It implements [`TraceExporter`], whose contract requires
//! failures to be logged and swallowed rather than propagated; this
//! exporter never returns an error to its caller.

use std::time::Duration;

use async_trait::async_trait;
use srg_core::model::TraceSpan;
use srg_core::traits::TraceExporter;

/// Exports span batches to an HTTP collector endpoint as a JSON array body.
pub struct HttpTraceExporter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTraceExporter {
    /// Builds an exporter POSTing batches to `endpoint` with the given
    /// request `timeout`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self { client: reqwest::Client::builder().timeout(timeout).build().unwrap_or_default(), endpoint: endpoint.into() }
    }
}

#[async_trait]
impl TraceExporter for HttpTraceExporter {
    async fn export(&self, spans: &[TraceSpan]) {
        if spans.is_empty() {
            return;
        }
        let body = serde_json::json!({ "spans": spans });
        match self.client.post(&self.endpoint).json(&body).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!(endpoint = %self.endpoint, status = response.status().as_u16(), "trace export rejected by collector");
            }
            Err(err) => {
                tracing::warn!(endpoint = %self.endpoint, error = %err, "trace export failed");
            }
        }
    }
}

/// Exporter that only logs span counts, for environments with no configured
/// collector endpoint.
#[derive(Debug, Default)]
pub struct LoggingTraceExporter;

#[async_trait]
impl TraceExporter for LoggingTraceExporter {
    async fn export(&self, spans: &[TraceSpan]) {
        if spans.is_empty() {
            return;
        }
        for span in spans {
            tracing::debug!(
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                operation = %span.operation,
                duration_ms = span.duration_ms,
                status = ?span.status,
                "span"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LoggingTraceExporter;
    use srg_core::model::SpanStatus;
    use srg_core::model::TraceSpan;
    use srg_core::traits::TraceExporter;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn logging_exporter_handles_empty_batch() {
        let exporter = LoggingTraceExporter;
        exporter.export(&[]).await;
    }

    #[tokio::test]
    async fn logging_exporter_accepts_a_span() {
        let exporter = LoggingTraceExporter;
        let span = TraceSpan {
            trace_id: "t1".to_string(),
            span_id: "s1".to_string(),
            parent_span_id: None,
            operation: "policy.evaluate".to_string(),
            start_time_unix_ns: 0,
            end_time_unix_ns: 1_000_000,
            duration_ms: 1.0,
            status: SpanStatus::Ok,
            attributes: BTreeMap::new(),
            events: Vec::new(),
        };
        exporter.export(&[span]).await;
    }
}
