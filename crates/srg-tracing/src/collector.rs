// crates/srg-tracing/src/collector.rs
// ============================================================================
// Module: Span Collector
// Description: In-process, per-trace span buffer with RAII-scoped timing.
// Purpose: Capture structured spans for each request-lifecycle phase
//          without depending on a full OpenTelemetry SDK.
// Dependencies: srg-core, std::sync::Mutex
// ============================================================================

//! ## Overview
//! [`SpanGuard`] replaces the reference implementation's context manager:
//! its [`Drop`] impl records a completed span into the owning
//! [`SpanCollector`], timed from construction to drop. Traces are kept in
//! insertion order behind one mutex; the oldest trace is evicted once
//! `max_traces` is exceeded.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use srg_core::model::SpanEvent;
use srg_core::model::SpanStatus;
use srg_core::model::TraceSpan;
use srg_core::traits::TraceExporter;

/// Operation name that triggers an export snapshot when its span completes
/// (spec.md §4.9 "Export").
pub const ROOT_OPERATION: &str = "gateway.request";

struct TraceBuffer {
    traces: HashMap<String, Vec<TraceSpan>>,
    order: Vec<String>,
    max_traces: usize,
}

impl TraceBuffer {
    /// Returns the completed trace's spans when eviction drops it, so the
    /// caller can still export it if needed. Unused today but kept in step
    /// with `record`'s eviction semantics.
    fn record(&mut self, trace_id: &str, span: TraceSpan) {
        if !self.traces.contains_key(trace_id) {
            self.order.push(trace_id.to_string());
        }
        self.traces.entry(trace_id.to_string()).or_default().push(span);

        while self.order.len() > self.max_traces {
            let oldest = self.order.remove(0);
            self.traces.remove(&oldest);
        }
    }
}

/// In-process span collector, keyed by trace id.
pub struct SpanCollector {
    buffer: Mutex<TraceBuffer>,
    exporter: Option<Arc<dyn TraceExporter>>,
}

impl SpanCollector {
    /// Builds a collector retaining at most `max_traces` distinct traces,
    /// with no trace export configured.
    #[must_use]
    pub fn new(max_traces: usize) -> Self {
        Self {
            buffer: Mutex::new(TraceBuffer { traces: HashMap::new(), order: Vec::new(), max_traces }),
            exporter: None,
        }
    }

    /// Builds a collector that, whenever a span for [`ROOT_OPERATION`] is
    /// recorded, asynchronously exports that trace's full span list via
    /// `exporter`. Export failures are the exporter's own concern; the
    /// collector never blocks or propagates them.
    #[must_use]
    pub fn with_exporter(max_traces: usize, exporter: Arc<dyn TraceExporter>) -> Self {
        Self {
            buffer: Mutex::new(TraceBuffer { traces: HashMap::new(), order: Vec::new(), max_traces }),
            exporter: Some(exporter),
        }
    }

    /// Opens a scoped span; its duration and outcome are recorded when the
    /// returned guard is dropped.
    #[must_use]
    pub fn span(&self, trace_id: impl Into<String>, operation: impl Into<String>, parent_span_id: Option<String>) -> SpanGuard<'_> {
        SpanGuard {
            collector: self,
            trace_id: trace_id.into(),
            operation: operation.into(),
            parent_span_id,
            span_id: srg_core::identifiers::generate_span_id().into_string(),
            started_at: Instant::now(),
            started_at_unix_ns: unix_nanos(),
            status: SpanStatus::Ok,
            attributes: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    fn record(&self, trace_id: &str, span: TraceSpan) {
        let is_root = span.operation == ROOT_OPERATION;
        self.lock().record(trace_id, span);

        if is_root {
            if let Some(exporter) = self.exporter.clone() {
                let spans = self.lock().traces.get(trace_id).cloned().unwrap_or_default();
                tokio::spawn(async move {
                    exporter.export(&spans).await;
                });
            }
        }
    }

    #[allow(clippy::unwrap_used, reason = "lock is only ever held briefly and never poisoned by a panicking critical section")]
    fn lock(&self) -> std::sync::MutexGuard<'_, TraceBuffer> {
        self.buffer.lock().unwrap()
    }

    /// Returns all spans recorded for `trace_id`, oldest first.
    #[must_use]
    pub fn get_trace(&self, trace_id: &str) -> Vec<TraceSpan> {
        self.lock().traces.get(trace_id).cloned().unwrap_or_default()
    }

    /// Returns the most recently started trace ids, most recent first.
    #[must_use]
    pub fn list_traces(&self, limit: usize) -> Vec<String> {
        let buffer = self.lock();
        buffer.order.iter().rev().take(limit).cloned().collect()
    }

    /// Returns the number of distinct traces currently retained.
    #[must_use]
    pub fn trace_count(&self) -> usize {
        self.lock().order.len()
    }
}

fn unix_nanos() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|duration| duration.as_nanos()).unwrap_or(0)
}

/// RAII guard for one in-flight span. Records itself into the owning
/// [`SpanCollector`] on [`Drop`].
pub struct SpanGuard<'collector> {
    collector: &'collector SpanCollector,
    trace_id: String,
    operation: String,
    parent_span_id: Option<String>,
    span_id: String,
    started_at: Instant,
    started_at_unix_ns: u128,
    status: SpanStatus,
    attributes: BTreeMap<String, serde_json::Value>,
    events: Vec<SpanEvent>,
}

impl SpanGuard<'_> {
    /// Returns this span's identifier, for attaching as a child's
    /// `parent_span_id`.
    #[must_use]
    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    /// Sets an attribute on this span.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Records an event within this span's lifetime.
    pub fn add_event(&mut self, name: impl Into<String>, attributes: BTreeMap<String, serde_json::Value>) {
        self.events.push(SpanEvent { name: name.into(), time_unix_ns: unix_nanos(), attributes });
    }

    /// Marks this span as having failed, attaching an `exception` event.
    pub fn mark_error(&mut self, error_type: &str, message: &str) {
        self.status = SpanStatus::Error;
        self.attributes.insert("error.type".to_string(), serde_json::Value::String(error_type.to_string()));
        let truncated: String = message.chars().take(500).collect();
        let mut event_attributes = BTreeMap::new();
        event_attributes.insert("exception.type".to_string(), serde_json::Value::String(error_type.to_string()));
        event_attributes.insert("exception.message".to_string(), serde_json::Value::String(truncated));
        self.add_event("exception", event_attributes);
    }
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        let end_unix_ns = unix_nanos();
        let duration_ms = self.started_at.elapsed().as_secs_f64() * 1000.0;

        let span = TraceSpan {
            trace_id: self.trace_id.clone(),
            span_id: self.span_id.clone(),
            parent_span_id: self.parent_span_id.clone(),
            operation: self.operation.clone(),
            start_time_unix_ns: self.started_at_unix_ns,
            end_time_unix_ns: end_unix_ns,
            duration_ms: (duration_ms * 1000.0).round() / 1000.0,
            status: self.status,
            attributes: std::mem::take(&mut self.attributes),
            events: std::mem::take(&mut self.events),
        };

        self.collector.record(&self.trace_id, span);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use srg_core::model::TraceSpan;
    use srg_core::traits::TraceExporter;

    use super::SpanCollector;
    use super::ROOT_OPERATION;

    #[derive(Default)]
    struct RecordingExporter {
        exported: Mutex<Vec<Vec<TraceSpan>>>,
    }

    #[async_trait]
    impl TraceExporter for RecordingExporter {
        async fn export(&self, spans: &[TraceSpan]) {
            self.exported.lock().unwrap().push(spans.to_vec());
        }
    }

    #[tokio::test]
    async fn exports_trace_when_root_operation_span_completes() {
        let exporter = Arc::new(RecordingExporter::default());
        let collector = SpanCollector::with_exporter(10, exporter.clone());

        {
            let _child = collector.span("trace-1", "policy.evaluate", None);
        }
        {
            let _root = collector.span("trace-1", ROOT_OPERATION, None);
        }

        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let exported = exporter.exported.lock().unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].len(), 2);
        assert_eq!(exported[0][1].operation, ROOT_OPERATION);
    }

    #[test]
    fn span_guard_records_on_drop() {
        let collector = SpanCollector::new(10);
        {
            let mut span = collector.span("trace-1", "policy.evaluate", None);
            span.set_attribute("tenant_id", "t1");
        }
        let spans = collector.get_trace("trace-1");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].operation, "policy.evaluate");
    }

    #[test]
    fn evicts_oldest_trace_past_capacity() {
        let collector = SpanCollector::new(1);
        {
            let _span = collector.span("trace-1", "op", None);
        }
        {
            let _span = collector.span("trace-2", "op", None);
        }
        assert_eq!(collector.trace_count(), 1);
        assert!(collector.get_trace("trace-1").is_empty());
        assert_eq!(collector.get_trace("trace-2").len(), 1);
    }

    #[test]
    fn mark_error_sets_status_and_event() {
        let collector = SpanCollector::new(10);
        {
            let mut span = collector.span("trace-3", "op", None);
            span.mark_error("AppError", "boom");
        }
        let spans = collector.get_trace("trace-3");
        assert_eq!(spans[0].status, srg_core::model::SpanStatus::Error);
        assert_eq!(spans[0].events.len(), 1);
    }
}
