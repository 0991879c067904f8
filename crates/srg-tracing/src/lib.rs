// crates/srg-tracing/src/lib.rs
// ============================================================================
// Crate: srg-tracing
// Description: In-process span collection and best-effort trace export.
// ============================================================================

//! ## Overview
//! [`collector::SpanCollector`] buffers [`srg_core::model::TraceSpan`]s per
//! trace id, timed via the RAII [`collector::SpanGuard`]. [`exporter::HttpTraceExporter`]
//! and [`exporter::LoggingTraceExporter`] both implement
//! [`srg_core::traits::TraceExporter`] for forwarding a finished trace
//! onward.

pub mod collector;
pub mod exporter;

pub use collector::SpanCollector;
pub use collector::SpanGuard;
pub use collector::ROOT_OPERATION;
pub use exporter::HttpTraceExporter;
pub use exporter::LoggingTraceExporter;
