// crates/srg-audit/src/lib.rs
// ============================================================================
// Crate: srg-audit
// Description: Hash-chained, schema-validated audit writer and offline
//              chain verification.
// ============================================================================

//! ## Overview
//! [`writer::FileAuditWriter`] implements [`srg_core::traits::AuditSink`]:
//! every accepted or rejected request produces exactly one line in an
//! append-only NDJSON log, chained to the previous line by SHA-256 over its
//! canonical JSON form. [`verify::verify_chain`] re-walks that chain offline.
//! [`bundle::generate_bundle`] projects one request's last audit event into
//! a standalone, schema-validated evidence bundle.

pub mod bundle;
pub mod verify;
pub mod writer;

pub use bundle::build_bundle;
pub use bundle::generate_bundle;
pub use bundle::BundleError;
pub use verify::verify_chain;
pub use verify::ChainMismatch;
pub use verify::VerificationReport;
pub use writer::FileAuditWriter;
