// crates/srg-gateway/src/lib.rs
// ============================================================================
// Crate: srg-gateway
// Description: HTTP surface, ingress validation, and pipeline orchestrator.
// ============================================================================

//! ## Overview
//! [`routes::build_router`] wires the full `axum` route table over one
//! [`app_state::AppState`]. [`auth::authenticate`] turns a bearer token and
//! the `x-srg-*` principal headers into a [`srg_core::model::RequestContext`].
//! [`pipeline::nonstreaming`] and [`pipeline::streaming`] drive one request
//! through policy, retrieval, redaction, budget, routing, and audit.
//! [`error_envelope::into_response`] renders any [`srg_core::error::AppError`]
//! as the `{error:{code,message,type,request_id}}` envelope.

pub mod app_state;
pub mod auth;
pub mod error_envelope;
pub mod pipeline;
pub mod routes;

pub use app_state::AppState;
pub use routes::build_router;
