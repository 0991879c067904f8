// crates/srg-providers/src/lib.rs
// ============================================================================
// Crate: srg-providers
// Description: Cost-aware provider registry, fallback router, and HTTP/stub
//              chat providers.
// ============================================================================

//! ## Overview
//! [`registry::ProviderRegistry`] holds [`registry::ProviderEntry`] records
//! and exposes fallback-chain routing; [`registry::route_chat_with_fallback`],
//! [`registry::route_chat_stream_with_fallback`], and
//! [`registry::route_embeddings_with_fallback`] drive a chain to completion.
//! [`http::HttpChatProvider`] and [`stub::StubProvider`] both implement
//! [`srg_core::traits::ChatProvider`].

pub mod http;
pub mod registry;
pub mod stub;

pub use http::HttpChatProvider;
pub use http::HttpChatProviderConfig;
pub use registry::route_chat_stream_with_fallback;
pub use registry::route_chat_with_fallback;
pub use registry::route_embeddings_with_fallback;
pub use registry::ProviderCapabilities;
pub use registry::ProviderCost;
pub use registry::ProviderEntry;
pub use registry::ProviderRegistry;
pub use registry::RoutingResult;
pub use registry::StreamingRoutingResult;
pub use registry::DEFAULT_RETRYABLE_STATUSES;
pub use stub::StubProvider;
