// crates/srg-webhook/src/lib.rs
// ============================================================================
// Crate: srg-webhook
// Description: HMAC-signed webhook dispatch and dead-letter persistence.
// ============================================================================

//! ## Overview
//! [`dispatcher::WebhookDispatcher`] implements [`srg_core::traits::WebhookSink`].
//! [`dead_letter::JsonlDeadLetterStore`] and [`dead_letter::SqliteDeadLetterStore`]
//! both implement [`srg_core::traits::DeadLetterStore`].

pub mod dead_letter;
pub mod dispatcher;

pub use dead_letter::JsonlDeadLetterStore;
pub use dead_letter::SqliteDeadLetterStore;
pub use dispatcher::RetryPolicy;
pub use dispatcher::WebhookDispatcher;
pub use dispatcher::WebhookEndpoint;
pub use dispatcher::DEFAULT_RETRYABLE_STATUSES;
