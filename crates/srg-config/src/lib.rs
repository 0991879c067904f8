// crates/srg-config/src/lib.rs
// ============================================================================
// Crate: srg-config
// Description: Environment-variable configuration loading and startup
//              contract schema compilation.
// ============================================================================

//! ## Overview
//! [`settings::GatewayConfig::load`] reads every `SRG_*` environment
//! variable into a typed, defaulted configuration struct.
//! [`schemas::ContractSchemas::load`] compiles the four versioned JSON
//! Schemas the gateway validates against, failing startup if any is
//! missing or malformed.

pub mod schemas;
pub mod settings;

pub use schemas::ContractSchemas;
pub use schemas::SchemaError;
pub use settings::AuditConfig;
pub use settings::BudgetConfig;
pub use settings::ConfigError;
pub use settings::GatewayConfig;
pub use settings::PolicyConfig;
pub use settings::ProviderConfig;
pub use settings::RagConfig;
pub use settings::TracingConfig;
pub use settings::WebhookConfig;
