// crates/srg-core/src/error.rs
// ============================================================================
// Module: Error Taxonomy
// Description: The gateway's unified application error and its mapping to
//              the external error envelope.
// Purpose: Give every pipeline stage a single error type that already knows
//          its HTTP status and envelope shape.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Every stage of the pipeline returns `Result<_, AppError>`. `AppError`
//! carries enough information to render the `{error:{code,message,type,
//! request_id}}` envelope and the HTTP status without any stage needing to
//! know about HTTP at all.

use thiserror::Error;

/// The taxonomy kind, surfaced in the error envelope as `"type"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing/invalid bearer token or missing principal headers.
    Auth,
    /// Request body failed shape validation.
    Validation,
    /// Policy timeout, contract violation, deny, or budget exceeded.
    Policy,
    /// Unknown connector or policy-denied connector.
    Retrieval,
    /// Upstream provider failure after fallback exhaustion.
    Provider,
    /// Audit schema validation failed at write time.
    Audit,
    /// Tracing disabled but a trace was requested.
    Tracing,
    /// Any other unexpected failure.
    Internal,
}

impl ErrorKind {
    /// Returns the stable string used in the error envelope's `"type"` field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Validation => "validation",
            Self::Policy => "policy",
            Self::Retrieval => "retrieval",
            Self::Provider => "provider",
            Self::Audit => "audit",
            Self::Tracing => "tracing",
            Self::Internal => "internal",
        }
    }
}

/// The gateway's unified application error.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AppError {
    /// HTTP status code this error renders as.
    pub status: u16,
    /// Stable machine-readable error code, e.g. `"policy_denied"`.
    pub code: &'static str,
    /// Taxonomy kind, rendered as the envelope's `"type"`.
    pub kind: ErrorKind,
    /// Short human-readable message. Never includes internal exception
    /// detail or stack traces.
    pub message: String,
}

impl AppError {
    /// Builds a new application error.
    pub fn new(status: u16, code: &'static str, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            kind,
            message: message.into(),
        }
    }

    /// 401 — bearer token missing.
    #[must_use]
    pub fn auth_missing() -> Self {
        Self::new(401, "auth_missing", ErrorKind::Auth, "Authorization header is missing")
    }

    /// 401 — bearer token present but not recognized.
    #[must_use]
    pub fn auth_invalid() -> Self {
        Self::new(401, "auth_invalid", ErrorKind::Auth, "Bearer token is not recognized")
    }

    /// 422 — one or more required tenant/user/classification headers absent.
    #[must_use]
    pub fn missing_required_headers(missing: &[&str]) -> Self {
        Self::new(
            422,
            "missing_required_headers",
            ErrorKind::Auth,
            format!("missing required headers: {}", missing.join(", ")),
        )
    }

    /// 422 — request body failed shape validation.
    #[must_use]
    pub fn request_validation_failed(message: impl Into<String>) -> Self {
        Self::new(422, "request_validation_failed", ErrorKind::Validation, message)
    }

    /// 503 — policy service unreachable or timed out.
    #[must_use]
    pub fn policy_unavailable() -> Self {
        Self::new(503, "policy_unavailable", ErrorKind::Policy, "Policy service unavailable")
    }

    /// 503 — policy response did not conform to the policy-decision schema.
    #[must_use]
    pub fn policy_contract_invalid() -> Self {
        Self::new(
            503,
            "policy_contract_invalid",
            ErrorKind::Policy,
            "Policy decision contract invalid",
        )
    }

    /// 403 — policy denied the request.
    #[must_use]
    pub fn policy_denied(reason: impl Into<String>) -> Self {
        Self::new(403, "policy_denied", ErrorKind::Policy, reason)
    }

    /// 403 — requested model not in the policy's allowed-models list.
    #[must_use]
    pub fn model_forbidden() -> Self {
        Self::new(403, "model_forbidden", ErrorKind::Policy, "Model is not permitted by policy")
    }

    /// 403 — configured provider is not in the policy's allowed-providers list.
    #[must_use]
    pub fn provider_forbidden() -> Self {
        Self::new(403, "provider_forbidden", ErrorKind::Policy, "Provider is not permitted by policy")
    }

    /// 429 — tenant budget exceeded.
    #[must_use]
    pub fn budget_exceeded() -> Self {
        Self::new(429, "budget_exceeded", ErrorKind::Policy, "Tenant token budget exceeded")
    }

    /// 503 — budget backend (e.g. Redis) unreachable.
    #[must_use]
    pub fn budget_backend_unavailable() -> Self {
        Self::new(
            503,
            "budget_backend_unavailable",
            ErrorKind::Policy,
            "Budget backend unavailable",
        )
    }

    /// 403 — retrieval connector denied by policy allow-list.
    #[must_use]
    pub fn retrieval_forbidden() -> Self {
        Self::new(403, "retrieval_forbidden", ErrorKind::Retrieval, "Connector denied by policy")
    }

    /// 422 — requested connector is not registered.
    #[must_use]
    pub fn connector_not_found(connector: impl std::fmt::Display) -> Self {
        Self::new(
            422,
            "connector_not_found",
            ErrorKind::Retrieval,
            format!("connector not found: {connector}"),
        )
    }

    /// 503 — a connector's backing store is unreachable.
    #[must_use]
    pub fn retrieval_unavailable(message: impl Into<String>) -> Self {
        Self::new(503, "retrieval_unavailable", ErrorKind::Retrieval, message)
    }

    /// 429 — provider reported a rate limit.
    #[must_use]
    pub fn provider_rate_limited(message: impl Into<String>) -> Self {
        Self::new(429, "provider_rate_limited", ErrorKind::Provider, message)
    }

    /// Maps a provider-reported HTTP status to an [`AppError`] per spec §4.1
    /// step 11: 429 stays 429, 501/502/503 pass through unchanged, anything
    /// else collapses to a 502 `provider_upstream_error`.
    #[must_use]
    pub fn from_provider_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::new(429, "provider_rate_limited", ErrorKind::Provider, message),
            501 | 502 | 503 => Self::new(status, "provider_upstream_error", ErrorKind::Provider, message),
            _ => Self::new(502, "provider_upstream_error", ErrorKind::Provider, message),
        }
    }

    /// 502 — audit event failed schema validation at write time.
    #[must_use]
    pub fn audit_write_failed() -> Self {
        Self::new(502, "audit_write_failed", ErrorKind::Audit, "Failed to persist audit event")
    }

    /// 503 — tracing is disabled but a trace endpoint was hit.
    #[must_use]
    pub fn tracing_disabled() -> Self {
        Self::new(503, "tracing_disabled", ErrorKind::Tracing, "Tracing is disabled")
    }

    /// 500 — unexpected internal failure. Never carries exception detail.
    #[must_use]
    pub fn internal() -> Self {
        Self::new(500, "internal_error", ErrorKind::Internal, "Internal server error")
    }
}

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn provider_status_mapping_preserves_retryable_set() {
        assert_eq!(AppError::from_provider_status(429, "x").status, 429);
        assert_eq!(AppError::from_provider_status(502, "x").status, 502);
        assert_eq!(AppError::from_provider_status(503, "x").status, 503);
        assert_eq!(AppError::from_provider_status(418, "x").status, 502);
        assert_eq!(AppError::from_provider_status(418, "x").code, "provider_upstream_error");
    }
}
