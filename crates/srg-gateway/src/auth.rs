// crates/srg-gateway/src/auth.rs
// ============================================================================
// Module: Ingress Authentication
// Description: Bearer-token check and `x-srg-*` principal header extraction.
// Purpose: Turn an inbound request's headers into a trusted
//          `RequestContext`, or reject it before any pipeline stage runs.
// Dependencies: axum, srg-core
// ============================================================================

//! ## Overview
//! `/healthz`, `/readyz`, and `/metrics` bypass authentication entirely;
//! every `/v1/*` route requires a recognized bearer token and all three
//! `x-srg-tenant-id`/`x-srg-user-id`/`x-srg-classification` headers.

use axum::http::HeaderMap;
use srg_core::error::AppError;
use srg_core::identifiers::generate_request_id;
use srg_core::model::Classification;
use srg_core::model::RequestContext;

const TENANT_HEADER: &str = "x-srg-tenant-id";
const USER_HEADER: &str = "x-srg-user-id";
const CLASSIFICATION_HEADER: &str = "x-srg-classification";

/// Validates the bearer token and required principal headers, returning a
/// freshly stamped [`RequestContext`] for `endpoint`.
///
/// # Errors
/// Returns [`AppError::auth_missing`]/[`AppError::auth_invalid`] if the
/// bearer token is absent or unrecognized, or
/// [`AppError::missing_required_headers`] if any principal header is
/// absent.
pub fn authenticate(headers: &HeaderMap, api_keys: &[String], endpoint: &str) -> Result<RequestContext, AppError> {
    let token = bearer_token(headers).ok_or_else(AppError::auth_missing)?;
    if !api_keys.iter().any(|key| key == &token) {
        return Err(AppError::auth_invalid());
    }

    let mut missing = Vec::new();
    let tenant_id = header_str(headers, TENANT_HEADER);
    let user_id = header_str(headers, USER_HEADER);
    let classification_raw = header_str(headers, CLASSIFICATION_HEADER);

    if tenant_id.is_none() {
        missing.push(TENANT_HEADER);
    }
    if user_id.is_none() {
        missing.push(USER_HEADER);
    }
    if classification_raw.is_none() {
        missing.push(CLASSIFICATION_HEADER);
    }
    if !missing.is_empty() {
        return Err(AppError::missing_required_headers(&missing));
    }

    let classification: Classification = classification_raw
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|()| AppError::request_validation_failed("x-srg-classification must be one of public, pii, phi"))?;

    Ok(RequestContext {
        request_id: generate_request_id(),
        tenant_id: tenant_id.unwrap_or_default().into(),
        user_id: user_id.unwrap_or_default().into(),
        classification,
        endpoint: endpoint.to_string(),
        started_at: now_rfc3339(),
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    raw.strip_prefix("Bearer ").map(str::trim).map(str::to_string)
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim).filter(|value| !value.is_empty()).map(str::to_string)
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::authenticate;
    use axum::http::HeaderMap;
    use axum::http::HeaderValue;

    fn headers_with(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_str(value).expect("valid header value"));
        }
        headers
    }

    #[test]
    fn missing_bearer_is_auth_missing() {
        let headers = HeaderMap::new();
        let error = authenticate(&headers, &["dev-key".to_string()], "/v1/chat/completions").expect_err("should fail");
        assert_eq!(error.code, "auth_missing");
    }

    #[test]
    fn unrecognized_bearer_is_auth_invalid() {
        let headers = headers_with(&[("authorization", "Bearer wrong")]);
        let error = authenticate(&headers, &["dev-key".to_string()], "/v1/chat/completions").expect_err("should fail");
        assert_eq!(error.code, "auth_invalid");
    }

    #[test]
    fn missing_principal_headers_are_reported_together() {
        let headers = headers_with(&[("authorization", "Bearer dev-key")]);
        let error = authenticate(&headers, &["dev-key".to_string()], "/v1/chat/completions").expect_err("should fail");
        assert_eq!(error.code, "missing_required_headers");
        assert!(error.message.contains("x-srg-tenant-id"));
        assert!(error.message.contains("x-srg-user-id"));
        assert!(error.message.contains("x-srg-classification"));
    }

    #[test]
    fn valid_request_builds_context() {
        let headers = headers_with(&[
            ("authorization", "Bearer dev-key"),
            ("x-srg-tenant-id", "acme"),
            ("x-srg-user-id", "alice"),
            ("x-srg-classification", "phi"),
        ]);
        let context =
            authenticate(&headers, &["dev-key".to_string()], "/v1/chat/completions").expect("valid request authenticates");
        assert_eq!(context.tenant_id.as_str(), "acme");
        assert_eq!(context.user_id.as_str(), "alice");
    }
}
