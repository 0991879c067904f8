// crates/srg-gateway/src/error_envelope.rs
// ============================================================================
// Module: Error Envelope
// Description: Renders an `AppError` as the external
//              `{error:{code,message,type,request_id}}` JSON envelope.
// Purpose: Single seam every route handler funnels its failures through.
// Dependencies: axum, srg-core
// ============================================================================

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use serde_json::json;
use srg_core::error::AppError;

/// Renders `error` as the gateway's external error envelope, attaching
/// `request_id` so callers can correlate it with the audit log.
#[must_use]
pub fn into_response(error: &AppError, request_id: &str) -> Response {
    let status = StatusCode::from_u16(error.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({
        "error": {
            "code": error.code,
            "message": error.message,
            "type": error.kind.as_str(),
            "request_id": request_id,
        }
    });
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::into_response;
    use axum::http::StatusCode;
    use srg_core::error::AppError;

    #[tokio::test]
    async fn renders_status_and_envelope_shape() {
        let response = into_response(&AppError::policy_denied("nope"), "req-1");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("reads body");
        let value: serde_json::Value = serde_json::from_slice(&bytes).expect("valid json");
        assert_eq!(value["error"]["code"], "policy_denied");
        assert_eq!(value["error"]["type"], "policy");
        assert_eq!(value["error"]["request_id"], "req-1");
    }
}
