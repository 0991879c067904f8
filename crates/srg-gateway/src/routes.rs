// crates/srg-gateway/src/routes.rs
// ============================================================================
// Module: HTTP Route Table
// Description: Wires the external HTTP surface over one shared `AppState`.
// Purpose: Translate between axum's request/response types and the
//          pipeline orchestrator's domain types.
// Dependencies: axum, srg-core
// ============================================================================

//! ## Overview
//! `/healthz`, `/readyz`, and `/metrics` bypass authentication. Every
//! `/v1/*` route authenticates first via [`crate::auth::authenticate`], then
//! hands off to [`crate::pipeline::nonstreaming`] or
//! [`crate::pipeline::streaming`]. Every response — success or error —
//! carries an `x-request-id` header so callers can correlate it with the
//! audit log.

use std::sync::Arc;

use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde_json::json;
use srg_core::error::AppError;
use srg_core::model::ChatCompletionRequest;
use srg_core::model::EmbeddingsRequest;

use crate::app_state::AppState;
use crate::auth::authenticate;
use crate::error_envelope;
use crate::pipeline::nonstreaming;
use crate::pipeline::streaming;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Builds the full route table over `state`.
#[must_use]
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/traces/{request_id}", get(get_trace))
        .with_state(state)
}

fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "dependencies": {
            "policy_schema": true,
            "audit_schema": true,
            "provider": !state.default_provider.is_empty(),
        }
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let trace_count = state.tracing.as_ref().map_or(0, |collector| collector.trace_count());
    let body = format!(
        "# HELP srg_gateway_up Gateway process liveness.\n\
         # TYPE srg_gateway_up gauge\n\
         srg_gateway_up 1\n\
         # HELP srg_gateway_traces_in_memory Number of traces currently retained.\n\
         # TYPE srg_gateway_traces_in_memory gauge\n\
         srg_gateway_traces_in_memory {trace_count}\n"
    );
    ([("content-type", "text/plain; version=0.0.4")], body)
}

async fn list_models(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    match authenticate(&headers, &state.config.api_keys, "/v1/models") {
        Ok(context) => {
            let data: Vec<_> = state
                .config
                .model_catalog
                .iter()
                .map(|model| json!({"id": model, "object": "model", "owned_by": "sovereign-rag-gateway"}))
                .collect();
            with_request_id(Json(json!({"object": "list", "data": data})).into_response(), context.request_id.as_str())
        }
        Err(error) => error_envelope::into_response(&error, "unknown"),
    }
}

async fn chat_completions(headers: HeaderMap, State(state): State<Arc<AppState>>, body: axum::body::Bytes) -> Response {
    let context = match authenticate(&headers, &state.config.api_keys, "/v1/chat/completions") {
        Ok(context) => context,
        Err(error) => return error_envelope::into_response(&error, "unknown"),
    };
    let request_id = context.request_id.as_str().to_string();

    let request: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(error) => {
            return with_request_id(
                error_envelope::into_response(&AppError::request_validation_failed(error.to_string()), &request_id),
                &request_id,
            )
        }
    };
    if let Err(error) = request.validate() {
        return with_request_id(error_envelope::into_response(&error, &request_id), &request_id);
    }

    if request.stream {
        match streaming::chat_completions_stream(state, context, request).await {
            Ok(sse) => {
                let mut response = sse.keep_alive(axum::response::sse::KeepAlive::default()).into_response();
                let response_headers = response.headers_mut();
                response_headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
                response_headers.insert("Connection", HeaderValue::from_static("keep-alive"));
                response_headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
                with_request_id(response, &request_id)
            }
            Err(error) => with_request_id(error_envelope::into_response(&error, &request_id), &request_id),
        }
    } else {
        match nonstreaming::chat_completions(&state, context, request).await {
            Ok(response) => with_request_id(Json(response).into_response(), &request_id),
            Err(error) => with_request_id(error_envelope::into_response(&error, &request_id), &request_id),
        }
    }
}

async fn embeddings(headers: HeaderMap, State(state): State<Arc<AppState>>, body: axum::body::Bytes) -> Response {
    let context = match authenticate(&headers, &state.config.api_keys, "/v1/embeddings") {
        Ok(context) => context,
        Err(error) => return error_envelope::into_response(&error, "unknown"),
    };
    let request_id = context.request_id.as_str().to_string();

    let request: EmbeddingsRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(error) => {
            return with_request_id(
                error_envelope::into_response(&AppError::request_validation_failed(error.to_string()), &request_id),
                &request_id,
            )
        }
    };
    if let Err(error) = request.validate() {
        return with_request_id(error_envelope::into_response(&error, &request_id), &request_id);
    }

    match nonstreaming::embeddings(&state, context, request).await {
        Ok(response) => with_request_id(Json(response).into_response(), &request_id),
        Err(error) => with_request_id(error_envelope::into_response(&error, &request_id), &request_id),
    }
}

async fn get_trace(headers: HeaderMap, State(state): State<Arc<AppState>>, Path(request_id): Path<String>) -> Response {
    let context = match authenticate(&headers, &state.config.api_keys, "/v1/traces") {
        Ok(context) => context,
        Err(error) => return error_envelope::into_response(&error, "unknown"),
    };
    let my_request_id = context.request_id.as_str().to_string();

    let Some(collector) = &state.tracing else {
        return with_request_id(error_envelope::into_response(&AppError::tracing_disabled(), &my_request_id), &my_request_id);
    };
    let spans = collector.get_trace(&request_id);
    with_request_id(Json(json!({"request_id": request_id, "spans": spans})).into_response(), &my_request_id)
}

#[cfg(test)]
mod tests {
    use super::with_request_id;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn request_id_header_is_attached() {
        let response = StatusCode::OK.into_response();
        let response = with_request_id(response, "req-123");
        assert_eq!(response.headers().get(super::REQUEST_ID_HEADER).expect("header set"), "req-123");
    }
}
