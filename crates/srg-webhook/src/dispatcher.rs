// crates/srg-webhook/src/dispatcher.rs
// ============================================================================
// Module: Webhook Dispatcher
// Description: HMAC-signed, retrying webhook delivery to registered
//              endpoints.
// Purpose: Notify external systems of policy denials, provider fallbacks,
//          budget events, and redaction hits without blocking the request
//          path.
// Dependencies: hmac, reqwest, sha2, srg-core, tokio
// ============================================================================

//! ## Overview
//! Each dispatch builds one envelope (`event_type`, `timestamp`,
//! `gateway_version`, `payload`) and POSTs its canonical JSON body to every
//! enabled endpoint subscribed to that event type, signing with
//! HMAC-SHA256 when the endpoint has a secret. Failed deliveries retry with
//! exponential backoff up to `max_retries`, retrying only on the
//! configured retryable status set (or any transport failure); exhausted
//! deliveries are handed to a [`DeadLetterStore`].

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use hmac::Hmac;
use hmac::Mac;
use serde_json::Value;
use sha2::Sha256;
use srg_core::error::AppError;
use srg_core::model::WebhookDeliveryRecord;
use srg_core::traits::DeadLetterStore;
use srg_core::traits::WebhookDeliveryResult;
use srg_core::traits::WebhookSink;

const GATEWAY_VERSION: &str = "0.4.0-rc1";

/// The default set of statuses that trigger a retry (alongside any
/// transport-level failure).
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// A registered webhook receiver.
#[derive(Debug, Clone)]
pub struct WebhookEndpoint {
    pub url: String,
    pub secret: String,
    pub event_types: Vec<String>,
    pub enabled: bool,
}

impl WebhookEndpoint {
    fn subscribes_to(&self, event_type: &str) -> bool {
        self.enabled && self.event_types.iter().any(|subscribed| subscribed == event_type)
    }
}

/// Retry/backoff policy applied to each endpoint delivery.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff_base: Duration::from_millis(200), backoff_max: Duration::from_secs(5) }
    }
}

impl RetryPolicy {
    fn backoff_for(&self, attempt: u32) -> Duration {
        let scaled = self.backoff_base.saturating_mul(2u32.saturating_pow(attempt));
        scaled.min(self.backoff_max)
    }
}

/// Non-blocking webhook dispatcher with HMAC signing and dead-letter
/// fallback.
pub struct WebhookDispatcher {
    client: reqwest::Client,
    endpoints: Vec<WebhookEndpoint>,
    retry_policy: RetryPolicy,
    retryable_statuses: Vec<u16>,
    dead_letter: Option<Arc<dyn DeadLetterStore>>,
}

impl WebhookDispatcher {
    /// Builds a dispatcher over `endpoints`, optionally backed by
    /// `dead_letter` for exhausted deliveries.
    #[must_use]
    pub fn new(
        endpoints: Vec<WebhookEndpoint>,
        timeout: Duration,
        retry_policy: RetryPolicy,
        dead_letter: Option<Arc<dyn DeadLetterStore>>,
    ) -> Self {
        Self {
            client: reqwest::Client::builder().timeout(timeout).build().unwrap_or_default(),
            endpoints,
            retry_policy,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
            dead_letter,
        }
    }

    /// Returns true when at least one enabled endpoint subscribes to
    /// `event_type`.
    #[must_use]
    pub fn should_fire(&self, event_type: &str) -> bool {
        self.endpoints.iter().any(|endpoint| endpoint.subscribes_to(event_type))
    }

    async fn deliver(&self, endpoint: &WebhookEndpoint, body: &str) -> (WebhookDeliveryResult, Option<String>) {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::CONTENT_TYPE, "application/json".parse().unwrap_or(reqwest::header::HeaderValue::from_static("application/json")));
        let user_agent = format!("SovereignRAGGateway/{GATEWAY_VERSION}");
        if let Ok(value) = user_agent.parse() {
            headers.insert(reqwest::header::USER_AGENT, value);
        }
        if !endpoint.secret.is_empty() {
            if let Ok(signature) = sign_body(&endpoint.secret, body) {
                if let Ok(value) = format!("sha256={signature}").parse() {
                    headers.insert("X-SRG-Signature", value);
                }
            }
        }

        let mut last_error = None;
        for attempt in 0..self.retry_policy.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry_policy.backoff_for(attempt)).await;
            }
            let started = Instant::now();
            match self.client.post(&endpoint.url).headers(headers.clone()).body(body.to_string()).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if (200..300).contains(&status) {
                        return (
                            WebhookDeliveryResult { endpoint_url: endpoint.url.clone(), delivered: true, attempts: attempt + 1, status_code: Some(status) },
                            None,
                        );
                    }
                    let _elapsed = started.elapsed();
                    if !self.retryable_statuses.contains(&status) {
                        return (
                            WebhookDeliveryResult { endpoint_url: endpoint.url.clone(), delivered: false, attempts: attempt + 1, status_code: Some(status) },
                            Some(format!("non-retryable status {status}")),
                        );
                    }
                    last_error = Some(format!("status {status}"));
                }
                Err(err) => {
                    tracing::warn!(endpoint = %endpoint.url, attempt = attempt + 1, error = %err, "webhook delivery failed");
                    last_error = Some(err.to_string());
                }
            }
        }

        (
            WebhookDeliveryResult { endpoint_url: endpoint.url.clone(), delivered: false, attempts: self.retry_policy.max_attempts, status_code: None },
            last_error,
        )
    }
}

fn sign_body(secret: &str, body: &str) -> Result<String, AppError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_err| AppError::internal())?;
    mac.update(body.as_bytes());
    let digest = mac.finalize().into_bytes();
    Ok(digest.iter().map(|byte| format!("{byte:02x}")).collect())
}

fn idempotency_key(endpoint_url: &str, body: &str) -> String {
    use sha2::Digest as _;
    let digest = Sha256::digest(format!("{endpoint_url}:{body}").as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[async_trait::async_trait]
impl WebhookSink for WebhookDispatcher {
    async fn dispatch(&self, event_type: &str, payload: Value) -> Vec<WebhookDeliveryResult> {
        let envelope = serde_json::json!({
            "event_type": event_type,
            "timestamp": now_rfc3339(),
            "gateway_version": GATEWAY_VERSION,
            "payload": payload,
        });
        let Ok(body) = serde_json::to_string(&envelope) else {
            return Vec::new();
        };

        let mut results = Vec::new();
        for endpoint in self.endpoints.iter().filter(|endpoint| endpoint.subscribes_to(event_type)) {
            let (result, error) = self.deliver(endpoint, &body).await;

            if !result.delivered {
                if let Some(dead_letter) = &self.dead_letter {
                    let record = WebhookDeliveryRecord {
                        timestamp: now_rfc3339(),
                        event_type: event_type.to_string(),
                        endpoint_url: endpoint.url.clone(),
                        status_code: result.status_code,
                        error,
                        attempt_count: result.attempts,
                        idempotency_key: idempotency_key(&endpoint.url, &body),
                        body: envelope.clone(),
                    };
                    if let Err(err) = dead_letter.append(record).await {
                        tracing::error!(endpoint = %endpoint.url, error = %err, "failed to persist dead-letter record");
                    }
                }
            }

            results.push(result);
        }
        results
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::idempotency_key;
    use super::sign_body;

    #[test]
    fn signature_is_deterministic_hex() {
        let signature = sign_body("secret", "body").expect("signs");
        assert_eq!(signature, sign_body("secret", "body").expect("signs"));
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn idempotency_key_varies_with_endpoint_and_body() {
        let a = idempotency_key("https://a", "x");
        let b = idempotency_key("https://b", "x");
        assert_ne!(a, b);
    }
}
