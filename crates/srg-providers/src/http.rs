// crates/srg-providers/src/http.rs
// ============================================================================
// Module: HTTP Chat Provider
// Description: Chat/embeddings provider calling any OpenAI-compatible HTTP
//              endpoint.
// Purpose: Bridge the gateway to real upstream providers over HTTPS, with
//          scheme/host hardening matching the provider registry's posture.
// Dependencies: reqwest, srg-core
// ============================================================================

//! ## Overview
//! Every call is a bounded-timeout `reqwest` request carrying a bearer
//! token. Non-2xx responses are mapped onto [`ProviderError`] the same way
//! for both chat and embeddings: 429 → rate limited, 502/503 → upstream
//! error, anything else 4xx/5xx → a generic provider error. `chat_stream`
//! parses the upstream's `data: ...` SSE framing directly rather than
//! delegating to `chat`, since a real upstream's streaming response is not
//! just the non-streaming response chunked.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt as _;
use reqwest::Url;
use srg_core::model::ChatCompletionResponse;
use srg_core::model::ChatMessage;
use srg_core::model::EmbeddingsResponse;
use srg_core::traits::ChatCompletionChunk;
use srg_core::traits::ChatCompletionStream;
use srg_core::traits::ChatProvider;
use srg_core::traits::ProviderError;

/// Configuration for an [`HttpChatProvider`].
#[derive(Debug, Clone)]
pub struct HttpChatProviderConfig {
    /// Base URL, e.g. `https://api.openai.com`. Must be `https` unless
    /// `allow_http` is set.
    pub base_url: String,
    /// Bearer token sent as `Authorization: Bearer <token>`.
    pub api_key: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Permit cleartext `http://` base URLs (tests only).
    pub allow_http: bool,
}

/// Chat provider backed by an OpenAI-compatible HTTP endpoint.
pub struct HttpChatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpChatProvider {
    /// Builds a provider against `config`.
    ///
    /// # Errors
    /// Returns [`ProviderError`] if `base_url` uses a disallowed scheme or
    /// the HTTP client fails to build.
    pub fn new(config: HttpChatProviderConfig) -> Result<Self, ProviderError> {
        let url = Url::parse(&config.base_url)
            .map_err(|_err| provider_error(502, "provider_connection_error", "invalid base_url"))?;
        match url.scheme() {
            "https" => {}
            "http" if config.allow_http => {}
            _ => return Err(provider_error(502, "provider_connection_error", "unsupported base_url scheme")),
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|_err| provider_error(503, "provider_timeout", "http client build failed"))?;

        Ok(Self { client, base_url: config.base_url.trim_end_matches('/').to_string(), api_key: config.api_key })
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value, ProviderError> {
        let response = self
            .client
            .post(self.url_for(path))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        map_status(response.status().as_u16())?;

        response.json::<serde_json::Value>().await.map_err(|_err| provider_error(502, "provider_error", "invalid response body"))
    }
}

fn map_transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        provider_error(503, "provider_timeout", "provider request timed out")
    } else {
        provider_error(502, "provider_connection_error", "cannot connect to provider")
    }
}

fn map_status(status: u16) -> Result<(), ProviderError> {
    match status {
        200..=299 => Ok(()),
        429 => Err(provider_error(429, "provider_rate_limited", "provider rate limit exceeded")),
        502 | 503 => Err(ProviderError { status, code: "provider_upstream_error", message: format!("provider returned {status}") }),
        _ if status >= 400 => Err(ProviderError { status, code: "provider_error", message: format!("provider returned {status}") }),
        _ => Ok(()),
    }
}

fn provider_error(status: u16, code: &'static str, message: &str) -> ProviderError {
    ProviderError { status, code, message: message.to_string() }
}

fn messages_to_json(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|message| {
            serde_json::json!({
                "role": serde_json::to_value(message.role).unwrap_or(serde_json::Value::Null),
                "content": message.content,
            })
        })
        .collect()
}

#[async_trait]
impl ChatProvider for HttpChatProvider {
    async fn chat(&self, model: &str, messages: &[ChatMessage], max_tokens: Option<u32>) -> Result<ChatCompletionResponse, ProviderError> {
        let mut body = serde_json::json!({ "model": model, "messages": messages_to_json(messages) });
        if let Some(max_tokens) = max_tokens {
            body["max_tokens"] = serde_json::Value::from(max_tokens);
        }

        let parsed = self.post_json("/v1/chat/completions", body).await?;
        serde_json::from_value(parsed).map_err(|_err| provider_error(502, "provider_error", "malformed chat completion response"))
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
    ) -> Result<(ChatCompletionChunk, ChatCompletionStream), ProviderError> {
        let mut body = serde_json::json!({
            "model": model,
            "messages": messages_to_json(messages),
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        if let Some(max_tokens) = max_tokens {
            body["max_tokens"] = serde_json::Value::from(max_tokens);
        }

        let response = self
            .client
            .post(self.url_for("/v1/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        map_status(response.status().as_u16())?;

        let mut byte_stream = response.bytes_stream();
        let mut buffer = String::new();
        let first_chunk = loop {
            let Some(next) = byte_stream.next().await else {
                return Err(provider_error(502, "provider_error", "stream ended before first chunk"));
            };
            let bytes = next.map_err(map_transport_error)?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));
            if let Some((chunk, rest)) = extract_next_sse_chunk(&buffer) {
                buffer = rest;
                break chunk;
            }
        };

        let stream = async_stream::stream! {
            let mut buffer = buffer;
            let mut byte_stream = byte_stream;
            loop {
                if let Some((chunk, rest)) = extract_next_sse_chunk(&buffer) {
                    buffer = rest;
                    yield Ok(chunk);
                    continue;
                }
                match byte_stream.next().await {
                    Some(Ok(bytes)) => buffer.push_str(&String::from_utf8_lossy(&bytes)),
                    Some(Err(_transport_error)) => {
                        yield Err(provider_error(502, "provider_connection_error", "stream connection lost"));
                        break;
                    }
                    None => break,
                }
            }
        };

        Ok((first_chunk, Box::pin(stream)))
    }

    async fn embeddings(&self, model: &str, inputs: &[String]) -> Result<EmbeddingsResponse, ProviderError> {
        let body = serde_json::json!({ "model": model, "input": inputs });
        let parsed = self.post_json("/v1/embeddings", body).await?;
        serde_json::from_value(parsed).map_err(|_err| provider_error(502, "provider_error", "malformed embeddings response"))
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}

/// Extracts the next complete, parseable `data: {...}` SSE event from
/// `buffer`, returning the parsed chunk and the remaining unconsumed
/// buffer (everything after the line that produced it). Blank lines,
/// non-`data:` lines, and the terminal `[DONE]` marker are skipped over;
/// returns `None` once every fully-buffered line has been consumed
/// without yielding a chunk, meaning the caller should read more bytes.
fn extract_next_sse_chunk(buffer: &str) -> Option<(ChatCompletionChunk, String)> {
    let mut remaining = buffer;
    while let Some(newline_index) = remaining.find('\n') {
        let line = remaining[..newline_index].trim();
        remaining = &remaining[newline_index + 1..];

        if line.is_empty() || !line.starts_with("data:") {
            continue;
        }
        let data = line.trim_start_matches("data:").trim();
        if data == "[DONE]" {
            continue;
        }
        if let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(data) {
            return Some((chunk, remaining.to_string()));
        }
    }
    None
}
