// crates/srg-providers/src/stub.rs
// ============================================================================
// Module: Stub Chat Provider
// Description: Deterministic in-process provider for tests and local
//              deployments without a real upstream.
// Purpose: Exercise routing, redaction, budget, and streaming logic without
//          a network dependency.
// Dependencies: async-stream, srg-core
// ============================================================================

//! ## Overview
//! Echoes the last user message as `"Stub response: {first 120 chars}"`,
//! chunked into 32-byte SSE pieces for streaming. A model name prefixed
//! `error-429`/`error-502` synthesizes the matching [`ProviderError`], so
//! fallback routing and error-mapping tests don't need a live upstream.

use async_trait::async_trait;
use srg_core::model::ChatCompletionChoice;
use srg_core::model::ChatCompletionResponse;
use srg_core::model::ChatMessage;
use srg_core::model::ChatRole;
use srg_core::model::EmbeddingsDatum;
use srg_core::model::EmbeddingsResponse;
use srg_core::model::Usage;
use srg_core::traits::ChatCompletionChunk;
use srg_core::traits::ChatCompletionStream;
use srg_core::traits::ChatProvider;
use srg_core::traits::ProviderError;

const CHUNK_SIZE: usize = 32;

/// Deterministic stub chat/embeddings provider.
pub struct StubProvider {
    embedding_dim: usize,
}

impl StubProvider {
    /// Builds a stub producing `embedding_dim`-length embedding vectors.
    #[must_use]
    pub const fn new(embedding_dim: usize) -> Self {
        Self { embedding_dim }
    }

    fn maybe_provider_error(model: &str) -> Result<(), ProviderError> {
        if model.starts_with("error-429") {
            return Err(ProviderError { status: 429, code: "provider_rate_limited", message: "provider rate limit exceeded".to_string() });
        }
        if model.starts_with("error-502") {
            return Err(ProviderError { status: 502, code: "provider_bad_gateway", message: "provider upstream bad gateway".to_string() });
        }
        Ok(())
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f64; self.embedding_dim];
        let tokens: Vec<String> = text.to_lowercase().split(|character: char| !character.is_alphanumeric()).filter(|token| !token.is_empty()).map(str::to_string).collect();

        for token in &tokens {
            let digest = sha256_digest(token.as_bytes());
            let idx = (u16::from(digest[0]) << 8 | u16::from(digest[1])) as usize % self.embedding_dim;
            let sign = if digest[2] % 2 == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign;
        }

        let norm = vector.iter().map(|value| value * value).sum::<f64>().sqrt();
        if norm == 0.0 {
            return vec![0.0; self.embedding_dim];
        }
        vector.iter().map(|value| ((value / norm * 1_000_000.0).round() / 1_000_000.0) as f32).collect()
    }
}

fn sha256_digest(bytes: &[u8]) -> [u8; 32] {
    use sha2::Digest as _;
    sha2::Sha256::digest(bytes).into()
}

fn last_user_message(messages: &[ChatMessage]) -> String {
    messages.iter().rev().find(|message| message.role == ChatRole::User).map(|message| message.content.clone()).unwrap_or_default()
}

fn answer_for(messages: &[ChatMessage]) -> String {
    let last = last_user_message(messages);
    let truncated: String = last.chars().take(120).collect();
    format!("Stub response: {truncated}")
}

#[async_trait]
impl ChatProvider for StubProvider {
    async fn chat(&self, model: &str, messages: &[ChatMessage], max_tokens: Option<u32>) -> Result<ChatCompletionResponse, ProviderError> {
        Self::maybe_provider_error(model)?;
        let answer = answer_for(messages);
        let prompt_tokens = messages.iter().map(|message| message.content.split_whitespace().count() as u64).sum::<u64>().max(1);
        let completion_tokens = answer.split_whitespace().count().max(1) as u64;
        let _ = max_tokens;

        Ok(ChatCompletionResponse {
            id: format!("chatcmpl-{}", srg_core::identifiers::generate_uuid_v4().replace('-', "")),
            object: "chat.completion".to_string(),
            created: unix_timestamp(),
            model: model.to_string(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatMessage { role: ChatRole::Assistant, content: answer, citations: None },
                finish_reason: Some("stop".to_string()),
            }],
            usage: Usage::new(prompt_tokens, completion_tokens),
        })
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
    ) -> Result<(ChatCompletionChunk, ChatCompletionStream), ProviderError> {
        let response = self.chat(model, messages, max_tokens).await?;
        let content = response.choices.first().map(|choice| choice.message.content.clone()).unwrap_or_default();
        let pieces: Vec<String> = if content.is_empty() {
            vec![String::new()]
        } else {
            content.chars().collect::<Vec<_>>().chunks(CHUNK_SIZE).map(|chunk| chunk.iter().collect()).collect()
        };

        let id = response.id.clone();
        let model_name = model.to_string();
        let created = response.created;
        let usage = response.usage;

        let first_chunk = ChatCompletionChunk {
            id: id.clone(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model_name.clone(),
            delta_content: Some(pieces[0].clone()),
            finish_reason: None,
            usage: None,
        };

        let remaining = pieces[1..].to_vec();
        let stream = async_stream::stream! {
            for piece in remaining {
                yield Ok(ChatCompletionChunk {
                    id: id.clone(),
                    object: "chat.completion.chunk".to_string(),
                    created,
                    model: model_name.clone(),
                    delta_content: Some(piece),
                    finish_reason: None,
                    usage: None,
                });
            }
            yield Ok(ChatCompletionChunk {
                id: id.clone(),
                object: "chat.completion.chunk".to_string(),
                created,
                model: model_name.clone(),
                delta_content: None,
                finish_reason: Some("stop".to_string()),
                usage: Some(usage),
            });
        };

        Ok((first_chunk, Box::pin(stream)))
    }

    async fn embeddings(&self, model: &str, inputs: &[String]) -> Result<EmbeddingsResponse, ProviderError> {
        Self::maybe_provider_error(model)?;
        let mut prompt_tokens = 0u64;
        let data = inputs
            .iter()
            .enumerate()
            .map(|(index, text)| {
                prompt_tokens += text.split_whitespace().count().max(1) as u64;
                EmbeddingsDatum { index: index as u32, embedding: self.embed_one(text) }
            })
            .collect();

        Ok(EmbeddingsResponse {
            object: "list".to_string(),
            model: model.to_string(),
            data,
            usage: Usage::new(prompt_tokens, 0),
        })
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}

fn unix_timestamp() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|duration| duration.as_secs() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::StubProvider;
    use srg_core::model::ChatMessage;
    use srg_core::model::ChatRole;
    use srg_core::traits::ChatProvider;
    use tokio_stream::StreamExt as _;

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage { role: ChatRole::User, content: "hello there".to_string(), citations: None }]
    }

    #[tokio::test]
    async fn chat_echoes_truncated_last_user_message() {
        let provider = StubProvider::new(8);
        let response = provider.chat("gpt", &messages(), None).await.expect("chat succeeds");
        assert_eq!(response.choices[0].message.content, "Stub response: hello there");
    }

    #[tokio::test]
    async fn chat_surfaces_synthesized_rate_limit_error() {
        let provider = StubProvider::new(8);
        let error = provider.chat("error-429-model", &messages(), None).await.expect_err("should fail");
        assert_eq!(error.status, 429);
    }

    #[tokio::test]
    async fn stream_ends_with_finish_reason_and_usage() {
        let provider = StubProvider::new(8);
        let (_first, mut stream) = provider.chat_stream("gpt", &messages(), None).await.expect("stream starts");
        let mut last = None;
        while let Some(chunk) = stream.next().await {
            last = Some(chunk.expect("chunk ok"));
        }
        let last = last.expect("at least one chunk");
        assert_eq!(last.finish_reason.as_deref(), Some("stop"));
        assert!(last.usage.is_some());
    }
}
