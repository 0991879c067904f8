// system-tests/tests/helpers/doubles.rs
// ============================================================================
// Module: Collaborator Test Doubles
// Description: A `ChatProvider` that always fails with an injected,
//              retryable upstream error, and a `PolicyClient` that
//              simulates a policy-engine outage.
// Purpose: Exercise fallback routing and observe-mode policy handling
//          without standing up a real HTTP-backed provider or policy
//          engine.
// Dependencies: srg-core
// ============================================================================

use async_trait::async_trait;
use srg_core::model::ChatCompletionResponse;
use srg_core::model::ChatMessage;
use srg_core::model::EmbeddingsResponse;
use srg_core::traits::ChatCompletionChunk;
use srg_core::traits::ChatCompletionStream;
use srg_core::traits::ChatProvider;
use srg_core::traits::ProviderError;

/// A provider that always fails with a fixed, retryable status/code pair.
pub struct FailingProvider {
    /// HTTP-shaped status every call fails with.
    status: u16,
    /// Stable machine-readable code attached to every failure.
    code: &'static str,
}

impl FailingProvider {
    /// Builds a provider that fails every call with `status`/`code`.
    #[must_use]
    pub fn new(status: u16, code: &'static str) -> Self {
        Self { status, code }
    }

    fn error(&self) -> ProviderError {
        ProviderError { status: self.status, code: self.code, message: "injected failure".to_string() }
    }
}

#[async_trait]
impl ChatProvider for FailingProvider {
    async fn chat(&self, _model: &str, _messages: &[ChatMessage], _max_tokens: Option<u32>) -> Result<ChatCompletionResponse, ProviderError> {
        Err(self.error())
    }

    async fn chat_stream(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _max_tokens: Option<u32>,
    ) -> Result<(ChatCompletionChunk, ChatCompletionStream), ProviderError> {
        Err(self.error())
    }

    async fn embeddings(&self, _model: &str, _inputs: &[String]) -> Result<EmbeddingsResponse, ProviderError> {
        Err(self.error())
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}

/// A policy client that never reaches a decision, simulating an outage.
pub struct TimeoutPolicyClient;

#[async_trait]
impl srg_core::traits::PolicyClient for TimeoutPolicyClient {
    async fn evaluate(&self, _input: &serde_json::Value) -> srg_core::traits::PolicyOutcome {
        srg_core::traits::PolicyOutcome::Timeout
    }
}
