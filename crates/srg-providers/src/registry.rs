// crates/srg-providers/src/registry.rs
// ============================================================================
// Module: Provider Registry
// Description: Cost-aware registry of chat providers with priority-ordered
//              fallback routing.
// Purpose: Give the pipeline one seam to route a chat/embeddings call
//          through, with automatic fallback on retryable upstream errors.
// Dependencies: srg-core
// ============================================================================

//! ## Overview
//! Each [`ProviderEntry`] carries a name, a [`ProviderCost`] (observability
//! only — audit `cost_usd` uses the gateway's fixed scalars, never this
//! value), a priority, and an enabled flag. [`ProviderRegistry::fallback_chain`]
//! always tries the named primary first (if enabled), then the remaining
//! enabled providers in ascending priority order.

use std::collections::BTreeMap;
use std::sync::Arc;

use srg_core::model::ChatMessage;
use srg_core::traits::ChatCompletionChunk;
use srg_core::traits::ChatCompletionStream;
use srg_core::traits::ChatProvider;
use srg_core::traits::ProviderError;

/// Per-token cost, USD. Observability only: audit `cost_usd` is computed
/// from fixed scalars, not this value.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize)]
pub struct ProviderCost {
    pub input_per_token: f64,
    pub output_per_token: f64,
}

/// Operation and model-prefix eligibility for a provider entry.
///
/// `model_prefixes` empty means "eligible for any model" — the same rule
/// as an empty allow-list elsewhere in the registry.
#[derive(Debug, Clone)]
pub struct ProviderCapabilities {
    pub chat: bool,
    pub embeddings: bool,
    pub streaming: bool,
    pub model_prefixes: Vec<String>,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self { chat: true, embeddings: true, streaming: true, model_prefixes: Vec::new() }
    }
}

impl ProviderCapabilities {
    /// True if `model_prefixes` is empty or `model` starts with one of them.
    #[must_use]
    pub fn supports_model(&self, model: &str) -> bool {
        self.model_prefixes.is_empty() || self.model_prefixes.iter().any(|prefix| model.starts_with(prefix.as_str()))
    }
}

/// A registered provider with its routing metadata.
#[derive(Clone)]
pub struct ProviderEntry {
    pub name: String,
    pub provider: Arc<dyn ChatProvider>,
    pub cost: ProviderCost,
    pub priority: i32,
    pub enabled: bool,
    pub capabilities: ProviderCapabilities,
}

/// Registry of chat providers, keyed by name.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) an entry.
    pub fn register(&mut self, entry: ProviderEntry) {
        tracing::info!(provider = %entry.name, priority = entry.priority, "provider registered");
        self.providers.insert(entry.name.clone(), entry);
    }

    /// Looks up an entry by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProviderEntry> {
        self.providers.get(name)
    }

    /// Lists enabled providers ordered by ascending priority.
    #[must_use]
    pub fn list_providers(&self) -> Vec<&ProviderEntry> {
        let mut entries: Vec<&ProviderEntry> = self.providers.values().filter(|entry| entry.enabled).collect();
        entries.sort_by_key(|entry| entry.priority);
        entries
    }

    /// Returns the routing chain for `primary`: the primary first if
    /// enabled, then the remaining enabled providers by ascending priority.
    #[must_use]
    pub fn fallback_chain(&self, primary: &str) -> Vec<&ProviderEntry> {
        let primary_entry = self.providers.get(primary).filter(|entry| entry.enabled);
        let mut others: Vec<&ProviderEntry> =
            self.providers.values().filter(|entry| entry.enabled && entry.name != primary).collect();
        others.sort_by_key(|entry| entry.priority);

        match primary_entry {
            Some(entry) => std::iter::once(entry).chain(others).collect(),
            None => {
                let mut all: Vec<&ProviderEntry> = self.providers.values().filter(|entry| entry.enabled).collect();
                all.sort_by_key(|entry| entry.priority);
                all
            }
        }
    }

    /// Returns the enabled provider minimizing estimated cost for the given
    /// token counts. Observability only.
    #[must_use]
    pub fn cheapest_for_tokens(&self, estimated_input: u64, estimated_output: u64) -> Option<&ProviderEntry> {
        self.providers
            .values()
            .filter(|entry| entry.enabled)
            .min_by(|a, b| {
                let cost_a = a.cost.input_per_token * estimated_input as f64 + a.cost.output_per_token * estimated_output as f64;
                let cost_b = b.cost.input_per_token * estimated_input as f64 + b.cost.output_per_token * estimated_output as f64;
                cost_a.partial_cmp(&cost_b).unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

/// Narrows an already priority-ordered chain to entries matching `predicate`
/// (operation capability and model-prefix eligibility), preserving order.
fn eligible_chain<'a>(
    chain: Vec<&'a ProviderEntry>,
    predicate: impl Fn(&ProviderEntry) -> bool,
) -> Vec<&'a ProviderEntry> {
    chain.into_iter().filter(|entry| predicate(entry)).collect()
}

/// The default set of upstream statuses that trigger fallback to the next
/// provider in chain.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 3] = [429, 502, 503];

/// Outcome of routing a chat completion through a fallback chain.
pub struct RoutingResult<T> {
    pub provider_name: String,
    pub result: T,
    pub fallback_chain: Vec<String>,
    pub attempts: u32,
}

/// Routes a non-streaming chat completion through `registry`'s fallback
/// chain for `primary`, retrying on statuses in `retryable_statuses`.
///
/// # Errors
/// Returns the last [`ProviderError`] encountered if every provider in the
/// chain fails, or a synthesized `no_providers_available` error if the
/// chain is empty.
pub async fn route_chat_with_fallback(
    registry: &ProviderRegistry,
    primary: &str,
    model: &str,
    messages: &[ChatMessage],
    max_tokens: Option<u32>,
    retryable_statuses: &[u16],
) -> Result<RoutingResult<srg_core::model::ChatCompletionResponse>, ProviderError> {
    let chain = eligible_chain(registry.fallback_chain(primary), |entry| {
        entry.capabilities.chat && entry.capabilities.supports_model(model)
    });
    if chain.is_empty() {
        return Err(ProviderError {
            status: 503,
            code: "no_providers_available",
            message: "no enabled providers in registry".to_string(),
        });
    }

    let mut attempts = Vec::new();
    let mut last_error = None;

    for entry in chain {
        attempts.push(entry.name.clone());
        match entry.provider.chat(model, messages, max_tokens).await {
            Ok(result) => {
                tracing::info!(provider = %entry.name, attempts = attempts.len(), "provider routed");
                return Ok(RoutingResult {
                    provider_name: entry.name.clone(),
                    result,
                    attempts: attempts.len() as u32,
                    fallback_chain: attempts,
                });
            }
            Err(error) => {
                if !retryable_statuses.contains(&error.status) {
                    return Err(error);
                }
                tracing::warn!(failed_provider = %entry.name, status = error.status, "provider fallback");
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| ProviderError {
        status: 503,
        code: "no_providers_available",
        message: "every provider in the fallback chain failed".to_string(),
    }))
}

/// Routes an embeddings call through `registry`'s fallback chain for
/// `primary`, retrying on statuses in `retryable_statuses`.
///
/// # Errors
/// Returns the last [`ProviderError`] encountered if every provider in the
/// chain fails, or a synthesized `no_providers_available` error if the
/// chain is empty.
pub async fn route_embeddings_with_fallback(
    registry: &ProviderRegistry,
    primary: &str,
    model: &str,
    inputs: &[String],
    retryable_statuses: &[u16],
) -> Result<RoutingResult<srg_core::model::EmbeddingsResponse>, ProviderError> {
    let chain = eligible_chain(registry.fallback_chain(primary), |entry| {
        entry.capabilities.embeddings && entry.capabilities.supports_model(model)
    });
    if chain.is_empty() {
        return Err(ProviderError {
            status: 503,
            code: "no_providers_available",
            message: "no enabled providers in registry".to_string(),
        });
    }

    let mut attempts = Vec::new();
    let mut last_error = None;

    for entry in chain {
        attempts.push(entry.name.clone());
        match entry.provider.embeddings(model, inputs).await {
            Ok(result) => {
                return Ok(RoutingResult {
                    provider_name: entry.name.clone(),
                    result,
                    attempts: attempts.len() as u32,
                    fallback_chain: attempts,
                });
            }
            Err(error) => {
                if !retryable_statuses.contains(&error.status) {
                    return Err(error);
                }
                tracing::warn!(failed_provider = %entry.name, status = error.status, "embeddings provider fallback");
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| ProviderError {
        status: 503,
        code: "no_providers_available",
        message: "every provider in the fallback chain failed".to_string(),
    }))
}

/// Outcome of routing a streaming chat completion through a fallback chain.
/// The first chunk is returned separately from the live stream so the
/// pipeline can inspect it (e.g. for an early policy/budget check) before
/// forwarding it on.
pub struct StreamingRoutingResult {
    pub provider_name: String,
    pub first_chunk: ChatCompletionChunk,
    pub stream: ChatCompletionStream,
    pub fallback_chain: Vec<String>,
    pub attempts: u32,
}

/// Routes a streaming chat completion through `registry`'s fallback chain
/// for `primary`, retrying on statuses in `retryable_statuses`.
///
/// Stream initiation (`chat_stream`, up to and including its first chunk)
/// happens inside the retry loop, so a provider that fails before or while
/// producing its first chunk is a fail-over point just like a non-streaming
/// call. Once a provider's first chunk is in hand, failures in the
/// remainder of that provider's stream are surfaced to the caller as
/// in-stream errors rather than triggering another fallback attempt.
///
/// # Errors
/// Returns the last [`ProviderError`] encountered if every provider in the
/// chain fails to start a stream, or a synthesized `no_providers_available`
/// error if the chain is empty.
pub async fn route_chat_stream_with_fallback(
    registry: &ProviderRegistry,
    primary: &str,
    model: &str,
    messages: &[ChatMessage],
    max_tokens: Option<u32>,
    retryable_statuses: &[u16],
) -> Result<StreamingRoutingResult, ProviderError> {
    let chain = eligible_chain(registry.fallback_chain(primary), |entry| {
        entry.capabilities.chat && entry.capabilities.streaming && entry.capabilities.supports_model(model)
    });
    if chain.is_empty() {
        return Err(ProviderError {
            status: 503,
            code: "no_providers_available",
            message: "no enabled providers in registry".to_string(),
        });
    }

    let mut attempts = Vec::new();
    let mut last_error = None;

    for entry in chain {
        attempts.push(entry.name.clone());
        match entry.provider.chat_stream(model, messages, max_tokens).await {
            Ok((first_chunk, stream)) => {
                tracing::info!(provider = %entry.name, attempts = attempts.len(), "provider stream routed");
                return Ok(StreamingRoutingResult {
                    provider_name: entry.name.clone(),
                    first_chunk,
                    stream,
                    attempts: attempts.len() as u32,
                    fallback_chain: attempts,
                });
            }
            Err(error) => {
                if !retryable_statuses.contains(&error.status) {
                    return Err(error);
                }
                tracing::warn!(failed_provider = %entry.name, status = error.status, "provider stream fallback");
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| ProviderError {
        status: 503,
        code: "no_providers_available",
        message: "every provider in the fallback chain failed".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::ProviderCost;
    use super::ProviderEntry;
    use super::ProviderRegistry;
    use crate::stub::StubProvider;
    use std::sync::Arc;

    fn entry(name: &str, priority: i32) -> ProviderEntry {
        ProviderEntry {
            name: name.to_string(),
            provider: Arc::new(StubProvider::new(16)),
            cost: ProviderCost::default(),
            priority,
            enabled: true,
            capabilities: super::ProviderCapabilities::default(),
        }
    }

    #[tokio::test]
    async fn model_prefix_ineligible_providers_are_skipped() {
        use super::route_chat_with_fallback;
        use super::DEFAULT_RETRYABLE_STATUSES;
        use super::ProviderCapabilities;
        use srg_core::model::ChatMessage;
        use srg_core::model::ChatRole;

        let mut registry = ProviderRegistry::new();
        let mut claude_only = entry("claude-provider", 0);
        claude_only.capabilities = ProviderCapabilities { model_prefixes: vec!["claude-".to_string()], ..ProviderCapabilities::default() };
        registry.register(claude_only);
        registry.register(entry("gpt-provider", 1));

        let messages = vec![ChatMessage { role: ChatRole::User, content: "hi".to_string(), citations: None }];
        let result =
            route_chat_with_fallback(&registry, "claude-provider", "gpt-4o-mini", &messages, None, &DEFAULT_RETRYABLE_STATUSES)
                .await
                .expect("falls through to the model-eligible provider");

        assert_eq!(result.provider_name, "gpt-provider");
        assert_eq!(result.fallback_chain, vec!["gpt-provider"]);
    }

    #[test]
    fn fallback_chain_puts_primary_first_then_priority_order() {
        let mut registry = ProviderRegistry::new();
        registry.register(entry("b", 1));
        registry.register(entry("a", 0));
        registry.register(entry("c", 2));

        let chain = registry.fallback_chain("c");
        let names: Vec<&str> = chain.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn fallback_chain_falls_back_to_priority_order_when_primary_missing() {
        let mut registry = ProviderRegistry::new();
        registry.register(entry("a", 0));
        registry.register(entry("b", 1));

        let chain = registry.fallback_chain("missing");
        let names: Vec<&str> = chain.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn stream_fallback_falls_over_on_retryable_stream_init_error() {
        use super::route_chat_stream_with_fallback;
        use super::DEFAULT_RETRYABLE_STATUSES;
        use srg_core::model::ChatMessage;
        use srg_core::model::ChatRole;

        let mut registry = ProviderRegistry::new();
        registry.register(entry("error-429-model", 0));
        registry.register(entry("b", 1));

        let messages = vec![ChatMessage { role: ChatRole::User, content: "hi".to_string(), citations: None }];
        let result = route_chat_stream_with_fallback(
            &registry,
            "error-429-model",
            "error-429-model",
            &messages,
            None,
            &DEFAULT_RETRYABLE_STATUSES,
        )
        .await
        .expect("falls over to the next provider");

        assert_eq!(result.provider_name, "b");
        assert_eq!(result.fallback_chain, vec!["error-429-model", "b"]);
        assert_eq!(result.attempts, 2);
    }
}
