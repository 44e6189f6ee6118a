use async_trait::async_trait;

use crate::errors::PilotResult;
use crate::llm::types::{CompletionRequest, LlmResponse};

/// Unified LLM provider trait. All providers implement this trait.
/// New providers only need to implement this trait and register in config.toml.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider's identifier (matches config.toml key).
    fn name(&self) -> &str;

    /// One completion round-trip. Transport, auth and HTTP-status failures are
    /// returned as errors; providers never retry.
    async fn chat(&self, request: CompletionRequest) -> PilotResult<LlmResponse>;
}
