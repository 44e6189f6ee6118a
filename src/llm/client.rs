use std::sync::Arc;

use crate::errors::PilotResult;
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CallConfig, ChatMessage, CompletionRequest, LlmResponse, ToolChoice, ToolDef};

/// A provider bound to the model settings of one agent role.
#[derive(Clone)]
pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    config: CallConfig,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn LlmProvider>, config: CallConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// One round-trip. `temperature` overrides the role default for this call only.
    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDef>,
        tool_choice: Option<ToolChoice>,
        temperature: Option<f64>,
    ) -> PilotResult<LlmResponse> {
        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages,
            tools,
            tool_choice,
            temperature: temperature.unwrap_or(self.config.temperature),
            stream: self.config.stream,
        };
        tracing::debug!(
            provider = self.provider.name(),
            model = %request.model,
            temperature = request.temperature,
            "llm call"
        );
        self.provider.chat(request).await
    }

    /// Plain text completion without tools.
    pub async fn complete_text(
        &self,
        messages: Vec<ChatMessage>,
        temperature: Option<f64>,
    ) -> PilotResult<String> {
        Ok(self.complete(messages, Vec::new(), None, temperature).await?.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    #[tokio::test]
    async fn temperature_override_applies_to_one_call() {
        let provider = ScriptedProvider::new(vec![
            Ok(LlmResponse { content: "a".into(), ..Default::default() }),
            Ok(LlmResponse { content: "b".into(), ..Default::default() }),
        ]);
        let client = LlmClient::new(
            provider.clone(),
            CallConfig { model: "m".into(), stream: false, temperature: 0.7 },
        );

        assert_eq!(client.complete_text(vec![ChatMessage::user("x")], Some(0.0)).await.unwrap(), "a");
        assert_eq!(client.complete_text(vec![ChatMessage::user("y")], None).await.unwrap(), "b");

        let seen = provider.requests();
        assert_eq!(seen[0].temperature, 0.0);
        assert_eq!(seen[1].temperature, 0.7);
        assert_eq!(seen[1].model, "m");
    }
}
