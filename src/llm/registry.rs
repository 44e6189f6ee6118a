use std::collections::HashMap;
use std::sync::Arc;

use crate::agent_engine::event_bus::EventBus;
use crate::config::{AppConfig, LlmConfig, RoleEntry};
use crate::errors::{PilotError, PilotResult};
use crate::llm::client::LlmClient;
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Agent roles that can be routed to distinct models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmRole {
    Tools,
    Refiner,
    Judge,
    Vision,
}

impl LlmRole {
    pub fn as_str(self) -> &'static str {
        match self {
            LlmRole::Tools => "tools",
            LlmRole::Refiner => "refiner",
            LlmRole::Judge => "judge",
            LlmRole::Vision => "vision",
        }
    }
}

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    active: String,
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn new(llm_config: LlmConfig) -> Self {
        Self {
            providers: HashMap::new(),
            active: llm_config.active_provider.clone(),
            llm_config,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> PilotResult<Arc<dyn LlmProvider>> {
        self.providers.get(&self.active).cloned().ok_or_else(|| {
            PilotError::Config(format!("Active provider '{}' not found in registry", self.active))
        })
    }

    pub fn set_active(&mut self, name: String) -> PilotResult<()> {
        if self.providers.contains_key(&name) {
            self.active = name;
            Ok(())
        } else {
            Err(PilotError::Config(format!("Provider '{name}' not registered")))
        }
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    fn role_entry(&self, role: LlmRole) -> Option<&RoleEntry> {
        let roles = &self.llm_config.roles;
        match role {
            LlmRole::Tools => roles.tools.as_ref(),
            LlmRole::Refiner => roles.refiner.as_ref(),
            LlmRole::Judge => roles.judge.as_ref(),
            LlmRole::Vision => roles.vision.as_ref(),
        }
    }

    /// Whether a role has its own `[llm.roles.<role>]` entry.
    pub fn has_role(&self, role: LlmRole) -> bool {
        self.role_entry(role).is_some()
    }

    /// Client bound to the model configured for `role`.
    ///
    /// Resolution order:
    /// 1. `[llm.roles.<role>]` in config.toml
    /// 2. Fallback: active provider with its default model and temperature, no streaming
    pub fn client_for_role(&self, role: LlmRole) -> PilotResult<LlmClient> {
        if let Some(entry) = self.role_entry(role) {
            let provider = self.providers.get(&entry.provider).cloned().ok_or_else(|| {
                PilotError::Config(format!(
                    "Role '{}' references unknown provider '{}'",
                    role.as_str(),
                    entry.provider
                ))
            })?;
            let temperature = entry.temperature.unwrap_or_else(|| {
                self.llm_config
                    .providers
                    .get(&entry.provider)
                    .map(|p| p.temperature)
                    .unwrap_or(0.1)
            });
            let model = if entry.model.is_empty() {
                self.llm_config
                    .providers
                    .get(&entry.provider)
                    .map(|p| p.model.clone())
                    .unwrap_or_default()
            } else {
                entry.model.clone()
            };
            tracing::debug!(
                role = role.as_str(),
                provider = %entry.provider,
                model = %model,
                stream = entry.stream,
                temperature,
                "resolved role config"
            );
            return Ok(LlmClient::new(
                provider,
                CallConfig { model, stream: entry.stream, temperature },
            ));
        }

        let provider = self.get_active()?;
        let (model, temperature) = self
            .llm_config
            .providers
            .get(&self.active)
            .map(|p| (p.model.clone(), p.temperature))
            .unwrap_or_else(|| (String::new(), 0.1));
        tracing::debug!(
            role = role.as_str(),
            provider = %self.active,
            model = %model,
            "role not configured, using active provider fallback"
        );
        Ok(LlmClient::new(provider, CallConfig { model, stream: false, temperature }))
    }

    /// Build a registry from the loaded app config.
    /// API keys are read from environment variables named `DESKPILOT_<ID>_API_KEY`,
    /// falling back to `api_key` in the file.
    pub fn from_config(config: &AppConfig, events: Option<EventBus>) -> Self {
        let mut registry = Self::new(config.llm.clone());
        for (id, entry) in &config.llm.providers {
            let api_key = std::env::var(api_key_var(id))
                .ok()
                .or_else(|| entry.api_key.clone())
                .unwrap_or_default();
            if api_key.is_empty() {
                tracing::warn!(provider = %id, "no API key configured");
            }
            let mut provider =
                OpenAiCompatibleProvider::new(id.clone(), entry.api_base.clone(), api_key);
            if let Some(bus) = &events {
                provider = provider.with_events(bus.clone());
            }
            registry.register(Arc::new(provider));
        }
        registry
    }
}

fn api_key_var(provider_id: &str) -> String {
    format!("DESKPILOT_{}_API_KEY", provider_id.to_uppercase().replace('-', "_"))
}
