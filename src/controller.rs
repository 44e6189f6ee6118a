use std::sync::Arc;

use tokio::sync::Mutex;

use crate::agent_engine::{Agent, AutonomousAgent, AutonomousSettings, EventBus, SessionHistory};
use crate::config::AppConfig;
use crate::errors::{PilotError, PilotResult};
use crate::llm::registry::LlmRole;
use crate::llm::ProviderRegistry;
use crate::perception::{DesktopObserver, HttpElementDetector};
use crate::planning::refiner::attach_image;
use crate::planning::{PromptRefiner, ResponseJudge};
use crate::tools::ToolRegistry;

/// Which orchestrator handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Plan, then execute step by step.
    #[default]
    Ask,
    /// Observe the screen and act until the goal is reached.
    Agent,
}

/// Front door for presentation layers. At most one request runs at a time;
/// a second one is rejected with `PilotError::Busy`.
pub struct AgentController {
    agent: Mutex<Agent>,
    autonomous: AutonomousAgent,
    events: EventBus,
}

impl AgentController {
    pub fn new(agent: Agent, autonomous: AutonomousAgent, events: EventBus) -> Self {
        Self {
            agent: Mutex::new(agent),
            autonomous,
            events,
        }
    }

    /// Wire both orchestrators from config around an already populated tool registry.
    pub fn from_config(config: &AppConfig, tools: Arc<ToolRegistry>, events: EventBus) -> PilotResult<Self> {
        let providers = ProviderRegistry::from_config(config, Some(events.clone()));
        let tools_llm = providers.client_for_role(LlmRole::Tools)?;
        let refiner = PromptRefiner::new(providers.client_for_role(LlmRole::Refiner)?, &tools.catalog());

        let history = if config.agent.journal_sessions {
            SessionHistory::for_session()
        } else {
            SessionHistory::in_memory()
        };
        let mut agent = Agent::new(tools_llm.clone(), refiner.clone(), tools.clone(), history, events.clone());
        if config.agent.enable_judge {
            agent = agent.with_judge(ResponseJudge::new(providers.client_for_role(LlmRole::Judge)?));
        }

        let mut observer = DesktopObserver::new(tools.clone());
        if providers.has_role(LlmRole::Vision) {
            observer = observer.with_vision(providers.client_for_role(LlmRole::Vision)?);
        }
        let mut autonomous = AutonomousAgent::new(
            tools_llm,
            refiner,
            tools,
            Arc::new(observer),
            events.clone(),
            AutonomousSettings::from(&config.agent),
        );
        if let Some(detector) = HttpElementDetector::from_config(&config.perception) {
            autonomous = autonomous.with_detector(Arc::new(detector));
        } else {
            tracing::info!("no detection endpoint configured, element detection disabled");
        }

        tracing::info!(
            judge = config.agent.enable_judge,
            vision = providers.has_role(LlmRole::Vision),
            "controller ready"
        );
        Ok(Self::new(agent, autonomous, events))
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_busy(&self) -> bool {
        self.agent.try_lock().is_err()
    }

    /// Handle one request. `image` is a path attached to the request.
    pub async fn process(&self, input: &str, image: Option<&str>, mode: Mode) -> PilotResult<String> {
        let Ok(mut agent) = self.agent.try_lock() else {
            tracing::warn!("request rejected, agent busy");
            return Err(PilotError::Busy);
        };

        let request = match image {
            Some(path) => attach_image(path, input),
            None => input.to_string(),
        };
        tracing::info!(?mode, has_image = image.is_some(), "processing request");

        let reply = match mode {
            Mode::Ask => agent.process(&request).await,
            Mode::Agent => self.autonomous.execute(&request).await.render(),
        };
        Ok(reply)
    }
}
