use serde::Serialize;
use tokio::sync::broadcast;

use crate::agent_engine::state::{ExecutedToolRecord, IterationRecord, TurnPhase};
use crate::llm::types::StreamChunk;
use crate::planning::plan::PlanStep;

/// Progress notifications for presentation layers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    PhaseChanged {
        phase: TurnPhase,
    },
    PlanReady {
        instruction: String,
        steps: Vec<PlanStep>,
    },
    StepStarted {
        step: usize,
        total: usize,
        tool: String,
        description: String,
    },
    StepFinished {
        record: ExecutedToolRecord,
    },
    IterationStarted {
        iteration: u32,
        max: u32,
    },
    ActionChosen {
        iteration: u32,
        thought: String,
        tool: String,
        parameters: serde_json::Value,
    },
    IterationFinished {
        record: IterationRecord,
    },
    Warning {
        message: String,
    },
    LlmChunk {
        chunk: StreamChunk,
    },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget; having no subscribers is fine.
    pub fn emit(&self, event: AgentEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event dropped: no subscribers");
        }
    }

    pub fn phase(&self, phase: TurnPhase) {
        tracing::debug!(?phase, "phase changed");
        self.emit(AgentEvent::PhaseChanged { phase });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
