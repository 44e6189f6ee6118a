pub mod autonomous;
pub mod engine;
pub mod event_bus;
pub mod history;
pub mod loop_control;
pub mod state;

pub use autonomous::{AutonomousAgent, AutonomousSettings};
pub use engine::Agent;
pub use event_bus::{AgentEvent, EventBus};
pub use history::SessionHistory;
pub use state::{AutonomousOutcome, TurnPhase, TurnReport};
