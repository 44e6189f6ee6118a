pub mod agent_engine;
pub mod config;
pub mod controller;
pub mod errors;
pub mod llm;
pub mod perception;
pub mod planning;
pub mod tools;

#[cfg(test)]
mod testing;

use std::sync::Arc;

pub use controller::{AgentController, Mode};
pub use errors::{PilotError, PilotResult, ToolError};

use crate::config::AppConfig;
use crate::tools::approval::ApprovalGate;
use crate::tools::command::CommandTool;
use crate::tools::ToolRegistry;

/// Registry holding every command tool declared in the config.
pub fn build_tool_registry(config: &AppConfig, approval: Arc<dyn ApprovalGate>) -> ToolRegistry {
    let mut registry = ToolRegistry::new(config.safe_mode())
        .with_require_list(config.safety.require_approval_for.clone())
        .with_approval(approval);
    for entry in &config.tools {
        registry.register(Arc::new(CommandTool::from_entry(entry)));
    }
    tracing::info!(tools = registry.len(), safe_mode = registry.safe_mode(), "tool registry built");
    registry
}
