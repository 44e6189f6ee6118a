use serde::Serialize;
use serde_json::{json, Value};

use crate::planning::{ExecutionPlan, JudgeVerdict};
use crate::tools::ToolOutcome;

/// Where a turn (or autonomous run) currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TurnPhase {
    Idle,
    Refining,
    DirectCall,
    StepLoop { step: usize, total: usize },
    Summarizing,
    Observing { iteration: u32 },
    Detecting { iteration: u32 },
    Selecting { iteration: u32 },
    Deciding { iteration: u32 },
    Acting { iteration: u32, tool: String },
    Done,
}

/// Outcome of one plan step. Discarded at the end of the turn.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutedToolRecord {
    pub step: usize,
    pub name: String,
    pub args: Value,
    pub outcome: ToolOutcome,
}

impl ExecutedToolRecord {
    pub fn failure(step: usize, name: impl Into<String>, kind: &str, message: impl Into<String>) -> Self {
        Self {
            step,
            name: name.into(),
            args: json!({}),
            outcome: ToolOutcome::failure(kind, message),
        }
    }

    pub fn failed(&self) -> bool {
        self.outcome.is_failure()
    }

    pub fn result(&self) -> String {
        self.outcome.render()
    }

    /// `{name, args, result, step, failed}` for audit payloads.
    pub fn audit_value(&self) -> Value {
        json!({
            "name": self.name,
            "args": self.args,
            "result": self.result(),
            "step": self.step,
            "failed": self.failed(),
        })
    }
}

/// Everything one plan-execute turn produced.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub reply: String,
    pub refined_instruction: String,
    pub plan: ExecutionPlan,
    pub executed: Vec<ExecutedToolRecord>,
    pub verdict: Option<JudgeVerdict>,
}

impl TurnReport {
    pub fn failed_steps(&self) -> usize {
        self.executed.iter().filter(|r| r.failed()).count()
    }
}

/// One observe/decide/act cycle of the autonomous loop.
#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    pub iteration: u32,
    /// Screen description, truncated.
    pub screen: String,
    pub thought: String,
    pub verification: String,
    pub tool: String,
    pub parameters: Value,
    pub outcome: ToolOutcome,
}

impl IterationRecord {
    pub fn success(&self) -> bool {
        !self.outcome.is_failure()
    }

    pub fn result(&self) -> String {
        self.outcome.render()
    }

    pub fn marker(&self) -> &'static str {
        if self.success() {
            "✓"
        } else {
            "❌"
        }
    }
}

/// How an autonomous run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AutonomousOutcome {
    /// The model declared the goal achieved.
    Completed { message: String, iterations: u32 },
    /// The iteration budget ran out first.
    MaxIterations { max: u32, summary: String },
    /// The optional wall-clock budget ran out first.
    TimeBudget { minutes: u32, summary: String },
    /// Screen observation failed.
    Aborted { reason: String },
}

impl AutonomousOutcome {
    pub fn render(&self) -> String {
        match self {
            AutonomousOutcome::Completed { message, .. } => message.clone(),
            AutonomousOutcome::MaxIterations { max, summary } => {
                format!("⚠️  Reached maximum iterations ({max}).\n\n{summary}")
            }
            AutonomousOutcome::TimeBudget { minutes, summary } => {
                format!("⚠️  Time budget of {minutes} minute(s) exhausted.\n\n{summary}")
            }
            AutonomousOutcome::Aborted { reason } => format!("Error: Failed to capture screen: {reason}"),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, AutonomousOutcome::Completed { .. })
    }
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
