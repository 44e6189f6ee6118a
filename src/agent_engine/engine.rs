use std::sync::Arc;

use crate::agent_engine::event_bus::{AgentEvent, EventBus};
use crate::agent_engine::history::SessionHistory;
use crate::agent_engine::state::{truncate_chars, ExecutedToolRecord, TurnPhase, TurnReport};
use crate::llm::types::{ChatMessage, LlmResponse, ToolCall, ToolChoice};
use crate::llm::LlmClient;
use crate::planning::{JudgeInput, PlanStep, PromptRefiner, RefinedRequest, ResponseJudge};
use crate::tools::{ToolArgs, ToolCatalog, ToolOutcome, ToolRegistry};

const SYSTEM_PROMPT: &str = include_str!("../../prompts/agent_system.md");

/// Characters of a prior result carried into the next step's context.
const CONTEXT_RESULT_CHARS: usize = 500;
/// Characters of a failed result shown in the execution summary.
const SUMMARY_RESULT_CHARS: usize = 100;
const LLM_ERROR_CHARS: usize = 200;

/// Plan-execute-verify orchestrator. Owns the conversation history.
pub struct Agent {
    llm: LlmClient,
    refiner: PromptRefiner,
    judge: Option<ResponseJudge>,
    registry: Arc<ToolRegistry>,
    catalog: ToolCatalog,
    history: SessionHistory,
    events: EventBus,
    system_prompt: String,
}

impl Agent {
    pub fn new(
        llm: LlmClient,
        refiner: PromptRefiner,
        registry: Arc<ToolRegistry>,
        history: SessionHistory,
        events: EventBus,
    ) -> Self {
        let catalog = registry.catalog();
        Self {
            llm,
            refiner,
            judge: None,
            registry,
            catalog,
            history,
            events,
            system_prompt: render_system_prompt(),
        }
    }

    /// Audit every reply with `judge`. The verdict never alters the reply.
    pub fn with_judge(mut self, judge: ResponseJudge) -> Self {
        self.judge = Some(judge);
        self
    }

    /// Validate plan steps against `catalog` instead of the registry's own.
    pub fn with_catalog(mut self, catalog: ToolCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    /// Run one user turn and return the reply text. Never fails.
    pub async fn process(&mut self, user_input: &str) -> String {
        self.run_turn(user_input).await.reply
    }

    pub async fn run_turn(&mut self, user_input: &str) -> TurnReport {
        tracing::info!(input = %user_input, "turn started");
        self.events.phase(TurnPhase::Refining);

        let refined = match self.refiner.refine(user_input).await {
            Ok(refined) => refined,
            Err(e) => {
                tracing::warn!(error = %e, "refiner unavailable, degrading to direct call");
                RefinedRequest::passthrough(user_input)
            }
        };

        self.history.push(ChatMessage::user(refined.instruction.clone()));

        let (reply, executed) = if refined.execution_plan.is_empty() {
            tracing::info!("no execution plan, falling back to direct tool call");
            self.direct_call().await
        } else {
            self.events.emit(AgentEvent::PlanReady {
                instruction: refined.instruction.clone(),
                steps: refined.execution_plan.clone(),
            });
            self.run_plan(&refined.execution_plan).await
        };

        let verdict = match &self.judge {
            Some(judge) => Some(
                judge
                    .review(JudgeInput {
                        original_user_input: user_input,
                        refined_instruction: &refined.instruction,
                        history: self.history.messages(),
                        executed_tools: &executed,
                        final_text: &reply,
                    })
                    .await,
            ),
            None => None,
        };
        if let Some(v) = verdict.as_ref().filter(|v| v.hallucinated) {
            self.events.emit(AgentEvent::Warning {
                message: format!("Judge flagged the reply: {}", v.reason),
            });
        }

        self.events.phase(TurnPhase::Done);
        tracing::info!(
            steps = refined.execution_plan.len(),
            executed = executed.len(),
            failed = executed.iter().filter(|r| r.failed()).count(),
            "turn finished"
        );

        TurnReport {
            reply,
            refined_instruction: refined.instruction,
            plan: refined.execution_plan,
            executed,
            verdict,
        }
    }

    // ── DirectCall ──────────────────────────────────────────────────────

    async fn direct_call(&mut self) -> (String, Vec<ExecutedToolRecord>) {
        self.events.phase(TurnPhase::DirectCall);

        let response = match self
            .llm
            .complete(
                self.history.with_system(&self.system_prompt),
                self.registry.get_tool_schema(),
                Some(ToolChoice::Required),
                Some(0.0),
            )
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "direct call failed");
                let text = format!("Error: {e}");
                self.history.push(ChatMessage::assistant(text.clone()));
                return (text, Vec::new());
            }
        };

        let Some(call) = response.first_tool_call().cloned() else {
            let text = non_empty_or(&response.content, "No tool was called.");
            self.history.push(ChatMessage::assistant(text.clone()));
            return (text, Vec::new());
        };

        let record = self.execute_call(1, &response, call).await;
        let fallback = record.result();
        let executed = vec![record];

        let reply = match self
            .llm
            .complete(self.history.with_system(&self.system_prompt), Vec::new(), None, None)
            .await
        {
            Ok(r) => non_empty_or(&r.content, &fallback),
            Err(e) => {
                tracing::error!(error = %e, "final reply after direct call failed");
                format!("Error: {e}")
            }
        };
        self.history.push(ChatMessage::assistant(reply.clone()));
        (reply, executed)
    }

    // ── StepLoop + Summarizing ──────────────────────────────────────────

    async fn run_plan(&mut self, plan: &[PlanStep]) -> (String, Vec<ExecutedToolRecord>) {
        let total = plan.len();
        let mut executed: Vec<ExecutedToolRecord> = Vec::with_capacity(total);
        let mut failed_steps: Vec<usize> = Vec::new();

        for (idx, step) in plan.iter().enumerate() {
            self.events.phase(TurnPhase::StepLoop { step: idx + 1, total });
            self.events.emit(AgentEvent::StepStarted {
                step: step.step,
                total,
                tool: step.tool.clone(),
                description: step.description.clone(),
            });
            tracing::info!(
                step = step.step,
                total,
                tool = %step.tool,
                description = %step.description,
                "executing plan step"
            );

            let record = self.run_step(idx, step, &executed, &failed_steps).await;
            if record.failed() {
                failed_steps.push(step.step);
            }
            self.events.emit(AgentEvent::StepFinished { record: record.clone() });
            executed.push(record);
        }

        let summary = execution_summary(total, &executed);
        tracing::info!(summary = %summary, "plan finished");

        self.events.phase(TurnPhase::Summarizing);
        self.history.push(ChatMessage::user(format!(
            "{summary}\n\nProvide a final summary for the user."
        )));

        let mut reply = match self
            .llm
            .complete(self.history.with_system(&self.system_prompt), Vec::new(), None, None)
            .await
        {
            Ok(r) => non_empty_or(&r.content, summary.trim()),
            Err(e) => {
                tracing::error!(error = %e, "summary call failed");
                format!("Error: {e}")
            }
        };

        if !failed_steps.is_empty() {
            reply = format!(
                "⚠️ Warning: {} step(s) failed during execution.\n\n{reply}",
                failed_steps.len()
            );
        }
        self.history.push(ChatMessage::assistant(reply.clone()));
        (reply, executed)
    }

    async fn run_step(
        &mut self,
        idx: usize,
        step: &PlanStep,
        prior: &[ExecutedToolRecord],
        failed_steps: &[usize],
    ) -> ExecutedToolRecord {
        let n = step.step;

        if !self.catalog.contains(&step.tool) {
            tracing::error!(tool = %step.tool, available = ?self.catalog.names(), "tool not in catalog");
            let message = format!("Tool '{}' is not in the tool catalog", step.tool);
            self.history
                .push(ChatMessage::assistant(format!("❌ Step {n} failed: {message}")));
            return ExecutedToolRecord::failure(n, &step.tool, "not_in_catalog", message);
        }

        self.history
            .push(ChatMessage::user(step_context(step, prior, failed_steps)));

        if !self.registry.is_registered(&step.tool) {
            tracing::error!(tool = %step.tool, "tool not found in registry");
            let message = format!("Tool '{}' not found in registry", step.tool);
            self.history
                .push(ChatMessage::assistant(format!("❌ Step {n} failed: {message}")));
            return ExecutedToolRecord::failure(n, &step.tool, "not_registered", message);
        }

        let tool_choice = if idx == 0 || failed_steps.is_empty() {
            ToolChoice::Forced(step.tool.clone())
        } else {
            ToolChoice::Auto
        };

        let response = match self
            .llm
            .complete(
                self.history.with_system(&self.system_prompt),
                self.registry.get_tool_schema(),
                Some(tool_choice),
                Some(0.0),
            )
            .await
        {
            Ok(r) => r,
            Err(e) => {
                let err = truncate_chars(&e.to_string(), LLM_ERROR_CHARS);
                tracing::error!(step = n, error = %err, "LLM call failed for step");
                self.history
                    .push(ChatMessage::assistant(format!("❌ Step {n} failed: LLM API error: {err}")));
                return ExecutedToolRecord::failure(
                    n,
                    &step.tool,
                    "llm_error",
                    format!("LLM call failed - {err}"),
                );
            }
        };

        match response.first_tool_call().cloned() {
            Some(call) => {
                if call.function.name != step.tool {
                    tracing::warn!(
                        step = n,
                        planned = %step.tool,
                        called = %call.function.name,
                        "model called a different tool than planned"
                    );
                }
                self.execute_call(n, &response, call).await
            }
            None => {
                tracing::warn!(step = n, "model declined to call a tool");
                let text = non_empty_or(
                    &response.content,
                    &format!("Cannot proceed with step {n} due to missing required context from previous steps"),
                );
                self.history.push(ChatMessage::assistant(text.clone()));
                ExecutedToolRecord::failure(n, &step.tool, "declined", text)
            }
        }
    }

    /// Decode, execute and journal one model tool call.
    async fn execute_call(&mut self, step: usize, response: &LlmResponse, call: ToolCall) -> ExecutedToolRecord {
        if response.tool_calls.len() > 1 {
            tracing::warn!(count = response.tool_calls.len(), "only the first tool call is honoured");
        }
        let name = call.function.name.clone();
        let decoded = ToolArgs::from_json_str(&name, &call.function.arguments);
        let args_value = match &decoded {
            Ok(args) => args.to_value(),
            Err(_) => serde_json::Value::String(call.function.arguments.clone()),
        };

        self.history
            .push(ChatMessage::assistant_tool_call(response.content.clone(), call.clone()));

        tracing::info!(step, tool = %name, args = %args_value, "executing tool call");
        let result = match decoded {
            Ok(args) => self.registry.execute(&name, args).await,
            Err(e) => Err(e),
        };
        let outcome = ToolOutcome::from_result(result);
        if let ToolOutcome::Failure { kind, message } = &outcome {
            tracing::error!(tool = %name, kind = %kind, error = %message, "tool failed");
        }

        self.history
            .push(ChatMessage::tool_result(call.id, &name, outcome.render()));
        ExecutedToolRecord {
            step,
            name,
            args: args_value,
            outcome,
        }
    }
}

/// Step directive plus prior results, with a warning when anything failed.
fn step_context(step: &PlanStep, prior: &[ExecutedToolRecord], failed_steps: &[usize]) -> String {
    let mut ctx = step.directive().to_string();

    if !prior.is_empty() {
        ctx.push_str("\n\nResults from previous steps:\n");
        for rec in prior {
            let result = rec.result();
            let shown = truncate_chars(&result, CONTEXT_RESULT_CHARS);
            let ellipsis = if shown.len() < result.len() { "..." } else { "" };
            if rec.failed() {
                ctx.push_str(&format!("- ❌ {} FAILED: {shown}{ellipsis}\n", rec.name));
            } else {
                ctx.push_str(&format!("- ✓ {}: {shown}{ellipsis}\n", rec.name));
            }
        }
    }

    if !failed_steps.is_empty() {
        ctx.push_str(&format!(
            "\n\n⚠️ WARNING: Previous steps {failed_steps:?} failed. You cannot proceed if you need their results."
        ));
    }
    ctx
}

fn execution_summary(total: usize, executed: &[ExecutedToolRecord]) -> String {
    let failed: Vec<&ExecutedToolRecord> = executed.iter().filter(|r| r.failed()).collect();
    let mut lines = vec![
        "\n📊 Execution Summary:".to_string(),
        format!("   Total steps: {total}"),
        format!("   Successful: {}", executed.len() - failed.len()),
        format!("   Failed: {}", failed.len()),
    ];
    if !failed.is_empty() {
        let numbers: Vec<usize> = failed.iter().map(|r| r.step).collect();
        lines.push(format!("\n❌ Failed steps: {numbers:?}"));
        for rec in &failed {
            lines.push(format!(
                "   - Step {}: {} - {}",
                rec.step,
                rec.name,
                truncate_chars(&rec.result(), SUMMARY_RESULT_CHARS)
            ));
        }
    }
    lines.join("\n")
}

fn non_empty_or(text: &str, fallback: &str) -> String {
    if text.trim().is_empty() {
        fallback.to_string()
    } else {
        text.to_string()
    }
}

fn render_system_prompt() -> String {
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let home = dirs::home_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    SYSTEM_PROMPT
        .replace("{os}", std::env::consts::OS)
        .replace("{cwd}", &cwd)
        .replace("{home}", &home)
}
