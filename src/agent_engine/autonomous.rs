use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::agent_engine::event_bus::{AgentEvent, EventBus};
use crate::agent_engine::loop_control::{LoopController, StopReason};
use crate::agent_engine::state::{truncate_chars, AutonomousOutcome, IterationRecord, TurnPhase};
use crate::config::AgentConfig;
use crate::errors::{PilotError, PilotResult, ToolError};
use crate::llm::types::ChatMessage;
use crate::llm::LlmClient;
use crate::perception::filter::ElementFilter;
use crate::perception::traits::{ElementDetector, ScreenObserver};
use crate::perception::types::{Screenshot, UIElement};
use crate::planning::json::strip_fences;
use crate::planning::PromptRefiner;
use crate::tools::{ToolArgs, ToolOutcome, ToolRegistry};

const SYSTEM_PROMPT: &str = include_str!("../../prompts/autonomous_system.md");

/// Tool whose `keys` parameter is passed as positional arguments.
pub const HOTKEY_TOOL: &str = "hotkey";
/// Fallback action when a decision cannot be parsed.
pub const DESCRIBE_TOOL: &str = "describe_screen";
/// Marker a screen description carries when observation failed.
pub const SCREEN_ERROR_MARKER: &str = "❌";

/// Prior iterations shown to the model.
const HISTORY_WINDOW: usize = 3;
/// Iterations listed in the final summary.
const SUMMARY_WINDOW: usize = 5;
const SCREEN_RECORD_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct AutonomousSettings {
    pub max_iterations: u32,
    pub settle_delay: Duration,
    pub max_duration_minutes: Option<u32>,
    pub decision_temperature: f64,
    pub max_candidate_elements: usize,
}

impl From<&AgentConfig> for AutonomousSettings {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            settle_delay: Duration::from_millis(cfg.settle_delay_ms),
            max_duration_minutes: cfg.max_duration_minutes,
            decision_temperature: cfg.decision_temperature,
            max_candidate_elements: cfg.max_candidate_elements,
        }
    }
}

impl Default for AutonomousSettings {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

/// One next action chosen by the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Decision {
    #[serde(default)]
    pub thought: String,
    #[serde(default)]
    pub verification: String,
    #[serde(default)]
    pub action: Option<DecisionAction>,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub completion_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DecisionAction {
    pub tool: String,
    #[serde(default)]
    pub parameters: Value,
}

impl Decision {
    /// Safe default: look at the screen again.
    pub fn describe_screen() -> Self {
        Self {
            thought: "Failed to parse decision".into(),
            verification: String::new(),
            action: Some(DecisionAction {
                tool: DESCRIBE_TOOL.into(),
                parameters: Value::Object(Map::new()),
            }),
            is_complete: false,
            completion_message: None,
        }
    }
}

/// Strictly decode a decision reply.
pub fn parse_decision(raw: &str) -> PilotResult<Decision> {
    serde_json::from_str::<Decision>(strip_fences(raw)).map_err(|e| PilotError::DecisionParse(e.to_string()))
}

/// Perception-action loop for GUI goals with no static plan.
pub struct AutonomousAgent {
    llm: LlmClient,
    refiner: PromptRefiner,
    registry: Arc<ToolRegistry>,
    observer: Arc<dyn ScreenObserver>,
    detector: Option<Arc<dyn ElementDetector>>,
    events: EventBus,
    settings: AutonomousSettings,
    system_prompt: String,
}

impl AutonomousAgent {
    pub fn new(
        llm: LlmClient,
        refiner: PromptRefiner,
        registry: Arc<ToolRegistry>,
        observer: Arc<dyn ScreenObserver>,
        events: EventBus,
        settings: AutonomousSettings,
    ) -> Self {
        let system_prompt = SYSTEM_PROMPT.replace("{catalog}", &registry.catalog().render_for_prompt());
        Self {
            llm,
            refiner,
            registry,
            observer,
            detector: None,
            events,
            settings,
            system_prompt,
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn ElementDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Run until the model declares completion or a budget runs out.
    pub async fn execute(&self, goal: &str) -> AutonomousOutcome {
        tracing::info!(goal = %goal, max_iterations = self.settings.max_iterations, "autonomous run started");
        let mut ctrl = LoopController::new(self.settings.max_iterations, self.settings.max_duration_minutes);
        let mut records: Vec<IterationRecord> = Vec::new();

        let outcome = loop {
            let iteration = match ctrl.next_iteration() {
                Ok(i) => i,
                Err(StopReason::MaxIterations) => {
                    tracing::warn!("max iterations reached without completion");
                    break AutonomousOutcome::MaxIterations {
                        max: ctrl.max_iterations(),
                        summary: summarize(goal, &records),
                    };
                }
                Err(StopReason::TimeBudget) => {
                    tracing::warn!("time budget exhausted without completion");
                    break AutonomousOutcome::TimeBudget {
                        minutes: self.settings.max_duration_minutes.unwrap_or_default(),
                        summary: summarize(goal, &records),
                    };
                }
            };
            if iteration > 1 && !self.settings.settle_delay.is_zero() {
                tokio::time::sleep(self.settings.settle_delay).await;
            }
            self.events.emit(AgentEvent::IterationStarted {
                iteration,
                max: ctrl.max_iterations(),
            });

            match self.iterate(goal, iteration, &records).await {
                Step::Finished(outcome) => break outcome,
                Step::Recorded(record) => {
                    if !record.success() {
                        ctrl.record_failure();
                    }
                    self.events.emit(AgentEvent::IterationFinished { record: record.clone() });
                    records.push(record);
                }
                Step::Skipped => {}
            }
        };

        self.events.phase(TurnPhase::Done);
        tracing::info!(
            iterations = ctrl.iterations(),
            failures = ctrl.failures(),
            completed = outcome.is_completed(),
            "autonomous run finished"
        );
        outcome
    }

    async fn iterate(&self, goal: &str, iteration: u32, records: &[IterationRecord]) -> Step {
        // Observe
        self.events.phase(TurnPhase::Observing { iteration });
        let shot = match self.observer.capture().await {
            Ok(shot) => shot,
            Err(e) => {
                tracing::error!(error = %e, "screen capture failed");
                return Step::Finished(AutonomousOutcome::Aborted { reason: e.to_string() });
            }
        };
        let description = match self.observer.describe(&shot).await {
            Ok(d) if d.contains(SCREEN_ERROR_MARKER) => {
                return Step::Finished(AutonomousOutcome::Aborted { reason: d });
            }
            Ok(d) => d,
            Err(e) => {
                tracing::error!(error = %e, "screen description failed");
                return Step::Finished(AutonomousOutcome::Aborted { reason: e.to_string() });
            }
        };
        tracing::info!(iteration, screen = %truncate_chars(&description, SCREEN_RECORD_CHARS), "screen observed");

        // Detect
        let elements = self.detect_elements(goal, iteration, &shot).await;

        // Refine/Select
        self.events.phase(TurnPhase::Selecting { iteration });
        let mut screen = description.clone();
        match self
            .refiner
            .select_element(
                goal,
                &elements,
                (shot.width, shot.height),
                &description,
                &format_previous_actions(records),
            )
            .await
        {
            Ok(selection) => {
                screen.push_str("\n\n");
                screen.push_str(&selection.hint(&elements));
            }
            Err(e) => tracing::warn!(error = %e, "element selection failed, continuing without it"),
        }

        // Decide
        self.events.phase(TurnPhase::Deciding { iteration });
        let messages = vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(build_context(goal, &screen, records)),
        ];
        let decision = match self
            .llm
            .complete_text(messages, Some(self.settings.decision_temperature))
            .await
        {
            Ok(raw) => parse_decision(&raw).unwrap_or_else(|e| {
                tracing::error!(iteration, error = %e, "unusable decision, describing the screen instead");
                tracing::debug!(raw = %raw, "rejected decision");
                Decision::describe_screen()
            }),
            Err(e) => {
                tracing::error!(iteration, error = %e, "failed to get next action");
                return Step::Recorded(IterationRecord {
                    iteration,
                    screen: truncate_chars(&screen, SCREEN_RECORD_CHARS),
                    thought: String::new(),
                    verification: String::new(),
                    tool: "decide".into(),
                    parameters: Value::Null,
                    outcome: ToolOutcome::failure("llm_error", format!("Failed to plan next action: {e}")),
                });
            }
        };

        if decision.is_complete {
            let message = decision
                .completion_message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "Task completed".into());
            tracing::info!(iteration, "task completed");
            return Step::Finished(AutonomousOutcome::Completed { message, iterations: iteration });
        }

        let Some(action) = decision.action else {
            tracing::warn!(iteration, "no valid action in decision");
            return Step::Skipped;
        };

        // Act
        self.events.phase(TurnPhase::Acting { iteration, tool: action.tool.clone() });
        self.events.emit(AgentEvent::ActionChosen {
            iteration,
            thought: decision.thought.clone(),
            tool: action.tool.clone(),
            parameters: action.parameters.clone(),
        });
        tracing::info!(
            iteration,
            tool = %action.tool,
            parameters = %action.parameters,
            verification = %decision.verification,
            "executing action"
        );

        let result = match action_args(&action.tool, &action.parameters) {
            Ok(args) => self.registry.execute(&action.tool, args).await,
            Err(e) => Err(e),
        };
        let outcome = ToolOutcome::from_result(result);
        if let ToolOutcome::Failure { message, .. } = &outcome {
            tracing::error!(tool = %action.tool, error = %message, "action failed");
        }

        Step::Recorded(IterationRecord {
            iteration,
            screen: truncate_chars(&screen, SCREEN_RECORD_CHARS),
            thought: decision.thought,
            verification: decision.verification,
            tool: action.tool,
            parameters: action.parameters,
            outcome,
        })
    }

    /// Detection failures degrade to an empty element list.
    async fn detect_elements(&self, goal: &str, iteration: u32, shot: &Screenshot) -> Vec<UIElement> {
        let Some(detector) = &self.detector else {
            return Vec::new();
        };
        self.events.phase(TurnPhase::Detecting { iteration });
        let detected = match detector.detect(shot).await {
            Ok(result) => {
                tracing::debug!(raw = %truncate_chars(&result.raw, 2000), "detector output");
                result.elements
            }
            Err(e) => {
                tracing::warn!(error = %e, "element detection failed");
                self.events.emit(AgentEvent::Warning {
                    message: format!("Element detection failed: {e}"),
                });
                return Vec::new();
            }
        };

        let limit = self.settings.max_candidate_elements;
        if detected.len() <= limit {
            return detected;
        }
        let narrowed = ElementFilter::new(shot.width, shot.height).narrow_for_goal(&detected, goal, limit);
        tracing::info!(detected = detected.len(), kept = narrowed.len(), "narrowed candidate elements");
        narrowed
    }
}

enum Step {
    Finished(AutonomousOutcome),
    Recorded(IterationRecord),
    Skipped,
}

/// Map decision parameters to tool arguments; hotkey keys become positionals.
fn action_args(tool: &str, parameters: &Value) -> Result<ToolArgs, ToolError> {
    let named = match parameters {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(ToolError::InvalidArguments {
                tool: tool.to_string(),
                message: format!("parameters must be an object, got {other}"),
            })
        }
    };

    if tool == HOTKEY_TOOL {
        if let Some(keys) = named.get("keys") {
            let keys = match keys {
                Value::Array(items) => items.clone(),
                Value::String(combo) => combo
                    .split('+')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(|k| Value::String(k.to_string()))
                    .collect(),
                other => vec![other.clone()],
            };
            return Ok(ToolArgs::positional(keys));
        }
    }
    Ok(ToolArgs::named(named))
}

fn build_context(goal: &str, screen: &str, records: &[IterationRecord]) -> String {
    let mut parts = vec![format!("GOAL: {goal}"), format!("\nCURRENT SCREEN: {screen}")];

    if let Some(last) = records.last() {
        parts.push("\nPREVIOUS ACTIONS (most recent last):".into());
        for rec in window(records, HISTORY_WINDOW) {
            parts.push(format!(
                "  - Iteration {}: {} → {} {}",
                rec.iteration,
                rec.tool,
                rec.marker(),
                truncate_chars(&rec.result(), 100)
            ));
        }
        parts.push(format!(
            "\nREMINDER: Last action was '{}'. Did it succeed? Check the current screen carefully before proceeding.",
            last.tool
        ));
    }

    parts.push("\nWhat is the SINGLE NEXT ACTION to take? (Return JSON only)".into());
    parts.join("\n")
}

fn format_previous_actions(records: &[IterationRecord]) -> String {
    if records.is_empty() {
        return "No previous actions yet.".into();
    }
    window(records, HISTORY_WINDOW)
        .iter()
        .map(|rec| {
            format!(
                "{} Iteration {}: {} → {}",
                rec.marker(),
                rec.iteration,
                rec.tool,
                truncate_chars(&rec.result(), 100)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn summarize(goal: &str, records: &[IterationRecord]) -> String {
    let successful = records.iter().filter(|r| r.success()).count();
    let mut lines = vec![
        format!("Goal: {goal}"),
        format!("Total actions: {}", records.len()),
        format!("Successful: {successful}"),
        format!("Failed: {}", records.len() - successful),
        "\nLast few actions:".to_string(),
    ];
    for rec in window(records, SUMMARY_WINDOW) {
        lines.push(format!(
            "  {} Iteration {}: {} - {}",
            rec.marker(),
            rec.iteration,
            rec.tool,
            truncate_chars(&rec.result(), 80)
        ));
    }
    lines.join("\n")
}

fn window(records: &[IterationRecord], n: usize) -> &[IterationRecord] {
    &records[records.len().saturating_sub(n)..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::LlmResponse;
    use crate::perception::types::ElementKind;
    use crate::testing::{text_reply, FakeDetector, FakeObserver, ScriptedProvider, SpyTool};

    struct Harness {
        agent: AutonomousAgent,
        llm: Arc<ScriptedProvider>,
        describe: Arc<SpyTool>,
        hotkey: Arc<SpyTool>,
        launch: Arc<SpyTool>,
    }

    fn settings(max_iterations: u32) -> AutonomousSettings {
        AutonomousSettings {
            max_iterations,
            settle_delay: Duration::ZERO,
            max_duration_minutes: None,
            decision_temperature: 0.1,
            max_candidate_elements: 80,
        }
    }

    fn harness(observer: FakeObserver, decisions: Vec<PilotResult<LlmResponse>>, max_iterations: u32) -> Harness {
        let describe = SpyTool::ok(DESCRIBE_TOOL, "A desktop with a taskbar");
        let hotkey = SpyTool::ok(HOTKEY_TOOL, "pressed");
        let launch = SpyTool::ok("launch_app", "Launched Chrome");
        let mut registry = ToolRegistry::new(false);
        registry.register(describe.clone());
        registry.register(hotkey.clone());
        registry.register(launch.clone());
        let registry = Arc::new(registry);

        // No scripted selections: every selection fails and the loop carries on.
        let refiner = PromptRefiner::new(ScriptedProvider::new(vec![]).client(), &registry.catalog());
        let llm = ScriptedProvider::new(decisions);
        let agent = AutonomousAgent::new(
            llm.client(),
            refiner,
            registry,
            Arc::new(observer),
            EventBus::new(),
            settings(max_iterations),
        );
        Harness { agent, llm, describe, hotkey, launch }
    }

    fn act(tool: &str, params: &str) -> PilotResult<LlmResponse> {
        text_reply(&format!(
            r#"{{"thought": "t", "verification": "v", "action": {{"tool": "{tool}", "parameters": {params}}}, "is_complete": false}}"#
        ))
    }

    fn done(message: &str) -> PilotResult<LlmResponse> {
        text_reply(&format!(
            r#"{{"thought": "goal reached", "action": {{"tool": "describe_screen", "parameters": {{}}}}, "is_complete": true, "completion_message": "{message}"}}"#
        ))
    }

    #[tokio::test]
    async fn malformed_decision_falls_back_to_describe_screen() {
        let h = harness(
            FakeObserver::new(vec!["Desktop"]),
            vec![text_reply("I think we should click Chrome"), done("Chrome is open")],
            5,
        );
        let outcome = h.agent.execute("open chrome").await;
        assert_eq!(
            outcome,
            AutonomousOutcome::Completed { message: "Chrome is open".into(), iterations: 2 }
        );
        assert_eq!(h.describe.calls().len(), 1);
    }

    #[tokio::test]
    async fn cap_yields_marked_result_and_never_exceeds_budget() {
        let h = harness(
            FakeObserver::new(vec!["Desktop"]),
            (0..10).map(|_| act("launch_app", r#"{"app_name": "Chrome"}"#)).collect(),
            3,
        );
        let outcome = h.agent.execute("open chrome").await;
        assert_eq!(h.launch.calls().len(), 3);
        let text = outcome.render();
        assert!(text.starts_with("⚠️  Reached maximum iterations (3)."));
        assert!(text.contains("Total actions: 3"));
        assert!(text.contains("✓ Iteration 3: launch_app - Launched Chrome"));
        assert_eq!(h.llm.requests().len(), 3);
    }

    #[tokio::test]
    async fn hotkey_keys_become_positional_arguments() {
        let h = harness(
            FakeObserver::new(vec!["Chrome window"]),
            vec![
                act(HOTKEY_TOOL, r#"{"keys": ["ctrl", "l"]}"#),
                act(HOTKEY_TOOL, r#"{"keys": "ctrl+t"}"#),
                done("ok"),
            ],
            5,
        );
        h.agent.execute("new tab").await;
        let calls = h.hotkey.calls();
        assert_eq!(calls[0].positional, vec![Value::from("ctrl"), Value::from("l")]);
        assert_eq!(calls[1].positional, vec![Value::from("ctrl"), Value::from("t")]);
        assert!(calls[0].named.is_empty());
    }

    #[tokio::test]
    async fn error_marker_in_description_aborts() {
        let h = harness(FakeObserver::new(vec!["❌ Vision model unavailable"]), vec![done("never")], 5);
        let outcome = h.agent.execute("open chrome").await;
        assert!(matches!(outcome, AutonomousOutcome::Aborted { .. }));
        assert!(outcome.render().starts_with("Error: Failed to capture screen: ❌ Vision model unavailable"));
        assert!(h.llm.requests().is_empty());
    }

    #[tokio::test]
    async fn capture_failure_aborts() {
        let h = harness(FakeObserver::failing(), vec![], 5);
        assert!(matches!(h.agent.execute("x").await, AutonomousOutcome::Aborted { .. }));
    }

    #[tokio::test]
    async fn decide_outage_and_tool_failure_are_recorded_not_fatal() {
        let h = harness(
            FakeObserver::new(vec!["Desktop"]),
            vec![
                Err(PilotError::LlmProvider("502".into())),
                act("open_url", r#"{"url": "https://example.com"}"#),
                done("finished"),
            ],
            5,
        );
        let mut rx = h.agent.events.subscribe();
        let outcome = h.agent.execute("browse").await;
        assert!(outcome.is_completed());

        let mut finished = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let AgentEvent::IterationFinished { record } = ev {
                finished.push(record);
            }
        }
        assert_eq!(finished.len(), 2);
        assert!(!finished[0].success());
        assert_eq!(finished[1].tool, "open_url");
        assert!(finished[1].result().contains("not registered"));

        // the failed action shows up in the next decision's context
        let last_ctx = h.llm.requests()[2].messages[1].text();
        assert!(last_ctx.contains("Iteration 2: open_url → ❌"));
    }

    #[tokio::test]
    async fn detection_failure_warns_and_continues() {
        let h = harness(FakeObserver::new(vec!["Desktop"]), vec![done("ok")], 5);
        let agent = h.agent.with_detector(Arc::new(FakeDetector::failing()));
        let mut rx = agent.events.subscribe();

        assert!(agent.execute("x").await.is_completed());
        let mut warned = false;
        while let Ok(ev) = rx.try_recv() {
            if let AgentEvent::Warning { message } = ev {
                warned |= message.starts_with("Element detection failed");
            }
        }
        assert!(warned);
    }

    #[tokio::test]
    async fn detected_elements_reach_the_selection_prompt() {
        let describe = SpyTool::ok(DESCRIBE_TOOL, "desc");
        let mut registry = ToolRegistry::new(false);
        registry.register(describe);
        let registry = Arc::new(registry);
        let selector = ScriptedProvider::new(vec![text_reply(
            r#"{"element_id": 1, "analysis": "taskbar", "suggested_action": "click chrome", "tool_recommendation": "click_element", "parameters": {}, "reasoning": "icon"}"#,
        )]);
        let llm = ScriptedProvider::new(vec![done("ok")]);
        let agent = AutonomousAgent::new(
            llm.client(),
            PromptRefiner::new(selector.client(), &registry.catalog()),
            registry,
            Arc::new(FakeObserver::new(vec!["Desktop"])),
            EventBus::new(),
            settings(2),
        )
        .with_detector(Arc::new(FakeDetector::new(vec![UIElement::new(
            1,
            "Google Chrome",
            ElementKind::Icon,
            [10, 1040, 50, 1080],
        )])));

        agent.execute("open chrome").await;
        assert!(selector.requests()[0].messages[0].text().contains("[1] icon \"Google Chrome\""));
        let decision_ctx = llm.requests()[0].messages[1].text();
        assert!(decision_ctx.contains("TARGET ELEMENT: [1] \"Google Chrome\" at (30, 1060)"));
    }

    #[test]
    fn decision_decode_is_strict() {
        assert!(matches!(
            parse_decision("```json\n{\"is_complete\": \"yes\"}\n```"),
            Err(PilotError::DecisionParse(_))
        ));
        let d = parse_decision(r#"{"thought": "x", "action": {"tool": "scroll"}, "is_complete": false}"#).unwrap();
        assert_eq!(d.action.unwrap().tool, "scroll");
    }

    #[test]
    fn non_object_parameters_are_invalid() {
        assert!(matches!(
            action_args("type_text", &Value::from("hello")),
            Err(ToolError::InvalidArguments { .. })
        ));
    }
}
