use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agent_engine::state::ExecutedToolRecord;
use crate::llm::types::ChatMessage;
use crate::llm::LlmClient;
use crate::planning::json::{non_empty_str, parse_object};

const JUDGE_PROMPT: &str = include_str!("../../prompts/judge_system.md");

/// Phrases where a reply claims to have done something.
static ACTION_CLAIM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:I(?:'ve| have) (?:created|made|opened|launched|saved|written|deleted|moved|renamed|set|changed|downloaded|searched|sent|started|generated|taken|captured|clicked|typed)|I (?:created|made|opened|launched|saved|wrote|deleted|moved|renamed|set|changed|downloaded|searched|sent|started|generated|took|captured|clicked|typed)|(?:File|Folder|Presentation|Document|Image) (?:has been|was) (?:created|saved|written|opened|downloaded|deleted)|Successfully (?:created|opened|launched|saved|downloaded|set|changed|completed))\b",
    )
    .expect("Invalid action claim regex")
});

pub fn contains_action_claims(text: &str) -> bool {
    ACTION_CLAIM_RE.is_match(text)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub hallucinated: bool,
    pub reason: String,
    pub corrected_instruction: String,
    pub recommended_tools: Vec<String>,
}

impl JudgeVerdict {
    fn clean(reason: impl Into<String>, refined_instruction: &str) -> Self {
        Self {
            hallucinated: false,
            reason: reason.into(),
            corrected_instruction: refined_instruction.to_string(),
            recommended_tools: Vec::new(),
        }
    }
}

/// Everything the judge looks at for one turn.
pub struct JudgeInput<'a> {
    pub original_user_input: &'a str,
    pub refined_instruction: &'a str,
    pub history: &'a [ChatMessage],
    pub executed_tools: &'a [ExecutedToolRecord],
    pub final_text: &'a str,
}

/// Best-effort post-hoc auditor. Never fails: every error becomes a clean verdict.
pub struct ResponseJudge {
    llm: LlmClient,
}

impl ResponseJudge {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    pub async fn review(&self, input: JudgeInput<'_>) -> JudgeVerdict {
        if let Some(verdict) = precheck(&input) {
            tracing::info!(reason = %verdict.reason, "judge flagged reply without a model call");
            return verdict;
        }

        let payload = build_payload(&input);
        let messages = vec![
            ChatMessage::system(JUDGE_PROMPT),
            ChatMessage::user(payload.to_string()),
        ];

        let raw = match self.llm.complete_text(messages, Some(0.0)).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "judge call failed");
                return JudgeVerdict::clean(format!("Judge call failed: {e}"), input.refined_instruction);
            }
        };

        let verdict = decode_verdict(&raw, input.refined_instruction);
        tracing::info!(
            hallucinated = verdict.hallucinated,
            reason = %verdict.reason,
            recommended = ?verdict.recommended_tools,
            "judge verdict"
        );
        verdict
    }
}

/// Deterministic checks for replies that claim work when no tool ran.
fn precheck(input: &JudgeInput<'_>) -> Option<JudgeVerdict> {
    if !input.executed_tools.is_empty() {
        return None;
    }
    let reason = if input.final_text.contains("<function") {
        "Reply contains fake function-call text but no tool was executed."
    } else if contains_action_claims(input.final_text) {
        "Reply claims actions were performed but no tool was executed."
    } else {
        return None;
    };
    Some(JudgeVerdict {
        hallucinated: true,
        reason: reason.into(),
        corrected_instruction: input.refined_instruction.to_string(),
        recommended_tools: Vec::new(),
    })
}

fn build_payload(input: &JudgeInput<'_>) -> Value {
    let history: Vec<Value> = input
        .history
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.text() }))
        .collect();
    let executed: Vec<Value> = input.executed_tools.iter().map(ExecutedToolRecord::audit_value).collect();
    json!({
        "original_user_input": input.original_user_input,
        "refined_instruction": input.refined_instruction,
        "history": history,
        "executed_tools": executed,
        "final_text": input.final_text,
    })
}

fn decode_verdict(raw: &str, refined_instruction: &str) -> JudgeVerdict {
    let Some(obj) = parse_object(raw) else {
        tracing::debug!(raw = %raw, "judge reply is not a JSON object");
        return JudgeVerdict::clean("Judge failed to parse response.", refined_instruction);
    };

    let recommended_tools = obj
        .get("recommended_tools")
        .and_then(Value::as_array)
        .map(|tools| {
            tools
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    JudgeVerdict {
        hallucinated: obj.get("hallucinated").and_then(Value::as_bool).unwrap_or(false),
        reason: non_empty_str(&obj, "reason").unwrap_or_default().to_string(),
        corrected_instruction: non_empty_str(&obj, "corrected_instruction")
            .unwrap_or(refined_instruction)
            .to_string(),
        recommended_tools,
    }
}
