use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::planning::json::{non_empty_str, parse_object};

/// One atomic `{tool, instruction}` unit of an execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// 1-based, informational; execution follows array order.
    pub step: usize,
    pub tool: String,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub description: String,
    /// Tool-specific hints the refiner attached (keys, text, element filters).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlanStep {
    pub fn new(step: usize, tool: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            step,
            tool: tool.into(),
            instruction: instruction.into(),
            description: String::new(),
            extra: Map::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Directive for the step's LLM call; falls back to the description.
    pub fn directive(&self) -> &str {
        if self.instruction.trim().is_empty() {
            &self.description
        } else {
            &self.instruction
        }
    }
}

pub type ExecutionPlan = Vec<PlanStep>;

/// Refiner output for one user turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedRequest {
    pub instruction: String,
    pub execution_plan: ExecutionPlan,
}

impl RefinedRequest {
    /// The fail-closed result: the raw input and no plan.
    pub fn passthrough(user_input: &str) -> Self {
        Self {
            instruction: user_input.to_string(),
            execution_plan: Vec::new(),
        }
    }
}

/// Strictly decode a refiner reply. Any shape violation yields `Err(reason)`;
/// a missing or blank `instruction` falls back to `user_input`.
pub fn decode_plan(raw: &str, user_input: &str) -> Result<RefinedRequest, String> {
    let obj = parse_object(raw).ok_or_else(|| "response is not a JSON object".to_string())?;

    let instruction = non_empty_str(&obj, "instruction").unwrap_or(user_input).to_string();

    let steps = match obj.get("execution_plan") {
        Some(Value::Array(steps)) => steps,
        Some(other) => return Err(format!("'execution_plan' must be an array, got {other}")),
        None => return Err("missing 'execution_plan'".into()),
    };

    let mut plan = Vec::with_capacity(steps.len());
    for (idx, raw_step) in steps.iter().enumerate() {
        let Value::Object(fields) = raw_step else {
            return Err(format!("step {} is not an object", idx + 1));
        };
        let tool = non_empty_str(fields, "tool")
            .ok_or_else(|| format!("step {} has no 'tool'", idx + 1))?
            .to_string();
        let step = fields
            .get("step")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(idx + 1);
        if step != idx + 1 {
            tracing::debug!(position = idx + 1, declared = step, "plan step number does not match position");
        }

        let mut extra = fields.clone();
        for key in ["step", "tool", "instruction", "description"] {
            extra.remove(key);
        }
        plan.push(PlanStep {
            step,
            tool,
            instruction: non_empty_str(fields, "instruction").unwrap_or_default().to_string(),
            description: non_empty_str(fields, "description").unwrap_or_default().to_string(),
            extra,
        });
    }

    Ok(RefinedRequest {
        instruction,
        execution_plan: plan,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plan_and_keeps_tool_hints() {
        let raw = r#"```json
{
  "instruction": "Set the volume to 50 and report it",
  "execution_plan": [
    {"step": 1, "tool": "set_volume", "instruction": "Set volume to 50", "description": "Set volume", "level": 50},
    {"step": 2, "tool": "get_volume", "description": "Read volume back"}
  ]
}
```"#;
        let req = decode_plan(raw, "input").unwrap();
        assert_eq!(req.instruction, "Set the volume to 50 and report it");
        assert_eq!(req.execution_plan.len(), 2);
        assert_eq!(req.execution_plan[0].extra["level"], 50);
        assert_eq!(req.execution_plan[1].directive(), "Read volume back");
    }

    #[test]
    fn shape_violations_are_rejected() {
        assert!(decode_plan("not json", "input").is_err());
        assert!(decode_plan(r#"["a"]"#, "input").is_err());
        assert!(decode_plan(r#"{"instruction": "x"}"#, "input").is_err());
        assert!(decode_plan(r#"{"execution_plan": "set_volume"}"#, "input").is_err());
        assert!(decode_plan(r#"{"instruction": "x", "execution_plan": {}}"#, "input").is_err());
        assert!(decode_plan(r#"{"instruction": "x", "execution_plan": [{"step": 1}]}"#, "input").is_err());
    }

    #[test]
    fn empty_plan_is_valid() {
        let req = decode_plan(r#"{"instruction": "say hi", "execution_plan": []}"#, "input").unwrap();
        assert!(req.execution_plan.is_empty());
    }

    #[test]
    fn missing_step_number_uses_position() {
        let req = decode_plan(r#"{"instruction": "x", "execution_plan": [{"tool": "a"}, {"tool": "b"}]}"#, "input").unwrap();
        assert_eq!(req.execution_plan[1].step, 2);
    }

    #[test]
    fn missing_instruction_keeps_the_plan() {
        let raw = r#"{"execution_plan": [{"step": 1, "tool": "set_volume", "instruction": "50"}]}"#;
        let req = decode_plan(raw, "turn the volume to 50").unwrap();
        assert_eq!(req.instruction, "turn the volume to 50");
        assert_eq!(req.execution_plan.len(), 1);
        assert_eq!(req.execution_plan[0].tool, "set_volume");

        let req = decode_plan(r#"{"instruction": "  ", "execution_plan": []}"#, "hi").unwrap();
        assert_eq!(req.instruction, "hi");
    }
}
