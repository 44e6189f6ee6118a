use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ToolError;

/// Declarative description of a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
    /// Requires confirmation when safe mode is on.
    #[serde(default)]
    pub sensitive: bool,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            sensitive: false,
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn sensitive(mut self, sensitive: bool) -> Self {
        self.sensitive = sensitive;
        self
    }

    /// Check declared parameters before the callable runs. Required keys must be
    /// present unless the call is positional; present scalars must match their kind.
    pub fn validate(&self, args: &ToolArgs) -> Result<(), ToolError> {
        let invalid = |message: String| ToolError::InvalidArguments {
            tool: self.name.clone(),
            message,
        };
        for p in &self.parameters {
            match args.named.get(&p.name) {
                None | Some(Value::Null) => {
                    if p.required && args.positional.is_empty() {
                        return Err(invalid(format!("missing required parameter '{}'", p.name)));
                    }
                }
                Some(value) if !p.kind.accepts(value) => {
                    return Err(invalid(format!(
                        "parameter '{}' expects {}, got {value}",
                        p.name,
                        p.kind.json_type()
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// JSON-schema object describing the parameters.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for p in &self.parameters {
            let mut prop = serde_json::json!({ "type": p.kind.json_type() });
            if let Some(desc) = &p.description {
                prop["description"] = Value::String(desc.clone());
            }
            properties.insert(p.name.clone(), prop);
            if p.required {
                required.push(Value::String(p.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Only scalar kinds are described; any other label decodes as a string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum ParamKind {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamKind {
    pub fn json_type(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            ParamKind::String => true,
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
        }
    }
}

impl From<String> for ParamKind {
    fn from(label: String) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" => ParamKind::Integer,
            "number" | "float" => ParamKind::Number,
            "boolean" | "bool" => ParamKind::Boolean,
            _ => ParamKind::String,
        }
    }
}

/// Arguments handed to a tool: keyword arguments plus variadic positionals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolArgs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub positional: Vec<Value>,
    #[serde(default)]
    pub named: Map<String, Value>,
}

impl ToolArgs {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn named(named: Map<String, Value>) -> Self {
        Self {
            positional: Vec::new(),
            named,
        }
    }

    pub fn positional(positional: Vec<Value>) -> Self {
        Self {
            positional,
            named: Map::new(),
        }
    }

    /// Decode the JSON argument blob of a model tool call.
    pub fn from_json_str(tool: &str, raw: &str) -> Result<Self, ToolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::none());
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => Ok(Self::named(map)),
            Ok(Value::Null) => Ok(Self::none()),
            Ok(other) => Err(ToolError::InvalidArguments {
                tool: tool.to_string(),
                message: format!("expected a JSON object, got {other}"),
            }),
            Err(e) => Err(ToolError::InvalidArguments {
                tool: tool.to_string(),
                message: e.to_string(),
            }),
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.named.get(key).and_then(Value::as_str)
    }

    /// Arguments as one JSON value, for logging and audit records.
    pub fn to_value(&self) -> Value {
        if self.positional.is_empty() {
            Value::Object(self.named.clone())
        } else {
            serde_json::json!({ "args": self.positional, "kwargs": self.named })
        }
    }
}

/// Discriminated result of one tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { output: String },
    Failure { kind: String, message: String },
}

impl ToolOutcome {
    pub fn from_result(result: Result<String, ToolError>) -> Self {
        match result {
            Ok(output) => ToolOutcome::Success { output },
            Err(e) => ToolOutcome::failure(e.kind(), e.to_string()),
        }
    }

    pub fn failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ToolOutcome::Failure {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ToolOutcome::Failure { .. })
    }

    /// Text form placed into model context. Failures carry the `Error:` prefix.
    pub fn render(&self) -> String {
        match self {
            ToolOutcome::Success { output } => output.clone(),
            ToolOutcome::Failure { message, .. } => format!("Error: {message}"),
        }
    }
}
