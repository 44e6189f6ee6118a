use thiserror::Error;

#[derive(Debug, Error)]
pub enum PilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("SSE parsing error: {0}")]
    SseParsing(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Plan parse error: {0}")]
    PlanParse(String),

    #[error("Decision parse error: {0}")]
    DecisionParse(String),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Agent is already processing a request.")]
    Busy,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Failures at the tool boundary.
///
/// `Reported` is a tool that ran to completion and told us it failed; every other
/// variant is raised by the registry itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool '{0}' is not registered. Only registered tools can be executed for safety.")]
    NotRegistered(String),

    #[error("Execution of '{0}' was denied by user.")]
    PermissionDenied(String),

    #[error("Tool '{tool}' execution failed: {message}")]
    ExecutionFailed { tool: String, message: String },

    #[error("Invalid arguments for '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("{0}")]
    Reported(String),
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::NotRegistered(_) => "not_registered",
            ToolError::PermissionDenied(_) => "permission_denied",
            ToolError::ExecutionFailed { .. } => "execution_failed",
            ToolError::InvalidArguments { .. } => "invalid_arguments",
            ToolError::Reported(_) => "soft_failure",
        }
    }
}

impl serde::Serialize for PilotError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type PilotResult<T> = Result<T, PilotError>;
