use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::ToolEntry;
use crate::errors::ToolError;
use crate::tools::spec::{ToolArgs, ToolSpec};
use crate::tools::traits::Tool;

/// Tool backed by an external program.
///
/// The call arguments are written to the child's stdin as a single JSON value and
/// stdout becomes the tool result. A non-zero exit status is a reported failure
/// carrying stderr (or stdout when stderr is empty).
pub struct CommandTool {
    spec: ToolSpec,
    command: String,
    args: Vec<String>,
}

impl CommandTool {
    pub fn new(spec: ToolSpec, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            spec,
            command: command.into(),
            args,
        }
    }

    pub fn from_entry(entry: &ToolEntry) -> Self {
        let spec = ToolSpec {
            name: entry.name.clone(),
            description: entry.description.clone(),
            parameters: entry.parameters.clone(),
            sensitive: entry.sensitive,
        };
        Self::new(spec, entry.command.clone(), entry.args.clone())
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn invoke(&self, args: ToolArgs) -> Result<String, ToolError> {
        let payload = serde_json::to_vec(&args.to_value()).map_err(|e| ToolError::InvalidArguments {
            tool: self.spec.name.clone(),
            message: e.to_string(),
        })?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool: self.spec.name.clone(),
                message: format!("failed to spawn '{}': {e}", self.command),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&payload).await {
                tracing::debug!(tool = %self.spec.name, error = %e, "stdin closed early");
            }
        }

        let output = child.wait_with_output().await.map_err(|e| ToolError::ExecutionFailed {
            tool: self.spec.name.clone(),
            message: e.to_string(),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            tracing::debug!(tool = %self.spec.name, bytes = stdout.len(), "command tool finished");
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if stderr.is_empty() { stdout } else { stderr };
            tracing::warn!(tool = %self.spec.name, status = %output.status, "command tool failed");
            Err(ToolError::Reported(format!("{} ({})", detail, output.status)))
        }
    }
}
