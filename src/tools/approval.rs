use std::io::Write;

use async_trait::async_trait;

/// Out-of-band confirmation for sensitive tools under safe mode.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn confirm(&self, tool: &str, description: &str) -> bool;
}

/// Asks on the terminal: `Proceed? (Y/N)`.
pub struct StdinApproval;

#[async_trait]
impl ApprovalGate for StdinApproval {
    async fn confirm(&self, tool: &str, description: &str) -> bool {
        let tool = tool.to_string();
        let description = description.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            println!("\n⚠️  SAFE MODE: Sensitive operation detected");
            println!("Tool: {tool}");
            println!("Description: {description}");
            print!("Proceed? (Y/N): ");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            match std::io::stdin().read_line(&mut line) {
                Ok(_) => line.trim().eq_ignore_ascii_case("y"),
                Err(_) => false,
            }
        })
        .await;

        match answer {
            Ok(approved) => approved,
            Err(e) => {
                tracing::warn!(error = %e, "approval prompt failed; denying");
                false
            }
        }
    }
}

/// Fixed answer, for non-interactive runs.
pub struct StaticApproval(pub bool);

#[async_trait]
impl ApprovalGate for StaticApproval {
    async fn confirm(&self, tool: &str, _description: &str) -> bool {
        tracing::info!(tool, approved = self.0, "static approval");
        self.0
    }
}

/// Returns true if the tool needs approval before execution.
pub fn requires_approval(tool: &str, flagged_sensitive: bool, require_list: &[String]) -> bool {
    flagged_sensitive || require_list.iter().any(|r| r == tool)
}
