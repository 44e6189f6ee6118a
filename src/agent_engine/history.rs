use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::errors::PilotResult;
use crate::llm::types::ChatMessage;

#[derive(Debug, Serialize)]
struct JournalLine<'a> {
    ts: i64,
    #[serde(flatten)]
    message: &'a ChatMessage,
}

/// Append-only conversation history. Optionally mirrored to a JSONL journal,
/// one line per appended message.
pub struct SessionHistory {
    pub session_id: String,
    messages: Vec<ChatMessage>,
    journal: Option<PathBuf>,
}

impl SessionHistory {
    pub fn in_memory() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            messages: Vec::new(),
            journal: None,
        }
    }

    /// History journaled to `<dir>/session_<id>.jsonl`.
    pub fn persistent(dir: &Path) -> PilotResult<Self> {
        std::fs::create_dir_all(dir)?;
        let mut history = Self::in_memory();
        history.journal = Some(dir.join(format!("session_{}.jsonl", history.session_id)));
        Ok(history)
    }

    /// Journaled history in the platform data directory, in memory if that fails.
    pub fn for_session() -> Self {
        match Self::persistent(&sessions_dir()) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(error = %e, "session journal unavailable, keeping history in memory");
                Self::in_memory()
            }
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        if let Err(e) = self.append_journal(&message) {
            tracing::warn!(error = %e, "history journal write failed");
        }
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn journal_path(&self) -> Option<&Path> {
        self.journal.as_deref()
    }

    /// System prompt followed by the full history, for one completion call.
    pub fn with_system(&self, system_prompt: &str) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        out.push(ChatMessage::system(system_prompt));
        out.extend(self.messages.iter().cloned());
        out
    }

    fn append_journal(&self, message: &ChatMessage) -> PilotResult<()> {
        let Some(path) = &self.journal else {
            return Ok(());
        };
        let line = serde_json::to_string(&JournalLine {
            ts: chrono::Utc::now().timestamp_millis(),
            message,
        })?;
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        tracing::trace!(path = %path.display(), "history entry flushed");
        Ok(())
    }
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// `<data_local_dir>/deskpilot/sessions`, falling back to `./sessions`.
fn sessions_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("deskpilot"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sessions")
}
