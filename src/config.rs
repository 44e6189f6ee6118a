use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};
use crate::tools::spec::ParamSpec;

pub const CONFIG_FILE: &str = "config.toml";
pub const LOG_FILE: &str = "deskpilot.log";
/// Overrides the log directory.
pub const LOG_DIR_ENV: &str = "DESKPILOT_LOG_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub perception: PerceptionConfig,
    /// External command tools exposed to the agent.
    #[serde(default)]
    pub tools: Vec<ToolEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub active_provider: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// Full chat-completions URL of an OpenAI-compatible endpoint.
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (falls back to env var DESKPILOT_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Maps agent roles to specific provider+model combinations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Tool-calling model driving the plan-execute loop and autonomous decisions.
    pub tools: Option<RoleEntry>,
    /// Turns raw requests into execution plans and ranks UI elements.
    pub refiner: Option<RoleEntry>,
    /// Post-hoc hallucination auditor.
    pub judge: Option<RoleEntry>,
    /// Vision / image-understanding model used to describe the screen.
    pub vision: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    /// Model name sent to the API; empty means the provider default.
    #[serde(default)]
    pub model: String,
    /// Use SSE streaming.
    #[serde(default)]
    pub stream: bool,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
}

fn default_temperature() -> f64 {
    0.1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Sensitive tools need explicit confirmation when enabled.
    #[serde(default = "default_true")]
    pub safe_mode: bool,
    /// Tool names treated as sensitive in addition to the ones flagged at registration.
    #[serde(default)]
    pub require_approval_for: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            safe_mode: true,
            require_approval_for: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard cap on observe/decide/act cycles in autonomous mode.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Pause between an action and the next screenshot.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default)]
    pub max_duration_minutes: Option<u32>,
    #[serde(default = "default_temperature")]
    pub decision_temperature: f64,
    /// Detected elements above this count are narrowed before element selection.
    #[serde(default = "default_max_candidates")]
    pub max_candidate_elements: usize,
    #[serde(default)]
    pub enable_judge: bool,
    /// Write every history message to a JSONL session file.
    #[serde(default = "default_true")]
    pub journal_sessions: bool,
}

fn default_max_iterations() -> u32 {
    20
}

fn default_settle_delay_ms() -> u64 {
    1500
}

fn default_max_candidates() -> usize {
    80
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            settle_delay_ms: default_settle_delay_ms(),
            max_duration_minutes: None,
            decision_temperature: default_temperature(),
            max_candidate_elements: default_max_candidates(),
            enable_judge: false,
            journal_sessions: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionConfig {
    /// URL of the remote UI-element detection backend. Detection is skipped when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_box_threshold")]
    pub box_threshold: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_box_threshold() -> f32 {
    0.05
}

fn default_iou_threshold() -> f32 {
    0.1
}

fn default_timeout_secs() -> u64 {
    180
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            box_threshold: default_box_threshold(),
            iou_threshold: default_iou_threshold(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// A tool backed by an external program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEntry {
    pub name: String,
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Effective safe-mode flag; `DESKPILOT_SAFE_MODE` overrides the file.
    pub fn safe_mode(&self) -> bool {
        match std::env::var("DESKPILOT_SAFE_MODE") {
            Ok(v) => v.eq_ignore_ascii_case("true") || v == "1",
            Err(_) => self.safety.safe_mode,
        }
    }
}

fn resolve_config_path() -> PilotResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join(CONFIG_FILE);
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join(CONFIG_FILE);
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("deskpilot").join(CONFIG_FILE);
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in user config dir");
            return Ok(candidate);
        }
    }

    Err(PilotError::Config(
        "config.toml not found next to executable, in working directory or user config dir".into(),
    ))
}

/// Directory for the persistent log file: the override when set, else
/// `logs/` under the user's local data dir.
pub fn log_dir(override_dir: Option<PathBuf>) -> Option<PathBuf> {
    override_dir
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| dirs::data_local_dir().map(|d| d.join("deskpilot").join("logs")))
}

/// Open the log file for appending, creating its directory.
pub fn open_log_file(dir: &Path) -> PilotResult<std::fs::File> {
    std::fs::create_dir_all(dir)?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE))?;
    Ok(file)
}

pub fn load_config() -> PilotResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> PilotResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(
        path = %path.display(),
        provider = %config.llm.active_provider,
        tools = config.tools.len(),
        "config loaded"
    );
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &Path) -> PilotResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

/// A starter configuration pointing at a local OpenAI-compatible server.
pub fn starter_config() -> AppConfig {
    let mut providers = HashMap::new();
    providers.insert(
        "local".to_string(),
        ProviderEntry {
            display_name: "Local OpenAI-compatible server".into(),
            api_base: "http://localhost:11434/v1/chat/completions".into(),
            model: "llama3.1".into(),
            temperature: default_temperature(),
            api_key: None,
        },
    );
    AppConfig {
        llm: LlmConfig {
            active_provider: "local".into(),
            providers,
            roles: RolesConfig::default(),
        },
        ..AppConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::spec::ParamKind;

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [llm]
            active_provider = "groq"

            [llm.providers.groq]
            display_name = "Groq"
            api_base = "https://api.groq.com/openai/v1/chat/completions"
            model = "llama-3.1-8b-instant"
            "#,
        )
        .unwrap();

        assert!(cfg.safety.safe_mode);
        assert_eq!(cfg.agent.max_iterations, 20);
        assert_eq!(cfg.llm.providers["groq"].temperature, 0.1);
        assert!(cfg.perception.endpoint.is_none());
        assert!(cfg.tools.is_empty());
    }

    #[test]
    fn tool_entries_parse_declared_parameters() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [llm]
            active_provider = "local"

            [[tools]]
            name = "set_volume"
            description = "Sets master volume (0-100)."
            command = "volume-ctl"
            args = ["set"]

            [[tools.parameters]]
            name = "level"
            kind = "integer"
            required = true
            "#,
        )
        .unwrap();

        let tool = &cfg.tools[0];
        assert_eq!(tool.name, "set_volume");
        assert!(!tool.sensitive);
        assert_eq!(tool.parameters[0].name, "level");
        assert!(tool.parameters[0].required);
    }

    #[test]
    fn unrecognised_parameter_kind_loads_as_string() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [llm]
            active_provider = "local"

            [[tools]]
            name = "press_keys"
            description = "Presses a key combination."
            command = "keys-ctl"

            [[tools.parameters]]
            name = "keys"
            kind = "array"
            required = true
            "#,
        )
        .unwrap();

        let param = &cfg.tools[0].parameters[0];
        assert_eq!(param.kind, ParamKind::String);
        assert!(param.required);
    }

    #[test]
    fn log_file_is_created_under_the_chosen_directory() {
        let dir = std::env::temp_dir().join(format!("deskpilot-logs-{}", uuid::Uuid::new_v4()));
        assert_eq!(log_dir(Some(dir.clone())), Some(dir.clone()));

        let mut file = open_log_file(&dir).unwrap();
        std::io::Write::write_all(&mut file, b"first\n").unwrap();
        drop(file);
        let mut file = open_log_file(&dir).unwrap();
        std::io::Write::write_all(&mut file, b"second\n").unwrap();
        drop(file);

        let text = std::fs::read_to_string(dir.join(LOG_FILE)).unwrap();
        assert_eq!(text, "first\nsecond\n");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn starter_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&starter_config()).unwrap();
        let back: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.llm.active_provider, "local");
        assert!(back.llm.providers.contains_key("local"));
    }
}
