//! Global configuration parsing, validation, and credential loading.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Keychain service name used for Slack credentials.
pub const KEYRING_SERVICE: &str = "agent-relay";

/// Slack connectivity settings.
///
/// Tokens are loaded at runtime via OS keychain or environment variables,
/// never from the TOML config file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SlackConfig {
    /// App-level token used for Socket Mode (populated at runtime).
    #[serde(skip)]
    pub app_token: String,
    /// Bot user token used for posting messages (populated at runtime).
    #[serde(skip)]
    pub bot_token: String,
}

/// How the external agent CLI is invoked.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent executable name or path, resolved against `PATH`.
    #[serde(default = "default_executable")]
    pub executable: String,
    /// Extra arguments appended after the generated ones.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Model name passed through `--model`, when set.
    #[serde(default)]
    pub model: Option<String>,
    /// Per-invocation timeout.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Variables inherited from the relay's own environment.
    #[serde(default = "default_env_passthrough")]
    pub env_passthrough: Vec<String>,
    /// Variables injected into every invocation.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Diagnostic substrings that mean the continuation token was rejected.
    #[serde(default = "default_resume_failure_markers")]
    pub resume_failure_markers: Vec<String>,
}

fn default_executable() -> String {
    "claude".into()
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_env_passthrough() -> Vec<String> {
    [
        "PATH",
        "HOME",
        "USER",
        "LANG",
        "TERM",
        "TMPDIR",
        "RUST_LOG",
        "ANTHROPIC_API_KEY",
        "CLAUDE_CODE_OAUTH_TOKEN",
        // Windows-specific variables.
        "USERPROFILE",
        "SystemRoot",
        "TEMP",
        "TMP",
        "APPDATA",
        "LOCALAPPDATA",
        "COMSPEC",
    ]
    .iter()
    .map(|s| (*s).to_owned())
    .collect()
}

fn default_resume_failure_markers() -> Vec<String> {
    vec!["No conversation found".into()]
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            extra_args: Vec::new(),
            model: None,
            timeout_seconds: default_timeout_seconds(),
            env_passthrough: default_env_passthrough(),
            env: HashMap::new(),
            resume_failure_markers: default_resume_failure_markers(),
        }
    }
}

/// Session continuity settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Maximum history turns replayed into a bootstrap prompt.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    /// Assistant-level instruction file copied into new session directories.
    #[serde(default = "default_instructions_file")]
    pub instructions_file: String,
}

fn default_history_turns() -> usize {
    20
}

fn default_instructions_file() -> String {
    "CLAUDE.md".into()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
            instructions_file: default_instructions_file(),
        }
    }
}

/// Streaming delivery thresholds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StreamingConfig {
    /// Stream partial output instead of waiting for the full answer.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Characters buffered before the first preview is sent.
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    /// Minimum spacing between preview edits.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    /// Single-message size limit of the chat platform.
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    /// Marker appended to previews while the agent is still writing.
    #[serde(default = "default_progress_marker")]
    pub progress_marker: String,
}

fn default_true() -> bool {
    true
}

fn default_min_chars() -> usize {
    10
}

fn default_update_interval_ms() -> u64 {
    500
}

fn default_max_message_chars() -> usize {
    4000
}

fn default_progress_marker() -> String {
    "\u{258c}".into()
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            min_chars: default_min_chars(),
            update_interval_ms: default_update_interval_ms(),
            max_message_chars: default_max_message_chars(),
            progress_marker: default_progress_marker(),
        }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Root directory for memory files and per-session storage.
    pub data_root: PathBuf,
    /// Assistant identity; the first half of every session key.
    pub assistant_name: String,
    /// Slack user IDs allowed to talk to the assistant; empty allows everyone.
    #[serde(default)]
    pub allowed_user_ids: Vec<String>,
    /// Slack connectivity settings.
    #[serde(default)]
    pub slack: SlackConfig,
    /// Agent CLI invocation settings.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Continuity settings.
    #[serde(default)]
    pub session: SessionConfig,
    /// Streaming delivery settings.
    #[serde(default)]
    pub streaming: StreamingConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load Slack credentials from OS keychain with env-var fallback.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither keychain nor env vars provide
    /// the required tokens.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.slack.app_token = load_credential("slack_app_token", "SLACK_APP_TOKEN").await?;
        self.slack.bot_token = load_credential("slack_bot_token", "SLACK_BOT_TOKEN").await?;
        Ok(())
    }

    /// Whether a Slack user may talk to the assistant.
    #[must_use]
    pub fn is_user_allowed(&self, user_id: &str) -> bool {
        self.allowed_user_ids.is_empty() || self.allowed_user_ids.iter().any(|id| id == user_id)
    }

    /// Per-invocation timeout as a [`Duration`].
    #[must_use]
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.timeout_seconds)
    }

    fn validate(&mut self) -> Result<()> {
        if self.assistant_name.trim().is_empty() {
            return Err(AppError::Config("assistant_name must not be empty".into()));
        }

        if !self
            .assistant_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AppError::Config(
                "assistant_name may only contain ASCII letters, digits, '-' and '_'".into(),
            ));
        }

        if self.agent.executable.trim().is_empty() {
            return Err(AppError::Config("agent.executable must not be empty".into()));
        }

        if self.agent.timeout_seconds == 0 {
            return Err(AppError::Config(
                "agent.timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.session.history_turns == 0 {
            return Err(AppError::Config(
                "session.history_turns must be greater than zero".into(),
            ));
        }

        let marker_len = self.streaming.progress_marker.chars().count();
        if self.streaming.max_message_chars <= self.streaming.min_chars + marker_len {
            return Err(AppError::Config(
                "streaming.max_message_chars must exceed min_chars plus the progress marker"
                    .into(),
            ));
        }

        fs::create_dir_all(&self.data_root)
            .map_err(|err| AppError::Config(format!("data_root cannot be created: {err}")))?;
        let canonical_root = self
            .data_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("data_root invalid: {err}")))?;
        self.data_root = canonical_root;

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    env::var(env_key).map_err(|_| {
        AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))
    })
}
