//! Description of a single agent subprocess call.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::session::SessionKey;

/// How the agent reports its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Plain text on stdout once the process exits.
    Batch,
    /// Newline-delimited JSON events while the process runs.
    Streaming,
}

impl OutputMode {
    /// Value passed to `--output-format`.
    #[must_use]
    pub fn format_flag(self) -> &'static str {
        match self {
            Self::Batch => "text",
            Self::Streaming => "stream-json",
        }
    }
}

/// Which agent-side conversation this call continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Begin a new agent conversation bound to this token.
    Start(String),
    /// Continue the agent conversation bound to this token.
    Resume(String),
}

impl Continuation {
    /// The token, whichever direction.
    #[must_use]
    pub fn token(&self) -> &str {
        match self {
            Self::Start(token) | Self::Resume(token) => token,
        }
    }

    /// Whether this is a resume.
    #[must_use]
    pub fn is_resume(&self) -> bool {
        matches!(self, Self::Resume(_))
    }
}

/// One subprocess execution. Never persisted.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Session the call belongs to; also the process registry key.
    pub session_key: SessionKey,
    /// Working directory of the child.
    pub working_dir: PathBuf,
    /// Prompt text passed to the agent.
    pub message: String,
    /// Batch or streaming.
    pub mode: OutputMode,
    /// Continuation flag.
    pub continuation: Continuation,
    /// Hard ceiling on wall-clock time.
    pub timeout: Duration,
    /// Extra variables injected on top of the allowlist.
    pub env: HashMap<String, String>,
}

impl Invocation {
    /// Build an invocation with no extra environment.
    #[must_use]
    pub fn new(
        session_key: SessionKey,
        working_dir: impl Into<PathBuf>,
        message: impl Into<String>,
        mode: OutputMode,
        continuation: Continuation,
        timeout: Duration,
    ) -> Self {
        Self {
            session_key,
            working_dir: working_dir.into(),
            message: message.into(),
            mode,
            continuation,
            timeout,
            env: HashMap::new(),
        }
    }

    /// Add an injected environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}
