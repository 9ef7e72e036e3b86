//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Lock contention and stream overflow are deliberately absent: they are
/// states of the lock table and the delivery pipeline, not failures.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Session storage (token, history, memory files) failure.
    Storage(String),
    /// Slack API or Socket Mode failure.
    Slack(String),
    /// Agent output stream framing failure.
    Stream(String),
    /// Agent executable could not be resolved on `PATH`.
    AgentNotFound(String),
    /// A process is already registered for the session key.
    AlreadyRunning(String),
    /// The invocation exceeded its deadline and was killed.
    Timeout {
        /// Deadline that elapsed, in whole seconds.
        seconds: u64,
    },
    /// The invocation was force-killed through the process registry.
    Cancelled,
    /// The agent rejected the supplied continuation token.
    ResumeFailed(String),
    /// The agent exited non-zero without being killed.
    ExternalAgent {
        /// Process exit code, if the OS reported one.
        exit_code: Option<i32>,
        /// Captured diagnostic output (stderr).
        diagnostics: String,
    },
}

impl AppError {
    /// Whether the error is the one-shot recoverable resume rejection.
    #[must_use]
    pub fn is_resume_failure(&self) -> bool {
        matches!(self, Self::ResumeFailed(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Storage(msg) => write!(f, "storage: {msg}"),
            Self::Slack(msg) => write!(f, "slack: {msg}"),
            Self::Stream(msg) => write!(f, "stream: {msg}"),
            Self::AgentNotFound(msg) => write!(f, "agent not found: {msg}"),
            Self::AlreadyRunning(key) => write!(f, "already running: {key}"),
            Self::Timeout { seconds } => write!(f, "timeout: agent timed out after {seconds} seconds"),
            Self::Cancelled => write!(f, "cancelled: agent execution was cancelled"),
            Self::ResumeFailed(msg) => write!(f, "resume failed: {msg}"),
            Self::ExternalAgent {
                exit_code: Some(code),
                diagnostics,
            } => write!(f, "agent: exited with code {code}: {diagnostics}"),
            Self::ExternalAgent {
                exit_code: None,
                diagnostics,
            } => write!(f, "agent: terminated by signal: {diagnostics}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
