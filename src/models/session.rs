//! Session identity and continuity state.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Composite session identity: which assistant, which conversation.
///
/// Every lock, process registration, and storage directory is keyed by this
/// value, so two conversations never contend with each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    /// Assistant identity (the configured assistant name).
    pub assistant: String,
    /// Conversation identity (a Slack channel or DM id).
    pub conversation: String,
}

impl SessionKey {
    /// Construct a key from its two halves.
    #[must_use]
    pub fn new(assistant: impl Into<String>, conversation: impl Into<String>) -> Self {
        Self {
            assistant: assistant.into(),
            conversation: conversation.into(),
        }
    }

    /// File-system safe rendering of the conversation half.
    ///
    /// Anything outside `[A-Za-z0-9_-]` becomes `_`, so a hostile
    /// conversation id can never escape the sessions directory.
    #[must_use]
    pub fn conversation_dir_name(&self) -> String {
        let cleaned: String = self
            .conversation
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("conv_{cleaned}")
    }
}

impl Display for SessionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.assistant, self.conversation)
    }
}

/// Continuity state of a session, derived from its stored token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuityState {
    /// No active continuation token; the next turn composes a bootstrap prompt.
    Bootstrapping,
    /// An active token exists; the next turn resumes it.
    Resuming {
        /// The active continuation token.
        token: String,
    },
}

impl ContinuityState {
    /// Derive the state from an optionally stored token.
    #[must_use]
    pub fn from_token(token: Option<String>) -> Self {
        match token {
            Some(token) if !token.trim().is_empty() => Self::Resuming { token },
            _ => Self::Bootstrapping,
        }
    }
}

/// Point-in-time summary of a session's persisted state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Whether a continuation token is stored.
    pub has_token: bool,
    /// Total size of all history chunks, in bytes.
    pub history_bytes: u64,
    /// Number of daily history chunks.
    pub history_chunks: usize,
    /// Number of regular files in the agent workspace.
    pub workspace_files: usize,
}
