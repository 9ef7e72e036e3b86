//! Conversation history entries and their on-disk text format.
//!
//! Each entry is written as:
//!
//! ```text
//!
//! ## user (2026-01-02 03:04:05 UTC)
//!
//! message body
//! ```

use std::fmt::{Display, Formatter};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

/// Speaker of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The human side of the conversation.
    User,
    /// The agent's answer (or the failure text shown instead).
    Assistant,
}

impl Role {
    /// Lowercase name used in history headers.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single persisted conversation entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// Who spoke.
    pub role: Role,
    /// Header timestamp, kept verbatim.
    pub timestamp: String,
    /// Message body.
    pub content: String,
}

impl Turn {
    /// Build an entry stamped with `at`.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            role,
            timestamp: at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            content: content.into(),
        }
    }

    /// Text appended to a history chunk for this entry.
    #[must_use]
    pub fn to_entry(&self) -> String {
        format!("\n## {} ({})\n\n{}\n", self.role, self.timestamp, self.content)
    }

    /// Rendering used inside bootstrap prompts.
    #[must_use]
    pub fn render(&self) -> String {
        format!("## {} ({})\n\n{}", self.role, self.timestamp, self.content.trim())
    }
}

// Static pattern; compilation cannot fail.
#[allow(clippy::unwrap_used)]
fn header_regex() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| Regex::new(r"(?m)^## (user|assistant) \(([^)\n]*)\)[ \t]*$").unwrap())
}

/// Parse every entry in a history chunk, oldest first.
///
/// Text before the first header is ignored; entries with an unknown role
/// never match the header pattern and are folded into the previous body.
#[must_use]
pub fn parse_chunk(raw: &str) -> Vec<Turn> {
    let headers: Vec<_> = header_regex().captures_iter(raw).collect();
    let mut turns = Vec::with_capacity(headers.len());

    for (idx, caps) in headers.iter().enumerate() {
        let (Some(whole), Some(role), Some(ts)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let Some(role) = Role::parse(role.as_str()) else {
            continue;
        };
        let body_end = headers
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map_or(raw.len(), |m| m.start());
        let body = raw[whole.end()..body_end].trim();

        turns.push(Turn {
            role,
            timestamp: ts.as_str().to_owned(),
            content: body.to_owned(),
        });
    }

    turns
}
