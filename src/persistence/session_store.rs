//! File-backed session storage: continuation tokens, daily history chunks,
//! and memory files.
//!
//! Layout under the data root:
//!
//! ```text
//! MEMORY.md                                   global shared memory
//! assistants/<assistant>/MEMORY.md            assistant memory
//! assistants/<assistant>/<instructions file>  copied into new sessions
//! assistants/<assistant>/sessions/conv_<id>/
//!     .continuation_token
//!     history/YYYY-MM-DD.md
//!     workspace/
//! ```

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::models::session::{SessionKey, SessionSnapshot};
use crate::models::turn::{parse_chunk, Role, Turn};
use crate::{AppError, Result};

/// File holding the active continuation token.
pub const TOKEN_FILE: &str = ".continuation_token";
/// Memory file name at both the global and the assistant level.
pub const MEMORY_FILE: &str = "MEMORY.md";
/// Directory holding daily history chunks.
pub const HISTORY_DIR: &str = "history";
/// Agent working directory inside a session.
pub const WORKSPACE_DIR: &str = "workspace";

/// Session storage rooted at a single directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
    instructions_file: String,
}

impl SessionStore {
    /// Create a store rooted at `root`.
    ///
    /// `instructions_file` names the assistant-level file copied into every
    /// new session directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, instructions_file: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            instructions_file: instructions_file.into(),
        }
    }

    /// Storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory owned by one assistant.
    #[must_use]
    pub fn assistant_dir(&self, assistant: &str) -> PathBuf {
        self.root.join("assistants").join(assistant)
    }

    /// Directory owned by one session.
    #[must_use]
    pub fn session_dir(&self, key: &SessionKey) -> PathBuf {
        self.assistant_dir(&key.assistant)
            .join("sessions")
            .join(key.conversation_dir_name())
    }

    /// Working directory handed to the agent process.
    #[must_use]
    pub fn workspace_dir(&self, key: &SessionKey) -> PathBuf {
        self.session_dir(key).join(WORKSPACE_DIR)
    }

    /// Create the session layout if missing and return the session directory.
    ///
    /// The assistant instruction file is copied in only when the session
    /// does not already have one, so per-session edits survive.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if a directory cannot be created or the
    /// instruction file cannot be copied.
    pub fn ensure_session(&self, key: &SessionKey) -> Result<PathBuf> {
        let dir = self.session_dir(key);
        for sub in [WORKSPACE_DIR, HISTORY_DIR] {
            fs::create_dir_all(dir.join(sub)).map_err(|err| {
                AppError::Storage(format!("failed to create {}: {err}", dir.display()))
            })?;
        }

        let session_instructions = dir.join(&self.instructions_file);
        let assistant_instructions = self
            .assistant_dir(&key.assistant)
            .join(&self.instructions_file);
        if !session_instructions.exists() && assistant_instructions.exists() {
            fs::copy(&assistant_instructions, &session_instructions).map_err(|err| {
                AppError::Storage(format!("failed to copy instructions: {err}"))
            })?;
            debug!(session_key = %key, "copied assistant instructions into session");
        }

        Ok(dir)
    }

    // ── Continuation token ───────────────────────────────────

    /// Read the stored continuation token, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` on read failures other than "not found".
    pub fn read_token(&self, key: &SessionKey) -> Result<Option<String>> {
        let path = self.session_dir(key).join(TOKEN_FILE);
        match fs::read_to_string(&path) {
            Ok(raw) => {
                let token = raw.trim();
                Ok((!token.is_empty()).then(|| token.to_owned()))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(AppError::Storage(format!(
                "failed to read {}: {err}",
                path.display()
            ))),
        }
    }

    /// Replace the stored continuation token.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the token cannot be written.
    pub fn write_token(&self, key: &SessionKey, token: &str) -> Result<()> {
        let dir = self.session_dir(key);
        fs::create_dir_all(&dir)
            .map_err(|err| AppError::Storage(format!("failed to create {}: {err}", dir.display())))?;

        // Write-then-rename so a crash never leaves a half-written token.
        let tmp = dir.join(format!("{TOKEN_FILE}.tmp"));
        fs::write(&tmp, token)
            .and_then(|()| fs::rename(&tmp, dir.join(TOKEN_FILE)))
            .map_err(|err| AppError::Storage(format!("failed to write token: {err}")))
    }

    /// Remove the stored continuation token; missing tokens are fine.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if an existing token cannot be removed.
    pub fn clear_token(&self, key: &SessionKey) -> Result<()> {
        let path = self.session_dir(key).join(TOKEN_FILE);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(session_key = %key, "continuation token cleared");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::Storage(format!("failed to clear token: {err}"))),
        }
    }

    // ── History ──────────────────────────────────────────────

    /// Append a history entry to today's chunk.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the chunk cannot be opened or written.
    pub fn append_turn(&self, key: &SessionKey, role: Role, content: &str) -> Result<()> {
        self.append_turn_at(key, role, content, Utc::now())
    }

    /// Append a history entry to the chunk for `at`'s calendar day.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the chunk cannot be opened or written.
    pub fn append_turn_at(
        &self,
        key: &SessionKey,
        role: Role,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let dir = self.session_dir(key).join(HISTORY_DIR);
        fs::create_dir_all(&dir)
            .map_err(|err| AppError::Storage(format!("failed to create {}: {err}", dir.display())))?;

        let path = dir.join(format!("{}.md", at.date_naive()));
        let entry = Turn::new(role, content, at).to_entry();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| {
                AppError::Storage(format!("failed to open history {}: {err}", path.display()))
            })?;
        file.write_all(entry.as_bytes())
            .map_err(|err| AppError::Storage(format!("history write failed: {err}")))
    }

    /// Most recent `max_turns` entries, oldest first.
    ///
    /// Chunks are scanned newest-first and scanning stops as soon as the cap
    /// is reached, so old days are never read unless needed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the history directory or a chunk
    /// cannot be read.
    pub fn read_last_turns(&self, key: &SessionKey, max_turns: usize) -> Result<Vec<Turn>> {
        if max_turns == 0 {
            return Ok(Vec::new());
        }

        let mut collected: Vec<Turn> = Vec::new();
        for chunk in self.history_chunks(key)?.iter().rev() {
            let raw = fs::read_to_string(chunk).map_err(|err| {
                AppError::Storage(format!("failed to read {}: {err}", chunk.display()))
            })?;
            let mut turns = parse_chunk(&raw);
            let needed = max_turns - collected.len();
            if turns.len() > needed {
                turns.drain(..turns.len() - needed);
            }
            // Older chunk goes in front of what we already have.
            turns.append(&mut collected);
            collected = turns;

            if collected.len() >= max_turns {
                break;
            }
        }

        Ok(collected)
    }

    /// Delete every history chunk; the workspace and token are untouched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the history directory exists but cannot
    /// be removed.
    pub fn clear_history(&self, key: &SessionKey) -> Result<()> {
        let dir = self.session_dir(key).join(HISTORY_DIR);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(session_key = %key, "conversation history cleared");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::Storage(format!(
                "failed to clear history {}: {err}",
                dir.display()
            ))),
        }
    }

    /// Daily history chunk paths, oldest first.
    fn history_chunks(&self, key: &SessionKey) -> Result<Vec<PathBuf>> {
        let dir = self.session_dir(key).join(HISTORY_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(AppError::Storage(format!(
                    "failed to list {}: {err}",
                    dir.display()
                )))
            }
        };

        let mut chunks: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "md") && path.is_file())
            .collect();
        // ISO dates sort lexicographically in calendar order.
        chunks.sort();
        Ok(chunks)
    }

    // ── Memory ───────────────────────────────────────────────

    /// Global memory shared by every assistant.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` on read failures other than "not found".
    pub fn read_global_memory(&self) -> Result<Option<String>> {
        read_optional(&self.root.join(MEMORY_FILE))
    }

    /// Memory owned by one assistant.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` on read failures other than "not found".
    pub fn read_assistant_memory(&self, assistant: &str) -> Result<Option<String>> {
        read_optional(&self.assistant_dir(assistant).join(MEMORY_FILE))
    }

    // ── Lifecycle ────────────────────────────────────────────

    /// Delete the whole session directory: token, history, and workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the directory exists but cannot be removed.
    pub fn delete_session(&self, key: &SessionKey) -> Result<()> {
        let dir = self.session_dir(key);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(session_key = %key, "session directory deleted");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::Storage(format!(
                "failed to delete {}: {err}",
                dir.display()
            ))),
        }
    }

    /// Summarize what is persisted for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the token or history cannot be read.
    pub fn snapshot(&self, key: &SessionKey) -> Result<SessionSnapshot> {
        let chunks = self.history_chunks(key)?;
        let history_bytes = chunks
            .iter()
            .filter_map(|path| fs::metadata(path).ok())
            .map(|meta| meta.len())
            .sum();

        Ok(SessionSnapshot {
            has_token: self.read_token(key)?.is_some(),
            history_bytes,
            history_chunks: chunks.len(),
            workspace_files: count_files(&self.workspace_dir(key)),
        })
    }
}

/// Read a file, treating "missing" and "blank" alike as absent.
fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(AppError::Storage(format!(
            "failed to read {}: {err}",
            path.display()
        ))),
    }
}

fn count_files(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(std::result::Result::ok)
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                usize::from(path.is_file())
            }
        })
        .sum()
}
