//! Turn orchestration: lock, invoke, deliver, record.
//!
//! Every inbound user message for a session goes through
//! [`TurnHandler::handle_message`]. The session lock is held from before the
//! continuity decision until the history entries are written, so turns of
//! one session are strictly ordered and history records them in order.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, info_span, warn, Instrument};

use crate::agent::AgentRunner;
use crate::config::GlobalConfig;
use crate::continuity::{ContinuityManager, ContinuitySettings};
use crate::delivery::{
    failure_text, run_streaming, send_split, OutputChannel, StreamSettings, QUEUED_NOTICE,
};
use crate::models::session::{ContinuityState, SessionKey, SessionSnapshot};
use crate::models::turn::Role;
use crate::persistence::session_store::SessionStore;
use crate::runtime::{LockAcquisition, ProcessInfo, RuntimeContext};
use crate::{AppError, Result};

/// Everything `/status` reports about a session.
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// Session described.
    pub key: SessionKey,
    /// Resume or bootstrap on the next turn.
    pub state: ContinuityState,
    /// Persisted state summary.
    pub snapshot: SessionSnapshot,
    /// The live agent process, if any.
    pub running: Option<ProcessInfo>,
    /// Whether a turn currently holds the session lock.
    pub busy: bool,
}

impl StatusReport {
    /// Plain-text rendering for chat.
    #[must_use]
    pub fn render(&self) -> String {
        let conversation = match &self.state {
            ContinuityState::Resuming { .. } => "continuing",
            ContinuityState::Bootstrapping => "new (next turn bootstraps)",
        };
        let process = match &self.running {
            Some(info) => format!("running for {}s", info.running_for.as_secs()),
            None if self.busy => "starting".to_owned(),
            None => "idle".to_owned(),
        };
        format!(
            "Session: {}\nConversation: {conversation}\nAgent: {process}\nHistory: {} day(s), {} bytes\nWorkspace files: {}",
            self.key,
            self.snapshot.history_chunks,
            self.snapshot.history_bytes,
            self.snapshot.workspace_files,
        )
    }
}

/// Entry point for user turns and session commands.
#[derive(Debug)]
pub struct TurnHandler {
    runtime: Arc<RuntimeContext>,
    continuity: ContinuityManager,
    streaming: Option<StreamSettings>,
}

impl TurnHandler {
    /// Assemble a handler from explicit parts.
    ///
    /// `streaming: None` delivers every answer through the batch path.
    #[must_use]
    pub fn new(
        runtime: Arc<RuntimeContext>,
        continuity: ContinuityManager,
        streaming: Option<StreamSettings>,
    ) -> Self {
        Self {
            runtime,
            continuity,
            streaming,
        }
    }

    /// Build the production handler: file store, subprocess runner, and the
    /// configured delivery mode.
    #[must_use]
    pub fn from_config(config: &GlobalConfig, runtime: Arc<RuntimeContext>) -> Self {
        let store = SessionStore::new(&config.data_root, config.session.instructions_file.clone());
        let runner = AgentRunner::new(config.agent.clone(), runtime.processes.clone());
        let continuity = ContinuityManager::new(
            store,
            Arc::new(runner),
            ContinuitySettings {
                timeout: config.agent_timeout(),
                history_turns: config.session.history_turns,
            },
        );
        let streaming = config
            .streaming
            .enabled
            .then(|| StreamSettings::from(&config.streaming));
        Self::new(runtime, continuity, streaming)
    }

    /// Shared runtime tables.
    #[must_use]
    pub fn runtime(&self) -> &Arc<RuntimeContext> {
        &self.runtime
    }

    /// Run one user turn end to end and return the agent's answer.
    ///
    /// The user always sees something: the answer, or the failure text for
    /// the error. Both the message and what was shown are appended to the
    /// session history before the lock is released.
    ///
    /// # Errors
    ///
    /// Returns the turn's failure after it has been reported to the user.
    pub async fn handle_message(
        &self,
        key: &SessionKey,
        message: &str,
        channel: &dyn OutputChannel,
    ) -> Result<String> {
        let span = info_span!("turn", session_key = %key);
        async {
            let _guard = match self.runtime.locks.acquire(key) {
                LockAcquisition::Ready(guard) => guard,
                LockAcquisition::Contended(pending) => {
                    info!("session busy, queueing turn");
                    let notice = async {
                        if let Err(err) = channel.send(QUEUED_NOTICE).await {
                            warn!(%err, "failed to post queued notice");
                        }
                    };
                    // The waiter takes its FIFO position on first poll; a slow
                    // notice post must not delay that.
                    let (guard, ()) = tokio::join!(pending.wait(), notice);
                    guard
                }
            };

            let outcome = match &self.streaming {
                Some(settings) => self.stream_turn(key, message, channel, settings).await,
                None => self.batch_turn(key, message, channel).await,
            };

            let shown = match &outcome {
                Ok(text) => text.clone(),
                Err(err) => failure_text(err),
            };
            self.record(key, message, &shown);

            match &outcome {
                Ok(text) => info!(answer_chars = text.chars().count(), "turn completed"),
                Err(err) => warn!(%err, "turn failed"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn stream_turn(
        &self,
        key: &SessionKey,
        message: &str,
        channel: &dyn OutputChannel,
        settings: &StreamSettings,
    ) -> Result<String> {
        let continuity = &self.continuity;
        let streamed = run_streaming(channel, settings, |events| async move {
            continuity.run_turn(key, message, Some(&events)).await
        })
        .await;

        match streamed {
            Ok(report) => Ok(report.text),
            Err(failure) => {
                if !failure.surfaced {
                    notify_failure(channel, &failure.error).await;
                }
                Err(failure.error)
            }
        }
    }

    async fn batch_turn(
        &self,
        key: &SessionKey,
        message: &str,
        channel: &dyn OutputChannel,
    ) -> Result<String> {
        match self.continuity.run_turn(key, message, None).await {
            Ok(text) => {
                if let Err(err) = send_split(channel, &text).await {
                    error!(%err, "failed to deliver answer");
                }
                Ok(text)
            }
            Err(err) => {
                notify_failure(channel, &err).await;
                Err(err)
            }
        }
    }

    fn record(&self, key: &SessionKey, message: &str, shown: &str) {
        let store = self.continuity.store();
        let written = store
            .append_turn(key, Role::User, message)
            .and_then(|()| store.append_turn(key, Role::Assistant, shown));
        if let Err(err) = written {
            error!(%err, "failed to append conversation history");
        }
    }

    /// Force-kill the session's running agent.
    ///
    /// Returns `false` when there was nothing to cancel.
    #[must_use]
    pub fn cancel(&self, key: &SessionKey) -> bool {
        self.runtime.processes.cancel(key)
    }

    /// Forget the conversation: the continuation token and the history.
    /// Workspace files and memory stay.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the token or history cannot be removed.
    pub fn reset(&self, key: &SessionKey) -> Result<()> {
        self.continuity.reset(key)?;
        self.continuity.store().clear_history(key)?;
        info!(session_key = %key, "session reset");
        Ok(())
    }

    /// Kill any running agent, then delete the whole session directory.
    ///
    /// Waits for the in-flight turn (if any) to wind down so its history
    /// write cannot recreate the directory afterwards.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the directory cannot be removed.
    pub async fn reset_all(&self, key: &SessionKey) -> Result<()> {
        let killed = self.runtime.processes.cancel(key);
        let _guard = self.runtime.locks.lock(key).await;
        self.continuity.store().delete_session(key)?;
        info!(session_key = %key, killed, "session deleted");
        Ok(())
    }

    /// Summarize a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if persisted state cannot be read.
    pub fn status(&self, key: &SessionKey) -> Result<StatusReport> {
        Ok(StatusReport {
            key: key.clone(),
            state: self.continuity.state(key)?,
            snapshot: self.continuity.store().snapshot(key)?,
            running: self.runtime.processes.lookup(key),
            busy: self.runtime.locks.is_locked(key),
        })
    }

    /// Upload a file from the session workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` for names that leave the workspace or do
    /// not exist, and channel errors from the upload.
    pub async fn send_workspace_file(
        &self,
        key: &SessionKey,
        name: &str,
        channel: &dyn OutputChannel,
    ) -> Result<()> {
        let path = self.workspace_file(key, name)?;
        channel.send_document(&path).await
    }

    fn workspace_file(&self, key: &SessionKey, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name.trim());
        let contained = !relative.as_os_str().is_empty()
            && relative
                .components()
                .all(|part| matches!(part, Component::Normal(_)));
        if !contained {
            return Err(AppError::Storage(format!("invalid workspace file name: {name}")));
        }

        let path = self.continuity.store().workspace_dir(key).join(relative);
        if !path.is_file() {
            return Err(AppError::Storage(format!("no such workspace file: {name}")));
        }
        Ok(path)
    }
}

async fn notify_failure(channel: &dyn OutputChannel, err: &AppError) {
    if let Err(send_err) = channel.send(&failure_text(err)).await {
        warn!(err = %send_err, "failed to post failure notice");
    }
}
