//! Per-turn continuity decisions: resume or bootstrap, and the one-shot
//! fallback when a resume is rejected.
//!
//! ```text
//! Bootstrapping ──success──▶ Resuming ──success──▶ Resuming
//!                               │
//!                         ResumeFailed
//!                               ▼
//!               clear token, new token, bootstrap prompt,
//!               retry once with start(new) ──▶ Resuming | error
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use super::prompt::{compose_bootstrap_prompt, BootstrapContext};
use crate::agent::{AgentInvoker, Continuation, Invocation, OutputMode, StreamEvent};
use crate::models::session::{ContinuityState, SessionKey};
use crate::persistence::session_store::SessionStore;
use crate::{AppError, Result};

/// Tunables for the continuity manager.
#[derive(Debug, Clone, Copy)]
pub struct ContinuitySettings {
    /// Per-invocation deadline.
    pub timeout: Duration,
    /// Cap on history entries included in a bootstrap prompt.
    pub history_turns: usize,
}

/// Drives one conversational turn through the agent.
///
/// The caller must hold the session lock for `key` for the whole call.
#[derive(Clone)]
pub struct ContinuityManager {
    store: SessionStore,
    invoker: Arc<dyn AgentInvoker>,
    settings: ContinuitySettings,
}

impl std::fmt::Debug for ContinuityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuityManager")
            .field("store", &self.store)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ContinuityManager {
    /// Create a manager.
    #[must_use]
    pub fn new(
        store: SessionStore,
        invoker: Arc<dyn AgentInvoker>,
        settings: ContinuitySettings,
    ) -> Self {
        Self {
            store,
            invoker,
            settings,
        }
    }

    /// Underlying session store.
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Current continuity state of `key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the token cannot be read.
    pub fn state(&self, key: &SessionKey) -> Result<ContinuityState> {
        Ok(ContinuityState::from_token(self.store.read_token(key)?))
    }

    /// Run one user turn and return the agent's final text.
    ///
    /// With `events`, the agent runs in streaming mode and every event is
    /// forwarded; otherwise it runs in batch mode. A rejected resume is
    /// recovered here with exactly one bootstrap retry; every other failure
    /// propagates unchanged.
    ///
    /// # Errors
    ///
    /// Any invoker error except a first `ResumeFailed`, and storage errors.
    pub async fn run_turn(
        &self,
        key: &SessionKey,
        message: &str,
        events: Option<&mpsc::Sender<StreamEvent>>,
    ) -> Result<String> {
        self.store.ensure_session(key)?;

        match self.state(key)? {
            ContinuityState::Resuming { token } => {
                match self
                    .invoke(key, message.to_owned(), Continuation::Resume(token), events)
                    .await
                {
                    Err(AppError::ResumeFailed(diagnostics)) => {
                        warn!(
                            session_key = %key,
                            %diagnostics,
                            "continuation rejected, bootstrapping a fresh one"
                        );
                        self.store.clear_token(key)?;
                        if let Some(tx) = events {
                            tx.send(StreamEvent::Restarted).await.ok();
                        }
                        self.bootstrap(key, message, events).await
                    }
                    other => other,
                }
            }
            ContinuityState::Bootstrapping => self.bootstrap(key, message, events).await,
        }
    }

    /// Drop the active continuation so the next turn bootstraps.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the token file cannot be removed.
    pub fn reset(&self, key: &SessionKey) -> Result<()> {
        self.store.clear_token(key)
    }

    /// Bootstrap prompt for `message` from the current memory and history.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if memory or history cannot be read.
    pub fn bootstrap_prompt(&self, key: &SessionKey, message: &str) -> Result<String> {
        let global_memory = self.store.read_global_memory()?;
        let assistant_memory = self.store.read_assistant_memory(&key.assistant)?;
        let history = self.store.read_last_turns(key, self.settings.history_turns)?;

        let context = BootstrapContext {
            global_memory: global_memory.as_deref(),
            assistant_memory: assistant_memory.as_deref(),
            history: &history,
        };
        Ok(compose_bootstrap_prompt(&context, message))
    }

    async fn bootstrap(
        &self,
        key: &SessionKey,
        message: &str,
        events: Option<&mpsc::Sender<StreamEvent>>,
    ) -> Result<String> {
        let token = Uuid::new_v4().to_string();
        let prompt = self.bootstrap_prompt(key, message)?;
        info!(session_key = %key, prompt_chars = prompt.chars().count(), "bootstrapping session");

        let text = self
            .invoke(key, prompt, Continuation::Start(token.clone()), events)
            .await?;
        self.store.write_token(key, &token)?;
        Ok(text)
    }

    async fn invoke(
        &self,
        key: &SessionKey,
        prompt: String,
        continuation: Continuation,
        events: Option<&mpsc::Sender<StreamEvent>>,
    ) -> Result<String> {
        let mode = if events.is_some() {
            OutputMode::Streaming
        } else {
            OutputMode::Batch
        };
        let invocation = Invocation::new(
            key.clone(),
            self.store.workspace_dir(key),
            prompt,
            mode,
            continuation,
            self.settings.timeout,
        );

        match events {
            Some(tx) => self.invoker.run_stream(invocation, tx.clone()).await,
            None => self.invoker.run_batch(invocation).await,
        }
    }
}
