//! Slack surface: Socket Mode events, slash commands, and the output
//! channel implementation.

pub mod client;
pub mod commands;
pub mod conversation;
pub mod events;

use std::sync::Arc;

use slack_morphism::prelude::SlackChannelId;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::config::GlobalConfig;
use crate::models::session::SessionKey;
use crate::orchestrator::TurnHandler;

use self::client::SlackService;
use self::conversation::SlackConversation;

/// State shared with every Socket Mode callback.
pub struct RelayState {
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// Turn orchestration.
    pub handler: Arc<TurnHandler>,
    /// Slack Web API access.
    pub slack: Arc<SlackService>,
    /// In-flight turn and command tasks, awaited on shutdown.
    pub tracker: TaskTracker,
}

impl RelayState {
    /// Session key for a Slack conversation.
    #[must_use]
    pub fn session_key(&self, channel: &SlackChannelId) -> SessionKey {
        SessionKey::new(self.config.assistant_name.clone(), channel.0.clone())
    }

    /// Output channel for a Slack conversation.
    #[must_use]
    pub fn conversation(&self, channel: SlackChannelId) -> SlackConversation {
        SlackConversation::new(
            Arc::clone(&self.slack),
            channel,
            self.config.streaming.max_message_chars,
        )
    }

    /// Run one user message as a turn. Failures were already shown to the
    /// user by the handler.
    pub async fn run_turn(&self, channel: SlackChannelId, text: String) {
        let key = self.session_key(&channel);
        let conversation = self.conversation(channel);
        if let Err(err) = self.handler.handle_message(&key, &text, &conversation).await {
            debug!(session_key = %key, %err, "turn ended with error");
        }
    }
}
