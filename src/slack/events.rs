//! Socket Mode push events: user messages become turns.
//!
//! Only plain user messages are relayed. Bot messages (including the
//! relay's own), edits, joins, and other subtyped events are dropped, as
//! are messages from users outside `allowed_user_ids`.

use std::sync::Arc;

use slack_morphism::prelude::{
    SlackChannelId, SlackClient, SlackClientEventsUserState, SlackClientHyperHttpsConnector,
    SlackEventCallbackBody, SlackMessageEvent, SlackPushEventCallback,
};
use tracing::{debug, info, warn};

use crate::slack::RelayState;

/// A user message worth relaying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Conversation the message arrived in.
    pub channel: SlackChannelId,
    /// Sender's Slack user id.
    pub user: String,
    /// Trimmed message text.
    pub text: String,
}

impl InboundMessage {
    /// Extract a relayable message, or `None` for anything to ignore.
    #[must_use]
    pub fn from_event(event: &SlackMessageEvent) -> Option<Self> {
        if event.subtype.is_some() || event.sender.bot_id.is_some() {
            return None;
        }
        let user = event.sender.user.as_ref()?.0.clone();
        let channel = event.origin.channel.clone()?;
        let text = relayable_text(event.content.as_ref()?.text.as_deref())?;
        Some(Self {
            channel,
            user,
            text,
        })
    }
}

/// Trimmed text, or `None` when there is nothing to send to the agent.
#[must_use]
pub fn relayable_text(text: Option<&str>) -> Option<String> {
    let text = text?.trim();
    (!text.is_empty()).then(|| text.to_owned())
}

/// Handle push events delivered via Socket Mode.
///
/// Each accepted message is run on the relay's task tracker so the Socket
/// Mode acknowledgement is never held up by the agent.
///
/// # Errors
///
/// Never fails; problems are logged.
pub async fn handle_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::UserCallbackResult<()> {
    let app_state: Option<Arc<RelayState>> = {
        let guard = state.read().await;
        guard.get_user_state::<Arc<RelayState>>().cloned()
    };
    let Some(app) = app_state else {
        warn!("relay state not available; dropping push event");
        return Ok(());
    };

    let SlackEventCallbackBody::Message(message) = event.event else {
        debug!("ignoring non-message push event");
        return Ok(());
    };
    let Some(inbound) = InboundMessage::from_event(&message) else {
        debug!("ignoring bot, subtyped, or empty message");
        return Ok(());
    };

    if !app.config.is_user_allowed(&inbound.user) {
        warn!(
            user_id = %inbound.user,
            "unauthorized user attempted to message the assistant (ignored)"
        );
        return Ok(());
    }

    if app.tracker.is_closed() {
        info!("shutting down; dropping inbound message");
        return Ok(());
    }

    info!(
        channel = %inbound.channel.0,
        user_id = %inbound.user,
        chars = inbound.text.chars().count(),
        "relaying user message"
    );
    let turn_state = Arc::clone(&app);
    app.tracker.spawn(async move {
        turn_state.run_turn(inbound.channel, inbound.text).await;
    });

    Ok(())
}
