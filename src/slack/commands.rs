//! Slack slash command router.
//!
//! Commands answer within Slack's acknowledgement window. Anything that may
//! wait on a running turn (`/resetall`, `/send`) is acknowledged right away
//! and finished on the relay's task tracker, with the outcome posted to the
//! channel afterwards.

use std::sync::Arc;

use slack_morphism::prelude::{
    SlackChannelId, SlackClient, SlackClientEventsUserState, SlackClientHyperHttpsConnector,
    SlackCommandEvent, SlackCommandEventResponse, SlackMessageContent, SlackMessageResponseType,
};
use tracing::{error, info, warn};

use crate::slack::client::SlackMessage;
use crate::slack::RelayState;

/// Recognized slash commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    /// Forget the conversation and its history; keep the workspace.
    Reset,
    /// Delete the whole session directory.
    ResetAll,
    /// Kill the running agent process.
    Cancel,
    /// Describe the session.
    Status,
    /// Upload a workspace file.
    Send(String),
}

impl SlashCommand {
    /// Parse a command name and its argument text.
    #[must_use]
    pub fn parse(command: &str, text: Option<&str>) -> Option<Self> {
        let arg = text.map(str::trim).unwrap_or_default();
        match command.trim_start_matches('/') {
            "reset" => Some(Self::Reset),
            "resetall" => Some(Self::ResetAll),
            "cancel" => Some(Self::Cancel),
            "status" => Some(Self::Status),
            "send" if !arg.is_empty() => Some(Self::Send(arg.to_owned())),
            _ => None,
        }
    }
}

/// Handle incoming slash commands routed via Socket Mode.
///
/// # Errors
///
/// Never fails; problems are reported in the command response.
pub async fn handle_command(
    event: SlackCommandEvent,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::AnyStdResult<SlackCommandEventResponse> {
    info!(command = ?event.command, user = ?event.user_id, "received slash command");

    let app_state: Option<Arc<RelayState>> = {
        let guard = state.read().await;
        guard.get_user_state::<Arc<RelayState>>().cloned()
    };
    let Some(app) = app_state else {
        warn!("relay state not available; cannot process command");
        return Ok(ephemeral("The assistant is not ready yet."));
    };

    if !app.config.is_user_allowed(&event.user_id.0) {
        warn!(user_id = %event.user_id.0, "unauthorized slash command (rejected)");
        return Ok(ephemeral("You are not allowed to use this assistant."));
    }

    let reply = match SlashCommand::parse(&event.command.0, event.text.as_deref()) {
        Some(command) => run(&app, event.channel_id, command),
        None => "Usage: /reset, /resetall, /cancel, /status, /send <file>".to_owned(),
    };
    Ok(ephemeral(reply))
}

fn run(app: &Arc<RelayState>, channel: SlackChannelId, command: SlashCommand) -> String {
    let key = app.session_key(&channel);
    match command {
        SlashCommand::Reset => match app.handler.reset(&key) {
            Ok(()) => "\u{1f504} Conversation reset. Workspace files preserved.".to_owned(),
            Err(err) => format!("Error: {err}"),
        },
        SlashCommand::Cancel => {
            if app.handler.cancel(&key) {
                "\u{26d4} Cancelling current execution...".to_owned()
            } else {
                "Nothing to cancel.".to_owned()
            }
        }
        SlashCommand::Status => match app.handler.status(&key) {
            Ok(report) => report.render(),
            Err(err) => format!("Error: {err}"),
        },
        SlashCommand::ResetAll => {
            let task_app = Arc::clone(app);
            app.tracker.spawn(async move {
                let text = match task_app.handler.reset_all(&key).await {
                    Ok(()) => "\u{1f5d1}\u{fe0f} Session deleted. The next message starts fresh.".to_owned(),
                    Err(err) => format!("Error: {err}"),
                };
                notify(&task_app, channel, text).await;
            });
            "Deleting session...".to_owned()
        }
        SlashCommand::Send(name) => {
            let task_app = Arc::clone(app);
            let reply = format!("\u{1f4e4} Sending {name}...");
            app.tracker.spawn(async move {
                let conversation = task_app.conversation(channel.clone());
                if let Err(err) = task_app
                    .handler
                    .send_workspace_file(&key, &name, &conversation)
                    .await
                {
                    error!(%err, file = %name, "workspace file upload failed");
                    notify(&task_app, channel, format!("Error: {err}")).await;
                }
            });
            reply
        }
    }
}

async fn notify(app: &RelayState, channel: SlackChannelId, text: String) {
    if let Err(err) = app.slack.enqueue(SlackMessage::plain(channel, text)).await {
        error!(%err, "failed to post command result");
    }
}

fn ephemeral(text: impl Into<String>) -> SlackCommandEventResponse {
    SlackCommandEventResponse {
        content: SlackMessageContent {
            text: Some(text.into()),
            blocks: None,
            attachments: None,
            upload: None,
            files: None,
            reactions: None,
            metadata: None,
            markdown_text: None,
        },
        response_type: Some(SlackMessageResponseType::Ephemeral),
    }
}
