//! Slack Web API client, Socket Mode listener, and a buffered notice queue.

use std::sync::Arc;
use std::time::Duration;

use slack_morphism::errors::SlackClientError;
use slack_morphism::prelude::{
    SlackApiChatDeleteRequest, SlackApiChatPostMessageRequest, SlackApiChatUpdateRequest,
    SlackApiFilesComplete, SlackApiFilesCompleteUploadExternalRequest,
    SlackApiFilesGetUploadUrlExternalRequest, SlackApiToken, SlackApiTokenType,
    SlackApiTokenValue, SlackChannelId, SlackClient, SlackClientEventsListenerEnvironment,
    SlackClientHyperHttpsConnector, SlackClientSession, SlackClientSocketModeConfig,
    SlackClientSocketModeListener, SlackMessageContent, SlackSocketModeListenerCallbacks,
    SlackTs,
};
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::{debug, error, info, warn};

use crate::slack::{commands, events, RelayState};
use crate::{config::SlackConfig, AppError, Result};

const QUEUE_CAPACITY: usize = 256;
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
/// Attempts for posts whose timestamp the caller is waiting on.
const DIRECT_POST_ATTEMPTS: u32 = 3;

type Client = SlackClient<SlackClientHyperHttpsConnector>;

/// Message to be delivered via `chat.postMessage`.
#[derive(Debug, Clone)]
pub struct SlackMessage {
    /// Target channel or DM.
    pub channel: SlackChannelId,
    /// `mrkdwn` text.
    pub text: String,
    /// Reply thread, if any.
    pub thread_ts: Option<SlackTs>,
}

impl SlackMessage {
    /// Create a top-level message for a channel.
    pub fn plain(channel: SlackChannelId, text: impl Into<String>) -> Self {
        Self {
            channel,
            text: text.into(),
            thread_ts: None,
        }
    }

    fn into_request(self) -> SlackApiChatPostMessageRequest {
        SlackApiChatPostMessageRequest {
            channel: self.channel,
            content: text_content(self.text),
            as_user: None,
            icon_emoji: None,
            icon_url: None,
            link_names: Some(true),
            parse: None,
            thread_ts: self.thread_ts,
            username: None,
            reply_broadcast: None,
            unfurl_links: None,
            unfurl_media: None,
        }
    }
}

fn text_content(text: String) -> SlackMessageContent {
    SlackMessageContent {
        text: Some(text),
        blocks: None,
        attachments: None,
        upload: None,
        files: None,
        reactions: None,
        metadata: None,
        markdown_text: None,
    }
}

/// Slack wrapper owning the bot token and an outgoing notice queue.
pub struct SlackService {
    client: Arc<Client>,
    bot_token: SlackApiToken,
    app_token: SlackApiToken,
    queue_tx: mpsc::Sender<SlackMessage>,
}

/// Join handles for Slack background tasks.
pub struct SlackRuntime {
    /// Notice queue worker.
    pub queue_task: JoinHandle<()>,
    /// Socket Mode listener.
    pub socket_task: JoinHandle<()>,
}

impl SlackRuntime {
    /// Stop both background tasks.
    pub fn abort(&self) {
        self.socket_task.abort();
        self.queue_task.abort();
    }
}

impl SlackService {
    /// Create the client and start the notice queue worker.
    ///
    /// Socket Mode is started separately with
    /// [`spawn_socket_mode`](Self::spawn_socket_mode) once the relay state,
    /// which itself holds this service, exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the HTTPS connector cannot be created.
    pub fn start(config: &SlackConfig) -> Result<(Self, JoinHandle<()>)> {
        let connector = SlackClientHyperHttpsConnector::new()
            .map_err(|err| AppError::Slack(format!("failed to init slack connector: {err}")))?;
        let client = Arc::new(SlackClient::new(connector));
        let bot_token = token(&config.bot_token, SlackApiTokenType::Bot);
        let app_token = token(&config.app_token, SlackApiTokenType::App);

        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
        let queue_task = Self::spawn_worker(Arc::clone(&client), bot_token.clone(), queue_rx);
        info!("slack client started with buffered notice queue");

        Ok((
            Self {
                client,
                bot_token,
                app_token,
                queue_tx,
            },
            queue_task,
        ))
    }

    /// Enqueue a fire-and-forget message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the queue worker has stopped.
    pub async fn enqueue(&self, message: SlackMessage) -> Result<()> {
        self.queue_tx
            .send(message)
            .await
            .map_err(|err| AppError::Slack(format!("failed to enqueue slack message: {err}")))
    }

    /// Post a message now and return its timestamp.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` once retries are exhausted.
    pub async fn post_message(&self, message: SlackMessage) -> Result<SlackTs> {
        let request = message.into_request();
        post_with_retry(&self.http_session(), &request, Some(DIRECT_POST_ATTEMPTS)).await
    }

    /// Replace the text of an existing message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the Slack API call fails.
    pub async fn update_text(&self, channel: SlackChannelId, ts: SlackTs, text: String) -> Result<()> {
        let request = SlackApiChatUpdateRequest::new(channel, text_content(text), ts);
        self.http_session()
            .chat_update(&request)
            .await
            .map_err(|err| AppError::Slack(format!("failed to update message: {err}")))?;
        Ok(())
    }

    /// Delete a message posted by the bot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the Slack API call fails.
    pub async fn delete_message(&self, channel: SlackChannelId, ts: SlackTs) -> Result<()> {
        let request = SlackApiChatDeleteRequest::new(channel, ts);
        self.http_session()
            .chat_delete(&request)
            .await
            .map_err(|err| AppError::Slack(format!("failed to delete message: {err}")))?;
        Ok(())
    }

    /// Upload a file to a channel using the external upload flow.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if any step of the upload fails.
    pub async fn upload_file(
        &self,
        channel: SlackChannelId,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<()> {
        let session = self.http_session();

        let url_request =
            SlackApiFilesGetUploadUrlExternalRequest::new(filename.into(), content.len());
        let url_response = session
            .get_upload_url_external(&url_request)
            .await
            .map_err(|err| AppError::Slack(format!("failed to get upload url: {err}")))?;

        reqwest::Client::new()
            .post(url_response.upload_url.0.to_string())
            .body(content)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| AppError::Slack(format!("failed to upload file: {err}")))?;

        let file_ref = SlackApiFilesComplete {
            id: url_response.file_id,
            title: Some(filename.into()),
        };
        let mut complete_request = SlackApiFilesCompleteUploadExternalRequest::new(vec![file_ref]);
        complete_request.channel_id = Some(channel);
        session
            .files_complete_upload_external(&complete_request)
            .await
            .map_err(|err| AppError::Slack(format!("failed to complete upload: {err}")))?;

        debug!(filename, "file uploaded");
        Ok(())
    }

    /// Create an HTTP session for direct API calls using the bot token.
    #[must_use]
    pub fn http_session(&self) -> SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.bot_token)
    }

    fn spawn_worker(
        client: Arc<Client>,
        token: SlackApiToken,
        mut queue_rx: mpsc::Receiver<SlackMessage>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let session = client.open_session(&token);
            while let Some(message) = queue_rx.recv().await {
                let request = message.into_request();
                if let Err(err) = post_with_retry(&session, &request, None).await {
                    error!(%err, "dropping queued slack message");
                }
            }
            info!("slack sender task exiting");
        })
    }

    /// Start the Socket Mode listener with `state` as the callbacks' user
    /// state.
    #[must_use]
    pub fn spawn_socket_mode(&self, state: Arc<RelayState>) -> JoinHandle<()> {
        let listener_env = Arc::new(
            SlackClientEventsListenerEnvironment::new(Arc::clone(&self.client))
                .with_error_handler(|err, _client, _state| {
                    error!(?err, "socket mode error");
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                })
                .with_user_state(state),
        );
        let callbacks = SlackSocketModeListenerCallbacks::new()
            .with_hello_events(|event, _client, _state| async move {
                info!(?event, "socket hello");
            })
            .with_command_events(commands::handle_command)
            .with_push_events(events::handle_push_event);
        let config = SlackClientSocketModeConfig {
            max_connections_count: SlackClientSocketModeConfig::DEFAULT_CONNECTIONS_COUNT,
            debug_connections: SlackClientSocketModeConfig::DEFAULT_DEBUG_CONNECTIONS,
            initial_backoff_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_INITIAL_BACKOFF_IN_SECONDS,
            reconnect_timeout_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_RECONNECT_TIMEOUT_IN_SECONDS,
            ping_interval_in_seconds: SlackClientSocketModeConfig::DEFAULT_PING_INTERVAL_IN_SECONDS,
            ping_failure_threshold_times:
                SlackClientSocketModeConfig::DEFAULT_PING_FAILURE_THRESHOLD_TIMES,
        };

        let listener = SlackClientSocketModeListener::new(&config, listener_env, callbacks);
        let app_token = self.app_token.clone();
        tokio::spawn(async move {
            if let Err(error) = listener.listen_for(&app_token).await {
                error!(?error, "socket mode listen failed");
                return;
            }

            listener.serve().await;
            info!("socket mode listener exited");
        })
    }
}

fn token(value: &str, token_type: SlackApiTokenType) -> SlackApiToken {
    SlackApiToken {
        token_value: SlackApiTokenValue(value.to_owned()),
        cookie: None,
        team_id: None,
        scope: None,
        token_type: Some(token_type),
    }
}

/// Post with exponential backoff, honoring Slack's `retry_after` on rate
/// limits. `max_attempts: None` retries forever.
async fn post_with_retry(
    session: &SlackClientSession<'_, SlackClientHyperHttpsConnector>,
    request: &SlackApiChatPostMessageRequest,
    max_attempts: Option<u32>,
) -> Result<SlackTs> {
    let mut backoff = INITIAL_RETRY_DELAY;
    let mut attempt = 0_u32;
    loop {
        attempt += 1;
        match session.chat_post_message(request).await {
            Ok(response) => {
                debug!(ts = ?response.ts, "sent slack message");
                return Ok(response.ts);
            }
            Err(error) => {
                if max_attempts.is_some_and(|max| attempt >= max) {
                    return Err(AppError::Slack(format!("failed to post message: {error}")));
                }
                let delay = match &error {
                    SlackClientError::RateLimitError(rate) => rate.retry_after.unwrap_or(backoff),
                    _ => backoff,
                };
                warn!(?error, ?delay, attempt, "slack post failed; retrying");
                sleep(delay).await;
                backoff = (backoff * 2).min(MAX_RETRY_DELAY);
            }
        }
    }
}
