//! A Slack channel or DM as an [`OutputChannel`].

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use slack_morphism::prelude::{SlackChannelId, SlackTs};

use crate::delivery::{MessageHandle, OutputChannel};
use crate::slack::client::{SlackMessage, SlackService};
use crate::{AppError, Result};

/// Output side of one Slack conversation.
#[derive(Clone)]
pub struct SlackConversation {
    slack: Arc<SlackService>,
    channel: SlackChannelId,
    max_message_chars: usize,
}

impl SlackConversation {
    /// Bind `slack` to `channel`.
    #[must_use]
    pub fn new(slack: Arc<SlackService>, channel: SlackChannelId, max_message_chars: usize) -> Self {
        Self {
            slack,
            channel,
            max_message_chars,
        }
    }
}

impl OutputChannel for SlackConversation {
    fn max_message_chars(&self) -> usize {
        self.max_message_chars
    }

    fn send<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageHandle>> + Send + 'a>> {
        Box::pin(async move {
            let ts = self
                .slack
                .post_message(SlackMessage::plain(self.channel.clone(), text))
                .await?;
            Ok(MessageHandle(ts.0))
        })
    }

    fn edit<'a>(
        &'a self,
        handle: &'a MessageHandle,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.slack.update_text(
            self.channel.clone(),
            SlackTs(handle.0.clone()),
            text.to_owned(),
        ))
    }

    fn delete<'a>(
        &'a self,
        handle: &'a MessageHandle,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(
            self.slack
                .delete_message(self.channel.clone(), SlackTs(handle.0.clone())),
        )
    }

    fn send_document<'a>(
        &'a self,
        path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| AppError::Io(format!("not a file: {}", path.display())))?;
            let content = tokio::fs::read(path)
                .await
                .map_err(|err| AppError::Io(format!("failed to read {}: {err}", path.display())))?;
            self.slack
                .upload_file(self.channel.clone(), &filename, content)
                .await
        })
    }
}
