//! Getting agent output in front of the user: formatting, splitting,
//! batch sends, and the streaming preview pipeline.

pub mod channel;
pub mod format;
pub mod stream;

use tracing::debug;

pub use channel::{MessageHandle, OutputChannel};
pub use format::{markdown_to_mrkdwn, split_message};
pub use stream::{run_streaming, Delivered, StreamFailure, StreamReport, StreamSettings};

use crate::{AppError, Result};

/// Notice posted when a turn has to wait for the previous one.
pub const QUEUED_NOTICE: &str = "\u{1f4e5} Message queued. Processing previous request...";
/// Text shown when the user cancelled the running turn.
pub const CANCELLED_NOTICE: &str = "\u{26d4} Execution was cancelled.";
/// Text shown when the agent ran past its deadline.
pub const TIMEOUT_NOTICE: &str = "Request timed out. Please try a shorter request.";
/// Stand-in for an agent that produced no text at all.
pub const EMPTY_RESPONSE: &str = "(empty response)";

/// User-facing text for a failed turn.
#[must_use]
pub fn failure_text(err: &AppError) -> String {
    match err {
        AppError::Cancelled => CANCELLED_NOTICE.to_owned(),
        AppError::Timeout { .. } => TIMEOUT_NOTICE.to_owned(),
        other => format!("Error: {other}"),
    }
}

/// Format `text` and send it as one or more messages.
///
/// Returns the number of messages posted.
///
/// # Errors
///
/// Returns the first channel error; chunks after it are not sent.
pub async fn send_split(channel: &dyn OutputChannel, text: &str) -> Result<usize> {
    let formatted = markdown_to_mrkdwn(text.trim());
    let formatted = if formatted.is_empty() {
        EMPTY_RESPONSE.to_owned()
    } else {
        formatted
    };

    let chunks = split_message(&formatted, channel.max_message_chars());
    for chunk in &chunks {
        channel.send(chunk).await?;
    }
    debug!(chunks = chunks.len(), "sent split response");
    Ok(chunks.len())
}
