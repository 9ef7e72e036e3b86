//! Output channel abstraction over the chat platform.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::Result;

/// Platform identifier of a posted message (a Slack `ts`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageHandle(pub String);

impl Display for MessageHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Write primitives a conversation exposes to the relay.
///
/// Texts longer than [`max_message_chars`](Self::max_message_chars) must be
/// split by the caller before they reach `send` or `edit`.
pub trait OutputChannel: Send + Sync {
    /// Largest single message the platform accepts, in characters.
    fn max_message_chars(&self) -> usize;

    /// Post a new message and return its handle.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` (or the platform equivalent) on failure.
    fn send<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<MessageHandle>> + Send + 'a>>;

    /// Replace the text of a previously posted message.
    ///
    /// # Errors
    ///
    /// Returns a platform error if the edit is rejected.
    fn edit<'a>(
        &'a self,
        handle: &'a MessageHandle,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Remove a previously posted message.
    ///
    /// # Errors
    ///
    /// Returns a platform error if the deletion is rejected.
    fn delete<'a>(
        &'a self,
        handle: &'a MessageHandle,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Upload a file into the conversation.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or a platform error
    /// if the upload fails.
    fn send_document<'a>(
        &'a self,
        path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}
