//! Streaming delivery: one preview message, edited in place at a bounded
//! rate, then finalized with the authoritative text.
//!
//! Lifecycle of a streamed answer:
//!
//! 1. deltas accumulate until `min_chars`, then the preview is posted with
//!    the progress marker appended (`send_first`);
//! 2. while text keeps arriving the preview is edited, at most once per
//!    `update_interval` (`update`);
//! 3. if the preview would exceed the channel limit, it is deleted and
//!    updates stop for good (overflow);
//! 4. on completion the preview is edited to the final text without the
//!    marker (`finalize`), or, after an overflow or when no preview was ever
//!    posted, the final text goes out through [`send_split`].

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::channel::{MessageHandle, OutputChannel};
use super::format::markdown_to_mrkdwn;
use super::{failure_text, send_split, EMPTY_RESPONSE};
use crate::agent::{StreamEvent, TextAccumulator};
use crate::config::StreamingConfig;
use crate::{AppError, Result};

/// Event channel depth between the runner and the pipeline.
const EVENT_BUFFER: usize = 256;

/// Streaming knobs.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Characters required before the first preview is posted.
    pub min_chars: usize,
    /// Minimum spacing between preview edits.
    pub update_interval: Duration,
    /// Appended to every preview while the agent is still running.
    pub progress_marker: String,
}

impl From<&StreamingConfig> for StreamSettings {
    fn from(config: &StreamingConfig) -> Self {
        Self {
            min_chars: config.min_chars,
            update_interval: Duration::from_millis(config.update_interval_ms),
            progress_marker: config.progress_marker.clone(),
        }
    }
}

/// How the final answer reached the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    /// The preview message was edited into the final answer.
    Finalized(MessageHandle),
    /// The final answer was posted through the split path.
    Split {
        /// Messages posted.
        chunks: usize,
        /// Whether the preview was abandoned because it grew too long.
        overflowed: bool,
    },
}

/// Successful streaming turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReport {
    /// Final answer text as returned by the agent, before formatting.
    pub text: String,
    /// Delivery path taken.
    pub delivered: Delivered,
}

/// Failed streaming turn.
#[derive(Debug)]
pub struct StreamFailure {
    /// The underlying error, unchanged.
    pub error: AppError,
    /// Whether the user has already been shown the failure (the preview was
    /// finalized with an error annotation).
    pub surfaced: bool,
}

/// Run `invoke` and stream its events to `channel`.
///
/// `invoke` receives the sender half of the event channel; its future's
/// output is the invocation's final text. The sender must be dropped when
/// the invocation ends so the pipeline sees the end of the stream.
///
/// # Errors
///
/// Returns a [`StreamFailure`] when the invocation fails or the final text
/// cannot be delivered.
pub async fn run_streaming<F, Fut>(
    channel: &dyn OutputChannel,
    settings: &StreamSettings,
    invoke: F,
) -> std::result::Result<StreamReport, StreamFailure>
where
    F: FnOnce(mpsc::Sender<StreamEvent>) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    let mut pipeline = StreamPipeline::new(channel, settings);

    let consume = async {
        while let Some(event) = rx.recv().await {
            pipeline.on_event(&event).await;
        }
    };
    let (outcome, ()) = tokio::join!(invoke(tx), consume);

    pipeline.finish(outcome).await
}

struct StreamPipeline<'a> {
    channel: &'a dyn OutputChannel,
    settings: &'a StreamSettings,
    text: TextAccumulator,
    preview: Option<MessageHandle>,
    last_update: Option<Instant>,
    overflowed: bool,
    updates: usize,
}

impl<'a> StreamPipeline<'a> {
    fn new(channel: &'a dyn OutputChannel, settings: &'a StreamSettings) -> Self {
        Self {
            channel,
            settings,
            text: TextAccumulator::new(),
            preview: None,
            last_update: None,
            overflowed: false,
            updates: 0,
        }
    }

    async fn on_event(&mut self, event: &StreamEvent) {
        if !self.text.push(event) || self.overflowed {
            return;
        }

        let preview = self.render_preview();
        if preview.chars().count() > self.channel.max_message_chars() {
            self.overflow().await;
            return;
        }

        if self.preview.is_none() {
            if self.text.text().chars().count() >= self.settings.min_chars {
                self.send_first(&preview).await;
            }
            return;
        }

        // A restart must clear stale text from the preview right away.
        let due = *event == StreamEvent::Restarted
            || self
                .last_update
                .is_none_or(|at| at.elapsed() >= self.settings.update_interval);
        if due {
            self.update(&preview).await;
        }
    }

    fn render_preview(&self) -> String {
        format!(
            "{}{}",
            markdown_to_mrkdwn(self.text.text()),
            self.settings.progress_marker
        )
    }

    async fn send_first(&mut self, preview: &str) {
        match self.channel.send(preview).await {
            Ok(handle) => {
                debug!(handle = %handle, "streaming preview posted");
                self.preview = Some(handle);
                self.last_update = Some(Instant::now());
            }
            Err(err) => warn!(%err, "failed to post streaming preview"),
        }
    }

    async fn update(&mut self, preview: &str) {
        let Some(handle) = &self.preview else {
            return;
        };
        if let Err(err) = self.channel.edit(handle, preview).await {
            warn!(%err, "failed to update streaming preview");
        }
        self.updates += 1;
        self.last_update = Some(Instant::now());
    }

    async fn overflow(&mut self) {
        self.overflowed = true;
        info!(
            chars = self.text.text().chars().count(),
            "streamed text exceeds message limit, abandoning preview"
        );
        if let Some(handle) = self.preview.take() {
            if let Err(err) = self.channel.delete(&handle).await {
                warn!(%err, "failed to delete overflowed preview");
            }
        }
    }

    async fn finish(
        mut self,
        outcome: Result<String>,
    ) -> std::result::Result<StreamReport, StreamFailure> {
        debug!(updates = self.updates, overflowed = self.overflowed, "stream ended");
        match outcome {
            Ok(text) => self.finalize(text).await,
            Err(error) => Err(self.annotate_failure(error).await),
        }
    }

    async fn finalize(
        &mut self,
        text: String,
    ) -> std::result::Result<StreamReport, StreamFailure> {
        if let Some(handle) = self.preview.take() {
            let formatted = markdown_to_mrkdwn(text.trim());
            let formatted = if formatted.is_empty() {
                EMPTY_RESPONSE.to_owned()
            } else {
                formatted
            };

            if formatted.chars().count() <= self.channel.max_message_chars() {
                match self.channel.edit(&handle, &formatted).await {
                    Ok(()) => {
                        return Ok(StreamReport {
                            text,
                            delivered: Delivered::Finalized(handle),
                        })
                    }
                    Err(err) => warn!(%err, "failed to finalize preview, resending"),
                }
            } else {
                // The result event can be longer than the streamed deltas.
                self.overflowed = true;
            }

            if let Err(err) = self.channel.delete(&handle).await {
                warn!(%err, "failed to delete preview before split send");
            }
        }

        match send_split(self.channel, &text).await {
            Ok(chunks) => Ok(StreamReport {
                text,
                delivered: Delivered::Split {
                    chunks,
                    overflowed: self.overflowed,
                },
            }),
            Err(error) => Err(StreamFailure {
                error,
                surfaced: false,
            }),
        }
    }

    async fn annotate_failure(&mut self, error: AppError) -> StreamFailure {
        let Some(handle) = self.preview.take() else {
            return StreamFailure {
                error,
                surfaced: false,
            };
        };

        let note = format!("\n\n{}", failure_text(&error));
        let budget = self
            .channel
            .max_message_chars()
            .saturating_sub(note.chars().count());
        let partial: String = markdown_to_mrkdwn(self.text.text().trim())
            .chars()
            .take(budget)
            .collect();

        let surfaced = match self.channel.edit(&handle, &format!("{partial}{note}")).await {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, "failed to annotate preview with failure");
                false
            }
        };
        StreamFailure { error, surfaced }
    }
}
