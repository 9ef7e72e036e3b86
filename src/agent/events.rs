//! Agent stream events and the text accumulation rules shared by the
//! runner and the delivery pipeline.
//!
//! Each stdout line in streaming mode is one JSON object. Three shapes are
//! understood; everything else decodes to [`StreamEvent::Unknown`] and is
//! ignored. [`StreamEvent::Restarted`] never comes from the agent: the relay
//! emits it between a rejected resume and its retry.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// One decoded line of agent output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental text fragment.
    TextDelta(String),
    /// Complete text of one logical agent turn.
    TurnMessage(String),
    /// Authoritative final text for the whole invocation.
    Result {
        /// Final answer text.
        text: String,
        /// The agent flagged the result as an error.
        is_error: bool,
    },
    /// The invocation is being retried; text so far belongs to the
    /// abandoned attempt.
    Restarted,
    /// Unrecognized or malformed line.
    Unknown,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    event: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    is_error: bool,
}

/// Decode a single stream line. Never fails.
#[must_use]
pub fn parse_stream_line(line: &str) -> StreamEvent {
    let line = line.trim();
    if line.is_empty() {
        return StreamEvent::Unknown;
    }

    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!(%err, line = %truncate(line, 100), "non-json line from agent stream");
            return StreamEvent::Unknown;
        }
    };

    match envelope.kind.as_str() {
        "stream_event" => envelope
            .event
            .as_ref()
            .and_then(text_delta)
            .map_or(StreamEvent::Unknown, StreamEvent::TextDelta),
        "assistant" => envelope
            .message
            .as_ref()
            .and_then(turn_text)
            .map_or(StreamEvent::Unknown, StreamEvent::TurnMessage),
        "result" => match envelope.result {
            Some(Value::String(text)) => StreamEvent::Result {
                text,
                is_error: envelope.is_error,
            },
            _ => StreamEvent::Unknown,
        },
        _ => StreamEvent::Unknown,
    }
}

fn text_delta(event: &Value) -> Option<String> {
    if event.get("type")?.as_str()? != "content_block_delta" {
        return None;
    }
    let delta = event.get("delta")?;
    if delta.get("type")?.as_str()? != "text_delta" {
        return None;
    }
    Some(
        delta
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
    )
}

fn turn_text(message: &Value) -> Option<String> {
    let texts: Vec<&str> = message
        .get("content")?
        .as_array()?
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .map(|block| block.get("text").and_then(Value::as_str).unwrap_or_default())
        .collect();
    (!texts.is_empty()).then(|| texts.concat())
}

fn truncate(s: &str, max_chars: usize) -> &str {
    s.char_indices().nth(max_chars).map_or(s, |(idx, _)| &s[..idx])
}

/// Running text state of one streaming invocation.
///
/// Deltas append to the buffer. A turn message only fills the buffer when no
/// delta text has arrived yet, which covers agents that do not emit partial
/// messages. A result event is kept separately and wins at the end.
#[derive(Debug, Default, Clone)]
pub struct TextAccumulator {
    text: String,
    result: Option<String>,
}

impl TextAccumulator {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event. Returns `true` when the visible buffer changed.
    pub fn push(&mut self, event: &StreamEvent) -> bool {
        match event {
            StreamEvent::TextDelta(fragment) => {
                self.text.push_str(fragment);
                !fragment.is_empty()
            }
            StreamEvent::TurnMessage(text) if self.text.is_empty() => {
                self.text.clone_from(text);
                !text.is_empty()
            }
            StreamEvent::Result { text, .. } => {
                self.result = Some(text.clone());
                false
            }
            StreamEvent::Restarted => {
                let had_text = !self.text.is_empty();
                self.text.clear();
                self.result = None;
                had_text
            }
            StreamEvent::TurnMessage(_) | StreamEvent::Unknown => false,
        }
    }

    /// Text accumulated from deltas or the turn-message fallback.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Final answer: the result event if present, else the buffer, trimmed.
    #[must_use]
    pub fn into_final(self) -> String {
        self.result.unwrap_or(self.text).trim().to_owned()
    }
}
