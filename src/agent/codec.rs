//! Line codec for the agent's stream-json output.
//!
//! Wraps [`AnyDelimiterCodec`] with a maximum line length so a runaway agent
//! cannot make the relay buffer an unbounded line. Oversized lines are
//! discarded with a warning instead of failing the decoder: `FramedRead` ends
//! the stream after the first decoder error, and the agent's remaining output
//! still has to be drained. Invalid UTF-8 is replaced, not rejected.

use bytes::BytesMut;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder};
use tracing::warn;

use crate::{AppError, Result};

/// Longest accepted event line: 8 MiB.
///
/// Result events carry the whole answer on one line, so this is far larger
/// than a typical NDJSON limit.
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Newline-delimited, lossily UTF-8 decoded for agent event streams.
///
/// ```rust,ignore
/// use tokio_util::codec::FramedRead;
/// use agent_relay::agent::codec::StreamCodec;
///
/// let lines = FramedRead::new(child_stdout, StreamCodec::new());
/// ```
#[derive(Debug)]
pub struct StreamCodec {
    inner: AnyDelimiterCodec,
    skipped: usize,
}

impl StreamCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), max),
            skipped: 0,
        }
    }

    /// Number of oversized lines discarded so far.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn decode_with(
        &mut self,
        src: &mut BytesMut,
        eof: bool,
    ) -> Result<Option<String>> {
        loop {
            let decoded = if eof {
                self.inner.decode_eof(src)
            } else {
                self.inner.decode(src)
            };
            match decoded {
                Ok(Some(chunk)) => return Ok(Some(decode_line(&chunk))),
                Ok(None) => return Ok(None),
                Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                    self.skipped += 1;
                    warn!(
                        max_bytes = self.inner.max_length(),
                        "agent emitted an oversized line, skipping"
                    );
                }
                Err(AnyDelimiterCodecError::Io(err)) => {
                    return Err(AppError::Stream(format!(
                        "failed to read agent output: {err}"
                    )))
                }
            }
        }
    }
}

impl Default for StreamCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StreamCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.decode_with(src, false)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.decode_with(src, true)
    }
}

fn decode_line(chunk: &[u8]) -> String {
    let line = chunk.strip_suffix(b"\r").unwrap_or(chunk);
    String::from_utf8_lossy(line).into_owned()
}
