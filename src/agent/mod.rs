//! External agent invocation.
//!
//! The [`AgentInvoker`] trait is the seam between the continuity layer and
//! the subprocess. [`runner::AgentRunner`] is the real implementation;
//! tests substitute scripted fakes.

pub mod codec;
pub mod events;
pub mod invocation;
pub mod runner;

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

pub use events::{parse_stream_line, StreamEvent, TextAccumulator};
pub use invocation::{Continuation, Invocation, OutputMode};
pub use runner::AgentRunner;

use crate::Result;

/// Runs one agent invocation to completion.
pub trait AgentInvoker: Send + Sync {
    /// Run in batch mode and return the agent's stdout, trimmed.
    ///
    /// # Errors
    ///
    /// - `AppError::AgentNotFound` if the executable cannot be resolved.
    /// - `AppError::AlreadyRunning` if the session already has a live process.
    /// - `AppError::Timeout` if the deadline elapsed.
    /// - `AppError::Cancelled` if the process registry killed the process.
    /// - `AppError::ResumeFailed` if a resume was rejected.
    /// - `AppError::ExternalAgent` on any other non-zero exit.
    fn run_batch(
        &self,
        invocation: Invocation,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;

    /// Run in streaming mode, forwarding every recognized event to `events`
    /// as it arrives, and return the final text.
    ///
    /// The final text is the result event's text when one arrived, otherwise
    /// the accumulated delta text. A closed `events` receiver does not stop
    /// the invocation.
    ///
    /// # Errors
    ///
    /// Same as [`run_batch`](Self::run_batch).
    fn run_stream(
        &self,
        invocation: Invocation,
        events: mpsc::Sender<StreamEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;
}
