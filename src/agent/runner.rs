//! Subprocess-backed [`AgentInvoker`].
//!
//! Every call:
//! - resolves the executable once per runner (`which`), failing fast with an
//!   install hint when it is missing,
//! - registers with the [`ProcessRegistry`] before spawning, so a cancel can
//!   never miss a process that is about to start,
//! - clears the inherited environment and rebuilds it from an allowlist,
//! - races output collection against the registry kill switch and the
//!   deadline, killing and reaping the child on either.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, info_span, warn, Instrument};

use super::codec::StreamCodec;
use super::events::{parse_stream_line, StreamEvent, TextAccumulator};
use super::invocation::{Continuation, Invocation, OutputMode};
use super::AgentInvoker;
use crate::config::AgentConfig;
use crate::runtime::ProcessRegistry;
use crate::{AppError, Result};

/// Variable carrying the session key into the agent's environment.
pub const SESSION_KEY_ENV: &str = "RELAY_SESSION_KEY";

/// How long to wait for stderr to drain after the child exits.
const STDERR_DRAIN: Duration = Duration::from_secs(2);

/// Runs the agent CLI as a child process.
#[derive(Debug)]
pub struct AgentRunner {
    config: AgentConfig,
    registry: ProcessRegistry,
    executable: OnceLock<PathBuf>,
}

enum Outcome {
    Killed,
    TimedOut,
    Exited(Result<String>, std::io::Result<ExitStatus>),
}

impl AgentRunner {
    /// Create a runner that registers its processes in `registry`.
    #[must_use]
    pub fn new(config: AgentConfig, registry: ProcessRegistry) -> Self {
        Self {
            config,
            registry,
            executable: OnceLock::new(),
        }
    }

    /// Resolve the configured executable on `PATH`, caching the first hit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AgentNotFound` when nothing matches.
    pub fn resolve_executable(&self) -> Result<&Path> {
        if let Some(path) = self.executable.get() {
            return Ok(path.as_path());
        }
        let found = which::which(&self.config.executable).map_err(|err| {
            AppError::AgentNotFound(format!(
                "`{}` not found on PATH ({err}); install it with `npm install -g @anthropic-ai/claude-code` or set [agent].executable",
                self.config.executable
            ))
        })?;
        info!(executable = %found.display(), "resolved agent executable");
        Ok(self.executable.get_or_init(|| found).as_path())
    }

    /// Arguments passed to the executable for `invocation`.
    #[must_use]
    pub fn command_args(&self, invocation: &Invocation) -> Vec<String> {
        let mut args = vec![
            "-p".to_owned(),
            invocation.message.clone(),
            "--output-format".to_owned(),
            invocation.mode.format_flag().to_owned(),
        ];
        if invocation.mode == OutputMode::Streaming {
            args.push("--verbose".to_owned());
            args.push("--include-partial-messages".to_owned());
        }
        match &invocation.continuation {
            Continuation::Start(token) => {
                args.push("--session-id".to_owned());
                args.push(token.clone());
            }
            Continuation::Resume(token) => {
                args.push("--resume".to_owned());
                args.push(token.clone());
            }
        }
        if let Some(model) = &self.config.model {
            args.push("--model".to_owned());
            args.push(model.clone());
        }
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    fn build_command(&self, executable: &Path, invocation: &Invocation) -> Command {
        let mut cmd = Command::new(executable);
        cmd.args(self.command_args(invocation));

        // Nothing from the relay's own environment (Slack tokens included)
        // reaches the agent unless it is on the allowlist.
        cmd.env_clear();
        for key in &self.config.env_passthrough {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        cmd.envs(&self.config.env);
        cmd.envs(&invocation.env);
        cmd.env(SESSION_KEY_ENV, invocation.session_key.to_string());

        cmd.current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn execute(
        &self,
        invocation: Invocation,
        events: Option<mpsc::Sender<StreamEvent>>,
    ) -> Result<String> {
        let executable = self.resolve_executable()?.to_path_buf();
        let registration = self.registry.register(&invocation.session_key)?;

        let mut child = self
            .build_command(&executable, &invocation)
            .spawn()
            .map_err(|err| AppError::Io(format!("failed to spawn agent: {err}")))?;
        registration.set_pid(child.id());
        let started = Instant::now();
        info!(
            pid = ?child.id(),
            resume = invocation.continuation.is_resume(),
            "agent process started"
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Io("failed to capture agent stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Io("failed to capture agent stderr".into()))?;
        let stderr_task = tokio::spawn(read_all(stderr));

        let outcome = tokio::select! {
            biased;
            () = registration.killed() => Outcome::Killed,
            () = tokio::time::sleep(invocation.timeout) => Outcome::TimedOut,
            (output, status) = async {
                let output = match &events {
                    Some(tx) => read_events(stdout, tx).await,
                    None => read_all(stdout).await.map(|raw| raw.trim().to_owned()),
                };
                (output, child.wait().await)
            } => Outcome::Exited(output, status),
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match outcome {
            Outcome::Killed => {
                child.kill().await.ok();
                stderr_task.abort();
                info!(elapsed_ms, "agent process killed on request");
                Err(AppError::Cancelled)
            }
            Outcome::TimedOut => {
                child.kill().await.ok();
                stderr_task.abort();
                let seconds = invocation.timeout.as_secs();
                warn!(elapsed_ms, seconds, "agent process timed out");
                Err(AppError::Timeout { seconds })
            }
            Outcome::Exited(output, status) => {
                let status =
                    status.map_err(|err| AppError::Io(format!("failed to wait on agent: {err}")))?;
                let diagnostics = match tokio::time::timeout(STDERR_DRAIN, stderr_task).await {
                    Ok(Ok(Ok(text))) => text.trim().to_owned(),
                    _ => String::new(),
                };
                info!(exit_code = ?status.code(), elapsed_ms, "agent process exited");

                if status.success() {
                    if !diagnostics.is_empty() {
                        debug!(stderr = %diagnostics, "agent wrote to stderr");
                    }
                    return output;
                }
                Err(self.classify_failure(&invocation, status, diagnostics, output.ok()))
            }
        }
    }

    /// Map a non-zero exit to `ResumeFailed` or `ExternalAgent`.
    fn classify_failure(
        &self,
        invocation: &Invocation,
        status: ExitStatus,
        stderr: String,
        stdout: Option<String>,
    ) -> AppError {
        let diagnostics = if stderr.is_empty() {
            stdout.unwrap_or_default()
        } else {
            stderr
        };

        let rejected = invocation.continuation.is_resume()
            && self
                .config
                .resume_failure_markers
                .iter()
                .any(|marker| diagnostics.contains(marker.as_str()));
        if rejected {
            warn!(token = invocation.continuation.token(), "agent rejected continuation token");
            return AppError::ResumeFailed(diagnostics);
        }

        warn!(exit_code = ?status.code(), %diagnostics, "agent process failed");
        AppError::ExternalAgent {
            exit_code: status.code(),
            diagnostics,
        }
    }
}

impl AgentInvoker for AgentRunner {
    fn run_batch(
        &self,
        invocation: Invocation,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        let span = info_span!("invocation", session_key = %invocation.session_key, mode = "batch");
        Box::pin(self.execute(invocation, None).instrument(span))
    }

    fn run_stream(
        &self,
        invocation: Invocation,
        events: mpsc::Sender<StreamEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        let span = info_span!("invocation", session_key = %invocation.session_key, mode = "stream");
        Box::pin(self.execute(invocation, Some(events)).instrument(span))
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> Result<String> {
    let mut raw = Vec::new();
    reader
        .read_to_end(&mut raw)
        .await
        .map_err(|err| AppError::Stream(format!("failed to read agent output: {err}")))?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

async fn read_events(stdout: ChildStdout, events: &mpsc::Sender<StreamEvent>) -> Result<String> {
    let mut lines = FramedRead::new(stdout, StreamCodec::new());
    let mut text = TextAccumulator::new();

    while let Some(line) = lines.next().await {
        let event = parse_stream_line(&line?);
        if event == StreamEvent::Unknown {
            continue;
        }
        if let StreamEvent::Result { is_error: true, .. } = &event {
            warn!("agent reported an error result");
        }
        text.push(&event);
        // The consumer may have gone away; keep draining regardless.
        events.send(event).await.ok();
    }

    Ok(text.into_final())
}
