#![forbid(unsafe_code)]

//! `agent-relay` binary.
//!
//! Loads configuration, starts the Slack Socket Mode listener, and relays
//! every user message to the agent CLI until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::config::GlobalConfig;
use agent_relay::orchestrator::TurnHandler;
use agent_relay::runtime::RuntimeContext;
use agent_relay::slack::client::{SlackRuntime, SlackService};
use agent_relay::slack::RelayState;
use agent_relay::{AppError, Result};

/// Upper bound on waiting for in-flight turns after their agents were killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "Relay Slack conversations to an agent CLI", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the session data root from the config file.
    #[arg(long)]
    data_root: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-relay bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config_text = std::fs::read_to_string(&args.config)
        .map_err(|err| AppError::Config(format!("cannot read config: {err}")))?;
    let config_text = match &args.data_root {
        Some(root) => override_data_root(&config_text, root)?,
        None => config_text,
    };
    let mut config = GlobalConfig::from_toml_str(&config_text)?;
    config.load_credentials().await?;
    let config = Arc::new(config);
    info!(
        assistant = %config.assistant_name,
        data_root = %config.data_root.display(),
        streaming = config.streaming.enabled,
        "configuration loaded"
    );

    // ── Runtime and turn handling ───────────────────────
    let runtime = Arc::new(RuntimeContext::new());
    let handler = Arc::new(TurnHandler::from_config(&config, Arc::clone(&runtime)));
    let tracker = TaskTracker::new();

    // ── Slack ───────────────────────────────────────────
    let (slack, queue_task) = SlackService::start(&config.slack).map_err(|err| {
        error!(%err, "slack service start failed");
        err
    })?;
    let slack = Arc::new(slack);
    let state = Arc::new(RelayState {
        config: Arc::clone(&config),
        handler,
        slack: Arc::clone(&slack),
        tracker: tracker.clone(),
    });
    let socket_task = slack.spawn_socket_mode(Arc::clone(&state));
    let slack_runtime = SlackRuntime {
        queue_task,
        socket_task,
    };
    info!("agent-relay ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");

    // Kill agents and close the registry first; otherwise every in-flight or
    // queued turn holds shutdown for up to a full invocation timeout.
    let killed = runtime.processes.cancel_all();
    tracker.close();
    if tokio::time::timeout(SHUTDOWN_GRACE, tracker.wait()).await.is_err() {
        warn!(remaining = tracker.len(), "in-flight turns did not finish in time");
    }
    slack_runtime.abort();

    info!(killed, "agent-relay shut down");
    Ok(())
}

/// Replace `data_root` in the raw TOML before parsing, so validation sees
/// the effective value.
fn override_data_root(raw: &str, root: &std::path::Path) -> Result<String> {
    let mut table: toml::Table = raw.parse()?;
    table.insert(
        "data_root".into(),
        toml::Value::String(root.to_string_lossy().into_owned()),
    );
    toml::to_string(&table)
        .map_err(|err| AppError::Config(format!("failed to apply --data-root: {err}")))
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => builder
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}
