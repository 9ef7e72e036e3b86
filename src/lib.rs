#![forbid(unsafe_code)]

//! `agent-relay`: a chat relay that runs a reasoning agent CLI once per
//! conversational turn and delivers its answers to Slack.
//!
//! The core is the session runtime: per-session locks, a registry of live
//! agent processes, continuity across stateless invocations, and the
//! streaming delivery pipeline.

pub mod agent;
pub mod config;
pub mod continuity;
pub mod delivery;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod runtime;
pub mod slack;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
