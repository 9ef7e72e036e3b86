//! Turn orchestration and session commands.

pub mod turn_handler;

pub use turn_handler::{StatusReport, TurnHandler};
