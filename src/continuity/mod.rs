//! Multi-turn continuity across stateless agent invocations.

pub mod manager;
pub mod prompt;

pub use manager::{ContinuityManager, ContinuitySettings};
pub use prompt::{compose_bootstrap_prompt, BootstrapContext, SECTION_DELIMITER};
