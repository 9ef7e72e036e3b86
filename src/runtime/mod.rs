//! Shared runtime state: the session lock table and the process registry.
//!
//! These are the only shared mutable tables in the relay. They live on an
//! explicit [`RuntimeContext`] rather than in globals, so tests can run any
//! number of independent runtimes side by side.

pub mod process_registry;
pub mod session_locks;

pub use process_registry::{ProcessInfo, ProcessRegistry, Registration};
pub use session_locks::{LockAcquisition, PendingLock, SessionGuard, SessionLockTable};

/// Owner of the per-session lock table and process registry.
#[derive(Debug, Default)]
pub struct RuntimeContext {
    /// One turn slot per session.
    pub locks: SessionLockTable,
    /// Live agent processes, one per session at most.
    pub processes: ProcessRegistry,
}

impl RuntimeContext {
    /// Create a fresh context with empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
