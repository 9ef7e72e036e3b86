//! Registry of live agent processes, at most one per session key.
//!
//! The registry never owns the `Child` itself: the invocation that spawned
//! it keeps the handle so it can read output and reap the exit status.
//! What the registry owns is the kill switch, a [`CancellationToken`] the
//! invocation selects on. Firing it makes the invocation kill its child
//! immediately and surface [`AppError::Cancelled`](crate::AppError::Cancelled).
//!
//! [`cancel_all`](ProcessRegistry::cancel_all) also closes the registry:
//! turns that were queued behind a killed one cannot start a new agent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::models::session::SessionKey;
use crate::{AppError, Result};

#[derive(Debug)]
struct Entry {
    id: u64,
    pid: Option<u32>,
    started_at: Instant,
    kill: CancellationToken,
}

type Entries = Arc<Mutex<HashMap<SessionKey, Entry>>>;

/// Read-only view of a registered process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// OS process id, once the process has been spawned.
    pub pid: Option<u32>,
    /// Time since registration.
    pub running_for: Duration,
    /// Whether a kill has already been requested.
    pub kill_requested: bool,
}

/// Shared, cloneable process registry.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    entries: Entries,
    next_id: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

/// Registration held by a running invocation.
///
/// Dropping it deregisters the entry, but only if the entry is still the
/// one this registration created.
#[derive(Debug)]
pub struct Registration {
    key: SessionKey,
    id: u64,
    kill: CancellationToken,
    entries: Entries,
}

impl Registration {
    /// Record the OS pid once the child exists.
    pub fn set_pid(&self, pid: Option<u32>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(&self.key) {
            if entry.id == self.id {
                entry.pid = pid;
            }
        }
    }

    /// Resolves when the registry requests a forced kill.
    pub async fn killed(&self) {
        self.kill.cancelled().await;
    }

    /// Whether a forced kill has been requested.
    #[must_use]
    pub fn kill_requested(&self) -> bool {
        self.kill.is_cancelled()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            entries.remove(&self.key);
            debug!(session_key = %self.key, "process deregistered");
        }
    }
}

impl ProcessRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process slot for `key` before the process is spawned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyRunning` if the key already has a live entry,
    /// and `AppError::Cancelled` once [`cancel_all`](Self::cancel_all) has run.
    pub fn register(&self, key: &SessionKey) -> Result<Registration> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::Acquire) {
            debug!(session_key = %key, "registry closed, refusing new process");
            return Err(AppError::Cancelled);
        }
        if entries.contains_key(key) {
            return Err(AppError::AlreadyRunning(key.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let kill = CancellationToken::new();
        entries.insert(
            key.clone(),
            Entry {
                id,
                pid: None,
                started_at: Instant::now(),
                kill: kill.clone(),
            },
        );
        debug!(session_key = %key, "process registered");

        Ok(Registration {
            key: key.clone(),
            id,
            kill,
            entries: Arc::clone(&self.entries),
        })
    }

    /// Look up the live process for `key`.
    #[must_use]
    pub fn lookup(&self, key: &SessionKey) -> Option<ProcessInfo> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).map(|entry| ProcessInfo {
            pid: entry.pid,
            running_for: entry.started_at.elapsed(),
            kill_requested: entry.kill.is_cancelled(),
        })
    }

    /// Whether a process is registered for `key`.
    #[must_use]
    pub fn is_running(&self, key: &SessionKey) -> bool {
        self.lookup(key).is_some()
    }

    /// Drop the entry for `key` regardless of who registered it.
    ///
    /// The owning invocation is not killed; its registration simply stops
    /// being visible to [`cancel`](Self::cancel).
    pub fn deregister(&self, key: &SessionKey) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }

    /// Force-kill the process for `key`.
    ///
    /// Returns `true` if a process was found, `false` if there was nothing
    /// to cancel.
    #[must_use]
    pub fn cancel(&self, key: &SessionKey) -> bool {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(entry) => {
                entry.kill.cancel();
                info!(session_key = %key, pid = ?entry.pid, "agent process cancelled");
                true
            }
            None => false,
        }
    }

    /// Force-kill every tracked process and refuse all later registrations.
    /// Returns how many were signalled.
    ///
    /// Must run before shutdown waits on in-flight turns, otherwise the wait
    /// lasts up to a full invocation timeout.
    pub fn cancel_all(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        self.closed.store(true, Ordering::Release);
        for entry in entries.values() {
            entry.kill.cancel();
        }
        if !entries.is_empty() {
            info!(count = entries.len(), "cancelled all agent processes");
        }
        entries.len()
    }

    /// Whether [`cancel_all`](Self::cancel_all) has closed the registry.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of registered processes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no process is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
