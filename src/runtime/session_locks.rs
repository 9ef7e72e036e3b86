//! Per-session mutual exclusion.
//!
//! One `tokio::sync::Mutex` per [`SessionKey`]. Tokio's mutex queues
//! waiters in FIFO order, which gives same-session turns their ordering
//! guarantee; different keys never share a mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::models::session::SessionKey;

/// Keyed table of session locks.
#[derive(Debug, Default)]
pub struct SessionLockTable {
    locks: Mutex<HashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>>,
}

/// Proof that the holder owns a session's turn slot.
///
/// The slot is released when the guard is dropped, on every exit path
/// including errors, panics, and task cancellation.
#[derive(Debug)]
pub struct SessionGuard {
    key: SessionKey,
    _slot: OwnedMutexGuard<()>,
}

impl SessionGuard {
    /// Session this guard belongs to.
    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        debug!(session_key = %self.key, "session lock released");
    }
}

/// Result of a non-blocking acquisition attempt.
#[derive(Debug)]
pub enum LockAcquisition {
    /// The slot was free and is now held.
    Ready(SessionGuard),
    /// Another turn holds the slot; the caller should post a queued notice
    /// and then [`PendingLock::wait`].
    Contended(PendingLock),
}

/// A queued claim on a busy session slot.
#[derive(Debug)]
pub struct PendingLock {
    key: SessionKey,
    slot: Arc<tokio::sync::Mutex<()>>,
}

impl PendingLock {
    /// Wait in FIFO order until the slot is free.
    ///
    /// The queue position is taken on the first poll, so poll this before
    /// any other await on the same task.
    pub async fn wait(self) -> SessionGuard {
        let slot = self.slot.lock_owned().await;
        debug!(session_key = %self.key, "queued turn acquired session lock");
        SessionGuard {
            key: self.key,
            _slot: slot,
        }
    }
}

impl SessionLockTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the session slot without waiting.
    #[must_use]
    pub fn acquire(&self, key: &SessionKey) -> LockAcquisition {
        let slot = self.slot_for(key);
        match Arc::clone(&slot).try_lock_owned() {
            Ok(held) => LockAcquisition::Ready(SessionGuard {
                key: key.clone(),
                _slot: held,
            }),
            Err(_) => LockAcquisition::Contended(PendingLock {
                key: key.clone(),
                slot,
            }),
        }
    }

    /// Take the session slot, waiting if necessary.
    pub async fn lock(&self, key: &SessionKey) -> SessionGuard {
        match self.acquire(key) {
            LockAcquisition::Ready(guard) => guard,
            LockAcquisition::Contended(pending) => pending.wait().await,
        }
    }

    /// Whether a turn currently holds the session slot.
    #[must_use]
    pub fn is_locked(&self, key: &SessionKey) -> bool {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .get(key)
            .is_some_and(|slot| slot.try_lock().is_err())
    }

    fn slot_for(&self, key: &SessionKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.clone()).or_default())
    }
}
