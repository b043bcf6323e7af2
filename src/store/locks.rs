//! Upload Lock Registry
//!
//! Process-wide mapping from logical file name to the session currently
//! uploading it. Acquire-or-fail semantics, no blocking waits; release is
//! tied to commit, rollback, or session teardown.
//! Uses parking_lot::Mutex which never poisons on panic.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{NetstoreError, Result};

/// Outcome of a successful lock acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// The lock was free and is now held by the caller
    New,
    /// The caller already held the lock (re-upload of a staged name)
    AlreadyHeld,
}

/// Process-wide upload lock registry
#[derive(Default)]
pub struct LockRegistry {
    /// name → owning session id
    locks: Mutex<HashMap<String, u64>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim `name` for `session`. Fails immediately with
    /// `LockContention` if another session holds it.
    pub fn try_acquire(&self, name: &str, session: u64) -> Result<Acquired> {
        let mut locks = self.locks.lock();
        match locks.get(name) {
            Some(&owner) if owner == session => Ok(Acquired::AlreadyHeld),
            Some(_) => Err(NetstoreError::LockContention(name.to_string())),
            None => {
                locks.insert(name.to_string(), session);
                Ok(Acquired::New)
            }
        }
    }

    /// Release `name` if (and only if) `session` owns it.
    pub fn release(&self, name: &str, session: u64) {
        let mut locks = self.locks.lock();
        if locks.get(name) == Some(&session) {
            locks.remove(name);
        }
    }

    /// Release every lock held by `session`.
    pub fn release_all(&self, session: u64) {
        let mut locks = self.locks.lock();
        locks.retain(|_, owner| *owner != session);
    }

    /// Number of currently held locks (for diagnostics and tests).
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
