//! Concurrency gate: global admission plus per-user serialization.
//!
//! Two layers:
//! 1. a bounded count of users being processed — new users beyond the cap
//!    get a transient "server busy" reply; users already being processed
//!    always re-enter,
//! 2. per-user FIFO serialization — a user's second message waits for the
//!    first turn to complete, because two concurrent agent turns could
//!    interleave writes to the same workspace.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::UserId;

// ─── Admission ───────────────────────────────────────────────────────────────

/// Outcome of the admission check.
pub enum Admission {
    /// Counted in; the permit releases the slot on drop.
    Admitted(AdmissionPermit),
    /// The cap is reached and this user is not already being processed.
    Busy,
}

/// RAII slot in the global admission counter.
pub struct AdmissionPermit {
    user_id: UserId,
    counts: Arc<StdMutex<HashMap<UserId, usize>>>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if let Ok(mut counts) = self.counts.lock()
            && let Some(n) = counts.get_mut(&self.user_id)
        {
            *n -= 1;
            if *n == 0 {
                counts.remove(&self.user_id);
            }
        }
    }
}

// ─── ConcurrencyGate ─────────────────────────────────────────────────────────

pub struct ConcurrencyGate {
    max_active: usize,
    counts: Arc<StdMutex<HashMap<UserId, usize>>>,
    locks: StdMutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl ConcurrencyGate {
    pub fn new(max_active: usize) -> Self {
        Self {
            max_active,
            counts: Arc::new(StdMutex::new(HashMap::new())),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Try to admit one request from `user_id`.
    ///
    /// A user already in the counter always re-enters (their requests then
    /// queue on the per-user lock); a new user is rejected at the cap.
    pub fn admit(&self, user_id: UserId) -> Admission {
        let Ok(mut counts) = self.counts.lock() else {
            return Admission::Busy;
        };

        if let Some(n) = counts.get_mut(&user_id) {
            *n += 1;
        } else {
            if counts.len() >= self.max_active {
                return Admission::Busy;
            }
            counts.insert(user_id, 1);
        }

        Admission::Admitted(AdmissionPermit {
            user_id,
            counts: Arc::clone(&self.counts),
        })
    }

    /// Acquire the user's serialization lock.  Requests from the same user
    /// are granted in arrival order (tokio's mutex is FIFO-fair).
    pub async fn acquire_user(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let Ok(mut locks) = self.locks.lock() else {
                // A poisoned registry only happens after a panic elsewhere;
                // fall back to a fresh lock rather than deadlock.
                return Arc::new(Mutex::new(())).lock_owned().await;
            };
            Arc::clone(locks.entry(user_id).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        let guard = lock.lock_owned().await;
        self.prune_idle_locks();
        guard
    }

    /// Number of users currently being processed.
    pub fn active_users(&self) -> usize {
        self.counts.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Drop per-user locks nobody holds or waits on.  Created on demand,
    /// destroyed when idle.
    fn prune_idle_locks(&self) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
