//! Process-wide scheduling bookkeeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

/// Records whether every thread that requested realtime attributes was
/// actually started with them, and serializes thread creation.
///
/// Constructed once by the orchestrator and shared (by `Arc`) with every
/// [`ThreadHandle`](super::ThreadHandle). The degradation flag is monotonic:
/// once any handle falls back to standard scheduling it stays `false` for
/// the life of the registry.
#[derive(Debug)]
pub struct SchedulingRegistry {
    all_with_requested: AtomicBool,
    // Held by a starting handle from before pthread_create until the spawned
    // thread has captured its owner state. Only one handle may be mid-start
    // at a time.
    creation_lock: Mutex<()>,
}

impl SchedulingRegistry {
    /// Creates a registry with no degradations recorded.
    #[must_use]
    pub fn new() -> Self {
        Self {
            all_with_requested: AtomicBool::new(true),
            creation_lock: Mutex::new(()),
        }
    }

    /// True while every started thread received its requested attributes.
    #[must_use]
    pub fn all_started_with_requested_attributes(&self) -> bool {
        self.all_with_requested.load(Ordering::Relaxed)
    }

    /// Records that a handle's realtime request was not honored.
    pub fn record_degraded(&self) {
        self.all_with_requested.store(false, Ordering::Relaxed);
    }

    pub(crate) fn lock_creation(&self) -> MutexGuard<'_, ()> {
        self.creation_lock
            .lock()
            .expect("thread creation lock poisoned")
    }
}

impl Default for SchedulingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot rendezvous between a starting handle and its spawned thread.
///
/// The starting handle holds the registry's creation lock and waits on this
/// cell; the spawned thread confirms as its first action, after it has
/// captured a stable reference to its owner state. Only then does `start()`
/// release the creation lock, so no ownership transfer can race with the
/// spawned thread resolving its owner.
#[derive(Debug)]
pub(crate) struct StartHandoff {
    confirmed: Mutex<bool>,
    cv: Condvar,
}

impl StartHandoff {
    pub(crate) fn new() -> Self {
        Self {
            confirmed: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// Called by the spawned thread once its owner reference is captured.
    pub(crate) fn confirm(&self) {
        let mut confirmed = self.confirmed.lock().expect("start handoff poisoned");
        *confirmed = true;
        self.cv.notify_all();
    }

    /// Blocks the starting handle until the spawned thread confirms.
    pub(crate) fn wait(&self) {
        let mut confirmed = self.confirmed.lock().expect("start handoff poisoned");
        while !*confirmed {
            confirmed = self
                .cv
                .wait(confirmed)
                .expect("start handoff poisoned");
        }
    }
}
