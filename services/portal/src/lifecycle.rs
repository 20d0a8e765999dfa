//! Token lifecycle: one-shot expiry timer
//!
//! At most one timer is pending at a time. Scheduling cancels the previous
//! timer first, and every schedule or cancel bumps a generation counter so
//! that a timer which already woke up but lost the race against a cancel
//! does nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How a schedule request was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// A timer is pending for the deadline
    Armed,
    /// The deadline had already passed; the callback ran synchronously
    FiredImmediately,
    /// No async runtime was available to host the timer
    Unarmed,
}

#[derive(Debug)]
struct PendingExpiry {
    generation: u64,
    deadline: DateTime<Utc>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    pending: Option<PendingExpiry>,
}

impl Slot {
    fn abort_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }
}

/// Expiry timer owned by the session store
#[derive(Debug, Default)]
pub struct TokenLifecycle {
    slot: Arc<Mutex<Slot>>,
}

impl TokenLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `on_expire` once `deadline` is reached
    ///
    /// Any previously scheduled timer is cancelled first. When the deadline
    /// is not in the future `on_expire` runs before this call returns.
    pub fn schedule<F>(&self, deadline: DateTime<Utc>, on_expire: F) -> Schedule
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.slot.lock();
        slot.abort_pending();
        slot.generation += 1;
        let generation = slot.generation;

        let remaining = match (deadline - Utc::now()).to_std() {
            Ok(remaining) if !remaining.is_zero() => remaining,
            _ => {
                drop(slot);
                info!("Token already expired at {}, expiring now", deadline);
                on_expire();
                return Schedule::FiredImmediately;
            }
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                "No async runtime available, expiry at {} enforced lazily",
                deadline
            );
            return Schedule::Unarmed;
        };

        let shared = Arc::clone(&self.slot);
        let handle = runtime.spawn(async move {
            tokio::time::sleep(remaining).await;

            let current = {
                let mut slot = shared.lock();
                let current = slot
                    .pending
                    .as_ref()
                    .is_some_and(|p| p.generation == generation);
                if current {
                    // Detach; a running task is not aborted
                    slot.pending = None;
                }
                current
            };

            if current {
                info!("Token expired at {}", deadline);
                on_expire();
            } else {
                debug!("Stale expiry timer (generation {}) ignored", generation);
            }
        });

        slot.pending = Some(PendingExpiry {
            generation,
            deadline,
            handle,
        });
        debug!("Expiry timer armed for {} (in {:?})", deadline, remaining);

        Schedule::Armed
    }

    /// Cancel the pending timer, if any
    pub fn cancel(&self) {
        let mut slot = self.slot.lock();
        slot.generation += 1;
        if slot.abort_pending() {
            debug!("Expiry timer cancelled");
        }
    }

    /// Deadline of the pending timer
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.slot.lock().pending.as_ref().map(|p| p.deadline)
    }

    /// Whether a timer is pending
    pub fn is_armed(&self) -> bool {
        self.slot.lock().pending.is_some()
    }
}

impl Drop for TokenLifecycle {
    fn drop(&mut self) {
        self.slot.lock().abort_pending();
    }
}
