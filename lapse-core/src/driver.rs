//! Background expiration driver.
//!
//! At most one driver task runs per queue. It is spawned by the operation
//! that finds the driver [`DriverState::Idle`] with entries waiting, and it
//! switches back to idle, under the lock, the moment it finds the list empty.
//!
//! Each round it fingerprints the front entry, sleeps until that entry's
//! deadline without holding the lock, and then retires the entry only if the
//! front still carries the same fingerprint. A refresh, removal or
//! replacement in the meantime turns the round into a no-op and the driver
//! starts over.

use std::hash::Hash;
use std::sync::Arc;
use tokio::time::Instant;

use crate::queue::Shared;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DriverState {
    /// No driver task exists
    Idle,
    /// A driver task has been spawned and has not yet seen the queue empty
    Active,
}

/// Owned by the driver task; resets the queue to idle if the task dies early.
///
/// This covers a panicking expiry callback and a runtime that drops the task,
/// either mid-sleep or before its first poll. The next push then starts a new
/// driver instead of trusting a dead one.
pub(crate) struct DriverGuard<K, V> {
    shared: Arc<Shared<K, V>>,
    finished: bool,
}

impl<K, V> DriverGuard<K, V> {
    pub(crate) fn new(shared: Arc<Shared<K, V>>) -> Self {
        Self {
            shared,
            finished: false,
        }
    }
}

impl<K, V> Drop for DriverGuard<K, V> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if std::thread::panicking() {
            tracing::error!(
                queue = %self.shared.name,
                "expiry callback panicked, expiration driver stopped"
            );
        } else {
            tracing::debug!(
                queue = %self.shared.name,
                "expiration driver dropped before the queue drained"
            );
        }
        self.shared.state.lock().driver = DriverState::Idle;
    }
}

/// Driver loop; returns once the queue is empty
pub(crate) async fn run<K, V>(mut guard: DriverGuard<K, V>)
where
    K: Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    let shared = Arc::clone(&guard.shared);
    let mut retired: u64 = 0;

    loop {
        let target = {
            let mut state = shared.state.lock();
            match state.front_fingerprint() {
                Some(target) => target,
                None => {
                    state.driver = DriverState::Idle;
                    guard.finished = true;
                    tracing::debug!(queue = %shared.name, retired, "queue drained, expiration driver idle");
                    return;
                }
            }
        };

        if target.deadline > Instant::now() {
            tokio::time::sleep_until(target.deadline).await;
        }

        // Bind first so the lock is released before the callback runs
        let expired = shared.state.lock().retire(target);
        match expired {
            Some((key, value)) => {
                retired += 1;
                tracing::trace!(queue = %shared.name, "entry expired");
                (shared.on_expire)(key, value);
            }
            None => {
                tracing::trace!(queue = %shared.name, "front entry changed while sleeping, rescheduling");
            }
        }
    }
}
