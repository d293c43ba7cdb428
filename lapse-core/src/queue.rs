use parking_lot::Mutex;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::config::QueueConfig;
use crate::driver::{self, DriverGuard, DriverState};
use crate::entry::{Entry, EntryId, Fingerprint};
use crate::error::QueueError;
use crate::list::EntryList;

#[cfg(test)]
use crate::error::ConsistencyError;

/// Longest TTL applied to an entry (~100 years); longer durations are capped
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

type ExpireFn<K, V> = Box<dyn Fn(K, V) + Send + Sync>;
type TtlFn = Box<dyn Fn() -> Duration + Send + Sync>;

/// State shared between queue handles and the expiration driver
pub(crate) struct Shared<K, V> {
    pub(crate) name: String,
    pub(crate) state: Mutex<State<K, V>>,
    pub(crate) on_expire: ExpireFn<K, V>,
    ttl: TtlFn,
    runtime: Handle,
}

/// Everything guarded by the queue lock
pub(crate) struct State<K, V> {
    list: EntryList<K, V>,
    index: HashMap<K, EntryId>,
    pub(crate) driver: DriverState,
    next_stamp: u64,
}

impl<K, V> State<K, V>
where
    K: Eq + Hash,
{
    fn stamp(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }

    pub(crate) fn front_fingerprint(&self) -> Option<Fingerprint> {
        let id = self.list.front()?;
        self.list.get(id).map(|entry| entry.fingerprint(id))
    }

    /// Removes the front entry if it still matches `target`
    pub(crate) fn retire(&mut self, target: Fingerprint) -> Option<(K, V)> {
        let id = self.list.front()?;
        let current = self.list.get(id)?.fingerprint(id);
        if current != target {
            return None;
        }
        let entry = self.list.take(id)?;
        self.index.remove(&entry.key);
        Some((entry.key, entry.value))
    }

    /// Marks the driver active if one is needed and none is running.
    ///
    /// Returns `true` when the caller must spawn it.
    fn claim_driver(&mut self) -> bool {
        if self.driver == DriverState::Idle && !self.list.is_empty() {
            self.driver = DriverState::Active;
            true
        } else {
            false
        }
    }
}

impl<K, V> Shared<K, V>
where
    K: Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    fn deadline(&self) -> Instant {
        Instant::now() + (self.ttl)().min(MAX_TTL)
    }

    fn spawn_driver(self: &Arc<Self>) {
        tracing::debug!(queue = %self.name, "starting expiration driver");
        let guard = DriverGuard::new(Arc::clone(self));
        self.runtime.spawn(driver::run(guard));
    }
}

/// Keyed time-to-live queue that calls back once per expired entry
///
/// Every entry expires `ttl()` after it was last pushed or refreshed. A single
/// background task, started by the first push into an empty queue, sleeps
/// until the earliest deadline, removes that entry, and hands its key and
/// value to the expiry callback. The task exits as soon as the queue is empty.
///
/// Entries expire in the order they were last pushed or refreshed. This is
/// also deadline order as long as the TTL provider never returns a shorter
/// duration than it did for an entry still in the queue. A constant TTL always
/// satisfies this.
///
/// Cloning the queue yields another handle to the same entries. While entries
/// remain, the driver keeps the queue alive, so pending entries still expire
/// after every handle has been dropped.
///
/// # Example
///
/// ```rust,no_run
/// use lapse_core::ExpiringQueue;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let sessions = ExpiringQueue::new(
///         |id: u64, user: String| println!("session {id} of {user} timed out"),
///         || Duration::from_secs(30),
///     );
///
///     sessions.push(7, "alice".to_string());
///     sessions.refresh(&7); // activity: another 30 seconds
///     assert_eq!(sessions.get(&7).as_deref(), Some("alice"));
///     assert!(sessions.remove(&7)); // logged out, callback never runs
/// }
/// ```
pub struct ExpiringQueue<K, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K, V> Clone for ExpiringQueue<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, V> ExpiringQueue<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    /// Creates a queue with default configuration
    ///
    /// `on_expire` receives each expired entry, outside the queue lock, so it
    /// may call back into the queue. `ttl` is called at every push and refresh
    /// to obtain the lifetime of the entry; it runs under the lock and must
    /// not touch the queue.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context. Use
    /// [`try_new`](Self::try_new) or supply a handle through
    /// [`QueueConfig::with_runtime`].
    pub fn new<F, T>(on_expire: F, ttl: T) -> Self
    where
        F: Fn(K, V) + Send + Sync + 'static,
        T: Fn() -> Duration + Send + Sync + 'static,
    {
        Self::with_config(QueueConfig::default(), on_expire, ttl)
    }

    /// Creates a queue with custom configuration
    ///
    /// # Panics
    ///
    /// Panics if the configuration carries no runtime handle and this is
    /// called outside of a Tokio runtime context.
    pub fn with_config<F, T>(config: QueueConfig, on_expire: F, ttl: T) -> Self
    where
        F: Fn(K, V) + Send + Sync + 'static,
        T: Fn() -> Duration + Send + Sync + 'static,
    {
        match Self::try_with_config(config, on_expire, ttl) {
            Ok(queue) => queue,
            Err(err) => panic!("{err}"),
        }
    }

    /// Like [`new`](Self::new), but reports a missing runtime as an error
    pub fn try_new<F, T>(on_expire: F, ttl: T) -> Result<Self, QueueError>
    where
        F: Fn(K, V) + Send + Sync + 'static,
        T: Fn() -> Duration + Send + Sync + 'static,
    {
        Self::try_with_config(QueueConfig::default(), on_expire, ttl)
    }

    /// Like [`with_config`](Self::with_config), but reports a missing runtime
    /// as an error
    pub fn try_with_config<F, T>(
        config: QueueConfig,
        on_expire: F,
        ttl: T,
    ) -> Result<Self, QueueError>
    where
        F: Fn(K, V) + Send + Sync + 'static,
        T: Fn() -> Duration + Send + Sync + 'static,
    {
        let runtime = match config.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| QueueError::NoRuntime)?,
        };

        let shared = Arc::new(Shared {
            name: config.name,
            state: Mutex::new(State {
                list: EntryList::new(),
                index: HashMap::new(),
                driver: DriverState::Idle,
                next_stamp: 0,
            }),
            on_expire: Box::new(on_expire),
            ttl: Box::new(ttl),
            runtime,
        });
        Ok(Self { shared })
    }

    /// Inserts an entry that expires `ttl()` from now
    ///
    /// An existing entry under the same key is replaced outright: its value is
    /// returned and its callback never runs.
    pub fn push(&self, key: K, value: V) -> Option<V> {
        let (replaced, spawn) = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let deadline = self.shared.deadline();
            let stamp = state.stamp();

            let replaced = state
                .index
                .remove(&key)
                .and_then(|id| state.list.take(id))
                .map(|entry| entry.value);

            let id = state
                .list
                .insert(Entry::new(key.clone(), value, deadline, stamp));
            state.index.insert(key, id);
            let was_empty = state.list.append(id);
            tracing::trace!(queue = %self.shared.name, was_empty, "entry pushed");

            (replaced, state.claim_driver())
        };

        if spawn {
            self.shared.spawn_driver();
        }
        replaced
    }

    /// Restarts an entry's lifetime and moves it behind every other entry
    ///
    /// Returns `false`, changing nothing, if the key is not present.
    pub fn refresh<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let spawn = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let Some(&id) = state.index.get(key) else {
                return false;
            };
            let deadline = self.shared.deadline();
            let stamp = state.stamp();

            state.list.unlink(id);
            if let Some(entry) = state.list.get_mut(id) {
                entry.reschedule(deadline, stamp);
            }
            state.list.append(id);
            state.claim_driver()
        };

        if spawn {
            self.shared.spawn_driver();
        }
        true
    }

    /// Returns a clone of the value stored under `key`
    ///
    /// Does not change the entry's deadline or position.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.get_with(key, V::clone)
    }

    /// Runs `f` on the value stored under `key`
    ///
    /// `f` runs while the queue is locked; it must not call back into the
    /// queue.
    pub fn get_with<Q, R>(&self, key: &Q, f: impl FnOnce(&V) -> R) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let state = self.shared.state.lock();
        let id = *state.index.get(key)?;
        state.list.get(id).map(|entry| f(&entry.value))
    }

    /// Removes an entry before it expires
    ///
    /// Returns `true` if the key was present. The callback never runs for a
    /// removed entry.
    #[must_use = "returns whether the key existed"]
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        match state.index.remove(key) {
            Some(id) => {
                state.list.take(id);
                true
            }
            None => false,
        }
    }

    /// Removes every entry without running the callback
    ///
    /// Returns the number of entries removed.
    pub fn clear(&self) -> usize {
        let mut state = self.shared.state.lock();
        state.index.clear();
        state.list.clear()
    }

    /// Returns `true` if the key is present
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shared.state.lock().index.contains_key(key)
    }

    /// Returns the time left before the entry under `key` expires
    pub fn remaining<Q>(&self, key: &Q) -> Option<Duration>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let state = self.shared.state.lock();
        let id = *state.index.get(key)?;
        state
            .list
            .get(id)
            .map(|entry| entry.deadline().saturating_duration_since(Instant::now()))
    }

    /// Returns the number of live entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().list.len()
    }

    /// Returns `true` if no entries remain
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().list.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn driver_state(&self) -> DriverState {
        self.shared.state.lock().driver
    }

    /// Validates the list structure and its agreement with the key index
    #[cfg(test)]
    pub(crate) fn check_consistency(&self) -> Result<(), ConsistencyError> {
        let state = self.shared.state.lock();
        state.list.check_consistency()?;

        let linked = state.list.ids().len();
        let indexed = state.index.len();
        let agrees = indexed == linked
            && state.index.iter().all(|(key, &id)| {
                state.list.get(id).is_some_and(|entry| entry.key == *key)
            });
        if agrees {
            Ok(())
        } else {
            Err(ConsistencyError::IndexMismatch { indexed, linked })
        }
    }

    #[cfg(test)]
    fn keys_in_order(&self) -> Vec<K> {
        let state = self.shared.state.lock();
        state
            .list
            .ids()
            .into_iter()
            .filter_map(|id| state.list.get(id).map(|entry| entry.key.clone()))
            .collect()
    }
}
