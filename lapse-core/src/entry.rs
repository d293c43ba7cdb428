use tokio::time::Instant;

/// Position of an entry inside the list arena
pub(crate) type EntryId = usize;

/// A key/value pair together with its deadline and list links
#[derive(Debug)]
pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    deadline: Instant,
    /// Changes on every push and refresh; never reused within a queue
    stamp: u64,
    pub(crate) prev: Option<EntryId>,
    pub(crate) next: Option<EntryId>,
}

/// Snapshot the driver takes of the head entry before it sleeps.
///
/// The driver retires the head only if the live entry still matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fingerprint {
    pub(crate) id: EntryId,
    pub(crate) stamp: u64,
    pub(crate) deadline: Instant,
}

impl<K, V> Entry<K, V> {
    /// Creates an unlinked entry
    pub(crate) fn new(key: K, value: V, deadline: Instant, stamp: u64) -> Self {
        Self {
            key,
            value,
            deadline,
            stamp,
            prev: None,
            next: None,
        }
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Moves the deadline and records a fresh stamp
    pub(crate) fn reschedule(&mut self, deadline: Instant, stamp: u64) {
        self.deadline = deadline;
        self.stamp = stamp;
    }

    pub(crate) fn fingerprint(&self, id: EntryId) -> Fingerprint {
        Fingerprint {
            id,
            stamp: self.stamp,
            deadline: self.deadline,
        }
    }

    /// Checks if the deadline has passed
    #[cfg(test)]
    pub(crate) fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}
