//! Ordered entry list.
//!
//! Entries live in a dense arena and are chained through `prev`/`next`
//! indices. The chain runs from the entry due first (`front`) to the one
//! pushed or refreshed last (`back`). Arena slots freed by [`EntryList::take`]
//! are recycled by later inserts.

use crate::entry::{Entry, EntryId};

#[cfg(test)]
use crate::error::ConsistencyError;

#[derive(Debug)]
pub(crate) struct EntryList<K, V> {
    slots: Vec<Option<Entry<K, V>>>,
    vacant: Vec<EntryId>,
    front: Option<EntryId>,
    back: Option<EntryId>,
    stored: usize,
}

impl<K, V> EntryList<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            front: None,
            back: None,
            stored: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.front.is_none()
    }

    /// Number of entries held in the arena
    pub(crate) fn len(&self) -> usize {
        self.stored
    }

    pub(crate) fn front(&self) -> Option<EntryId> {
        self.front
    }

    pub(crate) fn get(&self, id: EntryId) -> Option<&Entry<K, V>> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: EntryId) -> Option<&mut Entry<K, V>> {
        self.slots.get_mut(id).and_then(Option::as_mut)
    }

    /// Stores an entry without linking it
    pub(crate) fn insert(&mut self, entry: Entry<K, V>) -> EntryId {
        self.stored += 1;
        match self.vacant.pop() {
            Some(id) => {
                self.slots[id] = Some(entry);
                id
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        }
    }

    /// Links a stored entry at the back.
    ///
    /// Returns `true` if the list was empty beforehand.
    pub(crate) fn append(&mut self, id: EntryId) -> bool {
        let old_back = self.back;
        let Some(entry) = self.get_mut(id) else {
            return false;
        };
        debug_assert!(entry.prev.is_none() && entry.next.is_none());
        entry.prev = old_back;
        entry.next = None;

        self.back = Some(id);
        match old_back.and_then(|back| self.get_mut(back)) {
            Some(back) => {
                back.next = Some(id);
                false
            }
            None => {
                self.front = Some(id);
                true
            }
        }
    }

    /// Detaches an entry from the chain, leaving it stored.
    ///
    /// Unlinking an entry that is not linked is a no-op. Only the front has
    /// no `prev` while linked, so a missing `prev` on any other entry marks
    /// it as already detached.
    pub(crate) fn unlink(&mut self, id: EntryId) {
        if self.front == Some(id) {
            self.pop_front();
            return;
        }
        let Some(entry) = self.get_mut(id) else {
            return;
        };
        let Some(prev) = entry.prev.take() else {
            return;
        };
        let next = entry.next.take();

        if let Some(prev) = self.get_mut(prev) {
            prev.next = next;
        }
        match next {
            Some(next) => {
                if let Some(next) = self.get_mut(next) {
                    next.prev = Some(prev);
                }
            }
            None => self.back = Some(prev),
        }
    }

    /// Detaches the front entry and returns its id
    pub(crate) fn pop_front(&mut self) -> Option<EntryId> {
        let id = self.front?;
        let next = self.get_mut(id).and_then(|entry| {
            entry.prev = None;
            entry.next.take()
        });

        match next {
            Some(next) => {
                if let Some(entry) = self.get_mut(next) {
                    entry.prev = None;
                }
                self.front = Some(next);
            }
            None => {
                self.front = None;
                self.back = None;
            }
        }
        Some(id)
    }

    /// Unlinks an entry and releases its slot
    pub(crate) fn take(&mut self, id: EntryId) -> Option<Entry<K, V>> {
        self.unlink(id);
        let entry = self.slots.get_mut(id)?.take()?;
        self.vacant.push(id);
        self.stored -= 1;
        Some(entry)
    }

    /// Drops every entry and returns how many there were
    pub(crate) fn clear(&mut self) -> usize {
        let removed = self.stored;
        self.slots.clear();
        self.vacant.clear();
        self.front = None;
        self.back = None;
        self.stored = 0;
        removed
    }

    /// Ids from front to back
    #[cfg(test)]
    pub(crate) fn ids(&self) -> Vec<EntryId> {
        let mut ids = Vec::with_capacity(self.stored);
        let mut cursor = self.front;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.get(id).and_then(|entry| entry.next);
        }
        ids
    }

    /// Verifies the chain structure.
    ///
    /// Checks that `front` and `back` agree on emptiness, that a single
    /// entry has no links, and that walking backwards from `back` yields the
    /// exact reverse of walking forwards from `front`.
    #[cfg(test)]
    pub(crate) fn check_consistency(&self) -> Result<(), ConsistencyError> {
        let (front, back) = match (self.front, self.back) {
            (None, None) => {
                return if self.stored == 0 {
                    Ok(())
                } else {
                    Err(ConsistencyError::CountMismatch {
                        linked: 0,
                        stored: self.stored,
                    })
                };
            }
            (Some(front), Some(back)) => (front, back),
            _ => return Err(ConsistencyError::EmptinessMismatch),
        };

        let head = self.get(front).ok_or(ConsistencyError::BrokenSingleton)?;
        if head.next.is_none() {
            let tail_prev = self.get(back).map(|entry| entry.prev);
            if front != back || tail_prev != Some(None) || head.prev.is_some() {
                return Err(ConsistencyError::BrokenSingleton);
            }
            return self.check_count(1);
        }

        // A corrupted chain may loop; never walk further than the arena.
        let limit = self.slots.len();
        let forward = self.walk(front, limit, |entry| entry.next)?;
        let mut backward = self.walk(back, limit, |entry| entry.prev)?;
        backward.reverse();
        if forward != backward {
            return Err(ConsistencyError::TraversalMismatch);
        }
        self.check_count(forward.len())
    }

    #[cfg(test)]
    fn walk(
        &self,
        start: EntryId,
        limit: usize,
        step: impl Fn(&Entry<K, V>) -> Option<EntryId>,
    ) -> Result<Vec<EntryId>, ConsistencyError> {
        let mut ids = Vec::new();
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            if ids.len() == limit {
                return Err(ConsistencyError::TraversalMismatch);
            }
            let entry = self.get(id).ok_or(ConsistencyError::TraversalMismatch)?;
            ids.push(id);
            cursor = step(entry);
        }
        Ok(ids)
    }

    #[cfg(test)]
    fn check_count(&self, linked: usize) -> Result<(), ConsistencyError> {
        if linked == self.stored {
            Ok(())
        } else {
            Err(ConsistencyError::CountMismatch {
                linked,
                stored: self.stored,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn list_of(keys: &[u32]) -> (EntryList<u32, ()>, Vec<EntryId>) {
        let mut list = EntryList::new();
        let now = Instant::now();
        let ids = keys
            .iter()
            .map(|&key| {
                let id = list.insert(Entry::new(key, (), now, u64::from(key)));
                list.append(id);
                id
            })
            .collect();
        (list, ids)
    }

    fn keys(list: &EntryList<u32, ()>) -> Vec<u32> {
        list.ids()
            .into_iter()
            .map(|id| list.get(id).unwrap().key)
            .collect()
    }

    #[test]
    fn test_empty_list_is_consistent() {
        let list: EntryList<u32, ()> = EntryList::new();
        assert!(list.is_empty());
        assert_eq!(list.front(), None);
        list.check_consistency().unwrap();
    }

    #[test]
    fn test_append_reports_previous_emptiness() {
        let mut list = EntryList::new();
        let now = Instant::now();

        let first = list.insert(Entry::new(1, (), now, 1));
        assert!(list.append(first));
        list.check_consistency().unwrap();

        let second = list.insert(Entry::new(2, (), now, 2));
        assert!(!list.append(second));
        list.check_consistency().unwrap();

        assert_eq!(list.front(), Some(first));
        assert_eq!(keys(&list), vec![1, 2]);
    }

    #[test]
    fn test_unlink_middle_head_and_tail() {
        let (mut list, ids) = list_of(&[1, 2, 3, 4]);

        list.unlink(ids[1]);
        list.check_consistency().unwrap_err(); // detached entry is still stored
        assert_eq!(keys(&list), vec![1, 3, 4]);
        list.take(ids[1]);
        list.check_consistency().unwrap();

        list.take(ids[0]);
        list.check_consistency().unwrap();
        assert_eq!(keys(&list), vec![3, 4]);

        list.take(ids[3]);
        list.check_consistency().unwrap();
        assert_eq!(keys(&list), vec![3]);

        list.take(ids[2]);
        list.check_consistency().unwrap();
        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_unlink_twice_is_noop() {
        let (mut list, ids) = list_of(&[1, 2, 3]);

        list.unlink(ids[1]);
        list.unlink(ids[1]);
        assert_eq!(keys(&list), vec![1, 3]);

        // Former front keeps no links either
        list.unlink(ids[0]);
        list.unlink(ids[0]);
        assert_eq!(keys(&list), vec![3]);

        list.append(ids[1]);
        list.append(ids[0]);
        assert_eq!(keys(&list), vec![3, 2, 1]);
        list.check_consistency().unwrap();
    }

    #[test]
    fn test_unlink_sole_entry() {
        let (mut list, ids) = list_of(&[9]);

        list.unlink(ids[0]);
        assert!(list.is_empty());
        list.unlink(ids[0]);
        assert!(list.is_empty());

        assert!(list.append(ids[0]));
        list.check_consistency().unwrap();
    }

    #[test]
    fn test_pop_front() {
        let (mut list, ids) = list_of(&[1, 2]);

        assert_eq!(list.pop_front(), Some(ids[0]));
        assert_eq!(list.front(), Some(ids[1]));
        assert_eq!(list.get(ids[1]).unwrap().prev, None);
        assert_eq!(list.pop_front(), Some(ids[1]));
        assert_eq!(list.pop_front(), None);
    }

    #[test]
    fn test_take_recycles_slots() {
        let (mut list, ids) = list_of(&[1, 2]);

        let removed = list.take(ids[0]).unwrap();
        assert_eq!(removed.key, 1);
        assert!(list.take(ids[0]).is_none());

        let reused = list.insert(Entry::new(3, (), Instant::now(), 3));
        assert_eq!(reused, ids[0]);
        list.append(reused);
        assert_eq!(keys(&list), vec![2, 3]);
        list.check_consistency().unwrap();
    }

    #[test]
    fn test_clear() {
        let (mut list, _) = list_of(&[1, 2, 3]);
        assert_eq!(list.clear(), 3);
        assert!(list.is_empty());
        list.check_consistency().unwrap();
    }

    #[test]
    fn test_check_detects_broken_back_link() {
        let (mut list, ids) = list_of(&[1, 2, 3]);
        list.get_mut(ids[2]).unwrap().prev = Some(ids[0]);
        assert_eq!(
            list.check_consistency(),
            Err(ConsistencyError::TraversalMismatch)
        );
    }

    #[test]
    fn test_check_detects_emptiness_mismatch() {
        let (mut list, _) = list_of(&[1]);
        list.back = None;
        assert_eq!(
            list.check_consistency(),
            Err(ConsistencyError::EmptinessMismatch)
        );
    }
}
