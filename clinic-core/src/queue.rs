//! Ordering structure for waiting entries.
//!
//! Entries are keyed by `(priority, created_at, entry id)`: RED before YELLOW
//! before GREEN, first come first served inside a colour, and the entry id as
//! a stable last resort so equal timestamps still sort the same way on every
//! read. The structure is not synchronized; `ClinicPipeline` guards it.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{EntryId, Priority, QueueEntry};

/// Total-order sort key of a waiting entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueKey {
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub entry: EntryId,
}

impl QueueKey {
    pub fn of(entry: &QueueEntry) -> Self {
        Self {
            priority: entry.priority,
            created_at: entry.created_at,
            entry: entry.id,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct DispatchQueue {
    ordered: BTreeSet<QueueKey>,
    keys: HashMap<EntryId, QueueKey>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Inserts a key. An entry that is already queued is re-keyed instead of
    /// duplicated.
    pub fn enqueue(&mut self, key: QueueKey) {
        if let Some(previous) = self.keys.insert(key.entry, key) {
            self.ordered.remove(&previous);
        }
        self.ordered.insert(key);
    }

    /// Removes an entry from ordering consideration. Returns its last key.
    pub fn dequeue(&mut self, entry: EntryId) -> Option<QueueKey> {
        let key = self.keys.remove(&entry)?;
        self.ordered.remove(&key);
        Some(key)
    }

    pub fn first(&self) -> Option<QueueKey> {
        self.ordered.first().copied()
    }

    /// Moves one entry to its new rank. Only that entry's key changes, so the
    /// relative order of every other pair is untouched.
    pub fn update_priority(&mut self, entry: EntryId, priority: Priority) -> Option<QueueKey> {
        let current = self.keys.get_mut(&entry)?;
        let previous = *current;
        self.ordered.remove(&previous);
        current.priority = priority;
        let updated = *current;
        self.ordered.insert(updated);
        Some(updated)
    }

    /// Up to `limit` keys in dispatch order.
    pub fn peek_ordered(&self, limit: usize) -> Vec<QueueKey> {
        self.ordered.iter().take(limit).copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(priority: Priority, secs: i64, id: u64) -> QueueKey {
        QueueKey {
            priority,
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
            entry: EntryId(id),
        }
    }

    #[test]
    fn empty_queue_peeks_nothing() {
        let queue = DispatchQueue::new();
        assert!(queue.peek_ordered(10).is_empty());
        assert!(queue.first().is_none());
    }

    #[test]
    fn orders_by_priority_then_arrival_then_id() {
        let mut queue = DispatchQueue::new();
        queue.enqueue(key(Priority::GREEN, 0, 1));
        queue.enqueue(key(Priority::RED, 1, 2));
        queue.enqueue(key(Priority::GREEN, 0, 0));
        queue.enqueue(key(Priority::YELLOW, 5, 3));

        let order: Vec<u64> = queue.peek_ordered(10).iter().map(|k| k.entry.0).collect();
        assert_eq!(order, vec![2, 3, 0, 1]);
    }

    #[test]
    fn enqueue_twice_rekeys() {
        let mut queue = DispatchQueue::new();
        queue.enqueue(key(Priority::GREEN, 0, 1));
        queue.enqueue(key(Priority::RED, 0, 1));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek_ordered(5), vec![key(Priority::RED, 0, 1)]);
    }

    #[test]
    fn update_priority_keeps_arrival_time() {
        let mut queue = DispatchQueue::new();
        queue.enqueue(key(Priority::GREEN, 0, 1));
        queue.enqueue(key(Priority::GREEN, 1, 2));
        queue.enqueue(key(Priority::YELLOW, 2, 3));

        let updated = queue.update_priority(EntryId(2), Priority::YELLOW).unwrap();
        assert_eq!(updated, key(Priority::YELLOW, 1, 2));

        let order: Vec<u64> = queue.peek_ordered(10).iter().map(|k| k.entry.0).collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert!(queue.update_priority(EntryId(9), Priority::RED).is_none());
    }

    #[test]
    fn dequeue_removes_from_consideration() {
        let mut queue = DispatchQueue::new();
        queue.enqueue(key(Priority::YELLOW, 0, 1));
        queue.enqueue(key(Priority::RED, 3, 2));

        assert_eq!(queue.first().map(|k| k.entry), Some(EntryId(2)));
        assert_eq!(queue.dequeue(EntryId(2)).map(|k| k.entry), Some(EntryId(2)));
        assert_eq!(queue.first().map(|k| k.entry), Some(EntryId(1)));
        assert_eq!(queue.dequeue(EntryId(1)).map(|k| k.entry), Some(EntryId(1)));
        assert!(queue.dequeue(EntryId(1)).is_none());
        assert!(queue.is_empty());
    }
}
