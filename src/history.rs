//! Bounded broadcast history.
//!
//! Every completed fan-out leaves one record mapping the origin message to
//! its delivered copies. Moderation commands look messages up here to delete
//! or inspect them across all rooms. The ledger is capacity-bounded with
//! FIFO eviction and guarded by one coarse mutex.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::transport::{MessageRef, UserId};

/// Outcome of one fan-out: the origin and its successfully delivered copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastRecord {
    /// The message that was relayed.
    pub origin: MessageRef,
    /// Who authored the origin, when known.
    pub origin_author: Option<UserId>,
    /// References of the delivered copies, one per successful endpoint.
    pub copies: Vec<MessageRef>,
}

impl BroadcastRecord {
    /// Create a record.
    pub fn new(origin: MessageRef, origin_author: Option<UserId>, copies: Vec<MessageRef>) -> Self {
        Self {
            origin,
            origin_author,
            copies,
        }
    }

    /// Whether the reference is the origin or any of the copies.
    pub fn contains(&self, reference: &MessageRef) -> bool {
        self.origin == *reference || self.copies.iter().any(|c| c == reference)
    }
}

/// Capacity-bounded FIFO ledger of broadcast records.
#[derive(Debug)]
pub struct HistoryLedger {
    capacity: usize,
    records: Mutex<VecDeque<BroadcastRecord>>,
}

impl HistoryLedger {
    /// Create a ledger holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Append a record, evicting the oldest when full.
    pub fn append(&self, record: BroadcastRecord) {
        let mut records = self.records.lock().expect("history ledger poisoned");
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Find the newest record matching the predicate.
    pub fn find<F>(&self, predicate: F) -> Option<BroadcastRecord>
    where
        F: Fn(&BroadcastRecord) -> bool,
    {
        self.records
            .lock()
            .expect("history ledger poisoned")
            .iter()
            .rev()
            .find(|r| predicate(r))
            .cloned()
    }

    /// Find the record containing the given reference.
    pub fn find_containing(&self, reference: &MessageRef) -> Option<BroadcastRecord> {
        self.find(|r| r.contains(reference))
    }

    /// Remove and return the newest record matching the predicate.
    pub fn remove_matching<F>(&self, predicate: F) -> Option<BroadcastRecord>
    where
        F: Fn(&BroadcastRecord) -> bool,
    {
        let mut records = self.records.lock().expect("history ledger poisoned");
        let index = records.iter().rposition(|r| predicate(r))?;
        records.remove(index)
    }

    /// The newest `n` records, oldest of them first.
    pub fn recent(&self, n: usize) -> Vec<BroadcastRecord> {
        let records = self.records.lock().expect("history ledger poisoned");
        let skip = records.len().saturating_sub(n);
        records.iter().skip(skip).cloned().collect()
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.lock().expect("history ledger poisoned").len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MessageId, RoomId};

    fn reference(room: u64, message: u64) -> MessageRef {
        MessageRef::new(RoomId(room), MessageId(message))
    }

    fn record(origin: u64) -> BroadcastRecord {
        BroadcastRecord::new(
            reference(1, origin),
            Some(UserId(100)),
            vec![reference(2, origin + 1000), reference(3, origin + 2000)],
        )
    }

    #[test]
    fn test_contains_origin_and_copies() {
        let record = record(1);
        assert!(record.contains(&reference(1, 1)));
        assert!(record.contains(&reference(2, 1001)));
        assert!(record.contains(&reference(3, 2001)));
        assert!(!record.contains(&reference(4, 1)));
        assert!(!record.contains(&reference(1, 2)));
    }

    #[test]
    fn test_append_and_find() {
        let ledger = HistoryLedger::new(10);
        ledger.append(record(1));
        ledger.append(record(2));

        let found = ledger.find_containing(&reference(2, 1001)).unwrap();
        assert_eq!(found.origin, reference(1, 1));
        assert!(ledger.find_containing(&reference(9, 9)).is_none());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let ledger = HistoryLedger::new(3);
        for i in 0..4 {
            ledger.append(record(i));
        }

        assert_eq!(ledger.len(), 3);
        // the first record is gone
        assert!(ledger.find_containing(&reference(1, 0)).is_none());
        assert!(ledger.find_containing(&reference(1, 3)).is_some());
    }

    #[test]
    fn test_remove_matching() {
        let ledger = HistoryLedger::new(10);
        ledger.append(record(1));
        ledger.append(record(2));

        let removed = ledger.remove_matching(|r| r.contains(&reference(1, 1)));
        assert!(removed.is_some());
        assert_eq!(ledger.len(), 1);
        assert!(ledger.find_containing(&reference(1, 1)).is_none());
    }

    #[test]
    fn test_remove_matching_none() {
        let ledger = HistoryLedger::new(10);
        ledger.append(record(1));
        assert!(ledger.remove_matching(|r| r.contains(&reference(9, 9))).is_none());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_recent_returns_newest() {
        let ledger = HistoryLedger::new(10);
        for i in 0..5 {
            ledger.append(record(i));
        }

        let recent = ledger.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].origin, reference(1, 3));
        assert_eq!(recent[1].origin, reference(1, 4));

        assert_eq!(ledger.recent(100).len(), 5);
    }

    #[test]
    fn test_concurrent_append_and_read() {
        use std::sync::Arc;

        let ledger = Arc::new(HistoryLedger::new(100));
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        ledger.append(record(t * 1000 + i));
                        let _ = ledger.find(|r| r.copies.len() == 2);
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }

        // capacity bound holds under concurrency
        assert_eq!(ledger.len(), 100);
    }
}
