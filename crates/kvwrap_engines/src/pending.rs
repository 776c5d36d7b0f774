//! Buffered transaction state shared by the engines.

use std::collections::{HashMap, HashSet};

/// Represents a pending write in a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingWrite {
    /// Insert or replace the value.
    Put {
        /// New value.
        value: Vec<u8>,
    },
    /// Remove the key.
    Delete,
}

impl PendingWrite {
    pub(crate) fn value(&self) -> Option<&[u8]> {
        match self {
            Self::Put { value } => Some(value),
            Self::Delete => None,
        }
    }
}

/// A committed value and the counter value of the change that wrote it.
#[derive(Debug, Clone)]
pub(crate) struct Versioned {
    pub(crate) value: Vec<u8>,
    pub(crate) version: u64,
}

/// Applies one committed write to a versioned map.
pub(crate) fn apply_write(
    records: &mut HashMap<Vec<u8>, Versioned>,
    key: Vec<u8>,
    write: Option<Vec<u8>>,
    version: u64,
) {
    match write {
        Some(value) => {
            records.insert(key, Versioned { value, version });
        }
        None => {
            records.remove(&key);
        }
    }
}

/// Writes buffered by an active transaction plus the versions it observed.
///
/// Versions are engine-defined counters attached to committed records. A
/// read records the version seen (`None` for absent); commit fails if any of
/// those versions changed in the meantime.
#[derive(Debug, Default)]
pub(crate) struct PendingTransaction {
    /// Pending writes: key -> write operation.
    writes: HashMap<Vec<u8>, PendingWrite>,
    /// Read set for conflict detection: key -> observed version.
    reads: HashMap<Vec<u8>, Option<u64>>,
}

impl PendingTransaction {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records a put operation.
    pub(crate) fn put(&mut self, key: &[u8], value: Vec<u8>) {
        self.writes
            .insert(key.to_vec(), PendingWrite::Put { value });
    }

    /// Records a delete operation.
    pub(crate) fn delete(&mut self, key: &[u8]) {
        self.writes.insert(key.to_vec(), PendingWrite::Delete);
    }

    /// Records the committed version a read observed.
    ///
    /// Only the first observation counts, and reads of keys this transaction
    /// already wrote are not tracked since they see the buffered value.
    pub(crate) fn record_read(&mut self, key: &[u8], observed: Option<u64>) {
        if !self.writes.contains_key(key) && !self.reads.contains_key(key) {
            self.reads.insert(key.to_vec(), observed);
        }
    }

    /// Gets the pending write for a key.
    pub(crate) fn get(&self, key: &[u8]) -> Option<&PendingWrite> {
        self.writes.get(key)
    }

    /// Applies the buffered writes to a set of committed keys.
    pub(crate) fn overlay_keys(&self, keys: &mut HashSet<Vec<u8>>) {
        for (key, write) in &self.writes {
            match write {
                PendingWrite::Put { .. } => {
                    keys.insert(key.clone());
                }
                PendingWrite::Delete => {
                    keys.remove(key);
                }
            }
        }
    }

    /// Returns the first read whose version no longer matches.
    pub(crate) fn first_conflict<F>(&self, current: F) -> Option<&[u8]>
    where
        F: Fn(&[u8]) -> Option<u64>,
    {
        self.reads
            .iter()
            .find(|(key, observed)| current(key) != **observed)
            .map(|(key, _)| key.as_slice())
    }

    /// Returns true if nothing was written.
    pub(crate) fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }

    /// Returns the number of pending writes.
    pub(crate) fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Consumes the transaction, yielding each key with its new value, or
    /// `None` for a delete.
    pub(crate) fn into_writes(self) -> impl Iterator<Item = (Vec<u8>, Option<Vec<u8>>)> {
        self.writes.into_iter().map(|(key, write)| {
            let value = match write {
                PendingWrite::Put { value } => Some(value),
                PendingWrite::Delete => None,
            };
            (key, value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_overwrites_previous() {
        let mut txn = PendingTransaction::new();
        txn.put(b"k", vec![1]);
        txn.put(b"k", vec![2]);

        assert_eq!(txn.write_count(), 1);
        assert_eq!(txn.get(b"k").and_then(PendingWrite::value), Some(&[2u8][..]));
    }

    #[test]
    fn delete_records_write() {
        let mut txn = PendingTransaction::new();
        txn.delete(b"k");
        assert!(matches!(txn.get(b"k"), Some(PendingWrite::Delete)));
        assert!(!txn.is_read_only());
    }

    #[test]
    fn reads_after_writes_are_not_tracked() {
        let mut txn = PendingTransaction::new();
        txn.put(b"k", vec![1]);
        txn.record_read(b"k", Some(3));
        assert!(txn.first_conflict(|_| Some(99)).is_none());
    }

    #[test]
    fn first_observation_wins() {
        let mut txn = PendingTransaction::new();
        txn.record_read(b"k", None);
        txn.record_read(b"k", Some(5));
        assert!(txn.first_conflict(|_| None).is_none());
        assert_eq!(txn.first_conflict(|_| Some(5)), Some(&b"k"[..]));
    }

    #[test]
    fn into_writes_maps_deletes_to_none() {
        let mut txn = PendingTransaction::new();
        txn.put(b"a", vec![1]);
        txn.delete(b"b");
        let mut writes: Vec<_> = txn.into_writes().collect();
        writes.sort();
        assert_eq!(
            writes,
            vec![(b"a".to_vec(), Some(vec![1])), (b"b".to_vec(), None)]
        );
    }

    #[test]
    fn apply_write_inserts_and_removes() {
        let mut records = HashMap::new();
        apply_write(&mut records, b"k".to_vec(), Some(vec![1]), 4);
        assert_eq!(records.get(&b"k"[..]).map(|v| v.version), Some(4));
        apply_write(&mut records, b"k".to_vec(), None, 5);
        assert!(records.is_empty());
    }

    #[test]
    fn overlay_adds_and_removes_keys() {
        let mut keys: HashSet<Vec<u8>> = [b"a".to_vec(), b"b".to_vec()].into_iter().collect();
        let mut txn = PendingTransaction::new();
        txn.delete(b"a");
        txn.put(b"c", vec![]);
        txn.overlay_keys(&mut keys);

        let mut sorted: Vec<_> = keys.into_iter().collect();
        sorted.sort();
        assert_eq!(sorted, vec![b"b".to_vec(), b"c".to_vec()]);
    }
}
