//! Locked record guard.

use crate::backend::RecordLock;
use crate::error::{DbError, DbResult};
use crate::types::StoreMode;
use std::fmt;

/// One key held under an exclusive lock.
///
/// A `Record` is the unit of mutation. It is only handed out while the
/// backend lock is held, and the lock is released when the record is
/// dropped or [`Record::release`]d, whichever comes first. Release consumes
/// the guard, so a released record cannot be used again.
///
/// The guard keeps the key's current value, including a missing value: a
/// record fetched for an absent key can still be stored into.
///
/// # Example
///
/// ```rust,ignore
/// let mut rec = db.fetch_locked(b"alice")?;
/// if rec.value().is_none() {
///     rec.store(b"pw1", StoreMode::Insert)?;
/// }
/// // lock released here
/// ```
pub struct Record<'db> {
    lock: Box<dyn RecordLock + 'db>,
    deleted: bool,
}

impl<'db> Record<'db> {
    pub(crate) fn new(lock: Box<dyn RecordLock + 'db>) -> Self {
        Self {
            lock,
            deleted: false,
        }
    }

    /// The locked key.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        self.lock.key()
    }

    /// The current value, `None` if the key is absent.
    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        self.lock.value()
    }

    /// Returns true if the key currently holds a value.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.lock.value().is_some()
    }

    /// Writes `data` under the record's key.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` for `StoreMode::Insert` when a value is present
    /// - any backend failure, unchanged
    pub fn store(&mut self, data: &[u8], mode: StoreMode) -> DbResult<()> {
        if mode == StoreMode::Insert && self.lock.value().is_some() {
            return Err(DbError::AlreadyExists);
        }
        self.lock.store(data)?;
        self.deleted = false;
        Ok(())
    }

    /// Removes the record's key.
    ///
    /// # Errors
    ///
    /// - `AlreadyDeleted` if this guard already deleted the key
    /// - `NotFound` if the key was absent when locked
    pub fn delete(&mut self) -> DbResult<()> {
        if self.deleted {
            return Err(DbError::AlreadyDeleted);
        }
        if self.lock.value().is_none() {
            return Err(DbError::NotFound);
        }
        self.lock.delete()?;
        self.deleted = true;
        Ok(())
    }

    /// Releases the lock now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for Record<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("key", &self.key())
            .field("value_len", &self.value().map(<[u8]>::len))
            .field("deleted", &self.deleted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeLock {
        key: Vec<u8>,
        value: Option<Vec<u8>>,
        writes: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
    }

    impl RecordLock for FakeLock {
        fn key(&self) -> &[u8] {
            &self.key
        }

        fn value(&self) -> Option<&[u8]> {
            self.value.as_deref()
        }

        fn store(&mut self, data: &[u8]) -> DbResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.value = Some(data.to_vec());
            Ok(())
        }

        fn delete(&mut self) -> DbResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.value = None;
            Ok(())
        }
    }

    impl Drop for FakeLock {
        fn drop(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn record(value: Option<&[u8]>) -> (Record<'static>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let writes = Arc::new(AtomicUsize::new(0));
        let releases = Arc::new(AtomicUsize::new(0));
        let lock = FakeLock {
            key: b"k".to_vec(),
            value: value.map(<[u8]>::to_vec),
            writes: Arc::clone(&writes),
            releases: Arc::clone(&releases),
        };
        (Record::new(Box::new(lock)), writes, releases)
    }

    #[test]
    fn insert_into_absent_key() {
        let (mut rec, writes, _) = record(None);
        rec.store(b"v", StoreMode::Insert).unwrap();
        assert_eq!(rec.value(), Some(&b"v"[..]));
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn insert_into_present_key_fails_without_writing() {
        let (mut rec, writes, _) = record(Some(b"old"));
        let result = rec.store(b"new", StoreMode::Insert);
        assert!(matches!(result, Err(DbError::AlreadyExists)));
        assert_eq!(rec.value(), Some(&b"old"[..]));
        assert_eq!(writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_value_counts_as_present() {
        let (mut rec, _, _) = record(Some(b""));
        assert!(rec.exists());
        let result = rec.store(b"x", StoreMode::Insert);
        assert!(matches!(result, Err(DbError::AlreadyExists)));
    }

    #[test]
    fn replace_overwrites() {
        let (mut rec, _, _) = record(Some(b"old"));
        rec.store(b"new", StoreMode::Replace).unwrap();
        assert_eq!(rec.value(), Some(&b"new"[..]));
    }

    #[test]
    fn double_delete_is_rejected() {
        let (mut rec, writes, _) = record(Some(b"v"));
        rec.delete().unwrap();
        assert!(matches!(rec.delete(), Err(DbError::AlreadyDeleted)));
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delete_absent_is_not_found() {
        let (mut rec, _, _) = record(None);
        assert!(matches!(rec.delete(), Err(DbError::NotFound)));
    }

    #[test]
    fn store_after_delete_recreates() {
        let (mut rec, _, _) = record(Some(b"v"));
        rec.delete().unwrap();
        rec.store(b"again", StoreMode::Insert).unwrap();
        rec.delete().unwrap();
    }

    #[test]
    fn release_runs_once() {
        let (rec, _, releases) = record(Some(b"v"));
        rec.release();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn early_return_releases() {
        fn fails(rec: Record<'_>) -> DbResult<()> {
            let _rec = rec;
            Err(DbError::NotFound)
        }

        let (rec, _, releases) = record(None);
        assert!(fails(rec).is_err());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
