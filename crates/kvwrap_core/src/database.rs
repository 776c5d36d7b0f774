//! Database facade.
//!
//! [`Database`] is the single entry point callers use. It is bound to one
//! backend instance and decides, once at construction, which optional
//! operations go to the backend and which to the fallback layer.

use crate::backend::Backend;
use crate::config::Config;
use crate::error::{DbError, DbResult};
use crate::fallback;
use crate::record::Record;
use crate::transaction::{TransactionCoordinator, TransactionState};
use crate::traverse;
use crate::types::{Capabilities, LockMode, SequenceNumber, StoreMode, TraverseControl};
use std::fmt;
use tracing::{debug, warn};

/// Where an optional operation is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The backend's own implementation.
    Native,
    /// Synthesized from the mandatory primitives.
    Fallback,
}

impl Dispatch {
    fn pick(capabilities: Capabilities, flag: Capabilities) -> Self {
        if capabilities.contains(flag) {
            Self::Native
        } else {
            Self::Fallback
        }
    }
}

/// Per-operation dispatch decided at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTable {
    /// Lockless fetch.
    pub fetch: Dispatch,
    /// Read-only traversal.
    pub traverse_read: Dispatch,
    /// Record inspection.
    pub parse_record: Dispatch,
    /// Existence check.
    pub exists: Dispatch,
    /// Wipe.
    pub wipe: Dispatch,
}

impl DispatchTable {
    /// Builds the table for a backend's capability set.
    #[must_use]
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            fetch: Dispatch::pick(capabilities, Capabilities::FETCH),
            traverse_read: Dispatch::pick(capabilities, Capabilities::TRAVERSE_READ),
            parse_record: Dispatch::pick(capabilities, Capabilities::PARSE_RECORD),
            exists: Dispatch::pick(capabilities, Capabilities::EXISTS),
            wipe: Dispatch::pick(capabilities, Capabilities::WIPE),
        }
    }
}

/// A handle on one opened backend.
///
/// The handle is also one transaction context: a transaction started here
/// buffers every mutation made through this handle, and only through it.
///
/// # Locking
///
/// A caller must never hold two records for the same key within one call
/// chain; the second acquisition would wait on the first forever. This
/// includes calling the fallback `fetch`, `parse_record`, `exists`,
/// `traverse_read` or `wipe` while holding a record, since those take record
/// locks internally.
///
/// # Example
///
/// ```rust,ignore
/// let db = Database::open(backend, &Config::default())?;
/// db.store(b"alice", b"pw1", StoreMode::Replace)?;
/// assert_eq!(db.fetch(b"alice")?, Some(b"pw1".to_vec()));
/// ```
pub struct Database {
    backend: Box<dyn Backend>,
    dispatch: DispatchTable,
    capabilities: Capabilities,
    lock_mode: LockMode,
    persistent: bool,
    transactions: TransactionCoordinator,
}

impl Database {
    /// Opens a facade over `backend`.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` if `config` asks for non-blocking locks and the
    /// backend cannot provide them.
    pub fn open(backend: impl Backend + 'static, config: &Config) -> DbResult<Self> {
        Self::from_boxed(Box::new(backend), config)
    }

    /// Opens a facade over an already boxed backend.
    ///
    /// # Errors
    ///
    /// See [`Database::open`].
    pub fn from_boxed(backend: Box<dyn Backend>, config: &Config) -> DbResult<Self> {
        let capabilities = backend.capabilities();
        if config.lock_mode == LockMode::NonBlocking
            && !capabilities.contains(Capabilities::NONBLOCKING_LOCK)
        {
            return Err(DbError::unsupported("nonblocking_lock"));
        }

        let dispatch = DispatchTable::new(capabilities);
        let persistent = backend.is_persistent();
        debug!(
            backend = backend.name(),
            capabilities = %capabilities,
            persistent,
            "database opened"
        );

        Ok(Self {
            backend,
            dispatch,
            capabilities,
            lock_mode: config.lock_mode,
            persistent,
            transactions: TransactionCoordinator::new(),
        })
    }

    /// Opens a facade with blocking locks.
    #[must_use]
    pub fn new(backend: impl Backend + 'static) -> Self {
        let capabilities = backend.capabilities();
        let persistent = backend.is_persistent();
        Self {
            backend: Box::new(backend),
            dispatch: DispatchTable::new(capabilities),
            capabilities,
            lock_mode: LockMode::Blocking,
            persistent,
            transactions: TransactionCoordinator::new(),
        }
    }

    /// Name of the backend engine.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Whether data survives the process.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Optional operations the backend serves natively.
    #[must_use]
    pub fn get_flags(&self) -> Capabilities {
        self.capabilities
    }

    /// The native/fallback decision for each optional operation.
    #[must_use]
    pub fn dispatch(&self) -> DispatchTable {
        self.dispatch
    }

    /// Lock mode used by [`Database::fetch_locked`].
    #[must_use]
    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    /// Current transaction state of this handle.
    #[must_use]
    pub fn transaction_state(&self) -> TransactionState {
        self.transactions.state()
    }

    pub(crate) fn lock_record(&self, key: &[u8], mode: LockMode) -> DbResult<Record<'_>> {
        let lock = self.backend.fetch_locked(key, mode)?;
        Ok(Record::new(lock))
    }

    /// Locks `key` and returns its record.
    ///
    /// Waits for the lock unless the handle was opened with
    /// `LockMode::NonBlocking`, in which case a held lock fails with
    /// `WouldBlock`. An absent key still yields a record that can be stored.
    pub fn fetch_locked(&self, key: &[u8]) -> DbResult<Record<'_>> {
        self.lock_record(key, self.lock_mode)
    }

    /// Attempts to lock `key` without waiting.
    ///
    /// # Errors
    ///
    /// - `WouldBlock` if another holder has the lock
    /// - `Unsupported` if the backend has no non-blocking mode
    pub fn try_fetch_locked(&self, key: &[u8]) -> DbResult<Record<'_>> {
        if !self.capabilities.contains(Capabilities::NONBLOCKING_LOCK) {
            return Err(DbError::unsupported("nonblocking_lock"));
        }
        self.lock_record(key, LockMode::NonBlocking)
    }

    /// Reads the committed value of `key` without holding its lock afterwards.
    pub fn fetch(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        match self.dispatch.fetch {
            Dispatch::Native => self.backend.fetch(key),
            Dispatch::Fallback => fallback::fetch(self, key),
        }
    }

    /// Checks whether `key` holds a value.
    pub fn exists(&self, key: &[u8]) -> DbResult<bool> {
        match self.dispatch.exists {
            Dispatch::Native => self.backend.exists(key),
            Dispatch::Fallback => fallback::exists(self, key),
        }
    }

    /// Passes key and value to `inspector` and returns its result.
    ///
    /// The borrowed value is only valid during the call. Native inspection
    /// may run with backend-internal state locked, so the inspector must not
    /// call back into the database.
    ///
    /// # Errors
    ///
    /// `NotFound` if the key is absent.
    pub fn parse_record<R, F>(&self, key: &[u8], inspector: F) -> DbResult<R>
    where
        F: FnOnce(&[u8], &[u8]) -> R,
    {
        match self.dispatch.parse_record {
            Dispatch::Native => {
                let mut inspector = Some(inspector);
                let mut output = None;
                self.backend.parse_record(key, &mut |k, v| {
                    if let Some(inspect) = inspector.take() {
                        output = Some(inspect(k, v));
                    }
                })?;
                output.ok_or_else(|| DbError::invalid_state("backend skipped the inspector"))
            }
            Dispatch::Fallback => fallback::parse_record(self, key, inspector),
        }
    }

    /// Returns the change counter.
    pub fn get_seqnum(&self) -> DbResult<SequenceNumber> {
        self.backend.seqnum()
    }

    /// Starts buffering this handle's mutations.
    ///
    /// # Errors
    ///
    /// `InvalidState` if a transaction is already active.
    pub fn transaction_start(&self) -> DbResult<()> {
        self.transactions.start(self.backend.as_ref())
    }

    /// Applies this handle's buffered mutations atomically.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if no transaction is active
    /// - `TransactionConflict` if data read by the transaction changed; the
    ///   whole transaction must be retried
    pub fn transaction_commit(&self) -> DbResult<()> {
        self.transactions.commit(self.backend.as_ref())
    }

    /// Discards this handle's buffered mutations.
    ///
    /// # Errors
    ///
    /// `InvalidState` if no transaction is active.
    pub fn transaction_cancel(&self) -> DbResult<()> {
        self.transactions.cancel(self.backend.as_ref())
    }

    /// Visits every record under its lock.
    ///
    /// The callback may store into or delete the record it is given. Returns
    /// the number of records visited. Order is unspecified.
    pub fn traverse<F>(&self, callback: F) -> DbResult<usize>
    where
        F: FnMut(&mut Record<'_>) -> DbResult<TraverseControl>,
    {
        traverse::traverse_locked(self.backend.as_ref(), LockMode::Blocking, callback)
    }

    /// Locked traversal that skips records whose lock is held.
    pub(crate) fn traverse_unheld<F>(&self, callback: F) -> DbResult<usize>
    where
        F: FnMut(&mut Record<'_>) -> DbResult<TraverseControl>,
    {
        traverse::traverse_locked(self.backend.as_ref(), LockMode::NonBlocking, callback)
    }

    /// Visits every record without locking.
    ///
    /// Each key is seen at most once per pass. Returns the number of records
    /// visited.
    pub fn traverse_read<F>(&self, callback: F) -> DbResult<usize>
    where
        F: FnMut(&[u8], &[u8]) -> DbResult<TraverseControl>,
    {
        match self.dispatch.traverse_read {
            Dispatch::Native => traverse::traverse_unlocked(self.backend.as_ref(), callback),
            Dispatch::Fallback => fallback::traverse_read(self, callback),
        }
    }

    /// Removes every record.
    pub fn wipe(&self) -> DbResult<()> {
        match self.dispatch.wipe {
            Dispatch::Native => self.backend.wipe(),
            Dispatch::Fallback => fallback::wipe(self),
        }
    }

    /// Locks `key`, stores `data`, and releases.
    ///
    /// Waits for the lock the way [`Database::fetch_locked`] does, so a
    /// non-blocking handle fails with `WouldBlock` on a held record.
    pub fn store(&self, key: &[u8], data: &[u8], mode: StoreMode) -> DbResult<()> {
        let mut record = self.lock_record(key, self.lock_mode)?;
        record.store(data, mode)
    }

    /// Locks `key`, deletes it, and releases.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the key is absent
    /// - `WouldBlock` on a non-blocking handle if the record is held
    pub fn delete(&self, key: &[u8]) -> DbResult<()> {
        let mut record = self.lock_record(key, self.lock_mode)?;
        record.delete()
    }

    /// Reads a little-endian `u32` record.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the key is absent
    /// - `InvalidValue` if the value is not exactly four bytes
    pub fn fetch_u32(&self, key: &[u8]) -> DbResult<u32> {
        let value = self.fetch(key)?.ok_or(DbError::NotFound)?;
        decode_u32(&value)
    }

    /// Stores `value` as a little-endian `u32` record.
    pub fn store_u32(&self, key: &[u8], value: u32) -> DbResult<()> {
        self.store(key, &value.to_le_bytes(), StoreMode::Replace)
    }

    /// Adds `delta` to a `u32` record under its lock and returns the new value.
    ///
    /// An absent record counts as zero. Arithmetic wraps.
    pub fn change_u32_atomic(&self, key: &[u8], delta: i32) -> DbResult<u32> {
        let mut record = self.lock_record(key, self.lock_mode)?;
        let current = match record.value() {
            Some(bytes) => decode_u32(bytes)?,
            None => 0,
        };
        let updated = current.wrapping_add_signed(delta);
        record.store(&updated.to_le_bytes(), StoreMode::Replace)?;
        Ok(updated)
    }

    /// Runs `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`, cancels when it returns `Err` and hands
    /// that error back. Nothing is retried.
    pub fn transaction<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&Self) -> DbResult<T>,
    {
        self.transaction_start()?;
        match f(self) {
            Ok(value) => {
                self.transaction_commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(cancel_err) = self.transaction_cancel() {
                    warn!(error = %cancel_err, "cancel after failed transaction body failed");
                }
                Err(err)
            }
        }
    }

    /// Stores one record inside its own transaction.
    pub fn trans_store(&self, key: &[u8], data: &[u8], mode: StoreMode) -> DbResult<()> {
        self.transaction(|db| db.store(key, data, mode))
    }
}

fn decode_u32(bytes: &[u8]) -> DbResult<u32> {
    let raw: [u8; 4] = bytes.try_into().map_err(|_| {
        DbError::invalid_value(format!("expected 4 bytes, found {}", bytes.len()))
    })?;
    Ok(u32::from_le_bytes(raw))
}

impl Drop for Database {
    fn drop(&mut self) {
        self.transactions.abandon(self.backend.as_ref());
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("backend", &self.backend.name())
            .field("capabilities", &self.capabilities)
            .field("lock_mode", &self.lock_mode)
            .field("persistent", &self.persistent)
            .field("transaction", &self.transactions.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SharedMap, SimpleBackend};
    use std::sync::Arc;

    fn fallback_db() -> Database {
        Database::new(SimpleBackend::new(SharedMap::new()))
    }

    fn native_db() -> (Database, Arc<SharedMap>) {
        let shared = SharedMap::new();
        let backend = SimpleBackend::new(Arc::clone(&shared)).with_native(Capabilities::all());
        (Database::new(backend), shared)
    }

    #[test]
    fn dispatch_follows_capabilities() {
        let table = DispatchTable::new(Capabilities::FETCH | Capabilities::WIPE);
        assert_eq!(table.fetch, Dispatch::Native);
        assert_eq!(table.wipe, Dispatch::Native);
        assert_eq!(table.exists, Dispatch::Fallback);
        assert_eq!(table.parse_record, Dispatch::Fallback);
        assert_eq!(table.traverse_read, Dispatch::Fallback);
    }

    #[test]
    fn store_then_fetch_through_fallback() {
        let db = fallback_db();
        db.store(b"alice", b"pw1", StoreMode::Replace).unwrap();
        assert_eq!(db.fetch(b"alice").unwrap(), Some(b"pw1".to_vec()));
        assert!(db.exists(b"alice").unwrap());
        assert!(!db.exists(b"bob").unwrap());
    }

    #[test]
    fn native_paths_are_used_when_declared() {
        let (db, shared) = native_db();
        db.store(b"k", b"v", StoreMode::Replace).unwrap();
        let before = shared.native_calls();
        assert_eq!(db.fetch(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(db.exists(b"k").unwrap());
        assert_eq!(shared.native_calls(), before + 2);
    }

    #[test]
    fn alice_scenario() {
        let db = fallback_db();
        db.store(b"alice", b"pw1", StoreMode::Replace).unwrap();
        assert_eq!(db.fetch(b"alice").unwrap().as_deref(), Some(&b"pw1"[..]));
        db.store(b"alice", b"pw2", StoreMode::Replace).unwrap();
        assert_eq!(db.fetch(b"alice").unwrap().as_deref(), Some(&b"pw2"[..]));
        let result = db.store(b"alice", b"pw3", StoreMode::Insert);
        assert!(matches!(result, Err(DbError::AlreadyExists)));
        assert_eq!(db.fetch(b"alice").unwrap().as_deref(), Some(&b"pw2"[..]));
    }

    #[test]
    fn delete_then_fetch_is_absent() {
        let db = fallback_db();
        db.store(b"k", b"v", StoreMode::Insert).unwrap();
        db.delete(b"k").unwrap();
        assert_eq!(db.fetch(b"k").unwrap(), None);
        assert!(matches!(db.delete(b"k"), Err(DbError::NotFound)));
        assert!(matches!(
            db.parse_record(b"k", |_, _| ()),
            Err(DbError::NotFound)
        ));
    }

    #[test]
    fn parse_record_sees_key_and_value() {
        let db = fallback_db();
        db.store(b"zone", b"data", StoreMode::Replace).unwrap();
        let len = db
            .parse_record(b"zone", |key, value| {
                assert_eq!(key, b"zone");
                value.len()
            })
            .unwrap();
        assert_eq!(len, 4);
    }

    #[test]
    fn wipe_through_fallback_empties_and_bumps_seqnum() {
        let db = fallback_db();
        db.store(b"a", b"1", StoreMode::Insert).unwrap();
        db.store(b"b", b"2", StoreMode::Insert).unwrap();
        let before = db.get_seqnum().unwrap();
        db.wipe().unwrap();
        assert!(db.get_seqnum().unwrap() > before);
        assert_eq!(db.traverse(|_| Ok(TraverseControl::Continue)).unwrap(), 0);
        assert_eq!(db.fetch(b"a").unwrap(), None);
    }

    #[test]
    fn traverse_stops_immediately() {
        let db = fallback_db();
        for i in 0..10u8 {
            db.store(&[i], b"v", StoreMode::Insert).unwrap();
        }
        let mut seen = 0;
        let count = db
            .traverse(|_| {
                seen += 1;
                Ok(if seen == 3 {
                    TraverseControl::Stop
                } else {
                    TraverseControl::Continue
                })
            })
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(seen, 3);
    }

    #[test]
    fn traverse_read_fallback_counts_and_stops() {
        let db = fallback_db();
        for i in 0..5u8 {
            db.store(&[i], &[i, i], StoreMode::Insert).unwrap();
        }
        let mut keys = Vec::new();
        let count = db
            .traverse_read(|key, value| {
                assert_eq!(value, &[key[0], key[0]]);
                keys.push(key.to_vec());
                Ok(TraverseControl::Continue)
            })
            .unwrap();
        assert_eq!(count, 5);
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 5);

        let stopped = db
            .traverse_read(|_, _| Ok(TraverseControl::Stop))
            .unwrap();
        assert_eq!(stopped, 1);
    }

    #[test]
    fn traverse_callback_error_propagates() {
        let db = fallback_db();
        db.store(b"a", b"1", StoreMode::Insert).unwrap();
        let result = db.traverse(|_| Err(DbError::invalid_value("boom")));
        assert!(matches!(result, Err(DbError::InvalidValue { .. })));
        // The record lock was released on the error path.
        db.store(b"a", b"2", StoreMode::Replace).unwrap();
    }

    #[test]
    fn nested_transaction_is_rejected() {
        let db = fallback_db();
        db.transaction_start().unwrap();
        assert!(matches!(
            db.transaction_start(),
            Err(DbError::InvalidState { .. })
        ));
        assert_eq!(db.transaction_state(), TransactionState::Active);
        db.transaction_cancel().unwrap();
        assert_eq!(db.transaction_state(), TransactionState::Idle);
    }

    #[test]
    fn commit_and_cancel_require_active_transaction() {
        let db = fallback_db();
        assert!(matches!(
            db.transaction_commit(),
            Err(DbError::InvalidState { .. })
        ));
        assert!(matches!(
            db.transaction_cancel(),
            Err(DbError::InvalidState { .. })
        ));
    }

    #[test]
    fn cancel_restores_previous_state() {
        let db = fallback_db();
        db.store(b"k", b"old", StoreMode::Replace).unwrap();
        let seq = db.get_seqnum().unwrap();

        db.transaction_start().unwrap();
        db.store(b"k", b"new", StoreMode::Replace).unwrap();
        db.store(b"fresh", b"x", StoreMode::Insert).unwrap();
        db.transaction_cancel().unwrap();

        assert_eq!(db.fetch(b"k").unwrap(), Some(b"old".to_vec()));
        assert_eq!(db.fetch(b"fresh").unwrap(), None);
        assert_eq!(db.get_seqnum().unwrap(), seq);
    }

    #[test]
    fn transaction_writes_are_invisible_to_other_handles() {
        let shared = SharedMap::new();
        let writer = Database::new(SimpleBackend::new(Arc::clone(&shared)));
        let reader = Database::new(SimpleBackend::new(Arc::clone(&shared)));

        writer.transaction_start().unwrap();
        writer.store(b"k", b"v", StoreMode::Replace).unwrap();
        assert_eq!(writer.fetch(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(reader.fetch(b"k").unwrap(), None);

        writer.transaction_commit().unwrap();
        assert_eq!(reader.fetch(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn transaction_helper_commits_or_cancels() {
        let db = fallback_db();
        db.transaction(|db| db.store(b"a", b"1", StoreMode::Insert))
            .unwrap();
        assert_eq!(db.fetch(b"a").unwrap(), Some(b"1".to_vec()));

        let result: DbResult<()> = db.transaction(|db| {
            db.store(b"b", b"2", StoreMode::Insert)?;
            Err(DbError::invalid_value("abort"))
        });
        assert!(result.is_err());
        assert_eq!(db.fetch(b"b").unwrap(), None);
        assert_eq!(db.transaction_state(), TransactionState::Idle);
    }

    #[test]
    fn trans_store_applies() {
        let db = fallback_db();
        db.trans_store(b"k", b"v", StoreMode::Insert).unwrap();
        assert_eq!(db.fetch(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn dropping_handle_cancels_transaction() {
        let shared = SharedMap::new();
        {
            let db = Database::new(SimpleBackend::new(Arc::clone(&shared)));
            db.transaction_start().unwrap();
            db.store(b"k", b"v", StoreMode::Replace).unwrap();
        }
        let db = Database::new(SimpleBackend::new(shared));
        assert_eq!(db.fetch(b"k").unwrap(), None);
    }

    #[test]
    fn u32_helpers() {
        let db = fallback_db();
        assert!(matches!(db.fetch_u32(b"n"), Err(DbError::NotFound)));
        assert_eq!(db.change_u32_atomic(b"n", 5).unwrap(), 5);
        assert_eq!(db.change_u32_atomic(b"n", -2).unwrap(), 3);
        db.store_u32(b"m", 7).unwrap();
        assert_eq!(db.fetch_u32(b"m").unwrap(), 7);

        db.store(b"bad", b"xyz", StoreMode::Replace).unwrap();
        assert!(matches!(
            db.fetch_u32(b"bad"),
            Err(DbError::InvalidValue { .. })
        ));
        assert!(matches!(
            db.change_u32_atomic(b"bad", 1),
            Err(DbError::InvalidValue { .. })
        ));
    }

    #[test]
    fn nonblocking_requires_capability() {
        let db = fallback_db();
        assert!(matches!(
            db.try_fetch_locked(b"k"),
            Err(DbError::Unsupported { .. })
        ));

        let config = Config::new().lock_mode(LockMode::NonBlocking);
        let result = Database::open(SimpleBackend::new(SharedMap::new()), &config);
        assert!(matches!(result, Err(DbError::Unsupported { .. })));
    }

    #[test]
    fn nonblocking_lock_reports_would_block() {
        let shared = SharedMap::new();
        let config = Config::new().lock_mode(LockMode::NonBlocking);
        let backend = || {
            SimpleBackend::new(Arc::clone(&shared)).with_native(Capabilities::NONBLOCKING_LOCK)
        };
        let first = Database::open(backend(), &config).unwrap();
        let second = Database::open(backend(), &config).unwrap();

        let held = first.fetch_locked(b"k").unwrap();
        assert!(matches!(second.fetch_locked(b"k"), Err(DbError::WouldBlock)));
        held.release();
        assert!(second.fetch_locked(b"k").is_ok());
    }

    #[test]
    fn empty_value_is_distinct_from_absent() {
        let db = fallback_db();
        db.store(b"e", b"", StoreMode::Insert).unwrap();
        assert_eq!(db.fetch(b"e").unwrap(), Some(Vec::new()));
        assert!(db.exists(b"e").unwrap());
    }

    #[test]
    fn nonblocking_handle_does_not_wait_in_helpers() {
        let shared = SharedMap::new();
        let config = Config::new().lock_mode(LockMode::NonBlocking);
        let backend = || {
            SimpleBackend::new(Arc::clone(&shared)).with_native(Capabilities::NONBLOCKING_LOCK)
        };
        let holder = Database::open(backend(), &config).unwrap();
        let other = Database::open(backend(), &config).unwrap();
        holder.store(b"n", &1u32.to_le_bytes(), StoreMode::Insert).unwrap();

        let held = holder.fetch_locked(b"n").unwrap();
        assert!(matches!(
            other.store(b"n", b"x", StoreMode::Replace),
            Err(DbError::WouldBlock)
        ));
        assert!(matches!(other.delete(b"n"), Err(DbError::WouldBlock)));
        assert!(matches!(
            other.change_u32_atomic(b"n", 1),
            Err(DbError::WouldBlock)
        ));
        held.release();
        assert_eq!(other.change_u32_atomic(b"n", 1).unwrap(), 2);
    }

    #[test]
    fn fallback_traverse_read_skips_held_record() {
        use std::sync::mpsc;
        use std::thread;
        use std::time::Duration;

        let db = fallback_db();
        for key in [&b"a"[..], b"b", b"held"] {
            db.store(key, b"v", StoreMode::Insert).unwrap();
        }
        let db = &db;

        thread::scope(|s| {
            let held = db.fetch_locked(b"held").unwrap();
            let (tx, rx) = mpsc::channel();
            s.spawn(move || {
                let mut seen = Vec::new();
                let count = db.traverse_read(|key, _| {
                    seen.push(key.to_vec());
                    Ok(TraverseControl::Continue)
                });
                let _ = tx.send((count, seen));
            });
            let outcome = rx.recv_timeout(Duration::from_secs(10));
            held.release();

            let (count, mut seen) = outcome.expect("read traversal waited on a held lock");
            seen.sort();
            assert_eq!(count.unwrap(), 2);
            assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec()]);
        });
    }
}
