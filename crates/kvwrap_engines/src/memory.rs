//! Shared in-memory engine.

use crate::pending::{apply_write, PendingTransaction, PendingWrite, Versioned};
use kvwrap_core::{
    Backend, Capabilities, DbError, DbResult, LockMode, LockedVisitor, ReadVisitor, RecordLock,
    SequenceNumber, TraverseControl,
};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<Vec<u8>, Versioned>,
    locked: HashSet<Vec<u8>>,
    seqnum: u64,
}

impl StoreState {
    fn version(&self, key: &[u8]) -> Option<u64> {
        self.records.get(key).map(|v| v.version)
    }
}

/// Storage shared by every [`MemoryBackend`] opened on it.
///
/// Record locks live here, so they exclude each other across all handles on
/// the same store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    released: Condvar,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of committed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Returns true if no record is committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    /// Number of record locks currently held.
    #[must_use]
    pub fn locked_count(&self) -> usize {
        self.state.lock().locked.len()
    }

    fn lock_key(&self, key: &[u8], mode: LockMode) -> DbResult<()> {
        let mut state = self.state.lock();
        while state.locked.contains(key) {
            if mode == LockMode::NonBlocking {
                return Err(DbError::WouldBlock);
            }
            self.released.wait(&mut state);
        }
        state.locked.insert(key.to_vec());
        Ok(())
    }

    fn unlock_key(&self, key: &[u8]) {
        self.state.lock().locked.remove(key);
        self.released.notify_all();
    }
}

/// One handle on a [`MemoryStore`].
///
/// Implements every optional operation natively. The declared capability
/// set can be narrowed with [`MemoryBackend::with_capabilities`], which makes
/// the facade use its fallbacks for the masked operations.
///
/// Not persistent: data lives as long as the store.
///
/// # Example
///
/// ```rust
/// use kvwrap_core::{Database, StoreMode};
/// use kvwrap_engines::{MemoryBackend, MemoryStore};
///
/// let store = MemoryStore::new();
/// let a = Database::new(MemoryBackend::shared(&store));
/// let b = Database::new(MemoryBackend::shared(&store));
///
/// a.store(b"k", b"v", StoreMode::Insert).unwrap();
/// assert_eq!(b.fetch(b"k").unwrap(), Some(b"v".to_vec()));
/// ```
#[derive(Debug)]
pub struct MemoryBackend {
    store: Arc<MemoryStore>,
    pending: Mutex<Option<PendingTransaction>>,
    capabilities: Capabilities,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Operations this engine implements natively.
    pub const NATIVE: Capabilities = Capabilities::all();

    /// Creates a handle on a fresh private store.
    #[must_use]
    pub fn new() -> Self {
        Self::shared(&MemoryStore::new())
    }

    /// Creates a handle on an existing store.
    #[must_use]
    pub fn shared(store: &Arc<MemoryStore>) -> Self {
        Self {
            store: Arc::clone(store),
            pending: Mutex::new(None),
            capabilities: Self::NATIVE,
        }
    }

    /// Restricts the declared capabilities to `mask`.
    #[must_use]
    pub fn with_capabilities(mut self, mask: Capabilities) -> Self {
        self.capabilities = Self::NATIVE & mask;
        self
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    fn write(&self, key: &[u8], value: Option<Vec<u8>>) {
        if let Some(pending) = self.pending.lock().as_mut() {
            match value {
                Some(value) => pending.put(key, value),
                None => pending.delete(key),
            }
            return;
        }
        let mut state = self.store.state.lock();
        state.seqnum += 1;
        let version = state.seqnum;
        apply_write(&mut state.records, key.to_vec(), value, version);
    }

    fn visible_keys(&self) -> HashSet<Vec<u8>> {
        let pending = self.pending.lock();
        let mut keys: HashSet<Vec<u8>> = self.store.state.lock().records.keys().cloned().collect();
        if let Some(pending) = pending.as_ref() {
            pending.overlay_keys(&mut keys);
        }
        keys
    }
}

struct MemoryRecord<'a> {
    backend: &'a MemoryBackend,
    key: Vec<u8>,
    value: Option<Vec<u8>>,
}

impl RecordLock for MemoryRecord<'_> {
    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    fn store(&mut self, data: &[u8]) -> DbResult<()> {
        self.backend.write(&self.key, Some(data.to_vec()));
        self.value = Some(data.to_vec());
        Ok(())
    }

    fn delete(&mut self) -> DbResult<()> {
        self.backend.write(&self.key, None);
        self.value = None;
        Ok(())
    }
}

impl Drop for MemoryRecord<'_> {
    fn drop(&mut self) {
        self.backend.store.unlock_key(&self.key);
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn fetch_locked(&self, key: &[u8], mode: LockMode) -> DbResult<Box<dyn RecordLock + '_>> {
        self.store.lock_key(key, mode)?;
        let mut record = MemoryRecord {
            backend: self,
            key: key.to_vec(),
            value: None,
        };

        let mut pending = self.pending.lock();
        let state = self.store.state.lock();
        let committed = state.records.get(key);
        record.value = match pending.as_mut() {
            Some(txn) => match txn.get(key) {
                Some(write) => write.value().map(<[u8]>::to_vec),
                None => {
                    txn.record_read(key, committed.map(|v| v.version));
                    committed.map(|v| v.value.clone())
                }
            },
            None => committed.map(|v| v.value.clone()),
        };
        drop(state);
        drop(pending);

        Ok(Box::new(record))
    }

    fn traverse<'a>(
        &'a self,
        mode: LockMode,
        visitor: &mut LockedVisitor<'a, '_>,
    ) -> DbResult<()> {
        for key in self.visible_keys() {
            let record = match self.fetch_locked(&key, mode) {
                Ok(record) => record,
                Err(DbError::WouldBlock) => continue,
                Err(err) => return Err(err),
            };
            if record.value().is_none() {
                continue;
            }
            if visitor(record)? == TraverseControl::Stop {
                break;
            }
        }
        Ok(())
    }

    fn seqnum(&self) -> DbResult<SequenceNumber> {
        Ok(SequenceNumber::new(self.store.state.lock().seqnum))
    }

    fn transaction_start(&self) -> DbResult<()> {
        let mut pending = self.pending.lock();
        if pending.is_some() {
            return Err(DbError::invalid_state("transaction already active"));
        }
        *pending = Some(PendingTransaction::new());
        Ok(())
    }

    fn transaction_commit(&self) -> DbResult<()> {
        let txn = self
            .pending
            .lock()
            .take()
            .ok_or_else(|| DbError::invalid_state("no active transaction"))?;

        let mut state = self.store.state.lock();
        if let Some(key) = txn.first_conflict(|key| state.version(key)) {
            debug!(engine = "memory", "commit rejected by conflict");
            return Err(DbError::conflict(key));
        }
        if txn.is_read_only() {
            return Ok(());
        }

        state.seqnum += 1;
        let version = state.seqnum;
        let count = txn.write_count();
        for (key, value) in txn.into_writes() {
            apply_write(&mut state.records, key, value, version);
        }
        debug!(engine = "memory", writes = count, seqnum = version, "commit applied");
        Ok(())
    }

    fn transaction_cancel(&self) -> DbResult<()> {
        self.pending.lock().take();
        Ok(())
    }

    fn fetch(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        if let Some(txn) = self.pending.lock().as_ref() {
            if let Some(write) = txn.get(key) {
                return Ok(write.value().map(<[u8]>::to_vec));
            }
        }
        Ok(self
            .store
            .state
            .lock()
            .records
            .get(key)
            .map(|v| v.value.clone()))
    }

    fn traverse_read(&self, visitor: &mut ReadVisitor<'_>) -> DbResult<()> {
        let snapshot: Vec<(Vec<u8>, Vec<u8>)> = {
            let pending = self.pending.lock();
            let state = self.store.state.lock();
            let mut snapshot: HashMap<Vec<u8>, Vec<u8>> = state
                .records
                .iter()
                .map(|(k, v)| (k.clone(), v.value.clone()))
                .collect();
            if let Some(txn) = pending.as_ref() {
                let mut keys: HashSet<Vec<u8>> = snapshot.keys().cloned().collect();
                txn.overlay_keys(&mut keys);
                snapshot.retain(|k, _| keys.contains(k));
                for key in keys {
                    if let Some(value) = txn.get(&key).and_then(PendingWrite::value) {
                        snapshot.insert(key, value.to_vec());
                    }
                }
            }
            snapshot.into_iter().collect()
        };

        for (key, value) in &snapshot {
            if visitor(key, value)? == TraverseControl::Stop {
                break;
            }
        }
        Ok(())
    }

    fn parse_record(&self, key: &[u8], inspector: &mut dyn FnMut(&[u8], &[u8])) -> DbResult<()> {
        let pending = self.pending.lock();
        if let Some(write) = pending.as_ref().and_then(|txn| txn.get(key)) {
            return match write.value() {
                Some(value) => {
                    inspector(key, value);
                    Ok(())
                }
                None => Err(DbError::NotFound),
            };
        }
        drop(pending);

        let state = self.store.state.lock();
        match state.records.get(key) {
            Some(versioned) => {
                inspector(key, &versioned.value);
                Ok(())
            }
            None => Err(DbError::NotFound),
        }
    }

    fn exists(&self, key: &[u8]) -> DbResult<bool> {
        if let Some(txn) = self.pending.lock().as_ref() {
            if let Some(write) = txn.get(key) {
                return Ok(write.value().is_some());
            }
        }
        Ok(self.store.state.lock().records.contains_key(key))
    }

    fn wipe(&self) -> DbResult<()> {
        if self.pending.lock().is_some() {
            for key in self.visible_keys() {
                self.store.lock_key(&key, LockMode::Blocking)?;
                if let Some(txn) = self.pending.lock().as_mut() {
                    txn.delete(&key);
                }
                self.store.unlock_key(&key);
            }
            return Ok(());
        }

        // A held record must not change under its holder.
        let mut state = self.store.state.lock();
        while state.records.keys().any(|key| state.locked.contains(key)) {
            self.store.released.wait(&mut state);
        }
        if !state.records.is_empty() {
            let removed = state.records.len();
            state.records.clear();
            state.seqnum += 1;
            debug!(engine = "memory", removed, seqnum = state.seqnum, "wiped");
        }
        Ok(())
    }
}
