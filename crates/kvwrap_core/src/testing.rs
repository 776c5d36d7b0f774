//! Minimal in-process backend for unit tests.
//!
//! Implements the mandatory primitives over a shared map; `fetch`, `exists`
//! and non-blocking locks can be switched on to exercise native dispatch.

use crate::backend::{Backend, LockedVisitor, RecordLock};
use crate::error::{DbError, DbResult};
use crate::types::{Capabilities, LockMode, SequenceNumber, TraverseControl};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct MapState {
    records: HashMap<Vec<u8>, Vec<u8>>,
    locked: HashSet<Vec<u8>>,
    seqnum: u64,
}

#[derive(Default)]
pub(crate) struct SharedMap {
    state: Mutex<MapState>,
    released: Condvar,
    native_calls: AtomicUsize,
}

impl SharedMap {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn native_calls(&self) -> usize {
        self.native_calls.load(Ordering::SeqCst)
    }
}

type Pending = HashMap<Vec<u8>, Option<Vec<u8>>>;

pub(crate) struct SimpleBackend {
    shared: Arc<SharedMap>,
    pending: Mutex<Option<Pending>>,
    native: Capabilities,
}

impl SimpleBackend {
    pub(crate) fn new(shared: Arc<SharedMap>) -> Self {
        Self {
            shared,
            pending: Mutex::new(None),
            native: Capabilities::empty(),
        }
    }

    pub(crate) fn with_native(mut self, native: Capabilities) -> Self {
        self.native = native & (Capabilities::FETCH | Capabilities::EXISTS | Capabilities::NONBLOCKING_LOCK);
        self
    }

    fn visible(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(pending) = self.pending.lock().as_ref() {
            if let Some(write) = pending.get(key) {
                return write.clone();
            }
        }
        self.shared.state.lock().records.get(key).cloned()
    }

    fn write(&self, key: &[u8], value: Option<Vec<u8>>) {
        if let Some(pending) = self.pending.lock().as_mut() {
            pending.insert(key.to_vec(), value);
            return;
        }
        let mut state = self.shared.state.lock();
        match value {
            Some(v) => {
                state.records.insert(key.to_vec(), v);
            }
            None => {
                state.records.remove(key);
            }
        }
        state.seqnum += 1;
    }
}

struct SimpleLock<'a> {
    backend: &'a SimpleBackend,
    key: Vec<u8>,
    value: Option<Vec<u8>>,
}

impl RecordLock for SimpleLock<'_> {
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

impl Drop for SimpleLock<'_> {
    fn drop(&mut self) {
        let shared = &self.backend.shared;
        shared.state.lock().locked.remove(&self.key);
        shared.released.notify_all();
    }
}

impl Backend for SimpleBackend {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn capabilities(&self) -> Capabilities {
        self.native
    }

    fn fetch_locked(&self, key: &[u8], mode: LockMode) -> DbResult<Box<dyn RecordLock + '_>> {
        {
            let mut state = self.shared.state.lock();
            while state.locked.contains(key) {
                if mode == LockMode::NonBlocking {
                    return Err(DbError::WouldBlock);
                }
                self.shared.released.wait(&mut state);
            }
            state.locked.insert(key.to_vec());
        }
        Ok(Box::new(SimpleLock {
            backend: self,
            key: key.to_vec(),
            value: self.visible(key),
        }))
    }

    fn traverse<'a>(
        &'a self,
        mode: LockMode,
        visitor: &mut LockedVisitor<'a, '_>,
    ) -> DbResult<()> {
        let mut keys: HashSet<Vec<u8>> = self.shared.state.lock().records.keys().cloned().collect();
        if let Some(pending) = self.pending.lock().as_ref() {
            for (key, write) in pending {
                match write {
                    Some(_) => keys.insert(key.clone()),
                    None => keys.remove(key),
                };
            }
        }
        for key in keys {
            let lock = match self.fetch_locked(&key, mode) {
                Ok(lock) => lock,
                Err(DbError::WouldBlock) => continue,
                Err(err) => return Err(err),
            };
            if lock.value().is_none() {
                continue;
            }
            if visitor(lock)? == TraverseControl::Stop {
                break;
            }
        }
        Ok(())
    }

    fn seqnum(&self) -> DbResult<SequenceNumber> {
        Ok(SequenceNumber::new(self.shared.state.lock().seqnum))
    }

    fn transaction_start(&self) -> DbResult<()> {
        *self.pending.lock() = Some(Pending::new());
        Ok(())
    }

    fn transaction_commit(&self) -> DbResult<()> {
        let pending = self
            .pending
            .lock()
            .take()
            .ok_or_else(|| DbError::invalid_state("no transaction"))?;
        if pending.is_empty() {
            return Ok(());
        }
        let mut state = self.shared.state.lock();
        for (key, write) in pending {
            match write {
                Some(v) => state.records.insert(key, v),
                None => state.records.remove(&key),
            };
        }
        state.seqnum += 1;
        Ok(())
    }

    fn transaction_cancel(&self) -> DbResult<()> {
        self.pending.lock().take();
        Ok(())
    }

    fn fetch(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        self.shared.native_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.visible(key))
    }

    fn exists(&self, key: &[u8]) -> DbResult<bool> {
        self.shared.native_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.visible(key).is_some())
    }
}
