//! Persistent engine over an append-only log.
//!
//! Every handle keeps an in-memory image of the log and catches up with
//! whatever other handles or processes appended before each operation.
//!
//! ## Concurrency
//!
//! - record locks are advisory locks on per-key files, so they exclude
//!   other threads, handles and processes alike
//! - appends hold `write.lock` exclusively; catching up holds it shared, so
//!   a replay never observes a half-written batch from a live writer
//! - a batch only applies once its `Commit` record is complete; anything
//!   after the last complete batch is a torn tail left by a crash and is cut
//!   off by the next writer
//!
//! Lockless fetch, record inspection and read-only traversal read the
//! caught-up image and never touch record locks. Wipe is left to the
//! facade's fallback, so it is logged as one delete per record.

mod dir;
mod file;
mod lock;
mod record;

use crate::pending::{apply_write, PendingTransaction, PendingWrite, Versioned};
use dir::LogDir;
use file::LogFile;
use kvwrap_core::{
    Backend, Capabilities, Config, DbError, DbResult, LockMode, LockedVisitor, ReadVisitor,
    RecordLock, SequenceNumber, TraverseControl,
};
use lock::FileLock;
use parking_lot::{Mutex, RwLock};
use record::LogRecord;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct LogState {
    records: HashMap<Vec<u8>, Versioned>,
    seqnum: u64,
    /// End of the last complete batch.
    offset: u64,
}

impl LogState {
    fn version(&self, key: &[u8]) -> Option<u64> {
        self.records.get(key).map(|v| v.version)
    }
}

/// A database stored in a directory on disk.
///
/// Any number of handles, in one process or many, may open the same
/// directory.
///
/// # Example
///
/// ```no_run
/// use kvwrap_core::{Config, Database, StoreMode};
/// use kvwrap_engines::LogBackend;
///
/// let backend = LogBackend::open("my_db", &Config::default()).unwrap();
/// let db = Database::open(backend, &Config::default()).unwrap();
/// db.store(b"alice", b"pw1", StoreMode::Replace).unwrap();
/// ```
#[derive(Debug)]
pub struct LogBackend {
    dir: LogDir,
    log: LogFile,
    state: RwLock<LogState>,
    pending: Mutex<Option<PendingTransaction>>,
    sync_on_commit: bool,
}

impl LogBackend {
    /// Operations this engine implements natively.
    pub const NATIVE: Capabilities = Capabilities::from_bits_truncate(
        Capabilities::FETCH.bits()
            | Capabilities::TRAVERSE_READ.bits()
            | Capabilities::PARSE_RECORD.bits()
            | Capabilities::EXISTS.bits()
            | Capabilities::NONBLOCKING_LOCK.bits(),
    );

    /// Opens the database in directory `path`.
    ///
    /// # Errors
    ///
    /// - `Io` if the directory is missing and `config.create_if_missing` is
    ///   false, or on any file system failure
    /// - `Corrupted` if a complete log record fails validation
    pub fn open(path: impl AsRef<Path>, config: &Config) -> DbResult<Self> {
        let dir = LogDir::open(path.as_ref(), config.create_if_missing)?;
        let log = LogFile::open(&dir.data_path())?;

        let backend = Self {
            dir,
            log,
            state: RwLock::new(LogState::default()),
            pending: Mutex::new(None),
            sync_on_commit: config.sync_on_commit,
        };
        backend.catch_up()?;

        {
            let state = backend.state.read();
            info!(
                path = %backend.dir.path().display(),
                records = state.records.len(),
                seqnum = state.seqnum,
                "log opened"
            );
        }
        Ok(backend)
    }

    /// Directory holding the database.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Size of the log file in bytes.
    ///
    /// # Errors
    ///
    /// `Io` if the file metadata cannot be read.
    pub fn log_size(&self) -> DbResult<u64> {
        self.log.size()
    }

    /// Applies complete batches appended since the last replay.
    ///
    /// Returns the file size seen, which is past `state.offset` when the log
    /// ends in a torn tail.
    fn replay(&self, state: &mut LogState) -> DbResult<u64> {
        let size = self.log.size()?;
        if size < state.offset {
            return Err(DbError::corrupted(format!(
                "log shrank from {} to {} bytes",
                state.offset, size
            )));
        }
        if size == state.offset {
            return Ok(size);
        }

        let base = state.offset;
        let len = usize::try_from(size - base)
            .map_err(|_| DbError::corrupted("log tail too large to read"))?;
        let buf = self.log.read_range(base, len)?;

        let mut pos = 0;
        let mut batch = Vec::new();
        let mut batches = 0usize;
        while let Some((record, used)) = LogRecord::decode(&buf[pos..])? {
            pos += used;
            match record {
                LogRecord::Put { key, value } => batch.push((key, Some(value))),
                LogRecord::Delete { key } => batch.push((key, None)),
                LogRecord::Commit { seqnum } => {
                    if seqnum <= state.seqnum {
                        return Err(DbError::corrupted(format!(
                            "commit seqnum {seqnum} does not follow {}",
                            state.seqnum
                        )));
                    }
                    for (key, value) in batch.drain(..) {
                        apply_write(&mut state.records, key, value, seqnum);
                    }
                    state.seqnum = seqnum;
                    state.offset = base + pos as u64;
                    batches += 1;
                }
            }
        }

        if batches > 0 {
            debug!(batches, seqnum = state.seqnum, "log replayed");
        }
        Ok(size)
    }

    fn catch_up(&self) -> DbResult<()> {
        let _shared = FileLock::shared(&self.dir.write_lock_path())?;
        let mut state = self.state.write();
        self.replay(&mut state)?;
        Ok(())
    }

    /// Validates `txn` against the latest committed state and appends its
    /// writes as one batch.
    fn append_batch(&self, txn: PendingTransaction) -> DbResult<()> {
        let _exclusive = FileLock::exclusive(&self.dir.write_lock_path(), LockMode::Blocking)?;
        let mut state = self.state.write();

        let size = self.replay(&mut state)?;
        if size > state.offset {
            warn!(
                path = %self.log.path().display(),
                bytes = size - state.offset,
                "truncating torn log tail"
            );
            self.log.truncate(state.offset)?;
        }

        if let Some(key) = txn.first_conflict(|key| state.version(key)) {
            debug!(engine = "log", "commit rejected by conflict");
            return Err(DbError::conflict(key));
        }
        if txn.is_read_only() {
            return Ok(());
        }

        let seqnum = state.seqnum + 1;
        let writes: Vec<(Vec<u8>, Option<Vec<u8>>)> = txn.into_writes().collect();
        let mut buf = Vec::new();
        for (key, value) in &writes {
            let record = match value {
                Some(value) => LogRecord::Put {
                    key: key.clone(),
                    value: value.clone(),
                },
                None => LogRecord::Delete { key: key.clone() },
            };
            buf.extend_from_slice(&record.encode()?);
        }
        buf.extend_from_slice(&LogRecord::Commit { seqnum }.encode()?);

        let offset = self.log.append(&buf)?;
        if self.sync_on_commit {
            self.log.sync()?;
        }

        let count = writes.len();
        for (key, value) in writes {
            apply_write(&mut state.records, key, value, seqnum);
        }
        state.seqnum = seqnum;
        state.offset = offset + buf.len() as u64;
        debug!(engine = "log", writes = count, seqnum, "batch appended");
        Ok(())
    }

    fn write(&self, key: &[u8], value: Option<Vec<u8>>) -> DbResult<()> {
        if let Some(pending) = self.pending.lock().as_mut() {
            match value {
                Some(value) => pending.put(key, value),
                None => pending.delete(key),
            }
            return Ok(());
        }

        let mut single = PendingTransaction::new();
        match value {
            Some(value) => single.put(key, value),
            None => single.delete(key),
        }
        self.append_batch(single)
    }

    /// This handle's view of `key`: its own buffered write, else the
    /// committed value.
    fn visible_value(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        if let Some(txn) = self.pending.lock().as_ref() {
            if let Some(write) = txn.get(key) {
                return Ok(write.value().map(<[u8]>::to_vec));
            }
        }
        self.catch_up()?;
        Ok(self.state.read().records.get(key).map(|v| v.value.clone()))
    }

    /// Copies every visible record out of one caught-up image.
    fn snapshot(&self) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.catch_up()?;
        let pending = self.pending.lock();
        let state = self.state.read();
        let mut records: HashMap<Vec<u8>, Vec<u8>> = state
            .records
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect();
        if let Some(txn) = pending.as_ref() {
            let mut keys: HashSet<Vec<u8>> = records.keys().cloned().collect();
            txn.overlay_keys(&mut keys);
            records.retain(|k, _| keys.contains(k));
            for key in keys {
                if let Some(value) = txn.get(&key).and_then(PendingWrite::value) {
                    records.insert(key, value.to_vec());
                }
            }
        }
        Ok(records.into_iter().collect())
    }

    fn visible_keys(&self) -> HashSet<Vec<u8>> {
        let pending = self.pending.lock();
        let mut keys: HashSet<Vec<u8>> = self.state.read().records.keys().cloned().collect();
        if let Some(pending) = pending.as_ref() {
            pending.overlay_keys(&mut keys);
        }
        keys
    }
}

struct LogRecordLock<'a> {
    backend: &'a LogBackend,
    key: Vec<u8>,
    value: Option<Vec<u8>>,
    _lock: FileLock,
}

impl RecordLock for LogRecordLock<'_> {
    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    fn store(&mut self, data: &[u8]) -> DbResult<()> {
        self.backend.write(&self.key, Some(data.to_vec()))?;
        self.value = Some(data.to_vec());
        Ok(())
    }

    fn delete(&mut self) -> DbResult<()> {
        self.backend.write(&self.key, None)?;
        self.value = None;
        Ok(())
    }
}

impl Backend for LogBackend {
    fn name(&self) -> &'static str {
        "log"
    }

    fn is_persistent(&self) -> bool {
        true
    }

    fn capabilities(&self) -> Capabilities {
        Self::NATIVE
    }

    fn fetch_locked(&self, key: &[u8], mode: LockMode) -> DbResult<Box<dyn RecordLock + '_>> {
        let lock = FileLock::exclusive(&self.dir.key_lock_path(key), mode)?;
        self.catch_up()?;

        let value = {
            let mut pending = self.pending.lock();
            let state = self.state.read();
            let committed = state.records.get(key);
            match pending.as_mut() {
                Some(txn) => match txn.get(key) {
                    Some(write) => write.value().map(<[u8]>::to_vec),
                    None => {
                        txn.record_read(key, committed.map(|v| v.version));
                        committed.map(|v| v.value.clone())
                    }
                },
                None => committed.map(|v| v.value.clone()),
            }
        };

        Ok(Box::new(LogRecordLock {
            backend: self,
            key: key.to_vec(),
            value,
            _lock: lock,
        }))
    }

    fn traverse<'a>(
        &'a self,
        mode: LockMode,
        visitor: &mut LockedVisitor<'a, '_>,
    ) -> DbResult<()> {
        self.catch_up()?;
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
        self.catch_up()?;
        Ok(SequenceNumber::new(self.state.read().seqnum))
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
        self.append_batch(txn)
    }

    fn transaction_cancel(&self) -> DbResult<()> {
        self.pending.lock().take();
        Ok(())
    }

    fn fetch(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        self.visible_value(key)
    }

    fn traverse_read(&self, visitor: &mut ReadVisitor<'_>) -> DbResult<()> {
        for (key, value) in &self.snapshot()? {
            if visitor(key, value)? == TraverseControl::Stop {
                break;
            }
        }
        Ok(())
    }

    fn parse_record(&self, key: &[u8], inspector: &mut dyn FnMut(&[u8], &[u8])) -> DbResult<()> {
        let value = self.visible_value(key)?.ok_or(DbError::NotFound)?;
        inspector(key, &value);
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> DbResult<bool> {
        if let Some(txn) = self.pending.lock().as_ref() {
            if let Some(write) = txn.get(key) {
                return Ok(matches!(write, PendingWrite::Put { .. }));
            }
        }
        self.catch_up()?;
        Ok(self.state.read().records.contains_key(key))
    }
}
