//! Backend driver contract.

use crate::error::{DbError, DbResult};
use crate::types::{Capabilities, LockMode, SequenceNumber, TraverseControl};

/// Backend-private lock token for one key.
///
/// A token exists only while the backend holds the exclusive lock on its
/// key. Dropping the token must release the lock, on every path.
///
/// Tokens are wrapped by [`crate::Record`], which enforces the store-mode and
/// delete rules before calling into the token; implementations only apply
/// the change.
pub trait RecordLock: Send {
    /// The locked key.
    fn key(&self) -> &[u8];

    /// The value as seen by the lock holder, `None` if the key is absent.
    fn value(&self) -> Option<&[u8]>;

    /// Writes `data` as the key's value (upsert).
    ///
    /// Must appear atomic to lockless readers. Inside a transaction the write
    /// is buffered until commit.
    fn store(&mut self, data: &[u8]) -> DbResult<()>;

    /// Removes the key.
    fn delete(&mut self) -> DbResult<()>;
}

/// Visitor handed to [`Backend::traverse`].
pub type LockedVisitor<'a, 'b> =
    dyn FnMut(Box<dyn RecordLock + 'a>) -> DbResult<TraverseControl> + 'b;

/// Visitor handed to [`Backend::traverse_read`].
pub type ReadVisitor<'b> = dyn FnMut(&[u8], &[u8]) -> DbResult<TraverseControl> + 'b;

/// A storage engine pluggable behind [`crate::Database`].
///
/// # Mandatory primitives
///
/// `fetch_locked`, `traverse`, `seqnum` and the three transaction calls.
///
/// # Optional operations
///
/// `fetch`, `traverse_read`, `parse_record`, `exists` and `wipe` default to
/// `Unsupported`. A backend that overrides one must also report it in
/// [`Backend::capabilities`]; the facade only calls optional operations the
/// capability set names and synthesizes the rest.
///
/// # Transactions
///
/// Each backend instance is one caller context. While a transaction is
/// active on an instance, mutations made through its lock tokens are
/// buffered and only become visible to other instances on commit. Reads on
/// the same instance see its own buffered writes.
pub trait Backend: Send + Sync {
    /// Short engine name used in logs.
    fn name(&self) -> &'static str;

    /// Whether data survives the process.
    fn is_persistent(&self) -> bool {
        false
    }

    /// Optional operations implemented natively.
    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }

    /// Acquires the exclusive lock on `key`.
    ///
    /// `LockMode::NonBlocking` is only passed when the backend reports
    /// `NONBLOCKING_LOCK`; it must fail with `WouldBlock` instead of waiting.
    fn fetch_locked(&self, key: &[u8], mode: LockMode) -> DbResult<Box<dyn RecordLock + '_>>;

    /// Presents every record, locked, to `visitor`.
    ///
    /// Must stop as soon as the visitor returns `Stop`, and must tolerate the
    /// visitor deleting the record it was handed. Keys that vanish between
    /// enumeration and locking are skipped.
    ///
    /// With `LockMode::NonBlocking` a record whose lock is held, by this
    /// instance or any other, is skipped instead of waited on. Every backend
    /// supports this mode here, whether or not it reports `NONBLOCKING_LOCK`.
    fn traverse<'a>(
        &'a self,
        mode: LockMode,
        visitor: &mut LockedVisitor<'a, '_>,
    ) -> DbResult<()>;

    /// Returns the current change counter.
    fn seqnum(&self) -> DbResult<SequenceNumber>;

    /// Begins buffering mutations made through this instance.
    fn transaction_start(&self) -> DbResult<()>;

    /// Applies buffered mutations atomically and durably.
    ///
    /// On any error nothing has been applied and the buffer is gone.
    fn transaction_commit(&self) -> DbResult<()>;

    /// Discards buffered mutations.
    fn transaction_cancel(&self) -> DbResult<()>;

    /// Lockless read of a committed value.
    fn fetch(&self, _key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        Err(DbError::unsupported("fetch"))
    }

    /// Unlocked scan; must never wait on record locks.
    fn traverse_read(&self, _visitor: &mut ReadVisitor<'_>) -> DbResult<()> {
        Err(DbError::unsupported("traverse_read"))
    }

    /// Calls `inspector` with borrowed key and value; `NotFound` if absent.
    fn parse_record(
        &self,
        _key: &[u8],
        _inspector: &mut dyn FnMut(&[u8], &[u8]),
    ) -> DbResult<()> {
        Err(DbError::unsupported("parse_record"))
    }

    /// Checks existence without materializing the value.
    fn exists(&self, _key: &[u8]) -> DbResult<bool> {
        Err(DbError::unsupported("exists"))
    }

    /// Removes every record.
    fn wipe(&self) -> DbResult<()> {
        Err(DbError::unsupported("wipe"))
    }
}
