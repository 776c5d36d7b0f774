//! Optional operations synthesized from the mandatory primitives.
//!
//! Used by [`Database`] for every optional operation the backend does not
//! report in its capability set. The results are identical to a native
//! implementation; only the cost differs:
//!
//! - `fetch` takes the record lock, so it waits behind a concurrent writer
//! - `parse_record` inspects a copy instead of the stored bytes
//! - `exists` goes through `parse_record` and ignores the value
//! - `wipe` deletes record by record during a locked traversal
//! - `traverse_read` snapshots through a locked traversal that skips every
//!   record whose lock is held, then runs the callback on the snapshot; it
//!   never waits on a lock and no callback runs under one

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::traverse;
use crate::types::{LockMode, TraverseControl};
use tracing::trace;

/// Lockless fetch: lock, copy, release.
pub(crate) fn fetch(db: &Database, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
    let record = db.lock_record(key, LockMode::Blocking)?;
    let value = record.value().map(<[u8]>::to_vec);
    record.release();
    Ok(value)
}

/// Record inspection over a fetched copy.
pub(crate) fn parse_record<R>(
    db: &Database,
    key: &[u8],
    inspector: impl FnOnce(&[u8], &[u8]) -> R,
) -> DbResult<R> {
    match db.fetch(key)? {
        Some(value) => Ok(inspector(key, &value)),
        None => Err(DbError::NotFound),
    }
}

/// Existence check through record inspection.
pub(crate) fn exists(db: &Database, key: &[u8]) -> DbResult<bool> {
    match db.parse_record(key, |_, _| ()) {
        Ok(()) => Ok(true),
        Err(DbError::NotFound) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Wipe by deleting every record during a locked traversal.
pub(crate) fn wipe(db: &Database) -> DbResult<()> {
    let removed = db.traverse(|record| {
        record.delete()?;
        Ok(TraverseControl::Continue)
    })?;
    trace!(removed, "fallback wipe finished");
    Ok(())
}

/// Read-only traversal over a snapshot of the records nobody holds.
///
/// A record locked elsewhere, or by the caller itself, is left out of the
/// pass rather than waited on.
pub(crate) fn traverse_read<F>(db: &Database, callback: F) -> DbResult<usize>
where
    F: FnMut(&[u8], &[u8]) -> DbResult<TraverseControl>,
{
    let mut snapshot = Vec::new();
    db.traverse_unheld(|record| {
        if let Some(value) = record.value() {
            snapshot.push((record.key().to_vec(), value.to_vec()));
        }
        Ok(TraverseControl::Continue)
    })?;
    traverse::visit_snapshot(&snapshot, callback)
}
