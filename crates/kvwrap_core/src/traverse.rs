//! Traversal engine.
//!
//! Wraps backend scans so every backend gets the same visible behavior:
//! - each locked record reaches the caller as a [`Record`] guard whose lock
//!   is released as soon as the callback returns
//! - the stop signal is checked after every callback; once seen, no
//!   further record reaches the caller even if the backend keeps going
//! - the returned count is the number of callback invocations
//!
//! Visitation order is whatever the backend produces and is not stable
//! across calls.

use crate::backend::Backend;
use crate::error::DbResult;
use crate::record::Record;
use crate::types::{LockMode, TraverseControl};

/// Read-write traversal: every record is presented locked.
///
/// `LockMode::NonBlocking` skips records whose lock is held.
pub(crate) fn traverse_locked<'db, F>(
    backend: &'db dyn Backend,
    mode: LockMode,
    mut callback: F,
) -> DbResult<usize>
where
    F: FnMut(&mut Record<'db>) -> DbResult<TraverseControl>,
{
    let mut count = 0usize;
    let mut stopped = false;

    backend.traverse(mode, &mut |lock| {
        if stopped {
            return Ok(TraverseControl::Stop);
        }
        let mut record = Record::new(lock);
        count += 1;
        let control = callback(&mut record)?;
        record.release();
        if control == TraverseControl::Stop {
            stopped = true;
        }
        Ok(control)
    })?;

    Ok(count)
}

/// Read-only traversal through the backend's native unlocked scan.
pub(crate) fn traverse_unlocked<F>(backend: &dyn Backend, mut callback: F) -> DbResult<usize>
where
    F: FnMut(&[u8], &[u8]) -> DbResult<TraverseControl>,
{
    let mut count = 0usize;
    let mut stopped = false;

    backend.traverse_read(&mut |key, value| {
        if stopped {
            return Ok(TraverseControl::Stop);
        }
        count += 1;
        let control = callback(key, value)?;
        if control == TraverseControl::Stop {
            stopped = true;
        }
        Ok(control)
    })?;

    Ok(count)
}

/// Runs `callback` over an owned snapshot, honoring the stop signal.
pub(crate) fn visit_snapshot<F>(snapshot: &[(Vec<u8>, Vec<u8>)], mut callback: F) -> DbResult<usize>
where
    F: FnMut(&[u8], &[u8]) -> DbResult<TraverseControl>,
{
    let mut count = 0usize;
    for (key, value) in snapshot {
        count += 1;
        if callback(key, value)? == TraverseControl::Stop {
            break;
        }
    }
    Ok(count)
}
