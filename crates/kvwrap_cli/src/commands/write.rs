//! Mutating commands.

use super::{display_bytes, open_database, parse_bytes};
use kvwrap_core::{DbError, StoreMode};
use std::path::Path;
use tracing::info;

/// Stores `value` under `key`, creating the database if needed.
pub fn put(
    path: &Path,
    key: &str,
    value: &str,
    insert: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_database(path, true)?;
    let key = parse_bytes(key)?;
    let value = parse_bytes(value)?;
    let mode = if insert {
        StoreMode::Insert
    } else {
        StoreMode::Replace
    };
    match db.store(&key, &value, mode) {
        Ok(()) => {}
        Err(DbError::AlreadyExists) => {
            return Err(format!("Key already exists: {}", display_bytes(&key)).into());
        }
        Err(err) => return Err(err.into()),
    }
    info!(key = %display_bytes(&key), bytes = value.len(), "Stored record");
    Ok(())
}

/// Deletes `key`.
pub fn delete(path: &Path, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_database(path, false)?;
    let key = parse_bytes(key)?;
    match db.delete(&key) {
        Ok(()) => {}
        Err(err) if err.is_not_found() => {
            return Err(format!("Key not found: {}", display_bytes(&key)).into());
        }
        Err(err) => return Err(err.into()),
    }
    info!(key = %display_bytes(&key), "Deleted record");
    Ok(())
}

/// Removes every record.
pub fn wipe(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_database(path, false)?;
    let before = db.get_seqnum()?;
    db.wipe()?;
    info!(from = %before, to = %db.get_seqnum()?, "Wiped database");
    Ok(())
}
