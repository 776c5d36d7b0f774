//! Log directory layout.
//!
//! ```text
//! <path>/
//! ├─ data.log      # Append-only record log
//! ├─ write.lock    # Serializes appends (exclusive) against replays (shared)
//! └─ locks/        # One lock file per record key
//! ```
//!
//! Key lock files are named by the SHA-256 of the key so that arbitrary
//! binary keys map to safe file names. They are never removed; an unused
//! lock file is an empty file.

use kvwrap_core::{DbError, DbResult};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const DATA_FILE: &str = "data.log";
const WRITE_LOCK_FILE: &str = "write.lock";
const LOCKS_DIR: &str = "locks";

/// Paths inside one log directory.
#[derive(Debug, Clone)]
pub(crate) struct LogDir {
    path: PathBuf,
}

impl LogDir {
    /// Opens a log directory, creating it when allowed.
    ///
    /// # Errors
    ///
    /// - `Io` with `NotFound` if the directory is missing and
    ///   `create_if_missing` is false
    /// - `InvalidState` if the path exists but is not a directory
    pub(crate) fn open(path: &Path, create_if_missing: bool) -> DbResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(DbError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("database directory does not exist: {}", path.display()),
                )));
            }
        }

        if !path.is_dir() {
            return Err(DbError::invalid_state(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        fs::create_dir_all(path.join(LOCKS_DIR))?;

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn data_path(&self) -> PathBuf {
        self.path.join(DATA_FILE)
    }

    pub(crate) fn write_lock_path(&self) -> PathBuf {
        self.path.join(WRITE_LOCK_FILE)
    }

    /// Lock file guarding `key`.
    pub(crate) fn key_lock_path(&self, key: &[u8]) -> PathBuf {
        let digest = Sha256::digest(key);
        let mut name = String::with_capacity(digest.len() * 2 + 5);
        for byte in digest {
            let _ = write!(name, "{byte:02x}");
        }
        name.push_str(".lock");
        self.path.join(LOCKS_DIR).join(name)
    }
}
