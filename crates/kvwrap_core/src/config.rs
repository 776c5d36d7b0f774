//! Database configuration.

use crate::types::LockMode;

/// Configuration for opening a database.
///
/// The facade reads `lock_mode`; engines read the rest.
#[derive(Debug, Clone)]
pub struct Config {
    /// How `fetch_locked`, `store`, `delete` and `change_u32_atomic` wait
    /// for a contended record.
    ///
    /// Locked traversal, wipe and the lock-based `fetch` fallback always
    /// wait.
    pub lock_mode: LockMode,

    /// Whether to sync storage on every committed change (safer but slower).
    pub sync_on_commit: bool,

    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_mode: LockMode::Blocking,
            sync_on_commit: true,
            create_if_missing: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lock acquisition mode.
    #[must_use]
    pub const fn lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_mode = mode;
        self
    }

    /// Sets whether to sync on every committed change.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }
}
