//! Test fixtures and database helpers.
//!
//! Every fixture can hand out additional handles on the same storage and
//! can be reopened, so multi-handle and restart scenarios are written once
//! and run against every engine.

use kvwrap_core::{Capabilities, Config, Database};
use kvwrap_engines::{LogBackend, MemoryBackend, MemoryStore};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Which engine a fixture runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// `MemoryBackend` with every operation native.
    Memory,
    /// `MemoryBackend` declaring only the given capabilities.
    MemoryMasked(Capabilities),
    /// `LogBackend` in a temporary directory.
    Log,
}

impl EngineKind {
    /// Whether a reopened database still holds committed data because it
    /// was written to disk.
    #[must_use]
    pub fn is_persistent(self) -> bool {
        matches!(self, Self::Log)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::MemoryMasked(caps) => write!(f, "memory[{caps}]"),
            Self::Log => write!(f, "log"),
        }
    }
}

/// Every engine configuration the conformance suite covers.
///
/// Masked memory variants force the facade onto its fallbacks.
#[must_use]
pub fn all_engines() -> Vec<EngineKind> {
    vec![
        EngineKind::Memory,
        EngineKind::MemoryMasked(Capabilities::empty()),
        EngineKind::MemoryMasked(Capabilities::FETCH | Capabilities::EXISTS),
        EngineKind::MemoryMasked(Capabilities::TRAVERSE_READ | Capabilities::NONBLOCKING_LOCK),
        EngineKind::Log,
    ]
}

enum Storage {
    Memory(Arc<MemoryStore>, Capabilities),
    Log(TempDir, Config),
}

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    kind: EngineKind,
    storage: Storage,
}

impl TestDatabase {
    /// Creates a fully native in-memory test database.
    pub fn memory() -> Self {
        Self::open(EngineKind::Memory)
    }

    /// Creates an in-memory test database declaring only `mask`.
    pub fn memory_with_capabilities(mask: Capabilities) -> Self {
        Self::open(EngineKind::MemoryMasked(mask))
    }

    /// Creates a log-backed test database in a temporary directory.
    pub fn log() -> Self {
        Self::log_with_config(Config::default().sync_on_commit(false))
    }

    /// Creates a log-backed test database with `config`.
    pub fn log_with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage = Storage::Log(temp_dir, config);
        let db = storage.connect();
        Self {
            db,
            kind: EngineKind::Log,
            storage,
        }
    }

    /// Creates a test database on the given engine.
    pub fn open(kind: EngineKind) -> Self {
        let storage = match kind {
            EngineKind::Memory => Storage::Memory(MemoryStore::new(), Capabilities::all()),
            EngineKind::MemoryMasked(mask) => Storage::Memory(MemoryStore::new(), mask),
            EngineKind::Log => return Self::log(),
        };
        let db = storage.connect();
        Self { db, kind, storage }
    }

    /// The engine this fixture runs on.
    #[must_use]
    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    /// The database directory, for log-backed fixtures.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Log(dir, _) => Some(dir.path()),
            Storage::Memory(..) => None,
        }
    }

    /// Opens another handle on the same storage.
    ///
    /// The handle has its own transaction context.
    #[must_use]
    pub fn second_handle(&self) -> Database {
        self.storage.connect()
    }

    /// Closes the handle and opens a fresh one on the same storage.
    ///
    /// For the log engine this is a restart: the new handle rebuilds its
    /// state from disk.
    #[must_use]
    pub fn reopen(self) -> Self {
        let Self { db, kind, storage } = self;
        drop(db);
        let db = storage.connect();
        Self { db, kind, storage }
    }
}

impl Storage {
    fn connect(&self) -> Database {
        match self {
            Self::Memory(store, mask) => {
                Database::new(MemoryBackend::shared(store).with_capabilities(*mask))
            }
            Self::Log(dir, config) => {
                let backend =
                    LogBackend::open(dir.path(), config).expect("Failed to open log backend");
                Database::open(backend, config).expect("Failed to open log database")
            }
        }
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

impl fmt::Debug for TestDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestDatabase")
            .field("kind", &self.kind)
            .field("db", &self.db)
            .finish()
    }
}

/// Runs `f` once per engine in [`all_engines`], each on a fresh database.
///
/// # Example
///
/// ```rust
/// use kvwrap_core::StoreMode;
/// use kvwrap_testkit::with_each_engine;
///
/// with_each_engine(|db| {
///     db.store(b"k", b"v", StoreMode::Insert).unwrap();
///     assert!(db.exists(b"k").unwrap());
/// });
/// ```
pub fn with_each_engine<F>(mut f: F)
where
    F: FnMut(TestDatabase),
{
    for kind in all_engines() {
        f(TestDatabase::open(kind));
    }
}

/// Runs a test with a temporary in-memory database.
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary log-backed database.
pub fn with_log_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::log();
    let path = test_db
        .path()
        .expect("Log database should have a path")
        .to_path_buf();
    f(&test_db.db, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use kvwrap_core::StoreMode;

    /// Key used for the `n`th populated record.
    #[must_use]
    pub fn key(n: usize) -> Vec<u8> {
        format!("key-{n:05}").into_bytes()
    }

    /// Value stored under [`key`]`(n)`.
    #[must_use]
    pub fn value(n: usize) -> Vec<u8> {
        format!("value-{n}").into_bytes()
    }

    /// Creates a database on `kind` holding `count` records.
    pub fn populated_database(kind: EngineKind, count: usize) -> TestDatabase {
        let test_db = TestDatabase::open(kind);
        for n in 0..count {
            test_db
                .store(&key(n), &value(n), StoreMode::Insert)
                .expect("Failed to populate database");
        }
        test_db
    }
}
