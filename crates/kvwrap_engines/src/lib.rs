//! # kvwrap engines
//!
//! Storage engines implementing [`kvwrap_core::Backend`].
//!
//! ## Available Engines
//!
//! - [`MemoryBackend`] - shared in-process store; every optional operation
//!   is native, and the declared set can be narrowed to exercise fallbacks
//! - [`LogBackend`] - persistent directory with an append-only checksummed
//!   log and per-key advisory lock files, shared across processes
//!
//! Both buffer transaction writes per handle and validate what the
//! transaction read when it commits, so a transaction that lost a race
//! fails with `TransactionConflict` instead of overwriting.
//!
//! ## Example
//!
//! ```rust
//! use kvwrap_core::{Database, StoreMode};
//! use kvwrap_engines::MemoryBackend;
//!
//! let db = Database::new(MemoryBackend::new());
//! db.store(b"alice", b"pw1", StoreMode::Insert).unwrap();
//! assert!(db.exists(b"alice").unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod log;
mod memory;
mod pending;

pub use log::LogBackend;
pub use memory::{MemoryBackend, MemoryStore};
