//! # kvwrap core
//!
//! Backend-agnostic key/value database contract.
//!
//! This crate provides:
//! - [`Backend`], the contract a storage engine implements to be pluggable
//! - [`Database`], the facade callers use regardless of engine
//! - [`Record`], a key held under an exclusive lock, released on drop
//! - handle-level transactions (start, commit, cancel)
//! - locked and unlocked full-database traversal
//! - fallbacks that synthesize lockless fetch, record inspection, existence
//!   checks, read-only traversal and wipe for engines that lack them
//!
//! Keys and values are opaque bytes. An empty value is a value; absence is
//! `None`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use kvwrap_core::{Config, Database, StoreMode, TraverseControl};
//!
//! let db = Database::open(backend, &Config::default())?;
//! db.store(b"a", b"1", StoreMode::Insert)?;
//! let visited = db.traverse_read(|_key, _value| Ok(TraverseControl::Continue))?;
//! assert_eq!(visited, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod database;
mod error;
mod fallback;
mod record;
mod transaction;
mod traverse;
mod types;

#[cfg(test)]
mod testing;

pub use backend::{Backend, LockedVisitor, ReadVisitor, RecordLock};
pub use config::Config;
pub use database::{Database, Dispatch, DispatchTable};
pub use error::{DbError, DbResult};
pub use record::Record;
pub use transaction::TransactionState;
pub use types::{Capabilities, LockMode, SequenceNumber, StoreMode, TraverseControl};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
