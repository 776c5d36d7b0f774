//! Property-based test generators using proptest.
//!
//! Operations are drawn from a small key space so that stores, deletes and
//! transactions keep colliding on the same records.

use kvwrap_core::StoreMode;
use proptest::prelude::*;

/// Strategy for keys drawn from a handful of short byte strings.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        4 => (0u8..8).prop_map(|n| vec![b'k', b'0' + n]),
        1 => prop::collection::vec(any::<u8>(), 1..4),
    ]
}

/// Strategy for values, including the empty value.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..48)
}

/// Strategy for store modes.
pub fn store_mode_strategy() -> impl Strategy<Value = StoreMode> {
    prop_oneof![Just(StoreMode::Insert), Just(StoreMode::Replace)]
}

/// A write inside a generated transaction.
#[derive(Debug, Clone)]
pub enum TxWrite {
    /// Replace the value.
    Store {
        /// Record key.
        key: Vec<u8>,
        /// New value.
        value: Vec<u8>,
    },
    /// Delete the record.
    Delete {
        /// Record key.
        key: Vec<u8>,
    },
}

/// A database operation.
#[derive(Debug, Clone)]
pub enum DbOperation {
    /// Lock, store and release.
    Store {
        /// Record key.
        key: Vec<u8>,
        /// New value.
        value: Vec<u8>,
        /// Insert or replace.
        mode: StoreMode,
    },
    /// Lock, delete and release.
    Delete {
        /// Record key.
        key: Vec<u8>,
    },
    /// Lockless read.
    Fetch {
        /// Record key.
        key: Vec<u8>,
    },
    /// Remove everything.
    Wipe,
    /// Writes applied inside one transaction.
    Transaction {
        /// Writes in order.
        writes: Vec<TxWrite>,
        /// Commit if true, cancel otherwise.
        commit: bool,
    },
}

fn tx_write_strategy() -> impl Strategy<Value = TxWrite> {
    prop_oneof![
        3 => (key_strategy(), value_strategy())
            .prop_map(|(key, value)| TxWrite::Store { key, value }),
        1 => key_strategy().prop_map(|key| TxWrite::Delete { key }),
    ]
}

/// Strategy for one database operation.
pub fn db_operation_strategy() -> impl Strategy<Value = DbOperation> {
    prop_oneof![
        6 => (key_strategy(), value_strategy(), store_mode_strategy())
            .prop_map(|(key, value, mode)| DbOperation::Store { key, value, mode }),
        3 => key_strategy().prop_map(|key| DbOperation::Delete { key }),
        3 => key_strategy().prop_map(|key| DbOperation::Fetch { key }),
        1 => Just(DbOperation::Wipe),
        2 => (prop::collection::vec(tx_write_strategy(), 1..6), any::<bool>())
            .prop_map(|(writes, commit)| DbOperation::Transaction { writes, commit }),
    ]
}

/// Strategy for a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<DbOperation>> {
    prop::collection::vec(db_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests, such as on-disk engines.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
