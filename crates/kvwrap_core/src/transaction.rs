//! Handle-level transaction state.
//!
//! A handle is either `Idle` or `Active`. The coordinator owns that state
//! machine and makes the backend's transaction calls only on legal
//! transitions:
//!
//! ```text
//! Idle --start--> Active --commit|cancel--> Idle
//! ```
//!
//! Nesting is not supported: `start` while `Active` fails. A commit that
//! fails still returns the handle to `Idle`, since the backend has already
//! discarded the buffered writes.

use crate::backend::Backend;
use crate::error::{DbError, DbResult};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// State of a handle's transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction; mutations apply immediately.
    Idle,
    /// Mutations are buffered until commit or cancel.
    Active,
}

#[derive(Debug)]
pub(crate) struct TransactionCoordinator {
    state: Mutex<TransactionState>,
}

impl TransactionCoordinator {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TransactionState::Idle),
        }
    }

    pub(crate) fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub(crate) fn start(&self, backend: &dyn Backend) -> DbResult<()> {
        let mut state = self.state.lock();
        if *state == TransactionState::Active {
            return Err(DbError::invalid_state("transaction already active"));
        }
        backend.transaction_start()?;
        *state = TransactionState::Active;
        debug!(backend = backend.name(), "transaction started");
        Ok(())
    }

    pub(crate) fn commit(&self, backend: &dyn Backend) -> DbResult<()> {
        let mut state = self.state.lock();
        if *state == TransactionState::Idle {
            return Err(DbError::invalid_state("no active transaction to commit"));
        }
        let result = backend.transaction_commit();
        *state = TransactionState::Idle;
        match &result {
            Ok(()) => debug!(backend = backend.name(), "transaction committed"),
            Err(err) => debug!(backend = backend.name(), error = %err, "transaction commit failed"),
        }
        result
    }

    pub(crate) fn cancel(&self, backend: &dyn Backend) -> DbResult<()> {
        let mut state = self.state.lock();
        if *state == TransactionState::Idle {
            return Err(DbError::invalid_state("no active transaction to cancel"));
        }
        let result = backend.transaction_cancel();
        *state = TransactionState::Idle;
        debug!(backend = backend.name(), "transaction cancelled");
        result
    }

    /// Cancels a transaction left open when the handle goes away.
    pub(crate) fn abandon(&self, backend: &dyn Backend) {
        let mut state = self.state.lock();
        if *state == TransactionState::Active {
            warn!(
                backend = backend.name(),
                "database handle dropped with an active transaction, cancelling"
            );
            if let Err(err) = backend.transaction_cancel() {
                warn!(backend = backend.name(), error = %err, "implicit cancel failed");
            }
            *state = TransactionState::Idle;
        }
    }
}
