//! Reference model for generated operation sequences.
//!
//! [`ModelChecker`] applies each [`DbOperation`] to a database and to a
//! plain map, and compares outcomes, contents and the change counter.

use crate::generators::{DbOperation, TxWrite};
use kvwrap_core::{Database, DbError, DbResult, SequenceNumber, StoreMode, TraverseControl};
use std::collections::HashMap;

/// A mismatch between the database and the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    /// Index of the operation that exposed it.
    pub step: usize,
    /// What differed.
    pub message: String,
}

/// Drives a database and a `HashMap` model in lockstep.
#[derive(Debug)]
pub struct ModelChecker<'db> {
    db: &'db Database,
    model: HashMap<Vec<u8>, Vec<u8>>,
    seqnum: SequenceNumber,
    step: usize,
}

impl<'db> ModelChecker<'db> {
    /// Starts from the database's current contents.
    ///
    /// # Errors
    ///
    /// Returns any error reading the database.
    pub fn new(db: &'db Database) -> DbResult<Self> {
        let mut model = HashMap::new();
        db.traverse_read(|key, value| {
            model.insert(key.to_vec(), value.to_vec());
            Ok(TraverseControl::Continue)
        })?;
        Ok(Self {
            db,
            model,
            seqnum: db.get_seqnum()?,
            step: 0,
        })
    }

    fn diverged(&self, message: impl Into<String>) -> Divergence {
        Divergence {
            step: self.step,
            message: message.into(),
        }
    }

    /// Applies `ops` in order, stopping at the first divergence.
    pub fn run(&mut self, ops: &[DbOperation]) -> Result<(), Divergence> {
        for op in ops {
            self.apply(op)?;
            self.step += 1;
        }
        self.verify_contents()
    }

    /// Applies one operation and checks its outcome and the counter.
    pub fn apply(&mut self, op: &DbOperation) -> Result<(), Divergence> {
        let changed = match op {
            DbOperation::Store { key, value, mode } => {
                let result = self.db.store(key, value, *mode);
                let exists = self.model.contains_key(key);
                match (mode, exists, result) {
                    (StoreMode::Insert, true, Err(DbError::AlreadyExists)) => false,
                    (_, _, Ok(())) if !(exists && *mode == StoreMode::Insert) => {
                        self.model.insert(key.clone(), value.clone());
                        true
                    }
                    (_, _, other) => {
                        return Err(self.diverged(format!("store {key:?}: got {other:?}")));
                    }
                }
            }
            DbOperation::Delete { key } => match (self.model.contains_key(key), self.db.delete(key)) {
                (true, Ok(())) => {
                    self.model.remove(key);
                    true
                }
                (false, Err(DbError::NotFound)) => false,
                (_, other) => return Err(self.diverged(format!("delete {key:?}: got {other:?}"))),
            },
            DbOperation::Fetch { key } => {
                let fetched = self
                    .db
                    .fetch(key)
                    .map_err(|e| self.diverged(format!("fetch failed: {e}")))?;
                if fetched.as_ref() != self.model.get(key) {
                    return Err(self.diverged(format!(
                        "fetch {key:?}: db {fetched:?}, model {:?}",
                        self.model.get(key)
                    )));
                }
                false
            }
            DbOperation::Wipe => {
                self.db
                    .wipe()
                    .map_err(|e| self.diverged(format!("wipe failed: {e}")))?;
                let changed = !self.model.is_empty();
                self.model.clear();
                changed
            }
            DbOperation::Transaction { writes, commit } => self.apply_transaction(writes, *commit)?,
        };
        self.check_seqnum(changed)
    }

    fn apply_transaction(&mut self, writes: &[TxWrite], commit: bool) -> Result<bool, Divergence> {
        self.db
            .transaction_start()
            .map_err(|e| self.diverged(format!("start failed: {e}")))?;

        let mut staged = self.model.clone();
        let mut wrote = false;
        for write in writes {
            match write {
                TxWrite::Store { key, value } => {
                    self.db
                        .store(key, value, StoreMode::Replace)
                        .map_err(|e| self.diverged(format!("store in transaction failed: {e}")))?;
                    staged.insert(key.clone(), value.clone());
                    wrote = true;
                }
                TxWrite::Delete { key } => match (staged.contains_key(key), self.db.delete(key)) {
                    (true, Ok(())) => {
                        staged.remove(key);
                        wrote = true;
                    }
                    (false, Err(DbError::NotFound)) => {}
                    (_, other) => {
                        return Err(self.diverged(format!(
                            "delete in transaction {key:?}: got {other:?}"
                        )));
                    }
                },
            }
        }

        if commit {
            self.db
                .transaction_commit()
                .map_err(|e| self.diverged(format!("commit failed: {e}")))?;
            self.model = staged;
            Ok(wrote)
        } else {
            self.db
                .transaction_cancel()
                .map_err(|e| self.diverged(format!("cancel failed: {e}")))?;
            Ok(false)
        }
    }

    fn check_seqnum(&mut self, changed: bool) -> Result<(), Divergence> {
        let now = self
            .db
            .get_seqnum()
            .map_err(|e| self.diverged(format!("seqnum failed: {e}")))?;
        let ok = if changed {
            now > self.seqnum
        } else {
            now == self.seqnum
        };
        if !ok {
            return Err(self.diverged(format!(
                "seqnum {} -> {now} (changed: {changed})",
                self.seqnum
            )));
        }
        self.seqnum = now;
        Ok(())
    }

    /// Compares a full read-only pass with the model.
    pub fn verify_contents(&self) -> Result<(), Divergence> {
        let mut seen = HashMap::new();
        self.db
            .traverse_read(|key, value| {
                seen.insert(key.to_vec(), value.to_vec());
                Ok(TraverseControl::Continue)
            })
            .map_err(|e| self.diverged(format!("traverse_read failed: {e}")))?;
        if seen != self.model {
            return Err(self.diverged(format!(
                "contents differ: db has {} records, model {}",
                seen.len(),
                self.model.len()
            )));
        }
        Ok(())
    }

    /// The model's view of the database.
    #[must_use]
    pub fn model(&self) -> &HashMap<Vec<u8>, Vec<u8>> {
        &self.model
    }
}
