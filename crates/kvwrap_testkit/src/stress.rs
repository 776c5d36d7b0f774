//! Concurrency stress helpers.
//!
//! Each worker thread gets its own handle on the shared storage, so these
//! exercise cross-handle locking and commit validation rather than a
//! single handle's internals.

use kvwrap_core::{Database, DbError, DbResult, StoreMode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Operations that succeeded.
    pub successful_ops: usize,
    /// Transactions retried after a conflict.
    pub conflicts: usize,
    /// Final counter value.
    pub final_value: u32,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Operations per second.
    #[must_use]
    pub fn ops_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.successful_ops as f64 / secs
        } else {
            0.0
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Successful: {}", self.successful_ops);
        println!("Conflicts retried: {}", self.conflicts);
        println!("Final value: {}", self.final_value);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second());
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Operations per thread.
    pub operations: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            operations: 250,
        }
    }
}

impl StressConfig {
    /// Total operations across all threads.
    #[must_use]
    pub fn total(&self) -> usize {
        self.threads * self.operations
    }
}

/// Increments one counter from many threads with `change_u32_atomic`.
///
/// `connect` opens a new handle on the storage under test. The returned
/// final value equals [`StressConfig::total`] when the record lock
/// serializes the read-modify-write.
pub fn concurrent_increments<F>(
    connect: F,
    key: &[u8],
    config: &StressConfig,
) -> DbResult<StressTestResult>
where
    F: Fn() -> Database + Sync,
{
    let start = Instant::now();
    let successful = AtomicUsize::new(0);

    thread::scope(|s| -> DbResult<()> {
        let connect = &connect;
        let successful = &successful;
        let workers: Vec<_> = (0..config.threads)
            .map(|_| {
                s.spawn(move || -> DbResult<()> {
                    let db = connect();
                    for _ in 0..config.operations {
                        db.change_u32_atomic(key, 1)?;
                        successful.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(())
                })
            })
            .collect();
        for worker in workers {
            worker
                .join()
                .map_err(|_| DbError::invalid_state("worker panicked"))??;
        }
        Ok(())
    })?;

    let final_value = connect().fetch_u32(key)?;
    Ok(StressTestResult {
        successful_ops: successful.into_inner(),
        conflicts: 0,
        final_value,
        duration: start.elapsed(),
    })
}

/// Increments one counter from many threads inside transactions.
///
/// The record lock is released before each commit, so two workers can read
/// the same value; commit validation must reject the loser, which retries.
/// The final value equals [`StressConfig::total`] only if no lost update
/// slipped through.
pub fn contended_transactions<F>(
    connect: F,
    key: &[u8],
    config: &StressConfig,
) -> DbResult<StressTestResult>
where
    F: Fn() -> Database + Sync,
{
    let start = Instant::now();
    let successful = AtomicUsize::new(0);
    let conflicts = AtomicUsize::new(0);

    thread::scope(|s| -> DbResult<()> {
        let connect = &connect;
        let successful = &successful;
        let conflicts = &conflicts;
        let workers: Vec<_> = (0..config.threads)
            .map(|_| {
                s.spawn(move || -> DbResult<()> {
                    let db = connect();
                    for _ in 0..config.operations {
                        loop {
                            match db.transaction(|db| increment_locked(db, key)) {
                                Ok(()) => break,
                                Err(DbError::TransactionConflict { .. }) => {
                                    conflicts.fetch_add(1, Ordering::Relaxed);
                                    thread::yield_now();
                                }
                                Err(err) => return Err(err),
                            }
                        }
                        successful.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(())
                })
            })
            .collect();
        for worker in workers {
            worker
                .join()
                .map_err(|_| DbError::invalid_state("worker panicked"))??;
        }
        Ok(())
    })?;

    let final_value = connect().fetch_u32(key)?;
    Ok(StressTestResult {
        successful_ops: successful.into_inner(),
        conflicts: conflicts.into_inner(),
        final_value,
        duration: start.elapsed(),
    })
}

fn increment_locked(db: &Database, key: &[u8]) -> DbResult<()> {
    let mut record = db.fetch_locked(key)?;
    let current = match record.value() {
        Some(bytes) => u32::from_le_bytes(
            bytes
                .try_into()
                .map_err(|_| DbError::invalid_value("counter is not 4 bytes"))?,
        ),
        None => 0,
    };
    record.store(&current.wrapping_add(1).to_le_bytes(), StoreMode::Replace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvwrap_engines::{MemoryBackend, MemoryStore};

    #[test]
    fn small_increment_run_on_memory() {
        let store = MemoryStore::new();
        let config = StressConfig {
            threads: 2,
            operations: 20,
        };
        let result =
            concurrent_increments(|| Database::new(MemoryBackend::shared(&store)), b"n", &config)
                .unwrap();
        assert_eq!(result.final_value as usize, config.total());
        assert_eq!(result.successful_ops, config.total());
    }
}
