//! Advisory file locks.
//!
//! Locks are taken on a dedicated open file description, so two handles in
//! the same process exclude each other just like two processes do.

use fs2::FileExt;
use kvwrap_core::{DbError, DbResult, LockMode};
use std::fs::{File, OpenOptions};
use std::path::Path;

/// A held lock on a file. Released on drop.
#[derive(Debug)]
pub(crate) struct FileLock {
    file: File,
}

impl FileLock {
    /// Takes an exclusive lock, waiting for it in `LockMode::Blocking`.
    ///
    /// # Errors
    ///
    /// `WouldBlock` if the lock is held and `mode` is `NonBlocking`.
    pub(crate) fn exclusive(path: &Path, mode: LockMode) -> DbResult<Self> {
        let file = open_lock_file(path)?;
        match mode {
            LockMode::Blocking => FileExt::lock_exclusive(&file)?,
            LockMode::NonBlocking => {
                if let Err(err) = FileExt::try_lock_exclusive(&file) {
                    return Err(map_contended(err));
                }
            }
        }
        Ok(Self { file })
    }

    /// Takes a shared lock, waiting for any exclusive holder.
    pub(crate) fn shared(path: &Path) -> DbResult<Self> {
        let file = open_lock_file(path)?;
        FileExt::lock_shared(&file)?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn open_lock_file(path: &Path) -> DbResult<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    Ok(file)
}

fn map_contended(err: std::io::Error) -> DbError {
    if err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
        || err.kind() == std::io::ErrorKind::WouldBlock
    {
        DbError::WouldBlock
    } else {
        DbError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn exclusive_excludes_second_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("k.lock");

        let _held = FileLock::exclusive(&path, LockMode::NonBlocking).unwrap();
        assert!(matches!(
            FileLock::exclusive(&path, LockMode::NonBlocking),
            Err(DbError::WouldBlock)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("k.lock");

        {
            let _held = FileLock::exclusive(&path, LockMode::Blocking).unwrap();
        }
        let _again = FileLock::exclusive(&path, LockMode::NonBlocking).unwrap();
    }

    #[test]
    fn shared_locks_coexist_and_block_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("write.lock");

        let a = FileLock::shared(&path).unwrap();
        let b = FileLock::shared(&path).unwrap();
        assert!(matches!(
            FileLock::exclusive(&path, LockMode::NonBlocking),
            Err(DbError::WouldBlock)
        ));
        drop(a);
        drop(b);
        let _exclusive = FileLock::exclusive(&path, LockMode::NonBlocking).unwrap();
    }

    #[test]
    fn blocking_exclusive_waits_for_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("k.lock");
        let held = FileLock::exclusive(&path, LockMode::Blocking).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter_path = path.clone();
        let waiter = thread::spawn(move || {
            let _lock = FileLock::exclusive(&waiter_path, LockMode::Blocking).unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }
}
