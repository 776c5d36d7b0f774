//! Append-only data file.

use kvwrap_core::{DbError, DbResult};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// The log file on disk.
///
/// Other handles and processes append to the same file, so the size is
/// read from the file system each time rather than cached. Callers
/// serialize appends and truncation through the directory's write lock.
#[derive(Debug)]
pub(crate) struct LogFile {
    path: PathBuf,
    file: RwLock<File>,
}

impl LogFile {
    /// Opens or creates the file.
    pub(crate) fn open(path: &Path) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn size(&self) -> DbResult<u64> {
        Ok(self.file.read().metadata()?.len())
    }

    /// Reads `len` bytes starting at `offset`.
    pub(crate) fn read_range(&self, offset: u64, len: usize) -> DbResult<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Appends `data` at the end of the file and returns its offset.
    pub(crate) fn append(&self, data: &[u8]) -> DbResult<u64> {
        let mut file = self.file.write();
        let offset = file.seek(SeekFrom::End(0))?;
        if !data.is_empty() {
            file.write_all(data)?;
            file.flush()?;
        }
        Ok(offset)
    }

    pub(crate) fn sync(&self) -> DbResult<()> {
        self.file.read().sync_all()?;
        Ok(())
    }

    /// Cuts the file back to `new_size` bytes.
    pub(crate) fn truncate(&self, new_size: u64) -> DbResult<()> {
        let file = self.file.write();
        let size = file.metadata()?.len();

        if new_size > size {
            return Err(DbError::invalid_state(format!(
                "cannot truncate to size {new_size} which is greater than current size {size}"
            )));
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.log");

        let file = LogFile::open(&path).unwrap();
        assert_eq!(file.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(file.path(), path);
    }

    #[test]
    fn file_append_and_read() {
        let dir = tempdir().unwrap();
        let file = LogFile::open(&dir.path().join("data.log")).unwrap();

        assert_eq!(file.append(b"hello").unwrap(), 0);
        assert_eq!(file.append(b" world").unwrap(), 5);
        assert_eq!(file.size().unwrap(), 11);
        assert_eq!(file.read_range(0, 11).unwrap(), b"hello world");
        assert_eq!(file.read_range(6, 5).unwrap(), b"world");
    }

    #[test]
    fn file_sees_appends_from_other_handle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.log");
        let a = LogFile::open(&path).unwrap();
        let b = LogFile::open(&path).unwrap();

        a.append(b"abc").unwrap();
        assert_eq!(b.size().unwrap(), 3);
        assert_eq!(b.append(b"def").unwrap(), 3);
        assert_eq!(a.read_range(0, 6).unwrap(), b"abcdef");
    }

    #[test]
    fn file_truncate() {
        let dir = tempdir().unwrap();
        let file = LogFile::open(&dir.path().join("data.log")).unwrap();
        file.append(b"hello world").unwrap();
        file.sync().unwrap();

        file.truncate(5).unwrap();
        assert_eq!(file.size().unwrap(), 5);
        assert!(file.truncate(100).is_err());
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let file = LogFile::open(&dir.path().join("data.log")).unwrap();
        file.append(b"abc").unwrap();
        assert!(matches!(file.read_range(1, 10), Err(DbError::Io(_))));
    }
}
