//! Byte-level storage backends.
//!
//! The pager talks to storage through a uniform capability set: positioned
//! reads and writes plus rollback-journal management. Two backends exist:
//! a growable in-memory buffer (journal operations are no-ops) and a
//! file-backed store that recovers from a leftover journal at open time.


use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use common::{DEFAULT_DB_NAME, PAGE_SIZE, StorageError, StorageErrorKind};

/// Uniform capability set the pager requires from a storage backend.
///
/// `lock`/`unlock` hold an OS advisory lock on the backing file for the
/// duration of a transaction so that two processes sharing one database
/// file cannot enter overlapping critical sections. Calls nest; only the
/// outermost pair touches the OS lock.
pub trait Storage: Send {
    /// Fill `buf` starting at `offset`. Bytes past the end of the store
    /// read as zero.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Write `data` starting at `offset`, growing the store as needed.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), StorageError>;

    /// Snapshot the entire store to the rollback journal.
    fn create_journal(&mut self) -> Result<(), StorageError>;

    /// Remove the rollback journal. The enclosing transaction becomes
    /// durable at this point.
    fn delete_journal(&mut self) -> Result<(), StorageError>;

    /// Acquire the cross-process advisory lock (may block).
    fn lock(&mut self) -> Result<(), StorageError>;

    /// Release the cross-process advisory lock.
    fn unlock(&mut self) -> Result<(), StorageError>;
}

/// In-memory storage: a growable byte buffer rounded up in page-size
/// chunks. Journal and lock operations are no-ops; crash atomicity and
/// cross-process exclusion are meaningless in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Vec<u8>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_len(&mut self, required: usize) {
        if self.data.len() < required {
            let rounded = required.div_ceil(PAGE_SIZE) * PAGE_SIZE;
            self.data.resize(rounded, 0);
        }
    }
}

impl Storage for MemoryStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let offset = offset as usize;
        buf.fill(0);
        if offset < self.data.len() {
            let available = self.data.len() - offset;
            let n = buf.len().min(available);
            buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        }
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        let offset = offset as usize;
        self.ensure_len(offset + data.len());
        self.data[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn create_journal(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    fn delete_journal(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    fn lock(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    fn unlock(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// File-backed storage for `<name>.db` with a `<name>-journal.db` rollback
/// journal.
#[derive(Debug)]
pub struct FileStorage {
    file: File,
    db_path: PathBuf,
    journal_path: PathBuf,
    lock_depth: u32,
}

impl FileStorage {
    /// Open or create the database file for `name`; an empty name selects
    /// the default database name.
    ///
    /// If a journal exists, a previous commit did not complete: the journal
    /// (a pre-image of the whole file) is promoted over the database file
    /// and removed, rolling the database back to the pre-transaction state.
    pub fn open(name: &str) -> Result<Self, StorageError> {
        let name = if name.is_empty() { DEFAULT_DB_NAME } else { name };
        let db_path = PathBuf::from(format!("{name}.db"));
        let journal_path = PathBuf::from(format!("{name}-journal.db"));

        if journal_path.exists() {
            tracing::warn!(journal = %journal_path.display(), "rollback journal found, recovering");
            fs::copy(&journal_path, &db_path)?;
            fs::remove_file(&journal_path)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;

        Ok(Self {
            file,
            db_path,
            journal_path,
            lock_depth: 0,
        })
    }

    /// Path of the main database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Path of the rollback journal.
    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }
}

impl Storage for FileStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(offset))?;
        // Reads past EOF (pages not yet flushed) come back zero-filled.
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..])?;
            if n == 0 {
                buf[filled..].fill(0);
                break;
            }
            filled += n;
        }
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        Ok(())
    }

    fn create_journal(&mut self) -> Result<(), StorageError> {
        self.file.sync_all()?;
        fs::copy(&self.db_path, &self.journal_path)?;
        Ok(())
    }

    fn delete_journal(&mut self) -> Result<(), StorageError> {
        self.file.sync_all()?;
        match fs::remove_file(&self.journal_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn lock(&mut self) -> Result<(), StorageError> {
        if self.lock_depth == 0 {
            flock_exclusive(&self.file)?;
        }
        self.lock_depth += 1;
        Ok(())
    }

    fn unlock(&mut self) -> Result<(), StorageError> {
        if self.lock_depth == 0 {
            return Err(StorageError::new(
                StorageErrorKind::IoError,
                "unlock without matching lock",
            ));
        }
        self.lock_depth -= 1;
        if self.lock_depth == 0 {
            flock_release(&self.file)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn flock_exclusive(file: &File) -> Result<(), StorageError> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(unix)]
fn flock_release(file: &File) -> Result<(), StorageError> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn flock_exclusive(_file: &File) -> Result<(), StorageError> {
    Ok(())
}

#[cfg(not(unix))]
fn flock_release(_file: &File) -> Result<(), StorageError> {
    Ok(())
}
