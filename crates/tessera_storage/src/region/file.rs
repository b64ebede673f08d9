use super::{out_of_bounds, remove_file, BackingFile, Region};
use crate::error::{StorageError, StorageResult};
use crate::options::StoreOptions;
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

/// A region backed by an ordinary file.
///
/// The file handle lives behind a lock. If the handle is found closed, for
/// instance because a cooperating thread was interrupted mid-operation, the
/// file is reopened under the lock and the operation retried exactly once.
///
/// An exclusive advisory lock is held on the file while it is open, so two
/// processes cannot open the same journal for writing.
#[derive(Debug)]
pub struct FileRegion {
    path: PathBuf,
    file: Mutex<Option<File>>,
    size: AtomicU64,
    created: bool,
    delete_on_close: bool,
    closed: AtomicBool,
    reopens: AtomicU64,
}

impl FileRegion {
    /// Opens (or creates with `len` bytes) the file named by `options`.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another process holds the file, or an I/O error.
    pub fn open(options: &StoreOptions, len: u64) -> StorageResult<Self> {
        let backing = BackingFile::open(options)?;
        Self::lock(&backing.file, &backing.path)?;
        if backing.created {
            backing.file.set_len(len)?;
        }
        let size = backing.file.metadata()?.len();
        debug!(path = %backing.path.display(), size, created = backing.created, "opened file region");
        Ok(Self {
            path: backing.path,
            file: Mutex::new(Some(backing.file)),
            size: AtomicU64::new(size),
            created: backing.created,
            delete_on_close: backing.delete_on_close,
            closed: AtomicBool::new(false),
            reopens: AtomicU64::new(0),
        })
    }

    fn lock(file: &File, path: &Path) -> StorageResult<()> {
        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.display().to_string()));
        }
        Ok(())
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drops the file handle without closing the region.
    ///
    /// The next operation reopens the file. This is what a reader observes
    /// when a cooperating writer is interrupted during I/O.
    pub fn close_handle(&self) {
        if self.file.lock().take().is_some() {
            debug!(path = %self.path.display(), "file handle closed");
        }
    }

    /// Number of times the handle was reopened.
    #[must_use]
    pub fn reopen_count(&self) -> u64 {
        self.reopens.load(Ordering::Relaxed)
    }

    fn reopen(&self) -> StorageResult<File> {
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        Self::lock(&file, &self.path)?;
        self.reopens.fetch_add(1, Ordering::Relaxed);
        Ok(file)
    }

    /// Runs `op` against the open handle, reopening and retrying once.
    fn with_file<T>(&self, op: impl Fn(&mut File) -> io::Result<T>) -> StorageResult<T> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        let mut guard = self.file.lock();
        if let Some(file) = guard.as_mut() {
            return Ok(op(file)?);
        }
        // close() raced us to the handle.
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }

        warn!(path = %self.path.display(), "file handle was closed, reopening");
        let file = guard.insert(self.reopen()?);
        Ok(op(file)?)
    }

    fn check_range(&self, offset: u64, len: usize) -> StorageResult<()> {
        let size = self.size.load(Ordering::Acquire);
        if offset.saturating_add(len as u64) > size {
            return Err(out_of_bounds(offset, len, size));
        }
        Ok(())
    }
}

impl Region for FileRegion {
    fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        self.check_range(offset, buf.len())?;
        let len = buf.len();
        let data = self.with_file(|file| {
            let mut data = vec![0u8; len];
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut data)?;
            Ok(data)
        })?;
        buf.copy_from_slice(&data);
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.check_range(offset, data.len())?;
        self.with_file(|file| {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(data)
        })
    }

    fn grow(&self, new_len: u64) -> StorageResult<()> {
        if new_len <= self.size() {
            return Ok(());
        }
        self.with_file(|file| file.set_len(new_len))?;
        self.size.store(new_len, Ordering::Release);
        Ok(())
    }

    fn sync(&self, metadata: bool) -> StorageResult<()> {
        self.with_file(|file| {
            file.flush()?;
            if metadata {
                file.sync_all()
            } else {
                file.sync_data()
            }
        })
    }

    fn was_created(&self) -> bool {
        self.created
    }

    fn close(&self) -> StorageResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(file) = self.file.lock().take() {
            file.sync_all()?;
            let _ = FileExt::unlock(&file);
        }
        Ok(())
    }

    fn destroy(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::Release);
        self.file.lock().take();
        remove_file(&self.path)
    }
}

impl Drop for FileRegion {
    fn drop(&mut self) {
        if self.delete_on_close && self.path.exists() {
            self.file.get_mut().take();
            let _ = remove_file(&self.path);
        }
    }
}
