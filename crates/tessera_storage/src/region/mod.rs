//! Byte regions underlying the record stores.

mod file;
mod mapped;
mod memory;

pub use file::FileRegion;
pub use mapped::MappedRegion;
pub use memory::MemoryRegion;

use crate::error::{StorageError, StorageResult};
use crate::options::StoreOptions;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;

/// A contiguous, growable range of bytes.
///
/// Regions know nothing about records; offsets are absolute within the
/// region, header included.
pub trait Region: Send + Sync + fmt::Debug {
    /// Current length of the region in bytes.
    fn size(&self) -> u64;

    /// Fills `buf` from `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range lies outside the region or I/O fails.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()>;

    /// Copies `data` to `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range lies outside the region or I/O fails.
    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Whether [`Region::grow`] is supported.
    fn can_grow(&self) -> bool {
        true
    }

    /// Extends the region to `new_len` bytes, preserving its contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the region cannot be extended.
    fn grow(&self, new_len: u64) -> StorageResult<()>;

    /// Forces the region to stable media.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&self, metadata: bool) -> StorageResult<()>;

    /// Whether the region was empty when opened.
    fn was_created(&self) -> bool;

    /// Releases the backing resources.
    ///
    /// # Errors
    ///
    /// Returns an error if pending data cannot be flushed.
    fn close(&self) -> StorageResult<()>;

    /// Releases and removes the backing resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be removed.
    fn destroy(&self) -> StorageResult<()>;
}

/// A file opened for a disk-backed region.
pub(crate) struct BackingFile {
    pub(crate) file: File,
    pub(crate) path: PathBuf,
    pub(crate) created: bool,
    pub(crate) delete_on_close: bool,
}

impl BackingFile {
    /// Opens the file named by `options`, or a new temp file.
    pub(crate) fn open(options: &StoreOptions) -> StorageResult<Self> {
        if options.create_temp_file {
            let named = tempfile::Builder::new()
                .prefix("tessera-")
                .suffix(".jnl")
                .tempfile()?;
            let (file, temp) = named.into_parts();
            let path = temp.keep().map_err(|e| StorageError::Io(e.error))?;
            return Ok(Self {
                file,
                path,
                created: true,
                delete_on_close: options.delete_on_close,
            });
        }

        let path = options
            .file
            .clone()
            .ok_or_else(|| StorageError::InvalidArgument("no backing file configured".into()))?;
        let exists = path.exists();
        if !exists && !options.create_if_missing {
            return Err(StorageError::InvalidArgument(format!(
                "file does not exist: {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(options.create_if_missing)
            .truncate(false)
            .open(&path)?;
        let created = file.metadata()?.len() == 0;
        Ok(Self {
            file,
            path,
            created,
            delete_on_close: options.delete_on_close,
        })
    }
}

/// Removes a file, treating a missing file as already removed.
pub(crate) fn remove_file(path: &std::path::Path) -> StorageResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn out_of_bounds(offset: u64, len: usize, size: u64) -> StorageError {
    StorageError::InvalidArgument(format!(
        "range {offset}+{len} outside region of {size} bytes"
    ))
}
