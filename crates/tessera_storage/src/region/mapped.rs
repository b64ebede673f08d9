use super::{out_of_bounds, remove_file, BackingFile, Region};
use crate::error::{StorageError, StorageResult};
use crate::options::StoreOptions;
use memmap2::{MmapMut, MmapOptions};
use parking_lot::{Mutex, RwLock};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// A memory-mapped file with a fixed extent.
///
/// The file is sized once, when created, and mapped in full. The extent
/// never changes afterwards, so [`Region::grow`] is unsupported.
#[derive(Debug)]
pub struct MappedRegion {
    path: PathBuf,
    file: Mutex<Option<File>>,
    map: RwLock<Option<MmapMut>>,
    len: u64,
    created: bool,
    delete_on_close: bool,
    removed: AtomicBool,
}

impl MappedRegion {
    /// Opens (or creates with `len` bytes) the file named by `options` and maps it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, sized or mapped.
    pub fn open(options: &StoreOptions, len: u64) -> StorageResult<Self> {
        let backing = BackingFile::open(options)?;
        if backing.created {
            backing.file.set_len(len)?;
        }
        let len = backing.file.metadata()?.len();
        let map = Self::map(&backing.file, len)?;
        Ok(Self {
            path: backing.path,
            file: Mutex::new(Some(backing.file)),
            map: RwLock::new(Some(map)),
            len,
            created: backing.created,
            delete_on_close: backing.delete_on_close,
            removed: AtomicBool::new(false),
        })
    }

    #[allow(unsafe_code)]
    fn map(file: &File, len: u64) -> StorageResult<MmapMut> {
        // SAFETY: the file stays open for the life of the mapping and is
        // exclusively owned by this region; nothing truncates it while mapped.
        let map = unsafe { MmapOptions::new().len(len as usize).map_mut(file)? };
        Ok(map)
    }

    /// Path of the mapped file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Region for MappedRegion {
    fn size(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        let guard = self.map.read();
        let map = guard.as_ref().ok_or(StorageError::Closed)?;
        let start = offset as usize;
        let end = start.saturating_add(buf.len());
        if end > map.len() {
            return Err(out_of_bounds(offset, buf.len(), self.len));
        }
        buf.copy_from_slice(&map[start..end]);
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let mut guard = self.map.write();
        let map = guard.as_mut().ok_or(StorageError::Closed)?;
        let start = offset as usize;
        let end = start.saturating_add(data.len());
        if end > map.len() {
            return Err(out_of_bounds(offset, data.len(), self.len));
        }
        map[start..end].copy_from_slice(data);
        Ok(())
    }

    fn can_grow(&self) -> bool {
        false
    }

    fn grow(&self, _new_len: u64) -> StorageResult<()> {
        Err(StorageError::Unsupported {
            mode: "mapped",
            operation: "grow",
        })
    }

    fn sync(&self, _metadata: bool) -> StorageResult<()> {
        let guard = self.map.read();
        let map = guard.as_ref().ok_or(StorageError::Closed)?;
        map.flush()?;
        Ok(())
    }

    fn was_created(&self) -> bool {
        self.created
    }

    fn close(&self) -> StorageResult<()> {
        if let Some(map) = self.map.write().take() {
            map.flush()?;
        }
        self.file.lock().take();
        Ok(())
    }

    fn destroy(&self) -> StorageResult<()> {
        self.map.write().take();
        self.file.lock().take();
        self.removed.store(true, Ordering::SeqCst);
        remove_file(&self.path)
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if self.delete_on_close && !self.removed.load(Ordering::SeqCst) {
            self.map.get_mut().take();
            self.file.get_mut().take();
            let _ = remove_file(&self.path);
        }
    }
}
