//! Store fixtures.
//!
//! Helpers for opening every backend kind over a temporary directory that
//! is removed when the fixture is dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tessera_storage::{open_backend, BufferMode, StorageBackend, StorageResult, StoreOptions, MIB};

/// Extent used for fixture stores. Mapped stores cannot grow past it.
pub const FIXTURE_EXTENT: u64 = 4 * MIB;

/// Every backend kind, in a stable order.
pub fn all_modes() -> [BufferMode; 4] {
    [
        BufferMode::Transient,
        BufferMode::Mapped,
        BufferMode::DiskWorm,
        BufferMode::DiskRw,
    ]
}

/// Options for a `mode` store kept under `dir`.
///
/// Transient stores ignore the directory.
pub fn store_options(mode: BufferMode, dir: &Path) -> StoreOptions {
    let options = StoreOptions::new(mode).initial_extent(FIXTURE_EXTENT);
    match mode {
        BufferMode::Transient => options,
        _ => options.file(dir.join(format!("{mode}.jnl"))),
    }
}

/// Opens a `mode` store under `dir`.
///
/// # Errors
///
/// Returns an error if the backend cannot be opened.
pub fn open_store(mode: BufferMode, dir: &Path) -> StorageResult<Arc<dyn StorageBackend>> {
    open_backend(&store_options(mode, dir))
}

/// A store in its own temporary directory.
pub struct TempStore {
    /// The opened backend.
    pub backend: Arc<dyn StorageBackend>,
    options: StoreOptions,
    dir: TempDir,
}

impl TempStore {
    /// Creates a fresh `mode` store.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or the backend cannot be created.
    pub fn new(mode: BufferMode) -> StorageResult<Self> {
        let dir = TempDir::new()?;
        let options = store_options(mode, dir.path());
        let backend = open_backend(&options)?;
        Ok(Self {
            backend,
            options,
            dir,
        })
    }

    /// The options the store was opened with.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// The temporary directory holding the store.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// The backing file, if the mode has one.
    pub fn path(&self) -> Option<PathBuf> {
        self.options.file.clone()
    }

    /// Closes the backend and opens the same file again.
    ///
    /// Every other handle to the old backend must be dropped first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be closed or reopened.
    pub fn reopen(self) -> StorageResult<Self> {
        let Self {
            backend,
            options,
            dir,
        } = self;
        backend.close()?;
        drop(backend);
        let options = options.create_if_missing(false);
        let backend = open_backend(&options)?;
        Ok(Self {
            backend,
            options,
            dir,
        })
    }
}

impl std::ops::Deref for TempStore {
    type Target = Arc<dyn StorageBackend>;

    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_mode_opens() {
        for mode in all_modes() {
            let store = TempStore::new(mode).unwrap();
            assert_eq!(store.mode(), mode);
            assert!(store.is_new());
        }
    }

    #[test]
    fn transient_has_no_path() {
        let store = TempStore::new(BufferMode::Transient).unwrap();
        assert!(store.path().is_none());
    }

    #[test]
    fn disk_store_reopens_existing_file() {
        let store = TempStore::new(BufferMode::DiskWorm).unwrap();
        let addr = store.write(b"durable").unwrap();
        store.force(true).unwrap();
        store.commit();
        let next = store.next_offset();

        let store = store.reopen().unwrap();
        assert!(!store.is_new());
        store.restore(next, tessera_storage::Address::NULL).unwrap();
        assert_eq!(store.read(addr).unwrap(), b"durable");
    }
}
