//! Backend selection and sizing options.

use crate::address::MAX_OFFSET;
use std::fmt;
use std::path::PathBuf;

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Default initial user extent for new stores.
pub const DEFAULT_INITIAL_EXTENT: u64 = 10 * MIB;

/// Smallest amount by which `overflow` grows a store.
pub const MINIMUM_EXTENSION: u64 = 32 * MIB;

/// Largest extent of a memory-resident store.
pub const MEM_MAX_EXTENT: u64 = i32::MAX as u64;

/// Largest extent of a disk-resident store.
pub const DISK_MAX_EXTENT: u64 = MAX_OFFSET;

/// The physical strategy backing a journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferMode {
    /// Heap buffer; not restart safe.
    Transient,
    /// Memory-mapped file with a fixed, pre-allocated extent.
    Mapped,
    /// Append-only (write once, read many) disk log.
    DiskWorm,
    /// Free-list managed read/write disk store.
    DiskRw,
}

impl BufferMode {
    /// Whether committed state survives a process restart.
    #[must_use]
    pub const fn is_stable(self) -> bool {
        !matches!(self, Self::Transient)
    }

    /// Whether the store can reclaim deleted records.
    #[must_use]
    pub const fn reuses_space(self) -> bool {
        matches!(self, Self::DiskRw)
    }

    /// Maximum user extent permitted by the strategy.
    #[must_use]
    pub const fn max_extent(self) -> u64 {
        match self {
            Self::Transient | Self::Mapped => MEM_MAX_EXTENT,
            Self::DiskWorm | Self::DiskRw => DISK_MAX_EXTENT,
        }
    }

    /// Short stable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Mapped => "mapped",
            Self::DiskWorm => "disk-worm",
            Self::DiskRw => "disk-rw",
        }
    }

    /// Byte tag stored in root blocks.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Transient => 1,
            Self::Mapped => 2,
            Self::DiskWorm => 3,
            Self::DiskRw => 4,
        }
    }

    /// Parses a root block tag.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Transient),
            2 => Some(Self::Mapped),
            3 => Some(Self::DiskWorm),
            4 => Some(Self::DiskRw),
            _ => None,
        }
    }
}

impl fmt::Display for BufferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for opening a storage backend.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Backend kind.
    pub mode: BufferMode,
    /// Backing file for file-based modes.
    pub file: Option<PathBuf>,
    /// Create a uniquely named file in the system temp directory.
    pub create_temp_file: bool,
    /// Remove the backing file when the backend is dropped.
    pub delete_on_close: bool,
    /// Whether a missing file may be created.
    pub create_if_missing: bool,
    /// User extent allocated for a new store (fixed extent for mapped stores).
    pub initial_extent: u64,
    /// Upper bound on the user extent; zero means no bound beyond the mode's.
    pub maximum_extent: u64,
    /// Store a CRC32 with every record.
    pub use_checksums: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            mode: BufferMode::Transient,
            file: None,
            create_temp_file: false,
            delete_on_close: false,
            create_if_missing: true,
            initial_extent: DEFAULT_INITIAL_EXTENT,
            maximum_extent: 0,
            use_checksums: false,
        }
    }
}

impl StoreOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new(mode: BufferMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Sets the backing file.
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Requests a temporary backing file.
    #[must_use]
    pub const fn create_temp_file(mut self, value: bool) -> Self {
        self.create_temp_file = value;
        self
    }

    /// Sets whether the backing file is removed on drop.
    #[must_use]
    pub const fn delete_on_close(mut self, value: bool) -> Self {
        self.delete_on_close = value;
        self
    }

    /// Sets whether a missing file may be created.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the initial user extent.
    #[must_use]
    pub const fn initial_extent(mut self, bytes: u64) -> Self {
        self.initial_extent = bytes;
        self
    }

    /// Sets the maximum user extent.
    #[must_use]
    pub const fn maximum_extent(mut self, bytes: u64) -> Self {
        self.maximum_extent = bytes;
        self
    }

    /// Enables or disables record checksums.
    #[must_use]
    pub const fn use_checksums(mut self, value: bool) -> Self {
        self.use_checksums = value;
        self
    }
}
