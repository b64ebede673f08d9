//! # Tessera Storage
//!
//! Record stores underneath the Tessera journal.
//!
//! A backend is a byte region with two fixed root block slots at its head
//! and a user region of records after them. Backends hand out an
//! [`Address`] for every record and know nothing about what the records
//! contain: commit records, index checkpoints and root blocks are all
//! interpreted by `tessera_core`.
//!
//! ## Available Backends
//!
//! | Mode | Type | Growth | Space reuse |
//! |------|------|--------|-------------|
//! | [`BufferMode::Transient`] | [`TransientBackend`] | realloc + copy | no |
//! | [`BufferMode::Mapped`] | [`MappedBackend`] | fixed extent | no |
//! | [`BufferMode::DiskWorm`] | [`DiskWormBackend`] | file extension | no |
//! | [`BufferMode::DiskRw`] | [`DiskRwBackend`] | file extension | free list |
//!
//! ## Example
//!
//! ```rust
//! use tessera_storage::{open_backend, StorageBackend, StoreOptions};
//!
//! let backend = open_backend(&StoreOptions::default()).unwrap();
//! let addr = backend.write(b"hello world").unwrap();
//! assert_eq!(backend.read(addr).unwrap(), b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod address;
mod allocator;
mod backend;
mod error;
pub mod framing;
mod layout;
mod options;
mod region;
mod rw;
mod worm;

pub use address::{Address, MAX_OFFSET, MAX_RECORD_SIZE};
pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use layout::{RootSlot, HEADER_SIZE, ROOT_BLOCK_SIZE};
pub use options::{
    BufferMode, StoreOptions, DEFAULT_INITIAL_EXTENT, DISK_MAX_EXTENT, MEM_MAX_EXTENT, MIB,
    MINIMUM_EXTENSION,
};
pub use region::{FileRegion, MappedRegion, MemoryRegion, Region};
pub use rw::{AllocatorStats, DiskRwBackend};
pub use worm::{DiskWormBackend, MappedBackend, TransientBackend, WormStore};

use std::sync::Arc;

/// Opens the backend selected by `options.mode`.
///
/// # Errors
///
/// Returns an error if a disk-backed store cannot be opened.
pub fn open_backend(options: &StoreOptions) -> StorageResult<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match options.mode {
        BufferMode::Transient => Arc::new(TransientBackend::transient(options)),
        BufferMode::Mapped => Arc::new(MappedBackend::mapped(options)?),
        BufferMode::DiskWorm => Arc::new(DiskWormBackend::disk_worm(options)?),
        BufferMode::DiskRw => Arc::new(DiskRwBackend::open(options)?),
    };
    Ok(backend)
}
