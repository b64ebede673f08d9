//! Read/write disk store with space reuse.

use crate::address::Address;
use crate::allocator::{Allocator, Slot};
use crate::backend::StorageBackend;
use crate::error::StorageResult;
use crate::framing;
use crate::layout::{RootSlot, HEADER_SIZE};
use crate::options::{BufferMode, StoreOptions};
use crate::region::FileRegion;
use crate::worm::{DiskWormBackend, WormStore};
use parking_lot::Mutex;
use tracing::debug;

/// A disk store that reuses released space.
///
/// Records are appended like [`DiskWormBackend`] until deleted slots become
/// free; a write then takes a free slot of exactly its stored size. The
/// allocator state is persisted by [`StorageBackend::checkpoint_allocator`]
/// and its address carried in the root block.
#[derive(Debug)]
pub struct DiskRwBackend {
    inner: DiskWormBackend,
    allocator: Mutex<Allocator>,
    committed: Mutex<Allocator>,
}

/// Allocator counters, for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Slots ready for reuse.
    pub free: usize,
    /// Slots released by a commit but still visible to history.
    pub deferred: usize,
    /// Slots released since the last commit.
    pub pending: usize,
}

impl DiskRwBackend {
    /// Opens or creates a read/write disk store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or locked, or is too
    /// short to hold the root block header.
    pub fn open(options: &StoreOptions) -> StorageResult<Self> {
        let region = FileRegion::open(options, HEADER_SIZE + options.initial_extent)?;
        let inner = WormStore::open_region(region, BufferMode::DiskRw, options)?;
        Ok(Self {
            inner,
            allocator: Mutex::new(Allocator::default()),
            committed: Mutex::new(Allocator::default()),
        })
    }

    /// Current allocator counters.
    #[must_use]
    pub fn allocator_stats(&self) -> AllocatorStats {
        let allocator = self.allocator.lock();
        AllocatorStats {
            free: allocator.free_slots(),
            deferred: allocator.deferred_slots(),
            pending: allocator.pending_slots(),
        }
    }

    /// Simulates an interrupted I/O closing the file handle.
    pub fn close_handle(&self) {
        self.inner.close_handle();
    }

    /// Number of times the file handle was reopened.
    #[must_use]
    pub fn reopen_count(&self) -> u64 {
        self.inner.reopen_count()
    }
}

impl StorageBackend for DiskRwBackend {
    fn mode(&self) -> BufferMode {
        BufferMode::DiskRw
    }

    fn uses_checksums(&self) -> bool {
        self.inner.uses_checksums()
    }

    fn is_new(&self) -> bool {
        self.inner.is_new()
    }

    fn write(&self, data: &[u8]) -> StorageResult<Address> {
        DiskWormBackend::validate_record(data)?;
        let len = framing::stored_len(data.len(), self.uses_checksums()) as u64;
        let mut allocator = self.allocator.lock();
        match allocator.allocate(len) {
            Some(offset) => match self.inner.overwrite(offset, data) {
                Ok(addr) => Ok(addr),
                Err(e) => {
                    allocator.unallocate(Slot { offset, len });
                    Err(e)
                }
            },
            None => self.inner.append(data),
        }
    }

    fn read(&self, address: Address) -> StorageResult<Vec<u8>> {
        self.inner.read(address)
    }

    fn delete(&self, address: Address) -> StorageResult<()> {
        self.inner.check_written(address)?;
        let slot = Slot {
            offset: address.offset(),
            len: self.inner.stored_len(address),
        };
        self.allocator.lock().release(slot);
        Ok(())
    }

    fn force(&self, metadata: bool) -> StorageResult<()> {
        self.inner.force(metadata)
    }

    fn extent(&self) -> u64 {
        self.inner.extent()
    }

    fn user_extent(&self) -> u64 {
        self.inner.user_extent()
    }

    fn next_offset(&self) -> u64 {
        self.inner.next_offset()
    }

    fn overflow(&self, needed: u64) -> StorageResult<bool> {
        self.inner.overflow(needed)
    }

    fn read_root_block(&self, slot: RootSlot) -> StorageResult<Vec<u8>> {
        self.inner.read_root_block(slot)
    }

    fn write_root_block(&self, slot: RootSlot, block: &[u8]) -> StorageResult<()> {
        self.inner.write_root_block(slot, block)
    }

    fn is_dirty(&self) -> bool {
        self.inner.cursor_dirty() || self.allocator.lock().is_dirty()
    }

    fn commit(&self) {
        let mut allocator = self.allocator.lock();
        self.inner.commit();
        allocator.mark_clean();
        *self.committed.lock() = allocator.clone();
    }

    fn abort(&self) {
        let mut allocator = self.allocator.lock();
        self.inner.abort();
        *allocator = self.committed.lock().clone();
    }

    fn restore(&self, next_offset: u64, meta: Address) -> StorageResult<()> {
        self.inner.restore(next_offset, meta)?;
        let allocator = if meta.is_null() {
            Allocator::default()
        } else {
            let bytes = self.inner.read(meta)?;
            Allocator::decode(meta, &bytes)?
        };
        debug!(
            free = allocator.free_slots(),
            deferred = allocator.deferred_slots(),
            "restored allocator"
        );
        *self.committed.lock() = allocator.clone();
        *self.allocator.lock() = allocator;
        Ok(())
    }

    fn checkpoint_allocator(&self, commit_time: u64, release_before: u64) -> StorageResult<Address> {
        let mut allocator = self.allocator.lock();
        let previous = allocator.meta;
        if !previous.is_null() {
            allocator.release(Slot {
                offset: previous.offset(),
                len: self.inner.stored_len(previous),
            });
        }
        let released = allocator.checkpoint(commit_time, release_before);
        // Appended rather than allocated so the encoded state stays exact.
        let meta = self.inner.append(&allocator.encode())?;
        allocator.meta = meta;
        debug!(commit_time, released, %meta, "checkpointed allocator");
        Ok(meta)
    }

    fn close(&self) -> StorageResult<()> {
        self.inner.close()
    }

    fn destroy(&self) -> StorageResult<()> {
        self.inner.destroy()
    }
}
