//! Append-only record store.

use crate::address::{Address, MAX_OFFSET, MAX_RECORD_SIZE};
use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::framing;
use crate::layout::{RootSlot, HEADER_SIZE, ROOT_BLOCK_SIZE};
use crate::options::{BufferMode, StoreOptions, MINIMUM_EXTENSION};
use crate::region::{FileRegion, MappedRegion, MemoryRegion, Region};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Heap-resident store. Not restart safe.
pub type TransientBackend = WormStore<MemoryRegion>;

/// Fixed-extent store over a memory-mapped file.
pub type MappedBackend = WormStore<MappedRegion>;

/// Write-once, read-many store over a disk file.
pub type DiskWormBackend = WormStore<FileRegion>;

#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    next_offset: u64,
    commit_offset: u64,
}

/// A store that appends every record at its write cursor.
///
/// Space is never reused: [`StorageBackend::delete`] is a no-op. Records
/// written after the last commit are discarded by
/// [`StorageBackend::abort`], which simply rewinds the cursor.
#[derive(Debug)]
pub struct WormStore<R> {
    region: R,
    mode: BufferMode,
    checksums: bool,
    initial_extent: u64,
    maximum_extent: u64,
    cursor: Mutex<Cursor>,
    closed: AtomicBool,
}

impl TransientBackend {
    /// Creates a heap-resident store.
    #[must_use]
    pub fn transient(options: &StoreOptions) -> Self {
        let region = MemoryRegion::new(HEADER_SIZE + options.initial_extent);
        Self::with_region(region, BufferMode::Transient, options)
    }
}

impl MappedBackend {
    /// Opens or creates a memory-mapped store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped, or is too
    /// short to hold the root block header.
    pub fn mapped(options: &StoreOptions) -> StorageResult<Self> {
        let region = MappedRegion::open(options, HEADER_SIZE + options.initial_extent)?;
        Self::open_region(region, BufferMode::Mapped, options)
    }
}

impl DiskWormBackend {
    /// Opens or creates an append-only disk store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or locked, or is too
    /// short to hold the root block header.
    pub fn disk_worm(options: &StoreOptions) -> StorageResult<Self> {
        let region = FileRegion::open(options, HEADER_SIZE + options.initial_extent)?;
        Self::open_region(region, BufferMode::DiskWorm, options)
    }

    /// Simulates an interrupted I/O closing the file handle.
    pub fn close_handle(&self) {
        self.region.close_handle();
    }

    /// Number of times the file handle was reopened.
    #[must_use]
    pub fn reopen_count(&self) -> u64 {
        self.region.reopen_count()
    }
}

impl<R: Region> WormStore<R> {
    pub(crate) fn open_region(
        region: R,
        mode: BufferMode,
        options: &StoreOptions,
    ) -> StorageResult<Self> {
        if region.size() < HEADER_SIZE {
            return Err(StorageError::Corrupted(format!(
                "region of {} bytes cannot hold the root block header",
                region.size()
            )));
        }
        Ok(Self::with_region(region, mode, options))
    }

    fn with_region(region: R, mode: BufferMode, options: &StoreOptions) -> Self {
        info!(
            mode = %mode,
            extent = region.size(),
            created = region.was_created(),
            checksums = options.use_checksums,
            "opened store"
        );
        Self {
            region,
            mode,
            checksums: options.use_checksums,
            initial_extent: options.initial_extent,
            maximum_extent: options.maximum_extent,
            cursor: Mutex::new(Cursor::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// The underlying region.
    pub fn region(&self) -> &R {
        &self.region
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    /// Largest user extent this store may reach.
    fn limit(&self) -> u64 {
        let mode_max = self.mode.max_extent();
        if self.maximum_extent == 0 {
            mode_max
        } else {
            self.maximum_extent.min(mode_max)
        }
    }

    pub(crate) fn validate_record(data: &[u8]) -> StorageResult<()> {
        if data.is_empty() {
            return Err(StorageError::InvalidArgument(
                "cannot write an empty record".into(),
            ));
        }
        if data.len() > MAX_RECORD_SIZE {
            return Err(StorageError::RecordTooLarge {
                len: data.len(),
                max: MAX_RECORD_SIZE,
            });
        }
        Ok(())
    }

    /// Appends a frame at the write cursor.
    pub(crate) fn append(&self, data: &[u8]) -> StorageResult<Address> {
        self.ensure_open()?;
        Self::validate_record(data)?;
        let frame = framing::encode(data, self.checksums);

        let mut cursor = self.cursor.lock();
        let offset = cursor.next_offset;
        let end = offset + frame.len() as u64;
        if end > MAX_OFFSET {
            return Err(self.capacity_error(frame.len() as u64));
        }
        let user_extent = self.user_extent();
        if end > user_extent {
            let needed = end - user_extent;
            match self.grow(needed) {
                Ok(true) => {}
                Ok(false) | Err(StorageError::Unsupported { .. }) => {
                    return Err(self.capacity_error(needed));
                }
                Err(e) => return Err(e),
            }
        }

        self.region.write_at(HEADER_SIZE + offset, &frame)?;
        cursor.next_offset = end;
        Address::new(offset, data.len()).ok_or_else(|| self.capacity_error(frame.len() as u64))
    }

    /// Writes a frame into space below the write cursor.
    pub(crate) fn overwrite(&self, offset: u64, data: &[u8]) -> StorageResult<Address> {
        self.ensure_open()?;
        Self::validate_record(data)?;
        let frame = framing::encode(data, self.checksums);
        let end = offset + frame.len() as u64;
        if end > self.next_offset() {
            return Err(StorageError::InvalidArgument(format!(
                "slot {offset}+{} lies beyond the write cursor",
                frame.len()
            )));
        }
        self.region.write_at(HEADER_SIZE + offset, &frame)?;
        Address::new(offset, data.len()).ok_or_else(|| self.capacity_error(frame.len() as u64))
    }

    /// Bytes the record at `address` occupies, framing included.
    pub(crate) fn stored_len(&self, address: Address) -> u64 {
        framing::stored_len(address.byte_count(), self.checksums) as u64
    }

    pub(crate) fn check_written(&self, address: Address) -> StorageResult<()> {
        if address.is_null() {
            return Err(StorageError::NullAddress);
        }
        let next_offset = self.next_offset();
        if address.offset() + self.stored_len(address) > next_offset {
            return Err(StorageError::AddressNotWritten {
                address,
                next_offset,
            });
        }
        Ok(())
    }

    fn capacity_error(&self, needed: u64) -> StorageError {
        StorageError::Capacity {
            needed,
            user_extent: self.user_extent(),
            limit: self.limit(),
        }
    }

    fn grow(&self, needed: u64) -> StorageResult<bool> {
        let user_extent = self.user_extent();
        let limit = self.limit();
        let required = user_extent.saturating_add(needed);
        if required > limit {
            warn!(mode = %self.mode, needed, user_extent, limit, "overflow refused");
            return Ok(false);
        }
        if !self.region.can_grow() {
            return Err(StorageError::Unsupported {
                mode: self.mode.as_str(),
                operation: "overflow",
            });
        }

        let extension = needed.max(self.initial_extent.max(MINIMUM_EXTENSION));
        let new_user_extent = user_extent.saturating_add(extension).min(limit);
        self.region.grow(HEADER_SIZE + new_user_extent)?;
        debug!(mode = %self.mode, from = user_extent, to = new_user_extent, "extended store");
        Ok(true)
    }

    pub(crate) fn cursor_dirty(&self) -> bool {
        let cursor = self.cursor.lock();
        cursor.next_offset != cursor.commit_offset
    }
}

impl<R: Region> StorageBackend for WormStore<R> {
    fn mode(&self) -> BufferMode {
        self.mode
    }

    fn uses_checksums(&self) -> bool {
        self.checksums
    }

    fn is_new(&self) -> bool {
        self.region.was_created()
    }

    fn write(&self, data: &[u8]) -> StorageResult<Address> {
        self.append(data)
    }

    fn read(&self, address: Address) -> StorageResult<Vec<u8>> {
        self.ensure_open()?;
        self.check_written(address)?;
        let mut frame = vec![0u8; self.stored_len(address) as usize];
        self.region
            .read_at(HEADER_SIZE + address.offset(), &mut frame)?;
        framing::decode(address, frame, self.checksums)
    }

    fn delete(&self, address: Address) -> StorageResult<()> {
        self.ensure_open()?;
        self.check_written(address)
    }

    fn force(&self, metadata: bool) -> StorageResult<()> {
        self.ensure_open()?;
        self.region.sync(metadata)
    }

    fn extent(&self) -> u64 {
        self.region.size()
    }

    fn user_extent(&self) -> u64 {
        self.region.size().saturating_sub(HEADER_SIZE)
    }

    fn next_offset(&self) -> u64 {
        self.cursor.lock().next_offset
    }

    fn overflow(&self, needed: u64) -> StorageResult<bool> {
        self.ensure_open()?;
        self.grow(needed)
    }

    fn read_root_block(&self, slot: RootSlot) -> StorageResult<Vec<u8>> {
        self.ensure_open()?;
        let mut block = vec![0u8; ROOT_BLOCK_SIZE];
        self.region.read_at(slot.offset(), &mut block)?;
        Ok(block)
    }

    fn write_root_block(&self, slot: RootSlot, block: &[u8]) -> StorageResult<()> {
        self.ensure_open()?;
        if block.len() > ROOT_BLOCK_SIZE {
            return Err(StorageError::InvalidArgument(format!(
                "root block of {} bytes exceeds slot size {ROOT_BLOCK_SIZE}",
                block.len()
            )));
        }
        let mut padded = [0u8; ROOT_BLOCK_SIZE];
        padded[..block.len()].copy_from_slice(block);
        self.region.write_at(slot.offset(), &padded)
    }

    fn is_dirty(&self) -> bool {
        self.cursor_dirty()
    }

    fn commit(&self) {
        let mut cursor = self.cursor.lock();
        cursor.commit_offset = cursor.next_offset;
    }

    fn abort(&self) {
        let mut cursor = self.cursor.lock();
        cursor.next_offset = cursor.commit_offset;
    }

    fn restore(&self, next_offset: u64, _meta: Address) -> StorageResult<()> {
        if next_offset > self.user_extent() {
            return Err(StorageError::Corrupted(format!(
                "next offset {next_offset} lies beyond user extent {}",
                self.user_extent()
            )));
        }
        *self.cursor.lock() = Cursor {
            next_offset,
            commit_offset: next_offset,
        };
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.region.close()
    }

    fn destroy(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::Release);
        info!(mode = %self.mode, "destroying store");
        self.region.destroy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::MIB;
    use tempfile::tempdir;

    fn small() -> StoreOptions {
        StoreOptions::default().initial_extent(1024)
    }

    #[test]
    fn transient_write_and_read() {
        let store = TransientBackend::transient(&small());

        let a = store.write(b"hello").unwrap();
        let b = store.write(b"world").unwrap();

        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 5);
        assert_eq!(store.read(a).unwrap(), b"hello");
        assert_eq!(store.read(b).unwrap(), b"world");
        assert_eq!(store.next_offset(), 10);
    }

    #[test]
    fn empty_and_null_are_rejected() {
        let store = TransientBackend::transient(&small());

        assert!(matches!(store.write(b""), Err(StorageError::InvalidArgument(_))));
        assert!(matches!(store.read(Address::NULL), Err(StorageError::NullAddress)));
    }

    #[test]
    fn unwritten_address_is_rejected() {
        let store = TransientBackend::transient(&small());
        store.write(b"abc").unwrap();

        let beyond = Address::new(3, 4).unwrap();
        assert!(matches!(
            store.read(beyond),
            Err(StorageError::AddressNotWritten { next_offset: 3, .. })
        ));
    }

    #[test]
    fn overflow_grows_without_moving_cursor() {
        let store = TransientBackend::transient(&small());
        let first = store.write(b"before").unwrap();
        let cursor = store.next_offset();

        assert!(store.overflow(10).unwrap());

        assert_eq!(store.next_offset(), cursor);
        assert_eq!(store.user_extent(), 1024 + MINIMUM_EXTENSION);
        assert_eq!(store.read(first).unwrap(), b"before");
    }

    #[test]
    fn write_past_extent_triggers_overflow() {
        let store = TransientBackend::transient(&small());
        let big = vec![7u8; 2000];

        let addr = store.write(&big).unwrap();
        assert!(store.user_extent() > 1024);
        assert_eq!(store.read(addr).unwrap(), big);
    }

    #[test]
    fn overflow_refused_at_maximum_extent() {
        let store = TransientBackend::transient(&small().maximum_extent(2048));

        assert!(!store.overflow(4096).unwrap());
        assert!(store.overflow(512).unwrap());
        assert_eq!(store.user_extent(), 2048);

        let err = store.write(&vec![1u8; 4096]).unwrap_err();
        assert!(err.is_capacity());
    }

    #[test]
    fn oversized_record_is_rejected() {
        let store = TransientBackend::transient(&small());
        let err = store.write(&vec![0u8; MAX_RECORD_SIZE + 1]).unwrap_err();
        assert!(matches!(err, StorageError::RecordTooLarge { .. }));
    }

    #[test]
    fn checksum_detects_corruption() {
        let store = TransientBackend::transient(&small().use_checksums(true));
        let addr = store.write(b"payload").unwrap();
        assert_eq!(store.next_offset(), 11);

        store.region().write_at(HEADER_SIZE + 2, b"X").unwrap();
        assert!(matches!(
            store.read(addr),
            Err(StorageError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn abort_rewinds_to_commit() {
        let store = TransientBackend::transient(&small());
        let kept = store.write(b"kept").unwrap();
        assert!(store.is_dirty());
        store.commit();
        assert!(!store.is_dirty());

        let lost = store.write(b"lost").unwrap();
        store.abort();

        assert!(!store.is_dirty());
        assert_eq!(store.read(kept).unwrap(), b"kept");
        assert!(store.read(lost).is_err());
        assert_eq!(store.write(b"next").unwrap().offset(), lost.offset());
    }

    #[test]
    fn worm_delete_is_noop() {
        let store = TransientBackend::transient(&small());
        let addr = store.write(b"forever").unwrap();
        store.commit();

        store.delete(addr).unwrap();
        assert!(!store.is_dirty());
        assert_eq!(store.read(addr).unwrap(), b"forever");
    }

    #[test]
    fn root_blocks_are_padded_slots() {
        let store = TransientBackend::transient(&small());
        store.write_root_block(RootSlot::B, b"root").unwrap();

        let block = store.read_root_block(RootSlot::B).unwrap();
        assert_eq!(block.len(), ROOT_BLOCK_SIZE);
        assert_eq!(&block[..4], b"root");
        assert!(block[4..].iter().all(|b| *b == 0));
        assert!(store.read_root_block(RootSlot::A).unwrap().iter().all(|b| *b == 0));

        assert!(store
            .write_root_block(RootSlot::A, &[0u8; ROOT_BLOCK_SIZE + 1])
            .is_err());
    }

    #[test]
    fn mapped_overflow_is_unsupported() {
        let dir = tempdir().unwrap();
        let options = StoreOptions::new(BufferMode::Mapped)
            .file(dir.path().join("mapped.jnl"))
            .initial_extent(1024);
        let store = MappedBackend::mapped(&options).unwrap();

        assert!(matches!(
            store.overflow(10),
            Err(StorageError::Unsupported { .. })
        ));
        let err = store.write(&vec![1u8; 2048]).unwrap_err();
        assert!(err.is_capacity());
    }

    #[test]
    fn disk_worm_restore_after_reopen() {
        let dir = tempdir().unwrap();
        let options = StoreOptions::new(BufferMode::DiskWorm)
            .file(dir.path().join("worm.jnl"))
            .initial_extent(MIB);

        let (addr, next) = {
            let store = DiskWormBackend::disk_worm(&options).unwrap();
            assert!(store.is_new());
            let addr = store.write(b"durable").unwrap();
            store.write(b"uncommitted").unwrap();
            store.force(true).unwrap();
            store.close().unwrap();
            (addr, addr.offset() + 7)
        };

        let store = DiskWormBackend::disk_worm(&options).unwrap();
        assert!(!store.is_new());
        store.restore(next, Address::NULL).unwrap();

        assert_eq!(store.read(addr).unwrap(), b"durable");
        let tail = store.write(b"tail").unwrap();
        assert_eq!(tail.offset(), next);
    }

    #[test]
    fn restore_beyond_extent_is_corrupt() {
        let store = TransientBackend::transient(&small());
        assert!(matches!(
            store.restore(4096, Address::NULL),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn closed_store_rejects_operations() {
        let store = TransientBackend::transient(&small());
        store.close().unwrap();
        assert!(matches!(store.write(b"x"), Err(StorageError::Closed)));
        assert!(matches!(store.force(false), Err(StorageError::Closed)));
    }

    #[test]
    fn disk_worm_survives_handle_close() {
        let dir = tempdir().unwrap();
        let options = StoreOptions::new(BufferMode::DiskWorm)
            .file(dir.path().join("worm.jnl"))
            .initial_extent(MIB);
        let store = DiskWormBackend::disk_worm(&options).unwrap();
        let addr = store.write(b"reopen me").unwrap();

        store.close_handle();
        assert_eq!(store.read(addr).unwrap(), b"reopen me");
        assert_eq!(store.reopen_count(), 1);
    }
}
