//! Storage backend trait definition.

use crate::address::Address;
use crate::error::StorageResult;
use crate::layout::RootSlot;
use crate::options::BufferMode;
use std::fmt;

/// A record store underneath the journal.
///
/// Backends are **opaque record stores**. They hand out an [`Address`] for
/// every record written and give the same bytes back for that address. The
/// journal owns all interpretation of record contents, including the root
/// blocks stored in the two fixed header slots.
///
/// # Invariants
///
/// - `write` never moves or overwrites a record that has not been deleted
/// - `overflow` grows the region without changing `next_offset`
/// - a non-null address stays readable until deleted or the backend is destroyed
/// - every method takes `&self`; implementations synchronize internally
///
/// # Commit hooks
///
/// The journal brackets each commit with [`StorageBackend::is_dirty`],
/// [`StorageBackend::commit`] and [`StorageBackend::abort`]. A backend
/// remembers its write cursor (and allocator state) as of the last commit
/// so that an abort discards everything written since.
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// The strategy implemented by this backend.
    fn mode(&self) -> BufferMode;

    /// Whether committed data survives a restart.
    fn is_stable(&self) -> bool {
        self.mode().is_stable()
    }

    /// Whether records carry a checksum.
    fn uses_checksums(&self) -> bool;

    /// True when the backend was created by this open (no prior content).
    fn is_new(&self) -> bool;

    /// Writes a record and returns its address.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty record, `RecordTooLarge` when
    /// the payload exceeds [`crate::MAX_RECORD_SIZE`], and `Capacity` when
    /// the region cannot grow to hold it.
    fn write(&self, data: &[u8]) -> StorageResult<Address>;

    /// Reads the record at `address`.
    ///
    /// # Errors
    ///
    /// Returns `NullAddress`, `AddressNotWritten`, `ChecksumMismatch` or an
    /// I/O error.
    fn read(&self, address: Address) -> StorageResult<Vec<u8>>;

    /// Releases the record at `address`.
    ///
    /// Write-once backends ignore deletes.
    ///
    /// # Errors
    ///
    /// Returns an error if the address was never written.
    fn delete(&self, address: Address) -> StorageResult<()>;

    /// Forces written data to stable media.
    ///
    /// With `metadata` set, file metadata (length, times) is forced as well.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn force(&self, metadata: bool) -> StorageResult<()>;

    /// Size of the whole region including the root block header.
    fn extent(&self) -> u64;

    /// Size of the user region.
    fn user_extent(&self) -> u64;

    /// Offset in the user region at which the next record is appended.
    fn next_offset(&self) -> u64;

    /// Grows the user region so that at least `needed` more bytes fit.
    ///
    /// Returns `Ok(false)` when growing would exceed the backend's limit.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` for fixed-extent backends.
    fn overflow(&self, needed: u64) -> StorageResult<bool>;

    /// Reads the raw contents of a root block slot.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot cannot be read.
    fn read_root_block(&self, slot: RootSlot) -> StorageResult<Vec<u8>>;

    /// Overwrites a root block slot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the block does not fit in a slot.
    fn write_root_block(&self, slot: RootSlot, block: &[u8]) -> StorageResult<()>;

    /// True if anything was written or released since the last commit.
    fn is_dirty(&self) -> bool;

    /// Pins the current state as committed.
    fn commit(&self);

    /// Rolls back to the last committed state.
    fn abort(&self);

    /// Restores the committed state recorded in a root block.
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` if the state does not fit the region.
    fn restore(&self, next_offset: u64, meta: Address) -> StorageResult<()>;

    /// Persists allocator bookkeeping for the commit at `commit_time`.
    ///
    /// Deferred frees recorded before `release_before` become reusable.
    /// Returns the address of the persisted state, or [`Address::NULL`] for
    /// backends without an allocator.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    fn checkpoint_allocator(&self, commit_time: u64, release_before: u64) -> StorageResult<Address> {
        let _ = (commit_time, release_before);
        Ok(Address::NULL)
    }

    /// Closes the backend. Further operations fail with `Closed`.
    ///
    /// # Errors
    ///
    /// Returns an error if buffered data cannot be released.
    fn close(&self) -> StorageResult<()>;

    /// Closes the backend and irrecoverably removes its storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be removed.
    fn destroy(&self) -> StorageResult<()>;
}
