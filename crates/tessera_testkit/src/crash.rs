//! Crash injection for recovery testing.
//!
//! [`CrashableBackend`] wraps any backend and starts failing once a byte
//! budget is used up, or when an armed [`CrashPoint`] is reached. The write
//! that crosses the budget is torn: a prefix of a record lands in the store
//! as an orphan record, and a prefix of a root block overwrites the start
//! of the old block in its slot. After a crash every mutating call fails,
//! which is what a journal sees when the process dies mid-commit.
//!
//! [`CrashableBackend::fail_at`] injects a single I/O error instead: the
//! operation fails, nothing reaches the store, and the backend keeps
//! working.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use tessera_storage::{open_backend, StorageBackend, StoreOptions};
//! use tessera_testkit::CrashableBackend;
//!
//! let inner = open_backend(&StoreOptions::default()).unwrap();
//! let backend = CrashableBackend::new(inner);
//! backend.crash_after(16);
//!
//! assert!(backend.write(&[1u8; 8]).is_ok());
//! assert!(backend.write(&[2u8; 32]).is_err());
//! assert!(backend.has_crashed());
//! ```

use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tessera_storage::{
    Address, BufferMode, RootSlot, StorageBackend, StorageError, StorageResult,
};
use tracing::debug;

/// Operations at which a crash can be armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashPoint {
    /// The next record write fails before anything reaches the store.
    RecordWrite,
    /// The next root block write tears halfway through.
    RootBlockWrite,
    /// The next force fails.
    Force,
    /// The first force after a successful root block write fails.
    RootBlockForce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Crash,
    Transient,
}

/// A storage backend wrapper that simulates crashes.
#[derive(Debug)]
pub struct CrashableBackend {
    inner: Arc<dyn StorageBackend>,
    budget: AtomicU64,
    written: AtomicU64,
    crashed: AtomicBool,
    root_written: AtomicBool,
    armed: Mutex<Option<(CrashPoint, Fault)>>,
}

impl CrashableBackend {
    /// Wraps `inner` with an unlimited budget.
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner,
            budget: AtomicU64::new(u64::MAX),
            written: AtomicU64::new(0),
            crashed: AtomicBool::new(false),
            root_written: AtomicBool::new(false),
            armed: Mutex::new(None),
        }
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &Arc<dyn StorageBackend> {
        &self.inner
    }

    /// Crashes once `bytes` more bytes have been written.
    pub fn crash_after(&self, bytes: u64) {
        let written = self.written.load(Ordering::SeqCst);
        self.budget
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Crashes at the next occurrence of `point`.
    pub fn crash_at(&self, point: CrashPoint) {
        *self.armed.lock() = Some((point, Fault::Crash));
    }

    /// Fails the next occurrence of `point` once, without crashing.
    pub fn fail_at(&self, point: CrashPoint) {
        *self.armed.lock() = Some((point, Fault::Transient));
    }

    /// Bytes written through this wrapper so far.
    pub fn bytes_written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Clears the crash state and the budget.
    pub fn reset(&self) {
        self.budget.store(u64::MAX, Ordering::SeqCst);
        self.written.store(0, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.root_written.store(false, Ordering::SeqCst);
        *self.armed.lock() = None;
    }

    fn crash(&self, what: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        debug!(what, "simulated crash");
        StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }

    fn fail(&self, fault: Fault, what: &str) -> StorageError {
        match fault {
            Fault::Crash => self.crash(what),
            Fault::Transient => {
                debug!(what, "simulated I/O error");
                StorageError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    format!("simulated I/O error during {what}"),
                ))
            }
        }
    }

    fn ensure_alive(&self) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "backend has crashed",
            )));
        }
        Ok(())
    }

    fn take_armed(&self, point: CrashPoint) -> Option<Fault> {
        let mut armed = self.armed.lock();
        match *armed {
            Some((at, fault)) if at == point => {
                *armed = None;
                Some(fault)
            }
            _ => None,
        }
    }

    /// Charges `len` bytes against the budget and returns how many of them
    /// may reach the store. Anything short of `len` is a crash.
    fn charge(&self, len: usize) -> usize {
        let len = len as u64;
        let before = self.written.fetch_add(len, Ordering::SeqCst);
        let budget = self.budget.load(Ordering::SeqCst);
        budget.saturating_sub(before).min(len) as usize
    }
}

impl StorageBackend for CrashableBackend {
    fn mode(&self) -> BufferMode {
        self.inner.mode()
    }

    fn uses_checksums(&self) -> bool {
        self.inner.uses_checksums()
    }

    fn is_new(&self) -> bool {
        self.inner.is_new()
    }

    fn write(&self, data: &[u8]) -> StorageResult<Address> {
        self.ensure_alive()?;
        if let Some(fault) = self.take_armed(CrashPoint::RecordWrite) {
            return Err(self.fail(fault, "record write"));
        }
        let allowed = self.charge(data.len());
        if allowed < data.len() {
            if allowed > 0 {
                let _ = self.inner.write(&data[..allowed]);
            }
            return Err(self.crash("record write"));
        }
        self.inner.write(data)
    }

    fn read(&self, address: Address) -> StorageResult<Vec<u8>> {
        self.inner.read(address)
    }

    fn delete(&self, address: Address) -> StorageResult<()> {
        self.ensure_alive()?;
        self.inner.delete(address)
    }

    fn force(&self, metadata: bool) -> StorageResult<()> {
        self.ensure_alive()?;
        let after_root = self.root_written.swap(false, Ordering::SeqCst);
        let fault = self
            .take_armed(CrashPoint::Force)
            .or_else(|| after_root.then(|| self.take_armed(CrashPoint::RootBlockForce)).flatten());
        if let Some(fault) = fault {
            return Err(self.fail(fault, "force"));
        }
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
        self.ensure_alive()?;
        self.inner.overflow(needed)
    }

    fn read_root_block(&self, slot: RootSlot) -> StorageResult<Vec<u8>> {
        self.inner.read_root_block(slot)
    }

    fn write_root_block(&self, slot: RootSlot, block: &[u8]) -> StorageResult<()> {
        self.ensure_alive()?;
        let allowed = match self.take_armed(CrashPoint::RootBlockWrite) {
            Some(Fault::Crash) => block.len() / 2,
            Some(Fault::Transient) => return Err(self.fail(Fault::Transient, "root block write")),
            None => self.charge(block.len()),
        };
        if allowed < block.len() {
            let mut torn = self.inner.read_root_block(slot)?;
            torn.resize(torn.len().max(block.len()), 0);
            torn[..allowed].copy_from_slice(&block[..allowed]);
            torn.truncate(block.len());
            let _ = self.inner.write_root_block(slot, &torn);
            let _ = self.inner.force(false);
            return Err(self.crash("root block write"));
        }
        self.inner.write_root_block(slot, block)?;
        self.root_written.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }

    fn commit(&self) {
        self.inner.commit();
    }

    fn abort(&self) {
        self.inner.abort();
    }

    fn restore(&self, next_offset: u64, meta: Address) -> StorageResult<()> {
        self.inner.restore(next_offset, meta)
    }

    fn checkpoint_allocator(&self, commit_time: u64, release_before: u64) -> StorageResult<Address> {
        self.ensure_alive()?;
        self.inner.checkpoint_allocator(commit_time, release_before)
    }

    fn close(&self) -> StorageResult<()> {
        self.inner.close()
    }

    fn destroy(&self) -> StorageResult<()> {
        self.inner.destroy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_storage::{open_backend, StoreOptions};

    fn wrapped() -> CrashableBackend {
        CrashableBackend::new(open_backend(&StoreOptions::default()).unwrap())
    }

    #[test]
    fn writes_pass_through_without_budget() {
        let backend = wrapped();
        let addr = backend.write(b"payload").unwrap();
        assert_eq!(backend.read(addr).unwrap(), b"payload");
        assert_eq!(backend.bytes_written(), 7);
        assert!(!backend.has_crashed());
    }

    #[test]
    fn crossing_the_budget_crashes() {
        let backend = wrapped();
        backend.crash_after(10);
        backend.write(&[1u8; 6]).unwrap();
        assert!(backend.write(&[2u8; 6]).is_err());
        assert!(backend.has_crashed());

        // Everything mutating fails afterwards.
        assert!(backend.write(&[3u8; 1]).is_err());
        assert!(backend.force(false).is_err());
    }

    #[test]
    fn reads_survive_a_crash() {
        let backend = wrapped();
        let addr = backend.write(b"kept").unwrap();
        backend.crash_at(CrashPoint::RecordWrite);
        assert!(backend.write(b"lost").is_err());
        assert_eq!(backend.read(addr).unwrap(), b"kept");
    }

    #[test]
    fn armed_force_fails_once_armed() {
        let backend = wrapped();
        backend.force(false).unwrap();
        backend.crash_at(CrashPoint::Force);
        assert!(backend.force(false).is_err());
        assert!(backend.has_crashed());
    }

    #[test]
    fn root_block_force_waits_for_a_root_block_write() {
        let backend = wrapped();
        backend.crash_at(CrashPoint::RootBlockForce);
        backend.write(b"record").unwrap();
        backend.force(false).unwrap();

        backend.write_root_block(RootSlot::B, &[0xCC; 64]).unwrap();
        assert!(backend.force(true).is_err());
        assert!(backend.has_crashed());
        assert_eq!(backend.read_root_block(RootSlot::B).unwrap(), vec![0xCC; 64]);
    }

    #[test]
    fn transient_fault_leaves_the_backend_usable() {
        let backend = wrapped();
        backend.fail_at(CrashPoint::RootBlockForce);
        backend.write_root_block(RootSlot::A, &[0xAA; 64]).unwrap();
        assert!(backend.force(true).is_err());
        assert!(!backend.has_crashed());

        backend.write_root_block(RootSlot::A, &[0xBB; 64]).unwrap();
        backend.force(true).unwrap();
        assert!(backend.write(b"after").is_ok());

        backend.fail_at(CrashPoint::RecordWrite);
        assert!(backend.write(b"lost").is_err());
        assert!(backend.write(b"kept").is_ok());
    }

    #[test]
    fn torn_root_block_mixes_old_and_new() {
        let backend = wrapped();
        backend.write_root_block(RootSlot::A, &[0xAA; 64]).unwrap();
        backend.crash_at(CrashPoint::RootBlockWrite);
        assert!(backend.write_root_block(RootSlot::A, &[0xBB; 64]).is_err());

        let slot = backend.read_root_block(RootSlot::A).unwrap();
        assert_eq!(&slot[..32], &[0xBB; 32][..]);
        assert_eq!(&slot[32..64], &[0xAA; 32][..]);
    }

    #[test]
    fn reset_clears_crash_state() {
        let backend = wrapped();
        backend.crash_after(0);
        assert!(backend.write(b"x").is_err());
        backend.reset();
        assert!(!backend.has_crashed());
        assert!(backend.write(b"x").is_ok());
    }
}
