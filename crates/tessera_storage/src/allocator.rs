//! Free-list bookkeeping for the read/write store.
//!
//! Released slots move through three stages:
//!
//! 1. **pending**: deleted since the last commit; still referenced by the
//!    committed state, so an abort forgets them.
//! 2. **deferred**: released by a commit at time `freed_at`; historical
//!    readers at or before that commit may still read them.
//! 3. **free**: older than the release horizon; reusable for a record of
//!    exactly the same stored size.

use crate::address::Address;
use crate::error::{StorageError, StorageResult};
use std::collections::BTreeMap;

const META_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub(crate) offset: u64,
    pub(crate) len: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Deferred {
    pub(crate) slot: Slot,
    pub(crate) freed_at: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Allocator {
    free: BTreeMap<u64, Vec<u64>>,
    pending: Vec<Slot>,
    deferred: Vec<Deferred>,
    /// Address of the record holding the last persisted state.
    pub(crate) meta: Address,
    dirty: bool,
}

impl Allocator {
    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Takes a free slot of exactly `len` bytes.
    pub(crate) fn allocate(&mut self, len: u64) -> Option<u64> {
        let offsets = self.free.get_mut(&len)?;
        let offset = offsets.pop();
        if offsets.is_empty() {
            self.free.remove(&len);
        }
        if offset.is_some() {
            self.dirty = true;
        }
        offset
    }

    /// Returns a slot taken by [`Allocator::allocate`] that was not used.
    pub(crate) fn unallocate(&mut self, slot: Slot) {
        self.free.entry(slot.len).or_default().push(slot.offset);
    }

    pub(crate) fn release(&mut self, slot: Slot) {
        self.pending.push(slot);
        self.dirty = true;
    }

    /// Turns pending releases into deferred frees stamped `commit_time` and
    /// frees every deferred slot released before `release_before`.
    ///
    /// Returns the number of slots made reusable.
    pub(crate) fn checkpoint(&mut self, commit_time: u64, release_before: u64) -> usize {
        for slot in self.pending.drain(..) {
            self.deferred.push(Deferred {
                slot,
                freed_at: commit_time,
            });
        }
        let mut released = 0;
        let free = &mut self.free;
        self.deferred.retain(|d| {
            if d.freed_at < release_before {
                free.entry(d.slot.len).or_default().push(d.slot.offset);
                released += 1;
                false
            } else {
                true
            }
        });
        self.dirty = true;
        released
    }

    pub(crate) fn free_slots(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }

    pub(crate) fn deferred_slots(&self) -> usize {
        self.deferred.len()
    }

    pub(crate) fn pending_slots(&self) -> usize {
        self.pending.len()
    }

    /// Serializes the free and deferred lists. Pending releases are not
    /// persisted; they belong to a commit that has not happened yet.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let free: Vec<(u64, u64)> = self
            .free
            .iter()
            .flat_map(|(len, offsets)| offsets.iter().map(move |off| (*off, *len)))
            .collect();

        let mut buf = Vec::with_capacity(9 + free.len() * 16 + self.deferred.len() * 24);
        buf.push(META_VERSION);
        buf.extend_from_slice(&(free.len() as u32).to_le_bytes());
        for (offset, len) in free {
            buf.extend_from_slice(&offset.to_le_bytes());
            buf.extend_from_slice(&len.to_le_bytes());
        }
        buf.extend_from_slice(&(self.deferred.len() as u32).to_le_bytes());
        for d in &self.deferred {
            buf.extend_from_slice(&d.slot.offset.to_le_bytes());
            buf.extend_from_slice(&d.slot.len.to_le_bytes());
            buf.extend_from_slice(&d.freed_at.to_le_bytes());
        }
        buf
    }

    pub(crate) fn decode(meta: Address, bytes: &[u8]) -> StorageResult<Self> {
        let mut reader = MetaReader { bytes, pos: 0 };
        let version = reader.u8()?;
        if version != META_VERSION {
            return Err(StorageError::Corrupted(format!(
                "unknown allocator meta version {version}"
            )));
        }
        let mut allocator = Self {
            meta,
            ..Self::default()
        };
        for _ in 0..reader.u32()? {
            let offset = reader.u64()?;
            let len = reader.u64()?;
            allocator.free.entry(len).or_default().push(offset);
        }
        for _ in 0..reader.u32()? {
            let offset = reader.u64()?;
            let len = reader.u64()?;
            let freed_at = reader.u64()?;
            allocator.deferred.push(Deferred {
                slot: Slot { offset, len },
                freed_at,
            });
        }
        Ok(allocator)
    }
}

struct MetaReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl MetaReader<'_> {
    fn take<const N: usize>(&mut self) -> StorageResult<[u8; N]> {
        let end = self.pos + N;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| StorageError::Corrupted("truncated allocator meta".into()))?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> StorageResult<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn u32(&mut self) -> StorageResult<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn u64(&mut self) -> StorageResult<u64> {
        Ok(u64::from_le_bytes(self.take()?))
    }
}
