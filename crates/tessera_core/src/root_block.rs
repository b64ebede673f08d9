//! Root blocks.
//!
//! Two root blocks live in the fixed header slots of every store. A commit
//! always overwrites the slot that is *not* current and only then treats
//! it as current, so a crash while writing leaves the previous block
//! intact. On open the valid block with the higher commit counter wins.
//!
//! ## Format
//!
//! ```text
//! magic "TJRB" | version u16 | mode u8 | store uuid [16]
//! commit counter u64 | first commit time u64 | last commit time u64
//! next offset u64 | extent u64 | user extent u64
//! commit record addr u64 | commit record index addr u64 | allocator meta addr u64
//! create time u64 | crc32 u32
//! ```

use crate::codec::{ByteReader, ByteWriter};
use crate::error::{JournalError, JournalResult};
use crate::types::Timestamp;
use tessera_storage::{Address, BufferMode, RootSlot, ROOT_BLOCK_SIZE};
use uuid::Uuid;

/// Magic bytes opening every root block.
pub const ROOT_BLOCK_MAGIC: [u8; 4] = *b"TJRB";

/// Current root block version.
pub const ROOT_BLOCK_VERSION: u16 = 1;

const ENCODED_LEN: usize = 4 + 2 + 1 + 16 + 10 * 8 + 4;

/// The durable summary of the last commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootBlock {
    /// Identity of the store, identical in both slots.
    pub uuid: Uuid,
    /// Backend kind that wrote the block.
    pub mode: BufferMode,
    /// Number of commits; zero for a fresh store.
    pub commit_counter: u64,
    /// Time of the first commit, or zero.
    pub first_commit_time: Timestamp,
    /// Time of the last commit, or zero.
    pub last_commit_time: Timestamp,
    /// Write cursor as of the commit.
    pub next_offset: u64,
    /// Region size as of the commit.
    pub extent: u64,
    /// User region size as of the commit.
    pub user_extent: u64,
    /// Address of the commit record written by the commit.
    pub commit_record: Address,
    /// Address of the commit record index checkpoint.
    pub commit_record_index: Address,
    /// Address of the persisted allocator state.
    pub allocator_meta: Address,
    /// When the store was created.
    pub create_time: Timestamp,
}

impl RootBlock {
    /// Block written into both slots of a new store.
    #[must_use]
    pub fn initial(mode: BufferMode, extent: u64, user_extent: u64, now: Timestamp) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            mode,
            commit_counter: 0,
            first_commit_time: 0,
            last_commit_time: 0,
            next_offset: 0,
            extent,
            user_extent,
            commit_record: Address::NULL,
            commit_record_index: Address::NULL,
            allocator_meta: Address::NULL,
            create_time: now,
        }
    }

    /// Encodes the block, checksum included.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(ENCODED_LEN);
        w.bytes(&ROOT_BLOCK_MAGIC)
            .u16(ROOT_BLOCK_VERSION)
            .u8(self.mode.as_byte())
            .bytes(self.uuid.as_bytes())
            .u64(self.commit_counter)
            .u64(self.first_commit_time)
            .u64(self.last_commit_time)
            .u64(self.next_offset)
            .u64(self.extent)
            .u64(self.user_extent)
            .u64(self.commit_record.as_raw())
            .u64(self.commit_record_index.as_raw())
            .u64(self.allocator_meta.as_raw())
            .u64(self.create_time);
        let crc = crc32fast::hash(w.as_slice());
        w.u32(crc);
        w.finish()
    }

    /// Decodes a block read from a slot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for a bad magic, version, mode or checksum.
    pub fn decode(data: &[u8]) -> JournalResult<Self> {
        if data.len() < ENCODED_LEN || data.len() > ROOT_BLOCK_SIZE {
            return Err(JournalError::invalid_format(format!(
                "root block of {} bytes",
                data.len()
            )));
        }
        let mut r = ByteReader::new(data, "root block");
        if r.bytes(4)? != ROOT_BLOCK_MAGIC {
            return Err(JournalError::invalid_format("bad root block magic"));
        }
        let version = r.u16()?;
        if version != ROOT_BLOCK_VERSION {
            return Err(JournalError::invalid_format(format!(
                "unsupported root block version {version}"
            )));
        }
        let mode_byte = r.u8()?;
        let mode = BufferMode::from_byte(mode_byte).ok_or_else(|| {
            JournalError::invalid_format(format!("unknown buffer mode {mode_byte}"))
        })?;
        let uuid = Uuid::from_slice(r.bytes(16)?)
            .map_err(|e| JournalError::invalid_format(e.to_string()))?;

        let block = Self {
            uuid,
            mode,
            commit_counter: r.u64()?,
            first_commit_time: r.u64()?,
            last_commit_time: r.u64()?,
            next_offset: r.u64()?,
            extent: r.u64()?,
            user_extent: r.u64()?,
            commit_record: Address::from_raw(r.u64()?),
            commit_record_index: Address::from_raw(r.u64()?),
            allocator_meta: Address::from_raw(r.u64()?),
            create_time: r.u64()?,
        };

        let body_len = r.position();
        let stored = r.u32()?;
        let actual = crc32fast::hash(&data[..body_len]);
        if stored != actual {
            return Err(JournalError::invalid_format(format!(
                "root block checksum mismatch: expected {stored:08x}, got {actual:08x}"
            )));
        }
        Ok(block)
    }
}

/// Picks the current block from the contents of both slots.
///
/// Returns the winning slot, its block, and the decode error of any slot
/// that was rejected.
///
/// # Errors
///
/// Returns `InvalidFormat` if neither slot holds a valid block.
pub fn select_current(
    a: &[u8],
    b: &[u8],
) -> JournalResult<(RootSlot, RootBlock, Option<(RootSlot, JournalError)>)> {
    match (RootBlock::decode(a), RootBlock::decode(b)) {
        (Ok(block_a), Ok(block_b)) => {
            if block_b.commit_counter > block_a.commit_counter {
                Ok((RootSlot::B, block_b, None))
            } else {
                Ok((RootSlot::A, block_a, None))
            }
        }
        (Ok(block_a), Err(e)) => Ok((RootSlot::A, block_a, Some((RootSlot::B, e)))),
        (Err(e), Ok(block_b)) => Ok((RootSlot::B, block_b, Some((RootSlot::A, e)))),
        (Err(ea), Err(eb)) => Err(JournalError::invalid_format(format!(
            "no valid root block (A: {ea}; B: {eb})"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(counter: u64) -> RootBlock {
        let mut block = RootBlock::initial(BufferMode::DiskWorm, 4096, 3584, 1_000);
        block.commit_counter = counter;
        block.last_commit_time = 1_000 + counter;
        block.commit_record = Address::new(64, 10).unwrap();
        block
    }

    #[test]
    fn encoded_block_fits_slot() {
        let encoded = block(1).encode();
        assert_eq!(encoded.len(), ENCODED_LEN);
        assert!(encoded.len() <= ROOT_BLOCK_SIZE);
    }

    #[test]
    fn decode_ignores_slot_padding() {
        let original = block(3);
        let mut slot = original.encode();
        slot.resize(ROOT_BLOCK_SIZE, 0);

        assert_eq!(RootBlock::decode(&slot).unwrap(), original);
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut data = block(1).encode();
        data[0] = b'X';
        assert!(matches!(
            RootBlock::decode(&data),
            Err(JournalError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn torn_block_rejected() {
        let mut data = block(1).encode();
        data[40] ^= 0xff;
        assert!(RootBlock::decode(&data).is_err());
    }

    #[test]
    fn zeroed_slot_rejected() {
        assert!(RootBlock::decode(&[0u8; ROOT_BLOCK_SIZE]).is_err());
    }

    #[test]
    fn higher_counter_wins() {
        let a = block(4).encode();
        let b = block(5).encode();

        let (slot, current, rejected) = select_current(&a, &b).unwrap();
        assert_eq!(slot, RootSlot::B);
        assert_eq!(current.commit_counter, 5);
        assert!(rejected.is_none());

        let (slot, _, _) = select_current(&b, &a).unwrap();
        assert_eq!(slot, RootSlot::A);
    }

    #[test]
    fn valid_block_survives_torn_sibling() {
        let a = block(7).encode();
        let mut b = block(8).encode();
        b[60] ^= 0x01;

        let (slot, current, rejected) = select_current(&a, &b).unwrap();
        assert_eq!(slot, RootSlot::A);
        assert_eq!(current.commit_counter, 7);
        assert_eq!(rejected.map(|(s, _)| s), Some(RootSlot::B));
    }

    #[test]
    fn both_invalid_is_an_error() {
        let zero = [0u8; ROOT_BLOCK_SIZE];
        assert!(select_current(&zero, &zero).is_err());
    }
}
