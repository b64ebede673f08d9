//! Fixed layout of a journal region.
//!
//! ```text
//! +----------------+----------------+-------------------------------+
//! | root slot A    | root slot B    | user region ...               |
//! | 256 bytes      | 256 bytes      | addressed from offset 0       |
//! +----------------+----------------+-------------------------------+
//! ```

/// Size of one root block slot.
pub const ROOT_BLOCK_SIZE: usize = 256;

/// Size of the header preceding the user region.
pub const HEADER_SIZE: u64 = 2 * ROOT_BLOCK_SIZE as u64;

/// One of the two alternating root block slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootSlot {
    /// The slot at offset 0.
    A,
    /// The slot at offset 256.
    B,
}

impl RootSlot {
    /// Byte offset of the slot within the region.
    #[must_use]
    pub const fn offset(self) -> u64 {
        match self {
            Self::A => 0,
            Self::B => ROOT_BLOCK_SIZE as u64,
        }
    }

    /// The other slot.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_tile_the_header() {
        assert_eq!(RootSlot::A.offset(), 0);
        assert_eq!(RootSlot::B.offset() + ROOT_BLOCK_SIZE as u64, HEADER_SIZE);
        assert_eq!(RootSlot::A.other(), RootSlot::B);
        assert_eq!(RootSlot::B.other().other(), RootSlot::B);
    }
}
