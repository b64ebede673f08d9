//! Record addresses.
//!
//! An address packs the byte offset of a record (relative to the start of
//! the user region) and its payload length into a single `u64`:
//!
//! ```text
//! | offset (40 bits) | byte count (24 bits) |
//! ```
//!
//! A record always has a non-zero byte count, so the all-zero value is
//! free to serve as the null address.

use std::fmt;

/// Number of bits used for the record offset.
pub const OFFSET_BITS: u32 = 40;

/// Number of bits used for the payload byte count.
pub const BYTE_COUNT_BITS: u32 = 64 - OFFSET_BITS;

/// Largest payload a single record can hold.
pub const MAX_RECORD_SIZE: usize = (1 << BYTE_COUNT_BITS) - 1;

/// Largest offset an address can express.
pub const MAX_OFFSET: u64 = (1 << OFFSET_BITS) - 1;

const BYTE_COUNT_MASK: u64 = (1 << BYTE_COUNT_BITS) - 1;

/// Opaque handle for a record written to a storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address {
    /// The null address.
    pub const NULL: Address = Address(0);

    /// Builds an address from an offset and payload length.
    ///
    /// Returns `None` when either component does not fit.
    #[must_use]
    pub fn new(offset: u64, byte_count: usize) -> Option<Self> {
        if offset > MAX_OFFSET || byte_count > MAX_RECORD_SIZE {
            return None;
        }
        Some(Self((offset << BYTE_COUNT_BITS) | byte_count as u64))
    }

    /// Reinterprets a raw encoded value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw encoded value.
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// Offset of the record within the user region.
    #[must_use]
    pub const fn offset(self) -> u64 {
        self.0 >> BYTE_COUNT_BITS
    }

    /// Payload length in bytes.
    #[must_use]
    pub const fn byte_count(self) -> usize {
        (self.0 & BYTE_COUNT_MASK) as usize
    }

    /// Returns true for [`Address::NULL`].
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "addr:null")
        } else {
            write!(f, "addr:{}+{}", self.offset(), self.byte_count())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn null_address() {
        assert!(Address::NULL.is_null());
        assert_eq!(Address::NULL.offset(), 0);
        assert_eq!(Address::NULL.byte_count(), 0);
        assert_eq!(format!("{}", Address::NULL), "addr:null");
    }

    #[test]
    fn first_record_is_not_null() {
        let addr = Address::new(0, 1).unwrap();
        assert!(!addr.is_null());
        assert_eq!(addr.offset(), 0);
        assert_eq!(addr.byte_count(), 1);
    }

    #[test]
    fn rejects_out_of_range_components() {
        assert!(Address::new(MAX_OFFSET + 1, 1).is_none());
        assert!(Address::new(0, MAX_RECORD_SIZE + 1).is_none());
        assert!(Address::new(MAX_OFFSET, MAX_RECORD_SIZE).is_some());
    }

    proptest! {
        #[test]
        fn components_survive_packing(offset in 0..=MAX_OFFSET, len in 1..=MAX_RECORD_SIZE) {
            let addr = Address::new(offset, len).unwrap();
            prop_assert_eq!(addr.offset(), offset);
            prop_assert_eq!(addr.byte_count(), len);
            prop_assert_eq!(Address::from_raw(addr.as_raw()), addr);
        }
    }
}
