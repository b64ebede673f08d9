//! Commit records.
//!
//! ## Format
//!
//! ```text
//! timestamp u64 | counter u64 | count u32 | count * (name_len u16 | name | address u64)
//! ```
//!
//! Entries are sorted by name.

use crate::codec::{ByteReader, ByteWriter};
use crate::error::{JournalError, JournalResult};
use crate::types::Timestamp;
use tessera_storage::Address;

/// Snapshot of every named index's checkpoint address as of one commit.
///
/// Commit records are immutable. The journal hands them out as canonical
/// `Arc`s, so two lookups of the same commit compare equal by pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    timestamp: Timestamp,
    counter: u64,
    roots: Vec<(String, Address)>,
}

impl CommitRecord {
    /// The record of a journal without commits.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            timestamp: 0,
            counter: 0,
            roots: Vec::new(),
        }
    }

    /// Builds a record; `roots` are sorted by name.
    #[must_use]
    pub fn new(timestamp: Timestamp, counter: u64, mut roots: Vec<(String, Address)>) -> Self {
        roots.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            timestamp,
            counter,
            roots,
        }
    }

    /// Commit time.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Commit counter.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Checkpoint address of `name`, if the index existed at this commit.
    #[must_use]
    pub fn root(&self, name: &str) -> Option<Address> {
        self.roots
            .binary_search_by(|(n, _)| n.as_str().cmp(name))
            .ok()
            .map(|i| self.roots[i].1)
    }

    /// All `(name, address)` pairs in name order.
    #[must_use]
    pub fn roots(&self) -> &[(String, Address)] {
        &self.roots
    }

    /// Index names in this commit.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.roots.iter().map(|(n, _)| n.as_str())
    }

    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if an index name exceeds `u16::MAX` bytes.
    pub fn encode(&self) -> JournalResult<Vec<u8>> {
        let mut w = ByteWriter::with_capacity(20 + self.roots.len() * 24);
        w.u64(self.timestamp)
            .u64(self.counter)
            .u32(self.roots.len() as u32);
        for (name, address) in &self.roots {
            let len = u16::try_from(name.len()).map_err(|_| {
                JournalError::invalid_operation(format!("index name too long: {} bytes", name.len()))
            })?;
            w.u16(len).bytes(name.as_bytes()).u64(address.as_raw());
        }
        Ok(w.finish())
    }

    /// Decodes a record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for truncated data or non UTF-8 names.
    pub fn decode(data: &[u8]) -> JournalResult<Self> {
        let mut r = ByteReader::new(data, "commit record");
        let timestamp = r.u64()?;
        let counter = r.u64()?;
        let count = r.u32()? as usize;
        let mut roots = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let len = r.u16()? as usize;
            let name = std::str::from_utf8(r.bytes(len)?)
                .map_err(|e| JournalError::invalid_format(format!("index name: {e}")))?
                .to_string();
            let address = Address::from_raw(r.u64()?);
            roots.push((name, address));
        }
        Ok(Self::new(timestamp, counter, roots))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::new(n * 100, 10).unwrap()
    }

    #[test]
    fn roots_are_sorted_and_searchable() {
        let record = CommitRecord::new(
            10,
            1,
            vec![("zeta".into(), addr(1)), ("alpha".into(), addr(2))],
        );

        assert_eq!(record.names().collect::<Vec<_>>(), vec!["alpha", "zeta"]);
        assert_eq!(record.root("zeta"), Some(addr(1)));
        assert_eq!(record.root("beta"), None);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let record = CommitRecord::new(
            1_700_000_000_000,
            42,
            vec![("abc".into(), addr(3)), ("def".into(), addr(4))],
        );
        let decoded = CommitRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn truncated_record_rejected() {
        let record = CommitRecord::new(1, 1, vec![("abc".into(), addr(1))]);
        let bytes = record.encode().unwrap();
        assert!(matches!(
            CommitRecord::decode(&bytes[..bytes.len() - 1]),
            Err(JournalError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn empty_record() {
        let record = CommitRecord::empty();
        assert_eq!(record.timestamp(), 0);
        assert_eq!(record.counter(), 0);
        assert!(record.roots().is_empty());
    }
}
