//! The versioned ordered map behind every named index.
//!
//! Each key maps to a [`Tuple`] carrying the commit time that last wrote
//! it. Deletes leave a marker tuple behind so that conflict detection can
//! still see *when* the key was removed. A checkpoint serializes the whole
//! map into one record; the journal only ever sees the resulting address.

use crate::error::{JournalError, JournalResult};
use crate::index::IndexMetadata;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use tessera_storage::{Address, StorageBackend};

/// Version carried by unisolated writes until the commit that publishes
/// them restamps the tuple with its commit time.
pub const UNCOMMITTED: Timestamp = Timestamp::MAX;

/// A value and the time it was written. `value == None` marks a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuple {
    /// The stored value, or `None` for a delete marker.
    pub value: Option<Vec<u8>>,
    /// Revision time of the write.
    pub version: Timestamp,
}

impl Tuple {
    /// A live value.
    #[must_use]
    pub fn value(value: Vec<u8>, version: Timestamp) -> Self {
        Self {
            value: Some(value),
            version,
        }
    }

    /// A delete marker.
    #[must_use]
    pub fn deleted(version: Timestamp) -> Self {
        Self {
            value: None,
            version,
        }
    }

    /// True for a delete marker.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.value.is_none()
    }
}

#[derive(Serialize, Deserialize)]
struct Checkpoint {
    metadata: IndexMetadata,
    entries: Vec<(Vec<u8>, Tuple)>,
}

/// Ordered map of byte keys to versioned tuples.
#[derive(Debug, Clone)]
pub struct VersionedBTree {
    metadata: IndexMetadata,
    entries: BTreeMap<Vec<u8>, Tuple>,
}

impl VersionedBTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new(metadata: IndexMetadata) -> Self {
        Self {
            metadata,
            entries: BTreeMap::new(),
        }
    }

    /// Metadata the tree was registered with.
    #[must_use]
    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    /// The tuple for `key`, delete markers included.
    #[must_use]
    pub fn tuple(&self, key: &[u8]) -> Option<&Tuple> {
        self.entries.get(key)
    }

    /// The visible value for `key`.
    #[must_use]
    pub fn lookup(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).and_then(|t| t.value.as_deref())
    }

    /// Writes `value` at `version`, returning the previously visible value.
    pub fn insert(&mut self, key: &[u8], value: &[u8], version: Timestamp) -> Option<Vec<u8>> {
        self.put(key.to_vec(), Tuple::value(value.to_vec(), version))
    }

    /// Replaces the tuple for `key`, returning the previously visible value.
    pub fn put(&mut self, key: Vec<u8>, tuple: Tuple) -> Option<Vec<u8>> {
        self.entries.insert(key, tuple).and_then(|old| old.value)
    }

    /// Marks a visible key deleted at `version`.
    ///
    /// A key that is absent or already deleted is left untouched.
    pub fn remove(&mut self, key: &[u8], version: Timestamp) -> Option<Vec<u8>> {
        let tuple = self.entries.get_mut(key)?;
        if tuple.is_deleted() {
            return None;
        }
        tuple.version = version;
        tuple.value.take()
    }

    /// Drops the entry for `key` entirely, marker included.
    pub fn erase(&mut self, key: &[u8]) -> Option<Tuple> {
        self.entries.remove(key)
    }

    /// Rewrites every tuple stamped `from` to `to`. Returns how many changed.
    pub fn restamp(&mut self, from: Timestamp, to: Timestamp) -> usize {
        let mut changed = 0;
        for tuple in self.entries.values_mut().filter(|t| t.version == from) {
            tuple.version = to;
            changed += 1;
        }
        changed
    }

    /// Visible entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries
            .iter()
            .filter_map(|(k, t)| t.value.as_deref().map(|v| (k.as_slice(), v)))
    }

    /// All tuples in key order, delete markers included.
    pub fn tuples(&self) -> impl Iterator<Item = (&Vec<u8>, &Tuple)> {
        self.entries.iter()
    }

    /// Visible entry with the greatest key not above `key`.
    #[must_use]
    pub fn floor(&self, key: &[u8]) -> Option<(&[u8], &[u8])> {
        self.entries
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
            .rev()
            .find_map(|(k, t)| t.value.as_deref().map(|v| (k.as_slice(), v)))
    }

    /// Visible entry with the least key strictly above `key`.
    #[must_use]
    pub fn higher(&self, key: &[u8]) -> Option<(&[u8], &[u8])> {
        self.entries
            .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
            .find_map(|(k, t)| t.value.as_deref().map(|v| (k.as_slice(), v)))
    }

    /// Number of visible entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().filter(|t| !t.is_deleted()).count()
    }

    /// True when no entry is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serializes the tree.
    ///
    /// # Errors
    ///
    /// Returns a codec error if serialization fails.
    pub fn encode(&self) -> JournalResult<Vec<u8>> {
        let checkpoint = Checkpoint {
            metadata: self.metadata.clone(),
            entries: self
                .entries
                .iter()
                .map(|(k, t)| (k.clone(), t.clone()))
                .collect(),
        };
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&checkpoint, &mut buf)
            .map_err(|e| JournalError::codec(e.to_string()))?;
        Ok(buf)
    }

    /// Deserializes a tree.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the bytes are not a checkpoint.
    pub fn decode(bytes: &[u8]) -> JournalResult<Self> {
        let checkpoint: Checkpoint =
            ciborium::de::from_reader(bytes).map_err(|e| JournalError::codec(e.to_string()))?;
        Ok(Self {
            metadata: checkpoint.metadata,
            entries: checkpoint.entries.into_iter().collect(),
        })
    }

    /// Writes a checkpoint record and returns its address.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub fn write_checkpoint(&self, store: &dyn StorageBackend) -> JournalResult<Address> {
        Ok(store.write(&self.encode()?)?)
    }

    /// Loads the tree checkpointed at `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or decoded.
    pub fn load(store: &dyn StorageBackend, address: Address) -> JournalResult<Self> {
        Self::decode(&store.read(address)?)
    }
}
