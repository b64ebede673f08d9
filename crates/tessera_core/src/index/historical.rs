use crate::error::{JournalError, JournalResult};
use crate::index::{IndexMetadata, IndexView, Tuple, VersionedBTree};
use tessera_storage::{Address, StorageBackend};

/// An immutable view of a named index as of one checkpoint.
///
/// Instances are canonical per `(name, checkpoint)`: resolving the same
/// checkpoint again yields the same `Arc` while any caller still holds it.
#[derive(Debug)]
pub struct ReadOnlyIndex {
    name: String,
    checkpoint: Address,
    tree: VersionedBTree,
}

impl ReadOnlyIndex {
    pub(crate) fn load(store: &dyn StorageBackend, checkpoint: Address) -> JournalResult<Self> {
        let tree = VersionedBTree::load(store, checkpoint)?;
        Ok(Self {
            name: tree.metadata().name.clone(),
            checkpoint,
            tree,
        })
    }

    /// Address of the checkpoint this view reads.
    #[must_use]
    pub fn checkpoint_address(&self) -> Address {
        self.checkpoint
    }

    /// Registration metadata.
    #[must_use]
    pub fn metadata(&self) -> &IndexMetadata {
        self.tree.metadata()
    }

    /// The underlying tree.
    #[must_use]
    pub fn tree(&self) -> &VersionedBTree {
        &self.tree
    }

    fn read_only(&self) -> JournalError {
        JournalError::ReadOnly {
            index: self.name.clone(),
        }
    }
}

impl IndexView for ReadOnlyIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn tuple(&self, key: &[u8]) -> JournalResult<Option<Tuple>> {
        Ok(self.tree.tuple(key).cloned())
    }

    fn insert(&self, _key: &[u8], _value: &[u8]) -> JournalResult<Option<Vec<u8>>> {
        Err(self.read_only())
    }

    fn remove(&self, _key: &[u8]) -> JournalResult<Option<Vec<u8>>> {
        Err(self.read_only())
    }

    fn entries(&self) -> JournalResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .tree
            .iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect())
    }

    fn len(&self) -> JournalResult<usize> {
        Ok(self.tree.len())
    }
}
