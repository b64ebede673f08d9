//! The unisolated view of a named index.

use crate::error::{JournalError, JournalResult};
use crate::index::{IndexMetadata, IndexView, Tuple, VersionedBTree, UNCOMMITTED};
use crate::types::Timestamp;
use parking_lot::{ReentrantMutex, RwLock};
use std::fmt;
use std::sync::Arc;
use tessera_storage::{Address, StorageBackend};
use tracing::debug;

struct LiveState {
    tree: VersionedBTree,
    checkpoint: Address,
    dirty: bool,
}

/// Serializes everything that mutates the unisolated scope: the write
/// service holds it for a whole commit group, facade writes and facade
/// commits for one call. Reentrant, so task bodies on the writer thread
/// may go through the facade.
pub(crate) type WriteGate = Arc<ReentrantMutex<()>>;

/// The single live, mutable instance of a named index.
///
/// Writes carry [`UNCOMMITTED`](crate::index::UNCOMMITTED) as their version
/// until [`LiveIndex::seal`] stamps them with the commit time.
/// [`LiveIndex::checkpoint`] writes the tree to the store when it changed;
/// [`LiveIndex::revert`] throws away everything since a given checkpoint.
pub struct LiveIndex {
    name: String,
    store: Arc<dyn StorageBackend>,
    state: RwLock<LiveState>,
}

impl fmt::Debug for LiveIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("LiveIndex")
            .field("name", &self.name)
            .field("checkpoint", &state.checkpoint)
            .field("dirty", &state.dirty)
            .finish()
    }
}

impl LiveIndex {
    /// Creates an empty index and checkpoints it.
    pub(crate) fn create(metadata: IndexMetadata, store: Arc<dyn StorageBackend>) -> JournalResult<Self> {
        let tree = VersionedBTree::new(metadata);
        let checkpoint = tree.write_checkpoint(store.as_ref())?;
        Ok(Self {
            name: tree.metadata().name.clone(),
            store,
            state: RwLock::new(LiveState {
                tree,
                checkpoint,
                dirty: false,
            }),
        })
    }

    /// Loads the index checkpointed at `checkpoint`.
    pub(crate) fn load(store: Arc<dyn StorageBackend>, checkpoint: Address) -> JournalResult<Self> {
        let tree = VersionedBTree::load(store.as_ref(), checkpoint)?;
        Ok(Self {
            name: tree.metadata().name.clone(),
            store,
            state: RwLock::new(LiveState {
                tree,
                checkpoint,
                dirty: false,
            }),
        })
    }

    /// Registration metadata.
    #[must_use]
    pub fn metadata(&self) -> IndexMetadata {
        self.state.read().tree.metadata().clone()
    }

    /// Address of the last checkpoint.
    #[must_use]
    pub fn checkpoint_address(&self) -> Address {
        self.state.read().checkpoint
    }

    /// True if written since the last checkpoint.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    /// Stamps every uncommitted write with `commit_time`.
    pub(crate) fn seal(&self, commit_time: Timestamp) -> usize {
        let mut state = self.state.write();
        let sealed = state.tree.restamp(UNCOMMITTED, commit_time);
        if sealed > 0 {
            state.dirty = true;
        }
        sealed
    }

    /// Writes the tree if it changed and returns the current checkpoint.
    pub(crate) fn checkpoint(&self) -> JournalResult<Address> {
        let mut state = self.state.write();
        if !state.dirty {
            return Ok(state.checkpoint);
        }
        let address = state.tree.write_checkpoint(self.store.as_ref())?;
        let previous = std::mem::replace(&mut state.checkpoint, address);
        if !previous.is_null() {
            self.store.delete(previous)?;
        }
        state.dirty = false;
        debug!(index = %self.name, %address, "checkpointed index");
        Ok(address)
    }

    /// Restores the state checkpointed at `checkpoint`.
    pub(crate) fn revert(&self, checkpoint: Address) -> JournalResult<()> {
        let mut state = self.state.write();
        if state.checkpoint == checkpoint && !state.dirty {
            return Ok(());
        }
        state.tree = VersionedBTree::load(self.store.as_ref(), checkpoint)?;
        state.checkpoint = checkpoint;
        state.dirty = false;
        debug!(index = %self.name, %checkpoint, "reverted index");
        Ok(())
    }

    /// Applies a merged write as an uncommitted tuple.
    pub(crate) fn apply(&self, key: Vec<u8>, value: Option<Vec<u8>>) {
        let mut state = self.state.write();
        state.tree.put(
            key,
            Tuple {
                value,
                version: UNCOMMITTED,
            },
        );
        state.dirty = true;
    }

    /// Runs `f` against the current tree.
    pub(crate) fn with_tree<R>(&self, f: impl FnOnce(&VersionedBTree) -> R) -> R {
        f(&self.state.read().tree)
    }
}

impl IndexView for LiveIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn tuple(&self, key: &[u8]) -> JournalResult<Option<Tuple>> {
        Ok(self.state.read().tree.tuple(key).cloned())
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> JournalResult<Option<Vec<u8>>> {
        let mut state = self.state.write();
        state.dirty = true;
        Ok(state.tree.insert(key, value, UNCOMMITTED))
    }

    fn remove(&self, key: &[u8]) -> JournalResult<Option<Vec<u8>>> {
        let mut state = self.state.write();
        let previous = state.tree.remove(key, UNCOMMITTED);
        if previous.is_some() {
            state.dirty = true;
        }
        Ok(previous)
    }

    fn entries(&self) -> JournalResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .state
            .read()
            .tree
            .iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect())
    }

    fn len(&self) -> JournalResult<usize> {
        Ok(self.state.read().tree.len())
    }
}

/// Read access to a live index for unisolated read-only tasks.
#[derive(Debug, Clone)]
pub struct LiveReader(pub(crate) Arc<LiveIndex>);

impl IndexView for LiveReader {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn tuple(&self, key: &[u8]) -> JournalResult<Option<Tuple>> {
        self.0.tuple(key)
    }

    fn insert(&self, _key: &[u8], _value: &[u8]) -> JournalResult<Option<Vec<u8>>> {
        Err(JournalError::ReadOnly {
            index: self.0.name().to_string(),
        })
    }

    fn remove(&self, _key: &[u8]) -> JournalResult<Option<Vec<u8>>> {
        Err(JournalError::ReadOnly {
            index: self.0.name().to_string(),
        })
    }

    fn entries(&self) -> JournalResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.0.entries()
    }

    fn len(&self) -> JournalResult<usize> {
        self.0.len()
    }
}

/// The live index as the journal facade hands it out.
///
/// Reads go straight to the index. Writes first take the write gate, so
/// they wait while the write service has a commit group open and never
/// land between a group's checkpoints and its commit.
#[derive(Clone)]
pub struct LiveHandle {
    index: Arc<LiveIndex>,
    gate: WriteGate,
}

impl fmt::Debug for LiveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LiveHandle").field(&self.index).finish()
    }
}

impl LiveHandle {
    pub(crate) fn new(index: Arc<LiveIndex>, gate: WriteGate) -> Self {
        Self { index, gate }
    }

    /// Registration metadata.
    #[must_use]
    pub fn metadata(&self) -> IndexMetadata {
        self.index.metadata()
    }

    /// True if written since the last checkpoint.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.index.is_dirty()
    }

    /// Address of the last checkpoint.
    #[must_use]
    pub fn checkpoint_address(&self) -> Address {
        self.index.checkpoint_address()
    }
}

impl IndexView for LiveHandle {
    fn name(&self) -> &str {
        self.index.name()
    }

    fn tuple(&self, key: &[u8]) -> JournalResult<Option<Tuple>> {
        self.index.tuple(key)
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> JournalResult<Option<Vec<u8>>> {
        let _gate = self.gate.lock();
        self.index.insert(key, value)
    }

    fn remove(&self, key: &[u8]) -> JournalResult<Option<Vec<u8>>> {
        let _gate = self.gate.lock();
        self.index.remove(key)
    }

    fn entries(&self) -> JournalResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.index.entries()
    }

    fn len(&self) -> JournalResult<usize> {
        self.index.len()
    }
}
