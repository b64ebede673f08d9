//! The index of commit records by commit time.
//!
//! Commit times only grow, so the index is an append-only B+tree filled
//! from the left. A node that reaches [`NODE_FANOUT`] entries is sealed:
//! written once and never touched again. A checkpoint rewrites only the
//! partly filled nodes along the right edge, one per level, so its cost
//! follows the height of the tree rather than the number of commits.

use crate::commit::CommitRecord;
use crate::error::{JournalError, JournalResult};
use crate::index::CanonicalCache;
use crate::types::Timestamp;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;
use tessera_storage::{Address, StorageBackend};
use tracing::debug;

/// Entries per node of the commit record index.
pub const NODE_FANOUT: usize = 64;

/// One node. Leaves (level 0) map commit times to record addresses;
/// branches map the first commit time below each child to the child.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    level: u8,
    sealed: bool,
    entries: Vec<(Timestamp, u64)>,
}

impl Node {
    fn read(store: &dyn StorageBackend, address: Address) -> JournalResult<Self> {
        let node: Node = ciborium::de::from_reader(store.read(address)?.as_slice())
            .map_err(|e| JournalError::codec(e.to_string()))?;
        if node.entries.is_empty() {
            return Err(JournalError::invalid_format(format!(
                "empty commit record index node at {address}"
            )));
        }
        Ok(node)
    }

    fn write(
        store: &dyn StorageBackend,
        level: usize,
        sealed: bool,
        entries: &[(Timestamp, Address)],
    ) -> JournalResult<Address> {
        let node = Node {
            level: u8::try_from(level)
                .map_err(|_| JournalError::invalid_operation("commit record index too deep"))?,
            sealed,
            entries: entries.iter().map(|(ts, a)| (*ts, a.as_raw())).collect(),
        };
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&node, &mut buf)
            .map_err(|e| JournalError::codec(e.to_string()))?;
        Ok(store.write(&buf)?)
    }

    fn first(&self) -> Timestamp {
        self.entries.first().map_or(0, |(ts, _)| *ts)
    }

    fn children(&self) -> impl Iterator<Item = (Timestamp, Address)> + '_ {
        self.entries
            .iter()
            .map(|(ts, raw)| (*ts, Address::from_raw(*raw)))
    }
}

/// The persisted shape of the index, as far as the next checkpoint needs it.
#[derive(Debug, Default)]
struct Layout {
    /// `levels[0]` holds leaf entries not yet in a sealed leaf; `levels[n]`
    /// holds sealed nodes of level `n - 1` not yet under a sealed node.
    levels: Vec<Vec<(Timestamp, Address)>>,
    /// Unsealed nodes written by the last checkpoint, bottom up.
    edge: Vec<Address>,
}

impl Layout {
    fn empty() -> Self {
        Self {
            levels: vec![Vec::new()],
            edge: Vec::new(),
        }
    }

    fn load(
        store: &dyn StorageBackend,
        root: Address,
        entries: &mut BTreeMap<Timestamp, Address>,
    ) -> JournalResult<Self> {
        if root.is_null() {
            return Ok(Self::empty());
        }
        let mut node = Node::read(store, root)?;
        collect(store, &node, entries)?;

        let depth = usize::from(node.level) + 1 + usize::from(node.sealed);
        let mut layout = Self {
            levels: vec![Vec::new(); depth],
            edge: Vec::new(),
        };
        let mut address = root;
        loop {
            let level = usize::from(node.level);
            if node.sealed {
                layout.levels[level + 1].push((node.first(), address));
                break;
            }
            layout.edge.push(address);
            if level == 0 {
                layout.levels[0] = node.children().collect();
                break;
            }
            let mut children: Vec<_> = node.children().collect();
            let Some((first, last)) = children.pop() else {
                break;
            };
            layout.levels[level] = children;
            let child = Node::read(store, last)?;
            if child.sealed {
                layout.levels[level].push((first, last));
                break;
            }
            node = child;
            address = last;
        }
        layout.edge.reverse();
        Ok(layout)
    }

    /// Writes sealed nodes that filled up and a fresh right edge. Returns
    /// the new root.
    fn write(&mut self, store: &dyn StorageBackend) -> JournalResult<Address> {
        let mut level = 0;
        while level < self.levels.len() {
            while self.levels[level].len() >= NODE_FANOUT {
                let full: Vec<_> = self.levels[level].drain(..NODE_FANOUT).collect();
                let address = Node::write(store, level, true, &full)?;
                if self.levels.len() == level + 1 {
                    self.levels.push(Vec::new());
                }
                self.levels[level + 1].push((full[0].0, address));
            }
            level += 1;
        }

        let top = self.levels.len() - 1;
        let mut edge = Vec::new();
        let mut child: Option<(Timestamp, Address)> = None;
        for (level, sealed) in self.levels.iter().enumerate() {
            let mut entries = sealed.clone();
            entries.extend(child.take());
            if entries.is_empty() {
                continue;
            }
            if level == top && level > 0 && entries.len() == 1 {
                child = entries.pop();
                break;
            }
            let address = Node::write(store, level, false, &entries)?;
            edge.push(address);
            child = Some((entries[0].0, address));
        }

        for old in std::mem::replace(&mut self.edge, edge) {
            store.delete(old)?;
        }
        Ok(child.map_or(Address::NULL, |(_, address)| address))
    }
}

fn collect(
    store: &dyn StorageBackend,
    node: &Node,
    entries: &mut BTreeMap<Timestamp, Address>,
) -> JournalResult<()> {
    if node.level == 0 {
        entries.extend(node.children());
        return Ok(());
    }
    for (_, address) in node.children() {
        let child = Node::read(store, address)?;
        if child.level + 1 != node.level {
            return Err(JournalError::invalid_format(format!(
                "commit record index node at {address} is on level {}, expected {}",
                child.level,
                node.level - 1
            )));
        }
        collect(store, &child, entries)?;
    }
    Ok(())
}

struct State {
    /// Durable commits, the only ones lookups see.
    entries: BTreeMap<Timestamp, Address>,
    /// Commits added but not yet published.
    staged: Vec<(Timestamp, Address)>,
    layout: Layout,
    checkpoint: Address,
    dirty: bool,
}

impl State {
    fn load(store: &dyn StorageBackend, checkpoint: Address) -> JournalResult<Self> {
        let mut entries = BTreeMap::new();
        let layout = Layout::load(store, checkpoint, &mut entries)?;
        Ok(Self {
            entries,
            staged: Vec::new(),
            layout,
            checkpoint,
            dirty: false,
        })
    }

    fn last_time(&self) -> Timestamp {
        self.staged
            .last()
            .map(|(ts, _)| *ts)
            .or_else(|| self.entries.keys().next_back().copied())
            .unwrap_or(0)
    }
}

/// Maps commit times to the addresses of their commit records.
///
/// A commit is added while it is in flight and published once its root
/// block is durable; lookups only ever see published commits. Resolved
/// records are canonical: every lookup that lands on the same commit
/// returns the same `Arc` while any caller still holds it.
pub struct CommitRecordIndex {
    store: Arc<dyn StorageBackend>,
    state: RwLock<State>,
    records: CanonicalCache<Timestamp, CommitRecord>,
}

impl fmt::Debug for CommitRecordIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("CommitRecordIndex")
            .field("entries", &state.entries.len())
            .field("staged", &state.staged.len())
            .field("height", &state.layout.levels.len())
            .field("checkpoint", &state.checkpoint)
            .finish()
    }
}

impl CommitRecordIndex {
    /// Opens the index checkpointed at `checkpoint`, or an empty one for
    /// [`Address::NULL`].
    pub(crate) fn open(store: Arc<dyn StorageBackend>, checkpoint: Address) -> JournalResult<Self> {
        let state = State::load(store.as_ref(), checkpoint)?;
        Ok(Self {
            store,
            state: RwLock::new(state),
            records: CanonicalCache::new(),
        })
    }

    /// Adds an in-flight commit and makes `record` its canonical instance.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` unless the commit is later than every
    /// commit already indexed.
    pub(crate) fn add(
        &self,
        record: &Arc<CommitRecord>,
        address: Address,
    ) -> JournalResult<Arc<CommitRecord>> {
        let ts = record.timestamp();
        {
            let mut state = self.state.write();
            let last = state.last_time();
            if ts <= last {
                return Err(JournalError::invalid_operation(format!(
                    "commit at {ts} is not after the last indexed commit at {last}"
                )));
            }
            state.staged.push((ts, address));
            state.layout.levels[0].push((ts, address));
            state.dirty = true;
        }
        Ok(self.records.insert(ts, Arc::clone(record)))
    }

    /// Makes the in-flight commits visible to lookups.
    pub(crate) fn publish(&self) {
        let mut state = self.state.write();
        let staged = std::mem::take(&mut state.staged);
        state.entries.extend(staged);
    }

    /// Writes the right edge if anything changed and returns the root.
    pub(crate) fn checkpoint(&self) -> JournalResult<Address> {
        let mut state = self.state.write();
        if !state.dirty {
            return Ok(state.checkpoint);
        }
        let root = state.layout.write(self.store.as_ref())?;
        state.checkpoint = root;
        state.dirty = false;
        debug!(
            %root,
            height = state.layout.levels.len(),
            edge = state.layout.edge.len(),
            "checkpointed commit record index"
        );
        Ok(root)
    }

    /// Discards changes and reloads the state checkpointed at `checkpoint`.
    pub(crate) fn reload(&self, checkpoint: Address) -> JournalResult<()> {
        let mut state = self.state.write();
        if state.checkpoint == checkpoint && !state.dirty && state.staged.is_empty() {
            return Ok(());
        }
        *state = State::load(self.store.as_ref(), checkpoint)?;
        Ok(())
    }

    /// Address of the last checkpoint.
    #[must_use]
    pub fn checkpoint_address(&self) -> Address {
        self.state.read().checkpoint
    }

    /// Number of commits indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// True before the first commit.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All commit times in order.
    #[must_use]
    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.state.read().entries.keys().copied().collect()
    }

    /// The record committed exactly at `ts`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or decoded.
    pub fn get(&self, ts: Timestamp) -> JournalResult<Option<Arc<CommitRecord>>> {
        let Some(address) = self.state.read().entries.get(&ts).copied() else {
            return Ok(None);
        };
        self.resolve(ts, address).map(Some)
    }

    /// The record with the greatest commit time not after `ts`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or decoded.
    pub fn find(&self, ts: Timestamp) -> JournalResult<Option<Arc<CommitRecord>>> {
        let found = self
            .state
            .read()
            .entries
            .range(..=ts)
            .next_back()
            .map(|(t, a)| (*t, *a));
        match found {
            Some((t, address)) => self.resolve(t, address).map(Some),
            None => Ok(None),
        }
    }

    /// Commit time of the record [`CommitRecordIndex::find`] returns.
    #[must_use]
    pub fn find_time(&self, ts: Timestamp) -> Option<Timestamp> {
        self.state
            .read()
            .entries
            .range(..=ts)
            .next_back()
            .map(|(t, _)| *t)
    }

    /// The first commit time strictly after `ts`.
    ///
    /// # Errors
    ///
    /// Currently never fails.
    pub fn find_next(&self, ts: Timestamp) -> JournalResult<Option<Timestamp>> {
        Ok(self
            .state
            .read()
            .entries
            .range((Bound::Excluded(ts), Bound::Unbounded))
            .next()
            .map(|(t, _)| *t))
    }

    fn resolve(&self, ts: Timestamp, address: Address) -> JournalResult<Arc<CommitRecord>> {
        self.records.get_or_try_insert(ts, || {
            let record = CommitRecord::decode(&self.store.read(address)?)?;
            if record.timestamp() != ts {
                return Err(JournalError::invalid_format(format!(
                    "commit record at {address} has time {} but is indexed at {ts}",
                    record.timestamp()
                )));
            }
            Ok(record)
        })
    }
}
