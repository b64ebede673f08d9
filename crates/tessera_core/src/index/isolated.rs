use crate::error::{JournalError, JournalResult};
use crate::index::{IndexView, LiveIndex, ReadOnlyIndex, Tuple};
use crate::types::{Timestamp, TxId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A read-write transaction's view of a named index.
///
/// Writes go to a private write set layered over the historical state the
/// transaction reads from. Nothing is visible outside the transaction
/// until validation and merge at commit.
#[derive(Debug)]
pub struct IsolatedIndex {
    tx: TxId,
    base: Arc<ReadOnlyIndex>,
    writes: Mutex<BTreeMap<Vec<u8>, Tuple>>,
    open: Arc<AtomicBool>,
}

impl IsolatedIndex {
    pub(crate) fn new(tx: TxId, base: Arc<ReadOnlyIndex>, open: Arc<AtomicBool>) -> Self {
        Self {
            tx,
            base,
            writes: Mutex::new(BTreeMap::new()),
            open,
        }
    }

    /// The historical state under the write set.
    #[must_use]
    pub fn base(&self) -> &Arc<ReadOnlyIndex> {
        &self.base
    }

    /// True if the write set is not empty.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.writes.lock().is_empty()
    }

    /// Number of keys in the write set.
    #[must_use]
    pub fn write_set_len(&self) -> usize {
        self.writes.lock().len()
    }

    fn version(&self) -> Timestamp {
        self.tx.start()
    }

    fn ensure_open(&self) -> JournalResult<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(JournalError::TxNotActive { tx: self.tx });
        }
        Ok(())
    }

    fn base_visible(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.base.tree().lookup(key).map(<[u8]>::to_vec)
    }

    /// True when no live write newer than `read_basis` touches the write set.
    pub(crate) fn validate(&self, live: &LiveIndex, read_basis: Timestamp) -> bool {
        let writes = self.writes.lock();
        live.with_tree(|tree| {
            writes.keys().all(|key| {
                tree.tuple(key)
                    .map_or(true, |tuple| tuple.version <= read_basis)
            })
        })
    }

    /// Copies the write set into the live index.
    pub(crate) fn merge_into(&self, live: &LiveIndex) -> usize {
        let writes = self.writes.lock();
        for (key, tuple) in writes.iter() {
            live.apply(key.clone(), tuple.value.clone());
        }
        writes.len()
    }
}

impl IndexView for IsolatedIndex {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn tuple(&self, key: &[u8]) -> JournalResult<Option<Tuple>> {
        if let Some(tuple) = self.writes.lock().get(key) {
            return Ok(Some(tuple.clone()));
        }
        self.base.tuple(key)
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> JournalResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let mut writes = self.writes.lock();
        let tuple = Tuple::value(value.to_vec(), self.version());
        match writes.insert(key.to_vec(), tuple) {
            Some(previous) => Ok(previous.value),
            None => Ok(self.base_visible(key)),
        }
    }

    fn remove(&self, key: &[u8]) -> JournalResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let mut writes = self.writes.lock();
        let in_base = self.base.tree().lookup(key).is_some();
        match writes.get(key).map(|t| t.value.clone()) {
            // Already deleted in this transaction.
            Some(None) => Ok(None),
            Some(Some(previous)) => {
                if in_base {
                    writes.insert(key.to_vec(), Tuple::deleted(self.version()));
                } else {
                    writes.remove(key);
                }
                Ok(Some(previous))
            }
            None if in_base => {
                writes.insert(key.to_vec(), Tuple::deleted(self.version()));
                Ok(self.base_visible(key))
            }
            None => Ok(None),
        }
    }

    fn entries(&self) -> JournalResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let writes = self.writes.lock();
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .base
            .tree()
            .iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        for (key, tuple) in writes.iter() {
            match &tuple.value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexMetadata, VersionedBTree};
    use tessera_storage::{open_backend, StoreOptions};

    const START: Timestamp = 5_000;

    fn base_with(entries: &[(&[u8], &[u8])]) -> Arc<ReadOnlyIndex> {
        let store = open_backend(&StoreOptions::default().initial_extent(64 * 1024)).unwrap();
        let mut tree = VersionedBTree::new(IndexMetadata::new("iso"));
        for (k, v) in entries {
            tree.insert(k, v, 1_000);
        }
        let addr = tree.write_checkpoint(store.as_ref()).unwrap();
        Arc::new(ReadOnlyIndex::load(store.as_ref(), addr).unwrap())
    }

    fn isolated(base: Arc<ReadOnlyIndex>) -> IsolatedIndex {
        IsolatedIndex::new(TxId::read_write(START), base, Arc::new(AtomicBool::new(true)))
    }

    #[test]
    fn writes_shadow_base() {
        let index = isolated(base_with(&[(b"a", b"base")]));

        assert_eq!(index.insert(b"a", b"mine").unwrap(), Some(b"base".to_vec()));
        assert_eq!(index.lookup(b"a").unwrap(), Some(b"mine".to_vec()));
        assert_eq!(index.base().tree().lookup(b"a"), Some(&b"base"[..]));
        assert_eq!(index.tuple(b"a").unwrap().unwrap().version, START);
    }

    #[test]
    fn delete_after_delete_returns_none() {
        let index = isolated(base_with(&[(b"a", b"1")]));

        assert_eq!(index.remove(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(index.remove(b"a").unwrap(), None);
        assert!(index.tuple(b"a").unwrap().unwrap().is_deleted());
        assert_eq!(index.write_set_len(), 1);
    }

    #[test]
    fn local_insert_then_delete_leaves_no_marker() {
        let index = isolated(base_with(&[]));

        index.insert(b"new", b"v").unwrap();
        assert_eq!(index.remove(b"new").unwrap(), Some(b"v".to_vec()));

        assert!(!index.is_dirty());
        assert_eq!(index.tuple(b"new").unwrap(), None);
    }

    #[test]
    fn delete_of_unseen_key_is_noop() {
        let index = isolated(base_with(&[(b"a", b"1")]));
        assert_eq!(index.remove(b"ghost").unwrap(), None);
        assert!(!index.is_dirty());
    }

    #[test]
    fn overwrite_then_delete_of_base_key_keeps_marker() {
        let index = isolated(base_with(&[(b"a", b"1")]));
        index.insert(b"a", b"2").unwrap();

        assert_eq!(index.remove(b"a").unwrap(), Some(b"2".to_vec()));
        assert!(index.tuple(b"a").unwrap().unwrap().is_deleted());
    }

    #[test]
    fn entries_merge_write_set() {
        let index = isolated(base_with(&[(b"a", b"1"), (b"b", b"2")]));
        index.remove(b"a").unwrap();
        index.insert(b"c", b"3").unwrap();

        let keys: Vec<Vec<u8>> = index.entries().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(index.len().unwrap(), 2);
    }

    #[test]
    fn closed_transaction_rejects_writes() {
        let open = Arc::new(AtomicBool::new(true));
        let index = IsolatedIndex::new(TxId::read_write(START), base_with(&[]), open.clone());
        open.store(false, Ordering::Release);

        assert!(matches!(
            index.insert(b"k", b"v"),
            Err(JournalError::TxNotActive { .. })
        ));
    }
}
