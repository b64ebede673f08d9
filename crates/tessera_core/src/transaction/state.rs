//! Transaction state.

use crate::commit::CommitRecord;
use crate::error::{JournalError, JournalResult};
use crate::index::{IndexView, IsolatedIndex};
use crate::types::{IsolationLevel, Timestamp, TxId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// The transaction accepts reads and writes.
    Active,
    /// Commit or abort is in progress.
    Preparing,
    /// The transaction committed.
    Committed,
    /// The transaction aborted.
    Aborted,
}

/// An active transaction.
///
/// Resolved views are cached for the life of the transaction, so resolving
/// the same index twice yields the same instance.
pub struct Tx {
    id: TxId,
    level: IsolationLevel,
    basis: Arc<CommitRecord>,
    state: Mutex<TxState>,
    open: Arc<AtomicBool>,
    views: Mutex<HashMap<String, Arc<dyn IndexView>>>,
    isolated: Mutex<BTreeMap<String, Arc<IsolatedIndex>>>,
}

impl std::fmt::Debug for Tx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("id", &self.id)
            .field("level", &self.level)
            .field("read_basis", &self.read_basis())
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl Tx {
    pub(crate) fn new(id: TxId, level: IsolationLevel, basis: Arc<CommitRecord>) -> Self {
        Self {
            id,
            level,
            basis,
            state: Mutex::new(TxState::Active),
            open: Arc::new(AtomicBool::new(true)),
            views: Mutex::new(HashMap::new()),
            isolated: Mutex::new(BTreeMap::new()),
        }
    }

    /// The transaction identifier.
    #[must_use]
    pub fn id(&self) -> TxId {
        self.id
    }

    /// The isolation level the transaction was started with.
    #[must_use]
    pub fn level(&self) -> IsolationLevel {
        self.level
    }

    /// Commit time of the state the transaction reads, zero before any commit.
    #[must_use]
    pub fn read_basis(&self) -> Timestamp {
        self.basis.timestamp()
    }

    /// The commit record the transaction reads.
    #[must_use]
    pub fn basis(&self) -> &Arc<CommitRecord> {
        &self.basis
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TxState {
        *self.state.lock()
    }

    /// True while the transaction accepts operations.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TxState::Active
    }

    pub(crate) fn open_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.open)
    }

    /// Moves an active transaction into commit or abort processing.
    pub(crate) fn prepare(&self) -> JournalResult<()> {
        let mut state = self.state.lock();
        if *state != TxState::Active {
            return Err(JournalError::TxNotActive { tx: self.id });
        }
        *state = TxState::Preparing;
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    pub(crate) fn finish(&self, committed: bool) {
        *self.state.lock() = if committed {
            TxState::Committed
        } else {
            TxState::Aborted
        };
        self.open.store(false, Ordering::Release);
    }

    /// Returns the cached view of `name`, resolving it on first use.
    pub(crate) fn view_or_try_insert(
        &self,
        name: &str,
        resolve: impl FnOnce() -> JournalResult<Arc<dyn IndexView>>,
    ) -> JournalResult<Arc<dyn IndexView>> {
        let mut views = self.views.lock();
        if let Some(view) = views.get(name) {
            return Ok(Arc::clone(view));
        }
        let view = resolve()?;
        views.insert(name.to_string(), Arc::clone(&view));
        Ok(view)
    }

    /// Like [`Tx::view_or_try_insert`], remembering the view's write set
    /// for validation and merge.
    pub(crate) fn isolated_or_try_insert(
        &self,
        name: &str,
        resolve: impl FnOnce() -> JournalResult<IsolatedIndex>,
    ) -> JournalResult<Arc<dyn IndexView>> {
        self.view_or_try_insert(name, || {
            let view = Arc::new(resolve()?);
            self.isolated
                .lock()
                .insert(name.to_string(), Arc::clone(&view));
            Ok(view as Arc<dyn IndexView>)
        })
    }

    /// Views holding writes, in name order.
    pub(crate) fn dirty_views(&self) -> Vec<(String, Arc<IsolatedIndex>)> {
        self.isolated
            .lock()
            .iter()
            .filter(|(_, view)| view.is_dirty())
            .map(|(name, view)| (name.clone(), Arc::clone(view)))
            .collect()
    }
}
