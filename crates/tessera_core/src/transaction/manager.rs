//! Transaction manager.

use crate::commit::{CommitRecord, CommitRecordIndex};
use crate::error::{JournalError, JournalResult};
use crate::stats::JournalStats;
use crate::transaction::{TimestampService, Tx};
use crate::types::{IsolationLevel, Timestamp, TxId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Largest start time a transaction identifier can carry.
const MAX_START: Timestamp = i64::MAX as Timestamp;

/// Issues transaction identifiers and tracks active transactions.
///
/// Read-write transactions start at a fresh timestamp. Read-only and
/// read-committed transactions start at a commit time, so several of them
/// may ask for the same one; each gets the first unused identifier between
/// the requested time and the next commit.
#[derive(Debug)]
pub struct TransactionManager {
    timestamps: Arc<TimestampService>,
    active: RwLock<BTreeMap<TxId, Arc<Tx>>>,
    stats: Arc<JournalStats>,
}

impl TransactionManager {
    /// Creates a manager drawing start times from `timestamps`.
    pub(crate) fn new(timestamps: Arc<TimestampService>, stats: Arc<JournalStats>) -> Self {
        Self {
            timestamps,
            active: RwLock::new(BTreeMap::new()),
            stats,
        }
    }

    /// Starts a transaction.
    ///
    /// `current` is the last durable commit; commits still in flight are
    /// never chosen as a read basis.
    pub(crate) fn begin(
        &self,
        level: IsolationLevel,
        commits: &CommitRecordIndex,
        current: &Arc<CommitRecord>,
    ) -> JournalResult<TxId> {
        let mut active = self.active.write();
        let id = match level {
            IsolationLevel::Unisolated => return Ok(TxId::UNISOLATED),
            IsolationLevel::ReadWrite => TxId::read_write(self.timestamps.next()),
            IsolationLevel::ReadCommitted => {
                let from = current.timestamp().max(1);
                let until = commits.find_next(from)?;
                Self::unused_read_only(&active, from, until)?
            }
            IsolationLevel::ReadOnly(ts) => {
                if ts == 0 || ts > MAX_START {
                    return Err(JournalError::invalid_operation(format!(
                        "read-only transaction time out of range: {ts}"
                    )));
                }
                let until = commits.find_next(ts)?;
                Self::unused_read_only(&active, ts, until)?
            }
        };

        let basis = match commits.find(id.start())? {
            Some(record) if record.timestamp() > current.timestamp() => Arc::clone(current),
            Some(record) => record,
            None => Arc::new(CommitRecord::empty()),
        };
        let tx = Arc::new(Tx::new(id, level, basis));
        debug!(tx = %id, ?level, read_basis = tx.read_basis(), "began transaction");
        active.insert(id, tx);
        self.stats.record_tx_start();
        Ok(id)
    }

    fn unused_read_only(
        active: &BTreeMap<TxId, Arc<Tx>>,
        from: Timestamp,
        until: Option<Timestamp>,
    ) -> JournalResult<TxId> {
        let limit = until.unwrap_or(MAX_START).min(MAX_START);
        (from..limit.max(from + 1))
            .map(TxId::read_only)
            .find(|id| !active.contains_key(id))
            .ok_or_else(|| JournalError::Contention {
                resource: format!("read-only transaction ids in [{from}, {limit})"),
                waited: Duration::ZERO,
            })
    }

    /// The active transaction `id`.
    ///
    /// # Errors
    ///
    /// Returns `TxNotActive` for unknown or finished transactions.
    pub fn get(&self, id: TxId) -> JournalResult<Arc<Tx>> {
        self.active
            .read()
            .get(&id)
            .cloned()
            .ok_or(JournalError::TxNotActive { tx: id })
    }

    /// True if `id` names an active transaction.
    #[must_use]
    pub fn is_active(&self, id: TxId) -> bool {
        self.active.read().contains_key(&id)
    }

    /// Number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// Smallest read basis among active transactions.
    #[must_use]
    pub fn earliest_read_basis(&self) -> Option<Timestamp> {
        self.active.read().values().map(|tx| tx.read_basis()).min()
    }

    /// Ends a prepared transaction.
    pub(crate) fn finish(&self, tx: &Tx, committed: bool) {
        tx.finish(committed);
        self.active.write().remove(&tx.id());
        if committed {
            self.stats.record_tx_commit();
        } else {
            self.stats.record_tx_abort();
        }
        debug!(tx = %tx.id(), committed, "finished transaction");
    }
}
