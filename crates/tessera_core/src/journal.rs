//! The journal facade.

use crate::commit::{CommitRecord, CommitRecordIndex};
use crate::concurrency::{ConcurrencyManager, Task, TaskHandle};
use crate::config::Config;
use crate::engine::JournalCore;
use crate::error::{JournalError, JournalResult};
use crate::index::{IndexMetadata, IndexView, LiveHandle, ReadOnlyIndex};
use crate::root_block::RootBlock;
use crate::stats::StatsSnapshot;
use crate::transaction::Tx;
use crate::types::{IsolationLevel, Timestamp, TxId};
use std::sync::Arc;
use tessera_storage::{open_backend, Address, BufferMode, StorageBackend};
use tracing::{debug, info, warn};

/// A transactional journal over one storage backend.
///
/// The journal keeps a set of named indices. Unisolated writes go straight
/// to the live indices and become durable at the next [`Journal::commit`];
/// transactions read a fixed commit, and read-write transactions buffer
/// their writes until [`Journal::commit_tx`] validates and merges them.
///
/// # Example
///
/// ```rust
/// use tessera_core::{Config, IndexMetadata, IndexView, IsolationLevel, Journal};
///
/// let journal = Journal::open(Config::transient()).unwrap();
/// journal.register_index(IndexMetadata::new("abc")).unwrap();
/// journal.commit().unwrap();
///
/// let tx = journal.new_tx(IsolationLevel::ReadWrite).unwrap();
/// journal.index_for("abc", tx).unwrap().insert(&[1], &[1]).unwrap();
/// assert!(!journal.index("abc").unwrap().contains(&[1]).unwrap());
///
/// let commit_time = journal.commit_tx(tx).unwrap();
/// assert!(commit_time > 0);
/// assert!(journal.index("abc").unwrap().contains(&[1]).unwrap());
/// ```
pub struct Journal {
    core: Arc<JournalCore>,
    concurrency: ConcurrencyManager,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("core", &self.core)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl Journal {
    /// Opens the backend described by `config.store` and the journal on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be opened or its root blocks
    /// are both invalid.
    pub fn open(config: Config) -> JournalResult<Self> {
        let store = open_backend(&config.store)?;
        Self::open_with_backend(config, store)
    }

    /// Opens the journal on an existing backend.
    ///
    /// `config.store` is ignored apart from being reported by
    /// [`Journal::config`].
    ///
    /// # Errors
    ///
    /// Returns an error if the root blocks cannot be created or recovered.
    pub fn open_with_backend(config: Config, store: Arc<dyn StorageBackend>) -> JournalResult<Self> {
        let core = JournalCore::open(config, store)?;
        let concurrency = ConcurrencyManager::start(Arc::clone(&core))?;
        Ok(Self { core, concurrency })
    }

    /// The configuration the journal was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        self.core.config()
    }

    /// The backend strategy.
    #[must_use]
    pub fn mode(&self) -> BufferMode {
        self.core.store().mode()
    }

    /// The backend underneath the journal.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StorageBackend> {
        self.core.store()
    }

    // ---- named indices ----

    /// Registers a new index in the unisolated scope.
    ///
    /// Transactions see the index once it is committed, and only if they
    /// start afterwards.
    ///
    /// # Errors
    ///
    /// Returns `IndexExists` if the name is taken.
    pub fn register_index(&self, metadata: IndexMetadata) -> JournalResult<LiveHandle> {
        let live = self.core.register_index(metadata)?;
        Ok(self.core.handle(live))
    }

    /// Drops an index from the unisolated scope.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchIndex` if the index does not exist.
    pub fn drop_index(&self, name: &str) -> JournalResult<()> {
        self.core.drop_index(name).map(|_| ())
    }

    /// The live (unisolated) view of `name`.
    ///
    /// Writes through the handle wait while the write service has a commit
    /// group open.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchIndex` if the index does not exist.
    pub fn index(&self, name: &str) -> JournalResult<LiveHandle> {
        self.core.ensure_open()?;
        Ok(self.core.handle(self.core.live_index(name)?))
    }

    /// Names of the live indices.
    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        self.core.index_names()
    }

    /// Resolves `name` in the scope `tx`.
    ///
    /// Views are canonical: resolving the same name in the same
    /// transaction, or at the same commit for read-only transactions,
    /// returns the same instance.
    ///
    /// # Errors
    ///
    /// Returns `TxNotActive` for finished transactions and `NoSuchIndex` if
    /// the index does not exist in the state the scope reads.
    pub fn index_for(&self, name: &str, tx: TxId) -> JournalResult<Arc<dyn IndexView>> {
        self.core.index_for(name, tx)
    }

    /// The canonical view of `name` as of `record`, or `None` if the index
    /// did not exist then.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be read.
    pub fn historical_index(
        &self,
        name: &str,
        record: &CommitRecord,
    ) -> JournalResult<Option<Arc<ReadOnlyIndex>>> {
        self.core.ensure_open()?;
        self.core.historical_index(name, record)
    }

    // ---- raw records ----

    /// Writes a raw record. It becomes durable with the next commit.
    ///
    /// # Errors
    ///
    /// Returns `Capacity` if the backend cannot grow to hold it.
    pub fn write(&self, data: &[u8]) -> JournalResult<Address> {
        self.core.ensure_open()?;
        let address = self.core.store().write(data)?;
        self.core.stats().record_write(data.len());
        Ok(address)
    }

    /// Reads a raw record.
    ///
    /// # Errors
    ///
    /// Returns an error if the address was never written or fails its
    /// checksum.
    pub fn read(&self, address: Address) -> JournalResult<Vec<u8>> {
        self.core.ensure_open()?;
        let data = self.core.store().read(address)?;
        self.core.stats().record_read(data.len());
        Ok(data)
    }

    /// Releases a raw record.
    ///
    /// # Errors
    ///
    /// Returns an error if the address was never written.
    pub fn delete(&self, address: Address) -> JournalResult<()> {
        self.core.ensure_open()?;
        self.core.store().delete(address)?;
        self.core.stats().record_delete();
        Ok(())
    }

    // ---- commit protocol ----

    /// Commits the unisolated scope and returns the commit time, or 0 if
    /// nothing changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit could not be made durable; the
    /// unisolated scope is then rolled back to the last commit.
    pub fn commit(&self) -> JournalResult<Timestamp> {
        self.core.commit()
    }

    /// Discards unisolated changes made since the last commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the committed index state cannot be reloaded.
    pub fn abort(&self) -> JournalResult<()> {
        self.core.abort()
    }

    /// The root block of the last commit.
    #[must_use]
    pub fn root_block(&self) -> RootBlock {
        self.core.root_block()
    }

    /// The record of the last commit.
    #[must_use]
    pub fn commit_record(&self) -> Arc<CommitRecord> {
        self.core.commit_record()
    }

    /// The record of the commit in effect at `ts`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read.
    pub fn commit_record_at(&self, ts: Timestamp) -> JournalResult<Option<Arc<CommitRecord>>> {
        self.core.ensure_open()?;
        self.core.commit_record_at(ts)
    }

    /// The index of all durable commits. A commit shows up here once its
    /// root block is on disk.
    #[must_use]
    pub fn commit_record_index(&self) -> &CommitRecordIndex {
        self.core.commits()
    }

    /// Time of the last commit, or 0.
    #[must_use]
    pub fn last_commit_time(&self) -> Timestamp {
        self.core.root_block().last_commit_time
    }

    // ---- transactions ----

    /// Starts a transaction.
    ///
    /// [`IsolationLevel::Unisolated`] returns [`TxId::UNISOLATED`] without
    /// creating anything.
    ///
    /// # Errors
    ///
    /// Returns `Contention` when every read-only identifier before the
    /// next commit is taken.
    pub fn new_tx(&self, level: IsolationLevel) -> JournalResult<TxId> {
        self.core.begin(level)
    }

    /// The active transaction `id`.
    ///
    /// # Errors
    ///
    /// Returns `TxNotActive` for unknown or finished transactions.
    pub fn tx(&self, id: TxId) -> JournalResult<Arc<Tx>> {
        self.core.transactions().get(id)
    }

    /// Commits a transaction and returns its commit time.
    ///
    /// Read-only transactions, and read-write transactions that wrote
    /// nothing, return 0. A read-write transaction is validated and merged
    /// by the write service and returns the time of the group commit it
    /// joined.
    ///
    /// # Errors
    ///
    /// Returns `Validation` on a write-write conflict, `TxNotActive` for
    /// finished transactions and `InvalidOperation` for the sentinel
    /// scopes. The transaction is aborted on any error.
    pub fn commit_tx(&self, id: TxId) -> JournalResult<Timestamp> {
        self.core.ensure_open()?;
        if id.is_sentinel() {
            return Err(JournalError::invalid_operation(format!(
                "{id} is not a transaction"
            )));
        }
        let txs = self.core.transactions();
        let tx = txs.get(id)?;
        tx.prepare()?;

        let dirty = tx.dirty_views();
        if !id.is_read_write() || dirty.is_empty() {
            txs.finish(&tx, true);
            return Ok(0);
        }

        let resources: Vec<String> = dirty.iter().map(|(name, _)| name.clone()).collect();
        let read_basis = tx.read_basis();
        let merge = Task::new(TxId::UNISOLATED, resources, move |ctx| {
            let mut targets = Vec::with_capacity(dirty.len());
            for (name, view) in &dirty {
                let live = ctx.live_index(name)?;
                if !view.validate(&live, read_basis) {
                    warn!(tx = %id, index = %name, "write-write conflict");
                    return Err(JournalError::Validation {
                        tx: id,
                        index: name.clone(),
                    });
                }
                targets.push((view, live));
            }
            Ok(targets
                .iter()
                .map(|(view, live)| view.merge_into(live))
                .sum::<usize>())
        });

        let (outcome, commit_time) = self.concurrency.submit(merge).join();
        match outcome {
            Ok(merged) => {
                txs.finish(&tx, true);
                let commit_time = commit_time.unwrap_or(0);
                debug!(tx = %id, merged, commit_time, "committed transaction");
                Ok(commit_time)
            }
            Err(e) => {
                txs.finish(&tx, false);
                if e.is_validation() {
                    self.core.stats().record_validation_failure();
                }
                Err(e)
            }
        }
    }

    /// Aborts a transaction, discarding its writes.
    ///
    /// # Errors
    ///
    /// Returns `TxNotActive` for finished transactions and
    /// `InvalidOperation` for the sentinel scopes.
    pub fn abort_tx(&self, id: TxId) -> JournalResult<()> {
        if id.is_sentinel() {
            return Err(JournalError::invalid_operation(format!(
                "{id} is not a transaction"
            )));
        }
        let txs = self.core.transactions();
        let tx = txs.get(id)?;
        tx.prepare()?;
        txs.finish(&tx, false);
        Ok(())
    }

    // ---- tasks ----

    /// Submits a task; see [`ConcurrencyManager::submit`].
    pub fn submit<T: Send + 'static>(&self, task: Task<T>) -> TaskHandle<T> {
        self.concurrency.submit(task)
    }

    /// The scheduler behind [`Journal::submit`].
    #[must_use]
    pub fn concurrency(&self) -> &ConcurrencyManager {
        &self.concurrency
    }

    // ---- lifecycle ----

    /// A snapshot of the journal's counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats().snapshot()
    }

    /// Lets queued tasks finish and stops the worker threads.
    pub fn shutdown(&self) {
        self.concurrency.shutdown();
    }

    /// Cancels queued tasks, interrupts running ones and stops the workers.
    pub fn shutdown_now(&self) {
        self.concurrency.shutdown_now();
    }

    /// Stops the workers and closes the backend. Uncommitted changes are
    /// lost.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to close.
    pub fn close(&self) -> JournalResult<()> {
        self.concurrency.shutdown();
        if self.core.mark_closed() {
            self.core.store().close()?;
            info!("closed journal");
        }
        Ok(())
    }

    /// Stops the workers and irrecoverably removes the journal's storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be removed.
    pub fn destroy(self) -> JournalResult<()> {
        self.concurrency.shutdown();
        self.core.mark_closed();
        self.core.store().destroy()?;
        info!("destroyed journal");
        Ok(())
    }
}
