//! Journal state shared by the facade and the worker threads.

use crate::commit::{CommitRecord, CommitRecordIndex};
use crate::config::{Config, ForceOnCommit};
use crate::error::{JournalError, JournalResult};
use crate::index::{
    CanonicalCache, CommittedResolver, IndexMetadata, IndexView, IsolatedIndex, LiveHandle,
    LiveIndex, ReadCommittedIndex, ReadOnlyIndex, WriteGate,
};
use crate::root_block::{select_current, RootBlock};
use crate::stats::JournalStats;
use crate::transaction::{TimestampService, TransactionManager};
use crate::types::{IsolationLevel, Timestamp, TxId};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tessera_storage::{Address, RootSlot, StorageBackend};
use tracing::{debug, error, info, warn};

/// The durable state as of the last commit.
#[derive(Debug, Clone)]
struct Durable {
    block: RootBlock,
    slot: RootSlot,
    record: Arc<CommitRecord>,
}

pub(crate) struct JournalCore {
    config: Config,
    store: Arc<dyn StorageBackend>,
    timestamps: Arc<TimestampService>,
    gate: WriteGate,
    durable: RwLock<Durable>,
    live: RwLock<BTreeMap<String, Arc<LiveIndex>>>,
    commits: CommitRecordIndex,
    history: CanonicalCache<(String, Address), ReadOnlyIndex>,
    read_committed: Mutex<HashMap<String, Arc<ReadCommittedIndex>>>,
    commit_lock: Mutex<()>,
    txs: TransactionManager,
    stats: Arc<JournalStats>,
    closed: AtomicBool,
    failed: AtomicBool,
    this: Weak<JournalCore>,
}

impl std::fmt::Debug for JournalCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let durable = self.durable.read();
        f.debug_struct("JournalCore")
            .field("mode", &self.store.mode())
            .field("commit_counter", &durable.block.commit_counter)
            .field("last_commit_time", &durable.block.last_commit_time)
            .field("indices", &self.live.read().len())
            .finish_non_exhaustive()
    }
}

impl JournalCore {
    /// Opens the journal on `store`, creating or recovering its root blocks.
    pub(crate) fn open(config: Config, store: Arc<dyn StorageBackend>) -> JournalResult<Arc<Self>> {
        let timestamps = Arc::new(TimestampService::new());

        let (durable, commits, live) = if store.is_new() {
            let block = RootBlock::initial(
                store.mode(),
                store.extent(),
                store.user_extent(),
                timestamps.next(),
            );
            let encoded = block.encode();
            store.write_root_block(RootSlot::A, &encoded)?;
            store.write_root_block(RootSlot::B, &encoded)?;
            store.force(true)?;
            info!(mode = %store.mode(), uuid = %block.uuid, "created journal");
            let durable = Durable {
                block,
                slot: RootSlot::A,
                record: Arc::new(CommitRecord::empty()),
            };
            let commits = CommitRecordIndex::open(Arc::clone(&store), Address::NULL)?;
            (durable, commits, BTreeMap::new())
        } else {
            Self::recover(&store, &timestamps)?
        };

        let stats = Arc::new(JournalStats::new());
        let txs = TransactionManager::new(Arc::clone(&timestamps), Arc::clone(&stats));
        Ok(Arc::new_cyclic(|this| Self {
            config,
            store,
            timestamps,
            gate: Arc::new(ReentrantMutex::new(())),
            durable: RwLock::new(durable),
            live: RwLock::new(live),
            commits,
            history: CanonicalCache::new(),
            read_committed: Mutex::new(HashMap::new()),
            commit_lock: Mutex::new(()),
            txs,
            stats,
            closed: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            this: this.clone(),
        }))
    }

    #[allow(clippy::type_complexity)]
    fn recover(
        store: &Arc<dyn StorageBackend>,
        timestamps: &Arc<TimestampService>,
    ) -> JournalResult<(Durable, CommitRecordIndex, BTreeMap<String, Arc<LiveIndex>>)> {
        let a = store.read_root_block(RootSlot::A)?;
        let b = store.read_root_block(RootSlot::B)?;
        let (slot, block, rejected) = select_current(&a, &b)?;
        if let Some((bad, error)) = rejected {
            warn!(slot = ?bad, %error, "ignoring invalid root block");
        }
        if block.mode != store.mode() {
            return Err(JournalError::invalid_format(format!(
                "journal was written by a {} store, opened as {}",
                block.mode,
                store.mode()
            )));
        }
        store.restore(block.next_offset, block.allocator_meta)?;

        let commits = CommitRecordIndex::open(Arc::clone(store), block.commit_record_index)?;
        let record = if block.commit_record.is_null() {
            Arc::new(CommitRecord::empty())
        } else {
            match commits.get(block.last_commit_time)? {
                Some(record) => record,
                None => Arc::new(CommitRecord::decode(&store.read(block.commit_record)?)?),
            }
        };

        let mut live = BTreeMap::new();
        for (name, address) in record.roots() {
            let index = LiveIndex::load(Arc::clone(store), *address)?;
            live.insert(name.clone(), Arc::new(index));
        }
        timestamps.advance_past(block.last_commit_time.max(block.create_time));
        info!(
            slot = ?slot,
            commit_counter = block.commit_counter,
            last_commit_time = block.last_commit_time,
            indices = live.len(),
            "recovered journal"
        );
        Ok((
            Durable {
                block,
                slot,
                record,
            },
            commits,
            live,
        ))
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn store(&self) -> &Arc<dyn StorageBackend> {
        &self.store
    }

    pub(crate) fn stats(&self) -> &Arc<JournalStats> {
        &self.stats
    }

    pub(crate) fn transactions(&self) -> &TransactionManager {
        &self.txs
    }

    pub(crate) fn commits(&self) -> &CommitRecordIndex {
        &self.commits
    }

    /// Holds off every other writer of the unisolated scope. Reentrant, so
    /// the holder may still commit and register indices.
    pub(crate) fn exclusive(&self) -> ReentrantMutexGuard<'_, ()> {
        self.gate.lock()
    }

    pub(crate) fn handle(&self, index: Arc<LiveIndex>) -> LiveHandle {
        LiveHandle::new(index, Arc::clone(&self.gate))
    }

    pub(crate) fn ensure_open(&self) -> JournalResult<()> {
        if self.closed.load(Ordering::Acquire) || self.failed.load(Ordering::Acquire) {
            return Err(JournalError::Closed);
        }
        Ok(())
    }

    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn root_block(&self) -> RootBlock {
        self.durable.read().block.clone()
    }

    pub(crate) fn commit_record(&self) -> Arc<CommitRecord> {
        Arc::clone(&self.durable.read().record)
    }

    /// The commit in effect at `ts`, ignoring commits still in flight.
    pub(crate) fn commit_record_at(&self, ts: Timestamp) -> JournalResult<Option<Arc<CommitRecord>>> {
        let current = self.commit_record();
        if ts >= current.timestamp() {
            return Ok((current.counter() > 0).then_some(current));
        }
        self.commits.find(ts)
    }

    // ---- named indices ----

    pub(crate) fn live_index(&self, name: &str) -> JournalResult<Arc<LiveIndex>> {
        self.live
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| JournalError::NoSuchIndex {
                name: name.to_string(),
            })
    }

    pub(crate) fn index_names(&self) -> Vec<String> {
        self.live.read().keys().cloned().collect()
    }

    pub(crate) fn register_index(&self, metadata: IndexMetadata) -> JournalResult<Arc<LiveIndex>> {
        let _gate = self.exclusive();
        self.ensure_open()?;
        let mut live = self.live.write();
        if live.contains_key(&metadata.name) {
            return Err(JournalError::IndexExists {
                name: metadata.name,
            });
        }
        let name = metadata.name.clone();
        let index = Arc::new(LiveIndex::create(metadata, Arc::clone(&self.store))?);
        live.insert(name.clone(), Arc::clone(&index));
        debug!(index = %name, "registered index");
        Ok(index)
    }

    pub(crate) fn drop_index(&self, name: &str) -> JournalResult<Arc<LiveIndex>> {
        let _gate = self.exclusive();
        self.ensure_open()?;
        let dropped = self
            .live
            .write()
            .remove(name)
            .ok_or_else(|| JournalError::NoSuchIndex {
                name: name.to_string(),
            })?;
        debug!(index = %name, "dropped index");
        Ok(dropped)
    }

    pub(crate) fn unregister_index(&self, name: &str) {
        if self.live.write().remove(name).is_some() {
            debug!(index = %name, "removed index registered by a failed task");
        }
    }

    pub(crate) fn restore_index(&self, index: Arc<LiveIndex>) {
        let name = index.name().to_string();
        self.live.write().insert(name.clone(), index);
        debug!(index = %name, "restored index dropped by a failed task");
    }

    /// The canonical historical view of `name` as of `record`.
    pub(crate) fn historical_index(
        &self,
        name: &str,
        record: &CommitRecord,
    ) -> JournalResult<Option<Arc<ReadOnlyIndex>>> {
        let Some(address) = record.root(name) else {
            return Ok(None);
        };
        self.history
            .get_or_try_insert((name.to_string(), address), || {
                ReadOnlyIndex::load(self.store.as_ref(), address)
            })
            .map(Some)
    }

    fn resolver(&self) -> Weak<dyn CommittedResolver> {
        self.this.clone()
    }

    fn read_committed_view(&self, name: &str) -> JournalResult<Arc<ReadCommittedIndex>> {
        if self.commit_record().root(name).is_none() {
            return Err(JournalError::NoSuchIndex {
                name: name.to_string(),
            });
        }
        let mut views = self.read_committed.lock();
        let view = views
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ReadCommittedIndex::new(name, self.resolver())));
        Ok(Arc::clone(view))
    }

    /// Resolves `name` in the scope `tx`.
    pub(crate) fn index_for(&self, name: &str, tx: TxId) -> JournalResult<Arc<dyn IndexView>> {
        self.ensure_open()?;
        if tx == TxId::UNISOLATED {
            return Ok(Arc::new(self.handle(self.live_index(name)?)));
        }
        if tx == TxId::READ_COMMITTED {
            return Ok(self.read_committed_view(name)?);
        }

        let state = self.txs.get(tx)?;
        let missing = || JournalError::NoSuchIndex {
            name: name.to_string(),
        };
        match state.level() {
            IsolationLevel::ReadCommitted => state.view_or_try_insert(name, || {
                if self.commit_record().root(name).is_none() {
                    return Err(missing());
                }
                Ok(Arc::new(ReadCommittedIndex::new(name, self.resolver())) as Arc<dyn IndexView>)
            }),
            IsolationLevel::ReadOnly(_) | IsolationLevel::Unisolated => {
                state.view_or_try_insert(name, || {
                    let view = self
                        .historical_index(name, state.basis())?
                        .ok_or_else(missing)?;
                    Ok(view as Arc<dyn IndexView>)
                })
            }
            IsolationLevel::ReadWrite => state.isolated_or_try_insert(name, || {
                let base = self
                    .historical_index(name, state.basis())?
                    .ok_or_else(missing)?;
                if !base.metadata().isolatable {
                    return Err(JournalError::invalid_operation(format!(
                        "index {name} does not support isolated writes"
                    )));
                }
                Ok(IsolatedIndex::new(tx, base, state.open_flag()))
            }),
        }
    }

    // ---- transactions ----

    pub(crate) fn begin(&self, level: IsolationLevel) -> JournalResult<TxId> {
        self.ensure_open()?;
        let current = self.commit_record();
        self.txs.begin(level, &self.commits, &current)
    }

    /// Oldest commit time whose released space must stay readable.
    fn release_horizon(&self, commit_time: Timestamp) -> Timestamp {
        let age = u64::try_from(self.config.min_release_age.as_millis()).unwrap_or(u64::MAX);
        let mut horizon = commit_time.saturating_sub(age);
        if let Some(basis) = self.txs.earliest_read_basis() {
            horizon = horizon.min(basis + 1);
        }
        horizon
    }

    // ---- commit protocol ----

    fn force(&self) -> JournalResult<()> {
        match self.config.force_on_commit {
            ForceOnCommit::No => Ok(()),
            ForceOnCommit::Force => Ok(self.store.force(false)?),
            ForceOnCommit::ForceMetadata => Ok(self.store.force(true)?),
        }
    }

    /// Commits the unisolated scope. Returns 0 when nothing changed.
    ///
    /// On failure the unisolated scope is rolled back to the last commit.
    /// If the new root block may have reached the disk and the durable one
    /// cannot be put back, the journal closes instead.
    pub(crate) fn commit(&self) -> JournalResult<Timestamp> {
        let _gate = self.exclusive();
        let _guard = self.commit_lock.lock();
        self.ensure_open()?;
        let mut root_written = None;
        match self.commit_locked(&mut root_written) {
            Ok(commit_time) => Ok(commit_time),
            Err(e) => {
                if let Some(slot) = root_written {
                    if let Err(restore_error) = self.restore_root_block(slot) {
                        self.failed.store(true, Ordering::Release);
                        error!(
                            error = %e,
                            %restore_error,
                            ?slot,
                            "commit failed after its root block was written, closing journal"
                        );
                        return Err(e);
                    }
                }
                warn!(error = %e, "commit failed, aborting");
                if let Err(abort_error) = self.abort_locked() {
                    warn!(error = %abort_error, "abort after failed commit also failed");
                }
                Err(e)
            }
        }
    }

    /// Puts the durable root block back into `slot`, which a failed commit
    /// may have overwritten.
    fn restore_root_block(&self, slot: RootSlot) -> JournalResult<()> {
        let durable = self.durable.read().block.encode();
        self.store.write_root_block(slot, &durable)?;
        self.store.force(true)?;
        debug!(?slot, "restored root block after failed commit");
        Ok(())
    }

    fn commit_locked(&self, root_written: &mut Option<RootSlot>) -> JournalResult<Timestamp> {
        let current = self.durable.read().clone();
        let commit_time = self.timestamps.next();

        let live: Vec<(String, Arc<LiveIndex>)> = self
            .live
            .read()
            .iter()
            .map(|(name, index)| (name.clone(), Arc::clone(index)))
            .collect();
        let mut roots = Vec::with_capacity(live.len());
        for (name, index) in live {
            index.seal(commit_time);
            roots.push((name, index.checkpoint()?));
        }

        if roots.as_slice() == current.record.roots() && !self.store.is_dirty() {
            self.stats.record_noop_commit();
            debug!("nothing to commit");
            return Ok(0);
        }

        let counter = current.block.commit_counter + 1;
        let record = Arc::new(CommitRecord::new(commit_time, counter, roots));
        let record_address = self.store.write(&record.encode()?)?;
        let record = self.commits.add(&record, record_address)?;
        let index_address = self.commits.checkpoint()?;
        let meta = self
            .store
            .checkpoint_allocator(commit_time, self.release_horizon(commit_time))?;
        self.force()?;

        let mut block = current.block.clone();
        block.commit_counter = counter;
        if block.first_commit_time == 0 {
            block.first_commit_time = commit_time;
        }
        block.last_commit_time = commit_time;
        block.next_offset = self.store.next_offset();
        block.extent = self.store.extent();
        block.user_extent = self.store.user_extent();
        block.commit_record = record_address;
        block.commit_record_index = index_address;
        block.allocator_meta = meta;

        let slot = current.slot.other();
        *root_written = Some(slot);
        self.store.write_root_block(slot, &block.encode())?;
        self.force()?;
        self.store.commit();
        self.commits.publish();

        *self.durable.write() = Durable {
            block,
            slot,
            record,
        };
        self.stats.record_commit();
        info!(commit_time, counter, ?slot, "committed");
        Ok(commit_time)
    }

    /// Discards everything since the last commit.
    pub(crate) fn abort(&self) -> JournalResult<()> {
        let _gate = self.exclusive();
        let _guard = self.commit_lock.lock();
        self.ensure_open()?;
        self.abort_locked()
    }

    fn abort_locked(&self) -> JournalResult<()> {
        self.store.abort();
        let current = self.durable.read().clone();
        self.commits.reload(current.block.commit_record_index)?;

        let mut live = self.live.write();
        live.retain(|name, _| current.record.root(name).is_some());
        for (name, address) in current.record.roots() {
            match live.get(name) {
                Some(index) => index.revert(*address)?,
                None => {
                    let index = LiveIndex::load(Arc::clone(&self.store), *address)?;
                    live.insert(name.clone(), Arc::new(index));
                }
            }
        }
        self.stats.record_abort();
        info!(commit_counter = current.block.commit_counter, "aborted");
        Ok(())
    }
}

impl CommittedResolver for JournalCore {
    fn committed_view(&self, name: &str) -> JournalResult<Option<Arc<ReadOnlyIndex>>> {
        self.ensure_open()?;
        let record = self.commit_record();
        self.historical_index(name, &record)
    }
}
