//! Journal statistics.
//!
//! All counters are atomic and can be read while the journal is busy.
//!
//! ```rust,ignore
//! let journal = Journal::open(Config::transient())?;
//! // ...
//! let stats = journal.stats();
//! println!("commits: {}", stats.commits);
//! println!("groups: {}", stats.groups_committed);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters maintained by a journal.
///
/// Values only grow, except the `active_transactions` gauge.
#[derive(Debug, Default)]
pub struct JournalStats {
    // Commit protocol
    commits: AtomicU64,
    noop_commits: AtomicU64,
    aborts: AtomicU64,

    // Raw records
    records_written: AtomicU64,
    records_read: AtomicU64,
    records_deleted: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,

    // Transactions
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    validation_failures: AtomicU64,
    active_transactions: AtomicU64,

    // Tasks
    tasks_submitted: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_cancelled: AtomicU64,
    groups_committed: AtomicU64,
}

impl JournalStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_noop_commit(&self) {
        self.noop_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self, bytes: usize) {
        self.records_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self, bytes: usize) {
        self.records_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.records_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tx_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
        self.active_transactions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tx_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
        self.active_transactions.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tx_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
        self.active_transactions.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_task_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_task_cancelled(&self) {
        self.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_group_commit(&self) {
        self.groups_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Commits that wrote a root block.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Commits that found nothing to do.
    pub fn noop_commits(&self) -> u64 {
        self.noop_commits.load(Ordering::Relaxed)
    }

    /// Aborts of the unisolated scope.
    pub fn aborts(&self) -> u64 {
        self.aborts.load(Ordering::Relaxed)
    }

    /// Transactions currently active.
    pub fn active_transactions(&self) -> u64 {
        self.active_transactions.load(Ordering::Relaxed)
    }

    /// Commit groups that published at least one change.
    pub fn groups_committed(&self) -> u64 {
        self.groups_committed.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            commits: load(&self.commits),
            noop_commits: load(&self.noop_commits),
            aborts: load(&self.aborts),
            records_written: load(&self.records_written),
            records_read: load(&self.records_read),
            records_deleted: load(&self.records_deleted),
            bytes_written: load(&self.bytes_written),
            bytes_read: load(&self.bytes_read),
            transactions_started: load(&self.transactions_started),
            transactions_committed: load(&self.transactions_committed),
            transactions_aborted: load(&self.transactions_aborted),
            validation_failures: load(&self.validation_failures),
            active_transactions: load(&self.active_transactions),
            tasks_submitted: load(&self.tasks_submitted),
            tasks_completed: load(&self.tasks_completed),
            tasks_failed: load(&self.tasks_failed),
            tasks_cancelled: load(&self.tasks_cancelled),
            groups_committed: load(&self.groups_committed),
        }
    }
}

/// A point-in-time copy of [`JournalStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Commits that wrote a root block.
    pub commits: u64,
    /// Commits that found nothing to do.
    pub noop_commits: u64,
    /// Aborts of the unisolated scope.
    pub aborts: u64,
    /// Raw records written.
    pub records_written: u64,
    /// Raw records read.
    pub records_read: u64,
    /// Raw records deleted.
    pub records_deleted: u64,
    /// Payload bytes written through the raw record API.
    pub bytes_written: u64,
    /// Payload bytes read through the raw record API.
    pub bytes_read: u64,
    /// Transactions started.
    pub transactions_started: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions aborted, validation failures included.
    pub transactions_aborted: u64,
    /// Read-write commits refused by validation.
    pub validation_failures: u64,
    /// Transactions active when the snapshot was taken.
    pub active_transactions: u64,
    /// Tasks accepted by the concurrency manager.
    pub tasks_submitted: u64,
    /// Tasks that returned a value.
    pub tasks_completed: u64,
    /// Tasks that returned an error.
    pub tasks_failed: u64,
    /// Tasks cancelled before producing a result.
    pub tasks_cancelled: u64,
    /// Commit groups that published at least one change.
    pub groups_committed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_stats_are_zero() {
        assert_eq!(JournalStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn transaction_gauge_tracks_lifecycle() {
        let stats = JournalStats::new();
        stats.record_tx_start();
        stats.record_tx_start();
        stats.record_tx_commit();
        assert_eq!(stats.active_transactions(), 1);

        stats.record_tx_abort();
        let snap = stats.snapshot();
        assert_eq!(snap.active_transactions, 0);
        assert_eq!(snap.transactions_started, 2);
        assert_eq!(snap.transactions_committed, 1);
        assert_eq!(snap.transactions_aborted, 1);
    }

    #[test]
    fn byte_counters_accumulate() {
        let stats = JournalStats::new();
        stats.record_write(100);
        stats.record_write(50);
        stats.record_read(30);

        let snap = stats.snapshot();
        assert_eq!(snap.records_written, 2);
        assert_eq!(snap.bytes_written, 150);
        assert_eq!(snap.bytes_read, 30);
    }
}
