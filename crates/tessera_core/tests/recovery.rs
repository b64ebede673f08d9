//! Reopening disk-backed journals and recovering from torn commits.

use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tessera_core::{
    BufferMode, Config, IndexMetadata, IndexView, Journal, JournalError, StorageBackend,
};
use tessera_storage::{open_backend, DiskRwBackend, DiskWormBackend};
use tessera_testkit::{close_under_readers, CrashPoint, CrashableBackend, StressConfig};

fn disk_config(mode: BufferMode, path: &Path) -> Config {
    let config = Config::disk(mode, path);
    let store = config.store.clone().initial_extent(1 << 20);
    config.store(store)
}

/// Opens a journal over a crash-injecting wrapper of the file at `path`.
fn crashable(mode: BufferMode, path: &Path) -> (Journal, Arc<CrashableBackend>) {
    let config = disk_config(mode, path);
    let backend = Arc::new(CrashableBackend::new(open_backend(&config.store).unwrap()));
    let store: Arc<dyn StorageBackend> = backend.clone();
    let journal = Journal::open_with_backend(config, store).unwrap();
    (journal, backend)
}

#[test]
fn reopen_restores_the_last_commit() {
    for mode in [BufferMode::Mapped, BufferMode::DiskWorm, BufferMode::DiskRw] {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.jnl");

        let (t1, uuid, record) = {
            let journal = Journal::open(disk_config(mode, &path)).unwrap();
            let idx = journal.register_index(IndexMetadata::new("idx")).unwrap();
            idx.insert(b"kept", b"1").unwrap();
            let record = journal.write(b"raw record").unwrap();
            let t1 = journal.commit().unwrap();

            idx.insert(b"lost", b"2").unwrap();
            journal.close().unwrap();
            (t1, journal.root_block().uuid, record)
        };

        let journal = Journal::open(disk_config(mode, &path)).unwrap();
        assert_eq!(journal.mode(), mode);
        assert_eq!(journal.last_commit_time(), t1, "{mode}");
        assert_eq!(journal.root_block().uuid, uuid);
        assert_eq!(journal.root_block().commit_counter, 1);
        assert_eq!(journal.read(record).unwrap(), b"raw record");

        let idx = journal.index("idx").unwrap();
        assert!(idx.contains(b"kept").unwrap());
        assert!(!idx.contains(b"lost").unwrap());
        assert_eq!(journal.commit_record_index().len(), 1);
    }
}

#[test]
fn commits_continue_after_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("journal.jnl");

    let t1 = {
        let journal = Journal::open(disk_config(BufferMode::DiskRw, &path)).unwrap();
        journal.register_index(IndexMetadata::new("idx")).unwrap();
        journal.commit().unwrap()
    };

    let journal = Journal::open(disk_config(BufferMode::DiskRw, &path)).unwrap();
    journal.index("idx").unwrap().insert(b"k", b"v").unwrap();
    let t2 = journal.commit().unwrap();
    assert!(t2 > t1);
    assert_eq!(journal.root_block().commit_counter, 2);
    assert_eq!(journal.commit_record_index().timestamps(), vec![t1, t2]);

    let first = journal.commit_record_at(t1).unwrap().unwrap();
    let old = journal.historical_index("idx", &first).unwrap().unwrap();
    assert!(!old.contains(b"k").unwrap());
}

#[test]
fn torn_root_block_falls_back_to_previous_commit() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("journal.jnl");

    let t1 = {
        let (journal, backend) = crashable(BufferMode::DiskWorm, &path);
        let idx = journal.register_index(IndexMetadata::new("idx")).unwrap();
        idx.insert(b"a", b"1").unwrap();
        let t1 = journal.commit().unwrap();

        idx.insert(b"b", b"2").unwrap();
        backend.crash_at(CrashPoint::RootBlockWrite);
        assert!(journal.commit().is_err());
        assert!(backend.has_crashed());
        assert_eq!(journal.last_commit_time(), t1);
        t1
    };

    let journal = Journal::open(disk_config(BufferMode::DiskWorm, &path)).unwrap();
    assert_eq!(journal.last_commit_time(), t1);
    let idx = journal.index("idx").unwrap();
    assert!(idx.contains(b"a").unwrap());
    assert!(!idx.contains(b"b").unwrap());
}

#[test]
fn crash_at_any_offset_recovers_a_complete_commit() {
    for mode in [BufferMode::DiskWorm, BufferMode::DiskRw, BufferMode::Mapped] {
        for budget in [0u64, 1, 8, 33, 100, 257, 600, 1_500, 1 << 20] {
            let dir = tempdir().unwrap();
            let path = dir.path().join("journal.jnl");

            let (before, outcome) = {
                let (journal, backend) = crashable(mode, &path);
                let idx = journal.register_index(IndexMetadata::new("idx")).unwrap();
                idx.insert(b"a", b"1").unwrap();
                let scratch = journal.write(&[9u8; 300]).unwrap();
                journal.commit().unwrap();

                // Earlier commits rewrite and release space the crashing
                // commit may reuse.
                for round in 0..3u8 {
                    idx.insert(&[b'c', round], &[round; 64]).unwrap();
                    if round > 0 {
                        idx.remove(&[b'c', round - 1]).unwrap();
                    }
                    if round == 1 {
                        journal.delete(scratch).unwrap();
                    }
                    journal.commit().unwrap();
                }
                let before = journal.last_commit_time();

                idx.insert(b"b", &[7u8; 200]).unwrap();
                idx.remove(&[b'c', 2]).unwrap();
                backend.crash_after(budget);
                let outcome = journal.commit();
                journal.close().unwrap();
                (before, outcome)
            };

            let journal = Journal::open(disk_config(mode, &path)).unwrap();
            let idx = journal.index("idx").unwrap();
            let at = format!("{mode}, budget {budget}");
            assert!(idx.contains(b"a").unwrap(), "{at}");
            assert!(!idx.contains(&[b'c', 1]).unwrap(), "{at}");
            match outcome {
                Ok(after) => {
                    assert_eq!(journal.last_commit_time(), after, "{at}");
                    assert_eq!(journal.root_block().commit_counter, 5, "{at}");
                    assert!(idx.contains(b"b").unwrap(), "{at}");
                    assert!(!idx.contains(&[b'c', 2]).unwrap(), "{at}");
                }
                Err(_) => {
                    assert_eq!(journal.last_commit_time(), before, "{at}");
                    assert_eq!(journal.root_block().commit_counter, 4, "{at}");
                    assert!(!idx.contains(b"b").unwrap(), "{at}");
                    assert!(idx.contains(&[b'c', 2]).unwrap(), "{at}");
                }
            }
            assert_eq!(
                journal.commit_record_index().len() as u64,
                journal.root_block().commit_counter,
                "{at}"
            );
        }
    }
}

#[test]
fn failed_force_after_root_block_puts_the_durable_block_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("journal.jnl");

    let t2 = {
        let (journal, backend) = crashable(BufferMode::DiskRw, &path);
        let idx = journal.register_index(IndexMetadata::new("idx")).unwrap();
        idx.insert(b"a", b"1").unwrap();
        let t1 = journal.commit().unwrap();

        idx.insert(b"b", b"2").unwrap();
        backend.fail_at(CrashPoint::RootBlockForce);
        assert!(journal.commit().is_err());
        assert!(!backend.has_crashed());
        assert_eq!(journal.last_commit_time(), t1);
        assert_eq!(journal.root_block().commit_counter, 1);
        assert!(!idx.contains(b"b").unwrap());
        assert!(journal.commit_record_index().find(u64::MAX).unwrap().unwrap().timestamp() == t1);

        idx.insert(b"c", b"3").unwrap();
        let t2 = journal.commit().unwrap();
        assert!(t2 > t1);
        journal.close().unwrap();
        t2
    };

    let journal = Journal::open(disk_config(BufferMode::DiskRw, &path)).unwrap();
    assert_eq!(journal.last_commit_time(), t2);
    assert_eq!(journal.root_block().commit_counter, 2);
    let idx = journal.index("idx").unwrap();
    assert!(idx.contains(b"a").unwrap());
    assert!(!idx.contains(b"b").unwrap());
    assert!(idx.contains(b"c").unwrap());
}

#[test]
fn crash_after_root_block_closes_without_rewinding() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("journal.jnl");

    let t1 = {
        let (journal, backend) = crashable(BufferMode::DiskWorm, &path);
        let idx = journal.register_index(IndexMetadata::new("idx")).unwrap();
        idx.insert(b"a", b"1").unwrap();
        let t1 = journal.commit().unwrap();

        idx.insert(b"b", b"2").unwrap();
        backend.crash_at(CrashPoint::RootBlockForce);
        assert!(journal.commit().is_err());
        assert!(backend.has_crashed());

        assert!(matches!(journal.commit(), Err(JournalError::Closed)));
        assert!(matches!(journal.abort(), Err(JournalError::Closed)));
        assert!(matches!(journal.index("idx"), Err(JournalError::Closed)));
        assert_eq!(journal.commit_record_index().len(), 1);
        journal.close().unwrap();
        t1
    };

    // The new root block reached the file before the force failed, and
    // the records it points at were left in place.
    let journal = Journal::open(disk_config(BufferMode::DiskWorm, &path)).unwrap();
    assert_eq!(journal.root_block().commit_counter, 2);
    assert!(journal.last_commit_time() > t1);
    let idx = journal.index("idx").unwrap();
    assert!(idx.contains(b"a").unwrap());
    assert!(idx.contains(b"b").unwrap());
    assert_eq!(journal.commit_record_index().len(), 2);
}

#[test]
fn close_races_readers_on_every_disk_mode() {
    for mode in [BufferMode::DiskWorm, BufferMode::DiskRw, BufferMode::Mapped] {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.jnl");
        let options = disk_config(mode, &path).store;
        let config = StressConfig::default().readers(6).records_per_writer(100);

        let report = match mode {
            BufferMode::DiskWorm => {
                let worm = Arc::new(DiskWormBackend::disk_worm(&options).unwrap());
                let backend: Arc<dyn StorageBackend> = worm.clone();
                close_under_readers(&backend, &config, || worm.close_handle())
            }
            BufferMode::DiskRw => {
                let rw = Arc::new(DiskRwBackend::open(&options).unwrap());
                let backend: Arc<dyn StorageBackend> = rw.clone();
                close_under_readers(&backend, &config, || rw.close_handle())
            }
            _ => close_under_readers(&open_backend(&options).unwrap(), &config, || {}),
        };
        assert!(report.is_clean(), "{mode}: {report:?}");
        assert_eq!(report.writes, 100);

        // A reader that reopened the file after close would still hold
        // its lock.
        let reopened = open_backend(&options);
        assert!(reopened.is_ok(), "{mode}: {:?}", reopened.err());
    }
}

#[test]
fn failed_force_aborts_the_commit() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("journal.jnl");
    let (journal, backend) = crashable(BufferMode::DiskWorm, &path);
    let idx = journal.register_index(IndexMetadata::new("idx")).unwrap();
    let t1 = journal.commit().unwrap();

    idx.insert(b"k", b"v").unwrap();
    backend.crash_at(CrashPoint::Force);
    assert!(journal.commit().is_err());
    assert_eq!(journal.last_commit_time(), t1);
    assert!(!journal.index("idx").unwrap().contains(b"k").unwrap());
    assert_eq!(journal.stats().aborts, 1);
}

#[test]
fn reopen_with_another_mode_is_refused() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("journal.jnl");
    {
        let journal = Journal::open(disk_config(BufferMode::DiskWorm, &path)).unwrap();
        journal.register_index(IndexMetadata::new("idx")).unwrap();
        journal.commit().unwrap();
    }
    assert!(matches!(
        Journal::open(disk_config(BufferMode::DiskRw, &path)),
        Err(JournalError::InvalidFormat { .. })
    ));
}

#[test]
fn abort_discards_unisolated_changes() {
    let journal = Journal::open(Config::transient()).unwrap();
    let idx = journal.register_index(IndexMetadata::new("idx")).unwrap();
    idx.insert(b"a", b"1").unwrap();
    journal.commit().unwrap();

    idx.insert(b"b", b"2").unwrap();
    journal.register_index(IndexMetadata::new("scratch")).unwrap();
    journal.abort().unwrap();

    let idx = journal.index("idx").unwrap();
    assert!(idx.contains(b"a").unwrap());
    assert!(!idx.contains(b"b").unwrap());
    assert!(journal.index("scratch").is_err());
    assert_eq!(journal.commit().unwrap(), 0);
}

#[test]
fn raw_write_alone_is_committed() {
    let journal = Journal::open(Config::transient()).unwrap();
    let counter = journal.root_block().commit_counter;
    assert_eq!(journal.commit().unwrap(), 0);
    assert_eq!(journal.root_block().commit_counter, counter);
    assert_eq!(journal.stats().noop_commits, 1);

    let addr = journal.write(b"payload").unwrap();
    assert!(journal.commit().unwrap() > 0);
    assert_eq!(journal.root_block().commit_counter, counter + 1);
    assert_eq!(journal.read(addr).unwrap(), b"payload");
}

#[test]
fn destroy_removes_the_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("journal.jnl");
    let journal = Journal::open(disk_config(BufferMode::DiskRw, &path)).unwrap();
    journal.commit().unwrap();
    assert!(path.exists());
    journal.destroy().unwrap();
    assert!(!path.exists());
}

#[test]
fn closed_journal_rejects_operations() {
    let journal = Journal::open(Config::transient()).unwrap();
    journal.close().unwrap();
    assert!(matches!(journal.commit(), Err(JournalError::Closed)));
    assert!(matches!(journal.write(b"x"), Err(JournalError::Closed)));
}
