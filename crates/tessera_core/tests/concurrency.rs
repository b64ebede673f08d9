//! Task submission, group commit and cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tessera_core::{
    Config, IndexMetadata, IndexView, IsolationLevel, Journal, JournalError, Task, TxId,
};

const WAIT: Duration = Duration::from_secs(10);
const WINDOW: Duration = Duration::from_millis(500);

fn journal(config: Config) -> Journal {
    let journal = Journal::open(config).unwrap();
    journal.register_index(IndexMetadata::new("idx")).unwrap();
    journal.commit().unwrap();
    journal
}

fn wait_for(flag: &AtomicBool) {
    let deadline = Instant::now() + WAIT;
    while !flag.load(Ordering::Acquire) {
        assert!(Instant::now() < deadline, "task never started");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn unisolated_write_task_commits() {
    let journal = journal(Config::transient());
    let before = journal.root_block().commit_counter;

    let handle = journal.submit(Task::new(TxId::UNISOLATED, ["idx"], |ctx| {
        ctx.index("idx")?.insert(b"k", b"v")?;
        Ok(7)
    }));
    assert_eq!(handle.get_timeout(WAIT).unwrap().unwrap(), 7);
    let commit_time = handle.commit_time().unwrap();
    assert!(commit_time > 0);

    assert_eq!(journal.last_commit_time(), commit_time);
    assert_eq!(journal.root_block().commit_counter, before + 1);
    assert!(journal.index("idx").unwrap().contains(b"k").unwrap());
}

#[test]
fn read_tasks_do_not_commit() {
    let journal = journal(Config::transient());
    journal.index("idx").unwrap().insert(b"k", b"v").unwrap();
    journal.commit().unwrap();
    let counter = journal.root_block().commit_counter;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            journal.submit(Task::read_only(TxId::UNISOLATED, ["idx"], |ctx| {
                ctx.index("idx")?.lookup(b"k")
            }))
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.get().unwrap().as_deref(), Some(&b"v"[..]));
    }
    assert_eq!(journal.root_block().commit_counter, counter);
}

#[test]
fn read_task_cannot_write() {
    let journal = journal(Config::transient());
    let handle = journal.submit(Task::read_only(TxId::UNISOLATED, ["idx"], |ctx| {
        ctx.index("idx")?.insert(b"k", b"v")
    }));
    assert!(matches!(handle.get(), Err(JournalError::ReadOnly { .. })));
}

#[test]
fn undeclared_resource_is_refused() {
    let journal = journal(Config::transient());
    let handle = journal.submit(Task::new(TxId::UNISOLATED, ["idx"], |ctx| {
        ctx.index("other")?.insert(b"k", b"v")
    }));
    assert!(matches!(
        handle.get(),
        Err(JournalError::UndeclaredResource { .. })
    ));
}

#[test]
fn resubmission_is_refused() {
    let journal = journal(Config::transient());
    let task = Task::read_only(TxId::UNISOLATED, ["idx"], |_| Ok(()));
    journal.submit(task.clone()).get().unwrap();
    assert!(matches!(
        journal.submit(task).get(),
        Err(JournalError::Resubmitted)
    ));
}

#[test]
fn transaction_task_writes_privately() {
    let journal = journal(Config::transient());
    let tx = journal.new_tx(IsolationLevel::ReadWrite).unwrap();

    let handle = journal.submit(Task::new(tx, ["idx"], |ctx| {
        ctx.index("idx")?.insert(b"k", b"v")?;
        Ok(())
    }));
    handle.get().unwrap();
    assert!(!journal.index("idx").unwrap().contains(b"k").unwrap());

    assert!(journal.commit_tx(tx).unwrap() > 0);
    assert!(journal.index("idx").unwrap().contains(b"k").unwrap());

    let late = journal.submit(Task::new(tx, ["idx"], |_| Ok(())));
    assert!(matches!(late.get(), Err(JournalError::TxNotActive { .. })));
}

#[test]
fn queued_tasks_share_one_commit() {
    let journal = journal(Config::transient().group_commit_timeout(WINDOW));
    let started = Arc::new(AtomicBool::new(false));

    let gate = Arc::clone(&started);
    let first = journal.submit(Task::new(TxId::UNISOLATED, ["idx"], move |ctx| {
        gate.store(true, Ordering::Release);
        ctx.sleep(Duration::from_millis(100))?;
        ctx.index("idx")?.insert(b"first", b"1")?;
        Ok(())
    }));
    wait_for(&started);

    let rest: Vec<_> = (0u8..4)
        .map(|i| {
            journal.submit(Task::new(TxId::UNISOLATED, ["idx"], move |ctx| {
                ctx.index("idx")?.insert(&[i], &[i])?;
                Ok(())
            }))
        })
        .collect();

    first.get_timeout(WAIT).unwrap().unwrap();
    let commit_time = first.commit_time().unwrap();
    assert!(commit_time > 0);
    for handle in &rest {
        handle.get_timeout(WAIT).unwrap().unwrap();
        assert_eq!(handle.commit_time(), Some(commit_time));
    }
    assert!(journal.stats().groups_committed >= 1);
}

#[test]
fn failed_task_does_not_sink_its_group() {
    let journal = journal(Config::transient().group_commit_timeout(WINDOW));
    let started = Arc::new(AtomicBool::new(false));

    let gate = Arc::clone(&started);
    let good = journal.submit(Task::new(TxId::UNISOLATED, ["idx"], move |ctx| {
        gate.store(true, Ordering::Release);
        ctx.sleep(Duration::from_millis(100))?;
        ctx.index("idx")?.insert(b"good", b"1")?;
        Ok(())
    }));
    wait_for(&started);

    let bad = journal.submit(Task::new(TxId::UNISOLATED, ["idx"], |ctx| {
        ctx.index("idx")?.insert(b"bad", b"1")?;
        Err::<(), _>(JournalError::invalid_operation("task body failed"))
    }));
    let after = journal.submit(Task::new(TxId::UNISOLATED, ["idx"], |ctx| {
        ctx.index("idx")?.insert(b"after", b"1")?;
        Ok(())
    }));

    good.get_timeout(WAIT).unwrap().unwrap();
    assert!(matches!(
        bad.get_timeout(WAIT).unwrap(),
        Err(JournalError::InvalidOperation { .. })
    ));
    after.get_timeout(WAIT).unwrap().unwrap();
    assert_eq!(good.commit_time(), after.commit_time());

    let live = journal.index("idx").unwrap();
    assert!(live.contains(b"good").unwrap());
    assert!(live.contains(b"after").unwrap());
    assert!(!live.contains(b"bad").unwrap());
}

#[test]
fn tasks_arriving_within_the_window_join_the_group() {
    let journal = journal(Config::transient().group_commit_timeout(WINDOW));
    let first = journal.submit(Task::new(TxId::UNISOLATED, ["idx"], |ctx| {
        ctx.index("idx")?.insert(b"first", b"1")?;
        Ok(())
    }));
    thread::sleep(Duration::from_millis(30));
    let second = journal.submit(Task::new(TxId::UNISOLATED, ["idx"], |ctx| {
        ctx.index("idx")?.insert(b"second", b"2")?;
        Ok(())
    }));

    first.get_timeout(WAIT).unwrap().unwrap();
    second.get_timeout(WAIT).unwrap().unwrap();
    assert!(first.commit_time().unwrap() > 0);
    assert_eq!(first.commit_time(), second.commit_time());
}

#[test]
fn facade_writes_wait_for_the_open_group() {
    let journal = Arc::new(journal(Config::transient().group_commit_timeout(WINDOW)));
    let started = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));

    let (gate, hold) = (Arc::clone(&started), Arc::clone(&release));
    let task = journal.submit(Task::new(TxId::UNISOLATED, ["idx"], move |ctx| {
        gate.store(true, Ordering::Release);
        while !hold.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(1));
        }
        ctx.index("idx")?.insert(b"task", b"1")?;
        Ok(())
    }));
    wait_for(&started);

    let (sent, landed) = mpsc::channel();
    let writer = {
        let journal = Arc::clone(&journal);
        thread::spawn(move || {
            journal.index("idx").unwrap().insert(b"facade", b"1").unwrap();
            sent.send(journal.last_commit_time()).unwrap();
        })
    };
    assert!(landed.recv_timeout(Duration::from_millis(100)).is_err());

    release.store(true, Ordering::Release);
    task.get_timeout(WAIT).unwrap().unwrap();
    let group_time = task.commit_time().unwrap();
    assert_eq!(landed.recv_timeout(WAIT).unwrap(), group_time);
    writer.join().unwrap();

    let tx = journal.new_tx(IsolationLevel::ReadOnly(group_time)).unwrap();
    let committed = journal.index_for("idx", tx).unwrap();
    assert!(committed.contains(b"task").unwrap());
    assert!(!committed.contains(b"facade").unwrap());
    assert!(journal.index("idx").unwrap().contains(b"facade").unwrap());
}

#[test]
fn facade_writes_before_a_group_survive_a_failed_task() {
    let journal = journal(Config::transient());
    journal.index("idx").unwrap().insert(b"facade", b"1").unwrap();

    let bad = journal.submit(Task::new(TxId::UNISOLATED, ["idx"], |ctx| {
        ctx.index("idx")?.insert(b"bad", b"1")?;
        Err::<(), _>(JournalError::invalid_operation("task body failed"))
    }));
    assert!(matches!(
        bad.get_timeout(WAIT).unwrap(),
        Err(JournalError::InvalidOperation { .. })
    ));

    let live = journal.index("idx").unwrap();
    assert!(live.contains(b"facade").unwrap());
    assert!(!live.contains(b"bad").unwrap());

    journal.commit().unwrap();
    let tx = journal
        .new_tx(IsolationLevel::ReadOnly(journal.last_commit_time()))
        .unwrap();
    let committed = journal.index_for("idx", tx).unwrap();
    assert!(committed.contains(b"facade").unwrap());
    assert!(!committed.contains(b"bad").unwrap());
}

#[test]
fn failed_schema_change_is_rolled_back() {
    let journal = journal(Config::transient());
    let handle = journal.submit(Task::new(TxId::UNISOLATED, ["fresh"], |ctx| {
        ctx.register_index(IndexMetadata::new("fresh"))?;
        Err::<(), _>(JournalError::invalid_operation("changed my mind"))
    }));
    assert!(handle.get().is_err());
    assert!(!journal.index_names().contains(&"fresh".to_string()));

    let handle = journal.submit(Task::new(TxId::UNISOLATED, ["fresh"], |ctx| {
        ctx.register_index(IndexMetadata::new("fresh"))?;
        Ok(())
    }));
    handle.get_timeout(WAIT).unwrap().unwrap();
    assert!(handle.commit_time().unwrap() > 0);
    assert!(journal.index_names().contains(&"fresh".to_string()));
}

#[test]
fn cancel_before_start_skips_the_task() {
    let journal = journal(Config::transient());
    let started = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));

    let (gate, hold) = (Arc::clone(&started), Arc::clone(&release));
    let blocker = journal.submit(Task::new(TxId::UNISOLATED, ["idx"], move |_| {
        gate.store(true, Ordering::Release);
        while !hold.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }));
    wait_for(&started);

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let queued = journal.submit(Task::new(TxId::UNISOLATED, ["idx"], move |_| {
        flag.store(true, Ordering::Release);
        Ok(())
    }));
    assert!(queued.cancel(false));
    assert!(!queued.cancel(false));
    release.store(true, Ordering::Release);

    blocker.get().unwrap();
    assert!(matches!(queued.get(), Err(JournalError::Cancelled)));
    journal.shutdown();
    assert!(!ran.load(Ordering::Acquire));
}

#[test]
fn interrupting_a_running_task_rolls_it_back() {
    let journal = journal(Config::transient());
    let started = Arc::new(AtomicBool::new(false));

    let gate = Arc::clone(&started);
    let handle = journal.submit(Task::new(TxId::UNISOLATED, ["idx"], move |ctx| {
        ctx.index("idx")?.insert(b"k", b"v")?;
        gate.store(true, Ordering::Release);
        ctx.sleep(Duration::from_secs(60))?;
        Ok(())
    }));
    wait_for(&started);

    assert!(handle.cancel(true));
    assert!(handle.is_cancelled());
    journal.shutdown();

    assert!(matches!(handle.get(), Err(JournalError::Cancelled)));
    assert!(!journal.index("idx").unwrap().contains(b"k").unwrap());
}

#[test]
fn cooperative_cancellation_is_observed() {
    let journal = journal(Config::transient());
    let started = Arc::new(AtomicBool::new(false));

    let gate = Arc::clone(&started);
    let handle = journal.submit(Task::read_only(TxId::UNISOLATED, ["idx"], move |ctx| {
        gate.store(true, Ordering::Release);
        while !ctx.is_cancelled() {
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }));
    wait_for(&started);

    assert!(handle.cancel(false));
    journal.shutdown();
    assert!(matches!(handle.get(), Err(JournalError::Cancelled)));
}

#[test]
fn shutdown_now_interrupts_and_drops_queued_work() {
    let journal = journal(Config::transient());
    let started = Arc::new(AtomicBool::new(false));

    let gate = Arc::clone(&started);
    let running = journal.submit(Task::new(TxId::UNISOLATED, ["idx"], move |ctx| {
        gate.store(true, Ordering::Release);
        ctx.sleep(Duration::from_secs(60))?;
        Ok(())
    }));
    wait_for(&started);
    let queued = journal.submit(Task::new(TxId::UNISOLATED, ["idx"], |_| Ok(())));

    let began = Instant::now();
    journal.shutdown_now();
    assert!(began.elapsed() < WAIT);

    assert!(running.get().is_err());
    assert!(queued.get().is_err());

    let rejected = journal.submit(Task::new(TxId::UNISOLATED, ["idx"], |_| Ok(())));
    assert!(matches!(rejected.get(), Err(JournalError::Rejected { .. })));
}

#[test]
fn concurrent_submitters() {
    let journal = Arc::new(journal(Config::transient()));
    let threads: Vec<_> = (0u8..4)
        .map(|t| {
            let journal = Arc::clone(&journal);
            thread::spawn(move || {
                for i in 0u8..25 {
                    let handle = journal.submit(Task::new(TxId::UNISOLATED, ["idx"], move |ctx| {
                        ctx.index("idx")?.insert(&[t, i], &[i])?;
                        Ok(())
                    }));
                    handle.get().unwrap();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(journal.index("idx").unwrap().len().unwrap(), 100);
}
