//! The single writer behind unisolated write tasks.
//!
//! One thread drains the write queue. The first task opens a group and
//! every task that arrives within the group commit window joins it; the
//! group commits when the window closes or the group is full. While a
//! group is open the writer holds the journal's write gate, so unisolated
//! writes through the facade wait for the commit.
//!
//! Each task's effects are checkpointed when it succeeds and reverted when
//! it fails, so a failing task never drags its siblings down. Only a
//! failure of the commit itself fails the whole group.

use crate::concurrency::lock::{LockManager, LockMode, ResourceLocks};
use crate::concurrency::manager::Running;
use crate::concurrency::task::{Job, Runner, SchemaChange};
use crate::engine::JournalCore;
use crate::error::{JournalError, JournalResult};
use crossbeam_channel::Receiver;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Default)]
struct Group {
    started: usize,
    held: BTreeSet<String>,
    locks: Vec<ResourceLocks>,
    members: Vec<Box<dyn Runner>>,
}

pub(crate) struct WriteService {
    pub(crate) core: Arc<JournalCore>,
    pub(crate) locks: Arc<LockManager>,
    pub(crate) running: Arc<Running>,
    pub(crate) window: Duration,
    pub(crate) max_group_size: usize,
}

impl WriteService {
    pub(crate) fn run(self, jobs: Receiver<Job>) {
        while let Ok(first) = jobs.recv() {
            let _gate = self.core.exclusive();
            let deadline = Instant::now() + self.window;
            let mut group = Group::default();
            self.process(&mut group, first);
            while group.started < self.max_group_size {
                match jobs.recv_deadline(deadline) {
                    Ok(job) => self.process(&mut group, job),
                    Err(_) => break,
                }
            }
            self.commit(group);
        }
        debug!("write service stopped");
    }

    fn process(&self, group: &mut Group, job: Job) {
        let stats = self.core.stats();
        let ctx = job.context(&self.core);
        let Job {
            resources,
            token,
            mut runner,
            ..
        } = job;

        if !runner.start() {
            stats.record_task_cancelled();
            debug!(?resources, "skipped cancelled write task");
            return;
        }
        group.started += 1;

        let missing: Vec<String> = resources
            .iter()
            .filter(|name| !group.held.contains(*name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            match self.locks.acquire(&missing, LockMode::Exclusive) {
                Ok(locks) => {
                    group.held.extend(missing);
                    group.locks.push(locks);
                }
                Err(e) => {
                    stats.record_task_failed();
                    runner.fail(e);
                    return;
                }
            }
        }

        // Writes made through the facade before this task belong to the
        // group, not to the task, and must survive its rollback.
        if let Err(e) = self.checkpoint(&resources) {
            warn!(?resources, error = %e, "checkpoint before write task failed");
            stats.record_task_failed();
            runner.fail(e);
            return;
        }

        let slot = self.running.enter(&token);
        let ok = runner.run(&ctx);
        self.running.leave(slot);
        let changes = ctx.take_changes();

        if token.is_cancelled() {
            self.rollback(&resources, changes);
            stats.record_task_cancelled();
            runner.fail(JournalError::Cancelled);
        } else if !ok {
            warn!(
                ?resources,
                error = %runner.error().unwrap_or_default(),
                "write task failed, reverting its indices"
            );
            self.rollback(&resources, changes);
            stats.record_task_failed();
            runner.publish(None);
        } else if let Err(e) = self.checkpoint(&resources) {
            warn!(?resources, error = %e, "checkpoint after write task failed");
            self.rollback(&resources, changes);
            stats.record_task_failed();
            runner.fail(e);
        } else {
            group.members.push(runner);
        }
    }

    fn checkpoint(&self, resources: &[String]) -> JournalResult<()> {
        for name in resources {
            if let Ok(live) = self.core.live_index(name) {
                live.checkpoint()?;
            }
        }
        Ok(())
    }

    fn rollback(&self, resources: &[String], changes: Vec<SchemaChange>) {
        for change in changes.into_iter().rev() {
            match change {
                SchemaChange::Registered(name) => self.core.unregister_index(&name),
                SchemaChange::Dropped(index) => self.core.restore_index(index),
            }
        }
        for name in resources {
            if let Ok(live) = self.core.live_index(name) {
                if let Err(e) = live.revert(live.checkpoint_address()) {
                    warn!(index = %name, error = %e, "failed to revert index");
                }
            }
        }
    }

    fn commit(&self, group: Group) {
        if group.started == 0 {
            return;
        }
        let stats = self.core.stats();
        let Group { locks, members, .. } = group;
        match self.core.commit() {
            Ok(commit_time) => {
                if commit_time > 0 {
                    stats.record_group_commit();
                }
                debug!(commit_time, members = members.len(), "group committed");
                for member in members {
                    stats.record_task_completed();
                    member.publish(Some(commit_time));
                }
            }
            Err(e) => {
                warn!(error = %e, members = members.len(), "group commit failed");
                let cause = Arc::new(e);
                for member in members {
                    stats.record_task_failed();
                    member.fail(JournalError::GroupCommit(Arc::clone(&cause)));
                }
            }
        }
        drop(locks);
    }
}
