//! Task scheduling.

use crate::concurrency::handle::{CancelToken, Completion, TaskHandle};
use crate::concurrency::lock::{LockManager, LockMode};
use crate::concurrency::task::{Job, Task};
use crate::concurrency::write_service::WriteService;
use crate::engine::JournalCore;
use crate::error::{JournalError, JournalResult};
use crate::types::TxId;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tessera_storage::StorageError;
use tracing::{debug, info, warn};

/// Capacity of each task queue.
pub const QUEUE_CAPACITY: usize = 10_000;

/// Tokens of the tasks currently running, for shutdown escalation.
#[derive(Debug, Default)]
pub(crate) struct Running {
    next: AtomicU64,
    tokens: Mutex<HashMap<u64, Arc<CancelToken>>>,
}

impl Running {
    pub(crate) fn enter(&self, token: &Arc<CancelToken>) -> u64 {
        let slot = self.next.fetch_add(1, Ordering::Relaxed);
        self.tokens.lock().insert(slot, Arc::clone(token));
        slot
    }

    pub(crate) fn leave(&self, slot: u64) {
        self.tokens.lock().remove(&slot);
    }

    fn cancel_all(&self) -> usize {
        let tokens = self.tokens.lock();
        for token in tokens.values() {
            token.cancel();
            token.interrupt();
        }
        tokens.len()
    }
}

/// Routes tasks to the read pool or the write service.
///
/// Unisolated write tasks go to the single write service and commit in
/// groups. Read-only tasks, read-committed tasks and transaction tasks run
/// on a pool of reader threads: their views are immutable or private, so
/// only unisolated readers take (shared) resource locks.
pub struct ConcurrencyManager {
    core: Arc<JournalCore>,
    locks: Arc<LockManager>,
    running: Arc<Running>,
    write_queue: Mutex<Option<Sender<Job>>>,
    read_queue: Mutex<Option<Sender<Job>>>,
    write_backlog: Receiver<Job>,
    read_backlog: Receiver<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for ConcurrencyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyManager")
            .field("workers", &self.workers.lock().len())
            .field("queued_writes", &self.write_backlog.len())
            .field("queued_reads", &self.read_backlog.len())
            .finish_non_exhaustive()
    }
}

impl ConcurrencyManager {
    /// Starts the write service and the read pool.
    pub(crate) fn start(core: Arc<JournalCore>) -> JournalResult<Self> {
        let config = core.config().clone();
        let locks = Arc::new(LockManager::new(config.lock_timeout));
        let running = Arc::new(Running::default());
        let (write_tx, write_rx) = crossbeam_channel::bounded(QUEUE_CAPACITY);
        let (read_tx, read_rx) = crossbeam_channel::bounded(QUEUE_CAPACITY);

        let manager = Self {
            core: Arc::clone(&core),
            locks: Arc::clone(&locks),
            running: Arc::clone(&running),
            write_queue: Mutex::new(Some(write_tx)),
            read_queue: Mutex::new(Some(read_tx)),
            write_backlog: write_rx.clone(),
            read_backlog: read_rx.clone(),
            workers: Mutex::new(Vec::new()),
            shutdown_timeout: config.shutdown_timeout,
        };

        let service = WriteService {
            core: Arc::clone(&core),
            locks: Arc::clone(&locks),
            running: Arc::clone(&running),
            window: config.group_commit_timeout,
            max_group_size: config.max_group_size.max(1),
        };
        manager.spawn("tessera-writer".to_string(), move || service.run(write_rx))?;

        for n in 0..config.read_pool_size.max(1) {
            let reader = Reader {
                core: Arc::clone(&core),
                locks: Arc::clone(&locks),
                running: Arc::clone(&running),
            };
            let jobs = read_rx.clone();
            manager.spawn(format!("tessera-reader-{n}"), move || reader.run(jobs))?;
        }
        debug!(readers = config.read_pool_size.max(1), "concurrency manager started");
        Ok(manager)
    }

    fn spawn(&self, name: String, work: impl FnOnce() + Send + 'static) -> JournalResult<()> {
        let handle = thread::Builder::new()
            .name(name)
            .spawn(work)
            .map_err(StorageError::Io)?;
        self.workers.lock().push(handle);
        Ok(())
    }

    /// The resource lock table shared by all workers.
    #[must_use]
    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Queues `task` and returns a handle to its result.
    ///
    /// Submission never blocks. Problems found at submission (a second
    /// submission of the same task, an inactive transaction, a full queue,
    /// a shut down manager) complete the handle with the error.
    pub fn submit<T: Send + 'static>(&self, task: Task<T>) -> TaskHandle<T> {
        if !task.claim() {
            return TaskHandle::ready(Err(JournalError::Resubmitted));
        }
        let scope = task.timestamp();
        if !scope.is_sentinel() && !self.core.transactions().is_active(scope) {
            return TaskHandle::ready(Err(JournalError::TxNotActive { tx: scope }));
        }

        let completion = Completion::new();
        let job = Job::new(&task, Arc::clone(&completion));
        let queue = if task.is_unisolated_write() {
            &self.write_queue
        } else {
            &self.read_queue
        };
        let Some(sender) = queue.lock().clone() else {
            return TaskHandle::ready(Err(JournalError::rejected(
                "concurrency manager is shut down",
            )));
        };
        match sender.try_send(job) {
            Ok(()) => {
                self.core.stats().record_task_submitted();
                debug!(scope = %scope, resources = ?task.resources(), "submitted task");
                TaskHandle::new(completion)
            }
            Err(TrySendError::Full(_)) => {
                TaskHandle::ready(Err(JournalError::rejected("task queue is full")))
            }
            Err(TrySendError::Disconnected(_)) => TaskHandle::ready(Err(JournalError::rejected(
                "concurrency manager is shut down",
            ))),
        }
    }

    fn close_queues(&self) -> bool {
        let write = self.write_queue.lock().take();
        let read = self.read_queue.lock().take();
        write.is_some() || read.is_some()
    }

    /// Stops accepting tasks, lets queued tasks finish, and joins the
    /// workers.
    ///
    /// Tasks still running after the shutdown timeout are cancelled and
    /// interrupted. A task that ignores both still has to return before
    /// this call does.
    pub fn shutdown(&self) {
        if self.close_queues() {
            debug!("shutting down concurrency manager");
        }
        self.join_workers();
    }

    /// Stops accepting tasks, cancels queued ones, interrupts running ones,
    /// and joins the workers.
    pub fn shutdown_now(&self) {
        self.close_queues();
        let mut dropped = 0;
        for job in self.write_backlog.try_iter().chain(self.read_backlog.try_iter()) {
            job.runner.abandon();
            self.core.stats().record_task_cancelled();
            dropped += 1;
        }
        let interrupted = self.running.cancel_all();
        info!(dropped, interrupted, "shutting down concurrency manager now");
        self.join_workers();
    }

    fn join_workers(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        let deadline = Instant::now() + self.shutdown_timeout;
        while workers.iter().any(|w| !w.is_finished()) {
            if Instant::now() >= deadline {
                let interrupted = self.running.cancel_all();
                warn!(interrupted, "shutdown timed out, interrupting running tasks");
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        for worker in workers {
            if worker.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        debug!("concurrency manager stopped");
    }
}

impl Drop for ConcurrencyManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Reader {
    core: Arc<JournalCore>,
    locks: Arc<LockManager>,
    running: Arc<Running>,
}

impl Reader {
    fn run(self, jobs: Receiver<Job>) {
        while let Ok(job) = jobs.recv() {
            self.serve(job);
        }
    }

    fn serve(&self, job: Job) {
        let stats = self.core.stats();
        let ctx = job.context(&self.core);
        let Job {
            timestamp,
            resources,
            token,
            mut runner,
            ..
        } = job;

        if !runner.start() {
            stats.record_task_cancelled();
            return;
        }
        let _locks = if timestamp == TxId::UNISOLATED {
            match self.locks.acquire(&resources, LockMode::Shared) {
                Ok(locks) => Some(locks),
                Err(e) => {
                    stats.record_task_failed();
                    runner.fail(e);
                    return;
                }
            }
        } else {
            None
        };
        if !timestamp.is_sentinel() && !self.core.transactions().is_active(timestamp) {
            stats.record_task_failed();
            runner.fail(JournalError::TxNotActive { tx: timestamp });
            return;
        }

        let slot = self.running.enter(&token);
        let ok = runner.run(&ctx);
        self.running.leave(slot);

        if token.is_cancelled() {
            stats.record_task_cancelled();
            runner.fail(JournalError::Cancelled);
        } else {
            if ok {
                stats.record_task_completed();
            } else {
                stats.record_task_failed();
            }
            runner.publish(None);
        }
    }
}
