//! Units of work and the context they run in.

use crate::concurrency::handle::{CancelToken, Completion};
use crate::engine::JournalCore;
use crate::error::{JournalError, JournalResult};
use crate::index::{IndexMetadata, IndexView, LiveIndex, LiveReader};
use crate::types::{Timestamp, TxId};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Body<T> = dyn Fn(&TaskContext) -> JournalResult<T> + Send + Sync;

/// A unit of work bound to a scope and a set of named resources.
///
/// The scope is [`TxId::UNISOLATED`], [`TxId::READ_COMMITTED`] or a
/// transaction identifier. Unisolated tasks that write run on the write
/// service and take part in a group commit; everything else runs on the
/// read pool.
///
/// A task is submitted at most once. Clones share the submission flag.
pub struct Task<T> {
    timestamp: TxId,
    resources: Arc<[String]>,
    read_only: bool,
    body: Arc<Body<T>>,
    submitted: Arc<AtomicBool>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            timestamp: self.timestamp,
            resources: Arc::clone(&self.resources),
            read_only: self.read_only,
            body: Arc::clone(&self.body),
            submitted: Arc::clone(&self.submitted),
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("timestamp", &self.timestamp)
            .field("resources", &self.resources)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl<T> Task<T> {
    /// Creates a task that may write its resources.
    pub fn new<I, S, F>(timestamp: TxId, resources: I, body: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&TaskContext) -> JournalResult<T> + Send + Sync + 'static,
    {
        let mut resources: Vec<String> = resources.into_iter().map(Into::into).collect();
        resources.sort();
        resources.dedup();
        Self {
            timestamp,
            resources: resources.into(),
            read_only: false,
            body: Arc::new(body),
            submitted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a task that only reads its resources.
    pub fn read_only<I, S, F>(timestamp: TxId, resources: I, body: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&TaskContext) -> JournalResult<T> + Send + Sync + 'static,
    {
        Self {
            read_only: true,
            ..Self::new(timestamp, resources, body)
        }
    }

    /// The scope the task runs in.
    #[must_use]
    pub fn timestamp(&self) -> TxId {
        self.timestamp
    }

    /// Declared resources, sorted.
    #[must_use]
    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    /// True for tasks that never write.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// True for tasks the write service runs.
    #[must_use]
    pub fn is_unisolated_write(&self) -> bool {
        self.timestamp == TxId::UNISOLATED && !self.read_only
    }

    /// Marks the task submitted. False if it already was.
    pub(crate) fn claim(&self) -> bool {
        !self.submitted.swap(true, Ordering::AcqRel)
    }
}

/// An index registration or drop made by a write task, kept for rollback.
#[derive(Debug)]
pub(crate) enum SchemaChange {
    Registered(String),
    Dropped(Arc<LiveIndex>),
}

/// What a running task can see and do.
pub struct TaskContext {
    core: Arc<JournalCore>,
    timestamp: TxId,
    resources: Arc<[String]>,
    read_only: bool,
    token: Arc<CancelToken>,
    changes: Mutex<Vec<SchemaChange>>,
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("timestamp", &self.timestamp)
            .field("resources", &self.resources)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl TaskContext {
    pub(crate) fn new(
        core: Arc<JournalCore>,
        timestamp: TxId,
        resources: Arc<[String]>,
        read_only: bool,
        token: Arc<CancelToken>,
    ) -> Self {
        Self {
            core,
            timestamp,
            resources,
            read_only,
            token,
            changes: Mutex::new(Vec::new()),
        }
    }

    /// The scope the task runs in.
    #[must_use]
    pub fn timestamp(&self) -> TxId {
        self.timestamp
    }

    /// Declared resources, sorted.
    #[must_use]
    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    /// The single declared resource.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` unless exactly one resource was declared.
    pub fn only_resource(&self) -> JournalResult<&str> {
        match &*self.resources {
            [only] => Ok(only.as_str()),
            other => Err(JournalError::invalid_operation(format!(
                "task declares {} resources, not one",
                other.len()
            ))),
        }
    }

    fn check_declared(&self, name: &str) -> JournalResult<()> {
        if self.resources.binary_search_by(|r| r.as_str().cmp(name)).is_err() {
            return Err(JournalError::UndeclaredResource {
                resource: name.to_string(),
            });
        }
        Ok(())
    }

    fn is_unisolated_write(&self) -> bool {
        self.timestamp == TxId::UNISOLATED && !self.read_only
    }

    fn require_write(&self, operation: &str) -> JournalResult<()> {
        if !self.is_unisolated_write() {
            return Err(JournalError::invalid_operation(format!(
                "{operation} needs an unisolated write task"
            )));
        }
        Ok(())
    }

    /// Resolves a declared index in the task's scope.
    ///
    /// # Errors
    ///
    /// Returns `UndeclaredResource` for names the task did not declare and
    /// `NoSuchIndex` if the index does not exist in the scope.
    pub fn index(&self, name: &str) -> JournalResult<Arc<dyn IndexView>> {
        self.check_declared(name)?;
        if self.timestamp == TxId::UNISOLATED {
            let live = self.core.live_index(name)?;
            if self.read_only {
                return Ok(Arc::new(LiveReader(live)));
            }
            return Ok(Arc::new(self.core.handle(live)));
        }
        self.core.index_for(name, self.timestamp)
    }

    pub(crate) fn live_index(&self, name: &str) -> JournalResult<Arc<LiveIndex>> {
        self.check_declared(name)?;
        self.core.live_index(name)
    }

    /// Registers a new index under a declared name.
    ///
    /// The index becomes part of the next commit; if the task fails it is
    /// removed again.
    ///
    /// # Errors
    ///
    /// Returns `IndexExists` if the name is taken and `InvalidOperation`
    /// outside unisolated write tasks.
    pub fn register_index(&self, metadata: IndexMetadata) -> JournalResult<Arc<dyn IndexView>> {
        self.require_write("registering an index")?;
        self.check_declared(&metadata.name)?;
        let name = metadata.name.clone();
        let live = self.core.register_index(metadata)?;
        self.changes.lock().push(SchemaChange::Registered(name));
        Ok(Arc::new(self.core.handle(live)))
    }

    /// Drops a declared index.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchIndex` if absent and `InvalidOperation` outside
    /// unisolated write tasks.
    pub fn drop_index(&self, name: &str) -> JournalResult<()> {
        self.require_write("dropping an index")?;
        self.check_declared(name)?;
        let dropped = self.core.drop_index(name)?;
        self.changes.lock().push(SchemaChange::Dropped(dropped));
        Ok(())
    }

    pub(crate) fn take_changes(&self) -> Vec<SchemaChange> {
        std::mem::take(&mut *self.changes.lock())
    }

    /// True once the task's handle was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fails with `Interrupted` if the task was interrupted.
    ///
    /// # Errors
    ///
    /// Returns `Interrupted` after an interrupt.
    pub fn check_interrupted(&self) -> JournalResult<()> {
        if self.token.is_interrupted() {
            return Err(JournalError::Interrupted);
        }
        Ok(())
    }

    /// Sleeps for `duration`, waking early on interrupt.
    ///
    /// # Errors
    ///
    /// Returns `Interrupted` if interrupted while sleeping.
    pub fn sleep(&self, duration: Duration) -> JournalResult<()> {
        self.token.sleep(duration)
    }
}

/// A submitted task with its result type erased.
pub(crate) trait Runner: Send {
    /// Moves the task to running. False if it was cancelled first.
    fn start(&self) -> bool;

    /// Runs the body and keeps its result. Returns whether it succeeded.
    fn run(&mut self, ctx: &TaskContext) -> bool;

    /// The kept error, if the body failed.
    fn error(&self) -> Option<String>;

    /// Hands the kept result to the caller.
    fn publish(self: Box<Self>, commit_time: Option<Timestamp>);

    /// Fails the task with `error`, discarding any kept result.
    fn fail(self: Box<Self>, error: JournalError);

    /// Cancels a task that will never run.
    fn abandon(self: Box<Self>);
}

struct TaskRunner<T> {
    body: Arc<Body<T>>,
    completion: Arc<Completion<T>>,
    outcome: Option<JournalResult<T>>,
}

impl<T: Send + 'static> Runner for TaskRunner<T> {
    fn start(&self) -> bool {
        self.completion.start()
    }

    fn run(&mut self, ctx: &TaskContext) -> bool {
        let outcome = (self.body)(ctx);
        let ok = outcome.is_ok();
        self.outcome = Some(outcome);
        ok
    }

    fn error(&self) -> Option<String> {
        match &self.outcome {
            Some(Err(e)) => Some(e.to_string()),
            _ => None,
        }
    }

    fn publish(self: Box<Self>, commit_time: Option<Timestamp>) {
        let this = *self;
        let outcome = this.outcome.unwrap_or(Err(JournalError::Cancelled));
        this.completion.complete(outcome, commit_time);
    }

    fn fail(self: Box<Self>, error: JournalError) {
        self.completion.complete(Err(error), None);
    }

    fn abandon(self: Box<Self>) {
        self.completion.cancel(false);
    }
}

/// A task on its way through a queue.
pub(crate) struct Job {
    pub(crate) timestamp: TxId,
    pub(crate) resources: Arc<[String]>,
    pub(crate) read_only: bool,
    pub(crate) token: Arc<CancelToken>,
    pub(crate) runner: Box<dyn Runner>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("timestamp", &self.timestamp)
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}

impl Job {
    pub(crate) fn new<T: Send + 'static>(task: &Task<T>, completion: Arc<Completion<T>>) -> Self {
        Self {
            timestamp: task.timestamp,
            resources: Arc::clone(&task.resources),
            read_only: task.read_only,
            token: Arc::clone(completion.token()),
            runner: Box::new(TaskRunner {
                body: Arc::clone(&task.body),
                completion,
                outcome: None,
            }),
        }
    }

    pub(crate) fn context(&self, core: &Arc<JournalCore>) -> TaskContext {
        TaskContext::new(
            Arc::clone(core),
            self.timestamp,
            Arc::clone(&self.resources),
            self.read_only,
            Arc::clone(&self.token),
        )
    }
}
