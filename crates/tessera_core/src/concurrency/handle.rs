//! Completion handles for submitted tasks.

use crate::error::{JournalError, JournalResult};
use crate::types::Timestamp;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cancellation and interrupt flags shared by a task and its handle.
///
/// Cancelling is a request the task body observes through
/// [`crate::TaskContext::is_cancelled`]. Interrupting additionally wakes an
/// interruptible sleep and makes [`crate::TaskContext::check_interrupted`]
/// fail. A body that ignores both keeps running until it returns.
#[derive(Debug, Default)]
pub(crate) struct CancelToken {
    cancelled: AtomicBool,
    interrupted: Mutex<bool>,
    wake: Condvar,
}

impl CancelToken {
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn interrupt(&self) {
        *self.interrupted.lock() = true;
        self.wake.notify_all();
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        *self.interrupted.lock()
    }

    /// Sleeps for `duration` unless interrupted first.
    pub(crate) fn sleep(&self, duration: Duration) -> JournalResult<()> {
        let deadline = Instant::now() + duration;
        let mut interrupted = self.interrupted.lock();
        while !*interrupted {
            if self.wake.wait_until(&mut interrupted, deadline).timed_out() {
                break;
            }
        }
        if *interrupted {
            return Err(JournalError::Interrupted);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Queued,
    Running,
    Finished,
}

struct State<T> {
    phase: Phase,
    cancelled: bool,
    outcome: Option<JournalResult<T>>,
    taken: bool,
    commit_time: Option<Timestamp>,
}

/// State shared between a [`TaskHandle`] and the worker running the task.
pub(crate) struct Completion<T> {
    state: Mutex<State<T>>,
    done: Condvar,
    token: Arc<CancelToken>,
}

impl<T> Completion<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                phase: Phase::Queued,
                cancelled: false,
                outcome: None,
                taken: false,
                commit_time: None,
            }),
            done: Condvar::new(),
            token: Arc::new(CancelToken::default()),
        })
    }

    pub(crate) fn token(&self) -> &Arc<CancelToken> {
        &self.token
    }

    /// Moves a queued task to running. False if it was cancelled first.
    pub(crate) fn start(&self) -> bool {
        let mut state = self.state.lock();
        if state.cancelled || state.phase != Phase::Queued {
            return false;
        }
        state.phase = Phase::Running;
        true
    }

    /// Publishes the task's outcome. Ignored after cancellation.
    pub(crate) fn complete(&self, outcome: JournalResult<T>, commit_time: Option<Timestamp>) {
        let mut state = self.state.lock();
        state.phase = Phase::Finished;
        if !state.cancelled {
            state.outcome = Some(outcome);
            state.commit_time = commit_time;
        }
        self.done.notify_all();
    }

    /// Cancels the task. Returns false if it already finished.
    pub(crate) fn cancel(&self, may_interrupt: bool) -> bool {
        let mut state = self.state.lock();
        if state.phase == Phase::Finished || state.cancelled {
            return false;
        }
        state.cancelled = true;
        self.token.cancel();
        if may_interrupt && state.phase == Phase::Running {
            self.token.interrupt();
        }
        self.done.notify_all();
        true
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    fn ready(state: &State<T>) -> bool {
        state.cancelled || state.phase == Phase::Finished
    }

    fn take(state: &mut State<T>) -> JournalResult<T> {
        if state.cancelled {
            return Err(JournalError::Cancelled);
        }
        if state.taken {
            return Err(JournalError::invalid_operation("task result already taken"));
        }
        state.taken = true;
        state
            .outcome
            .take()
            .unwrap_or(Err(JournalError::Cancelled))
    }

    fn wait(&self) -> (JournalResult<T>, Option<Timestamp>) {
        let mut state = self.state.lock();
        while !Self::ready(&state) {
            self.done.wait(&mut state);
        }
        let commit_time = state.commit_time;
        (Self::take(&mut state), commit_time)
    }

    fn wait_until(&self, deadline: Instant) -> Option<JournalResult<T>> {
        let mut state = self.state.lock();
        while !Self::ready(&state) {
            if self.done.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        Self::ready(&state).then(|| Self::take(&mut state))
    }
}

/// Handle to the eventual result of a submitted task.
///
/// Dropping the handle does not cancel the task.
pub struct TaskHandle<T> {
    completion: Arc<Completion<T>>,
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("done", &self.is_done())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(completion: Arc<Completion<T>>) -> Self {
        Self { completion }
    }

    /// A handle that is already complete.
    pub(crate) fn ready(outcome: JournalResult<T>) -> Self {
        let completion = Completion::new();
        completion.complete(outcome, None);
        Self::new(completion)
    }

    /// Blocks until the task finishes and returns its result.
    ///
    /// # Errors
    ///
    /// Returns the task's error, `Cancelled` if the task was cancelled, or
    /// `GroupCommit` if the commit it took part in failed.
    pub fn get(self) -> JournalResult<T> {
        self.completion.wait().0
    }

    pub(crate) fn join(self) -> (JournalResult<T>, Option<Timestamp>) {
        self.completion.wait()
    }

    /// Waits up to `timeout`; `None` if the task is still running.
    ///
    /// The result can be taken once. Later calls return `InvalidOperation`.
    pub fn get_timeout(&self, timeout: Duration) -> Option<JournalResult<T>> {
        self.completion.wait_until(Instant::now() + timeout)
    }

    /// Cancels the task.
    ///
    /// A queued task never runs. A running task sees
    /// [`crate::TaskContext::is_cancelled`] turn true and, with
    /// `may_interrupt`, is interrupted as well. Returns false if the task
    /// had already finished or was cancelled before.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        self.completion.cancel(may_interrupt)
    }

    /// Interrupts the running task without cancelling it.
    pub fn interrupt(&self) {
        self.completion.token().interrupt();
    }

    /// True once the task finished or was cancelled.
    #[must_use]
    pub fn is_done(&self) -> bool {
        Completion::ready(&self.completion.state.lock())
    }

    /// True if the task was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.completion.is_cancelled()
    }

    /// Commit time of the group the task was published in.
    ///
    /// `Some(0)` if the group had nothing to commit, `None` for tasks that
    /// did not go through the write service or have not finished.
    #[must_use]
    pub fn commit_time(&self) -> Option<Timestamp> {
        self.completion.state.lock().commit_time
    }
}
