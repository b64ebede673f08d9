//! Named resource locks.

use crate::error::{JournalError, JournalResult};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// How a resource is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Any number of readers.
    Shared,
    /// One writer, no readers.
    Exclusive,
}

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
}

impl LockState {
    fn admits(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => !self.writer,
            LockMode::Exclusive => !self.writer && self.readers == 0,
        }
    }
}

/// Per-resource shared/exclusive locks.
///
/// A task's whole resource set is granted at once or not at all, so tasks
/// never hold part of their set while waiting for the rest.
#[derive(Debug)]
pub struct LockManager {
    table: Mutex<HashMap<String, LockState>>,
    released: Condvar,
    timeout: Duration,
}

impl LockManager {
    /// Creates a manager whose acquisitions give up after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Acquires every resource in `resources` in `mode`.
    ///
    /// # Errors
    ///
    /// Returns `Contention` naming the first blocked resource if the set is
    /// not granted within the lock timeout.
    pub fn acquire(
        self: &Arc<Self>,
        resources: &[String],
        mode: LockMode,
    ) -> JournalResult<ResourceLocks> {
        let mut sorted = resources.to_vec();
        sorted.sort();
        sorted.dedup();

        let deadline = Instant::now() + self.timeout;
        let mut table = self.table.lock();
        loop {
            let blocked = sorted
                .iter()
                .find(|name| table.get(*name).is_some_and(|state| !state.admits(mode)));
            let Some(blocked) = blocked else {
                break;
            };
            if self.released.wait_until(&mut table, deadline).timed_out() {
                let still_blocked = table.get(blocked).is_some_and(|state| !state.admits(mode));
                if still_blocked {
                    return Err(JournalError::Contention {
                        resource: blocked.clone(),
                        waited: self.timeout,
                    });
                }
            }
        }

        for name in &sorted {
            let state = table.entry(name.clone()).or_default();
            match mode {
                LockMode::Shared => state.readers += 1,
                LockMode::Exclusive => state.writer = true,
            }
        }
        debug!(resources = ?sorted, ?mode, "acquired locks");
        Ok(ResourceLocks {
            manager: Arc::clone(self),
            resources: sorted,
            mode,
        })
    }

    fn release(&self, resources: &[String], mode: LockMode) {
        let mut table = self.table.lock();
        for name in resources {
            if let Some(state) = table.get_mut(name) {
                match mode {
                    LockMode::Shared => state.readers = state.readers.saturating_sub(1),
                    LockMode::Exclusive => state.writer = false,
                }
                if state.readers == 0 && !state.writer {
                    table.remove(name);
                }
            }
        }
        self.released.notify_all();
    }

    /// Number of resources currently held in any mode.
    #[must_use]
    pub fn held(&self) -> usize {
        self.table.lock().len()
    }
}

/// A granted set of locks, released on drop.
#[derive(Debug)]
pub struct ResourceLocks {
    manager: Arc<LockManager>,
    resources: Vec<String>,
    mode: LockMode,
}

impl ResourceLocks {
    /// The resources held, sorted.
    #[must_use]
    pub fn resources(&self) -> &[String] {
        &self.resources
    }
}

impl Drop for ResourceLocks {
    fn drop(&mut self) {
        self.manager.release(&self.resources, self.mode);
    }
}
