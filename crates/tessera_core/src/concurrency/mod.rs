//! Scheduling of tasks against named resources.
//!
//! - [`Task`]: a body bound to a scope and a resource set
//! - [`TaskHandle`]: the caller's side of a submitted task
//! - [`LockManager`]: per-resource shared/exclusive locks
//! - [`ConcurrencyManager`]: read pool, write service and shutdown

mod handle;
mod lock;
mod manager;
mod task;
mod write_service;

pub use handle::TaskHandle;
pub use lock::{LockManager, LockMode, ResourceLocks};
pub use manager::{ConcurrencyManager, QUEUE_CAPACITY};
pub use task::{Task, TaskContext};
