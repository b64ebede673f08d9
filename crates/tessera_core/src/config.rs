//! Journal configuration.

use std::path::PathBuf;
use std::time::Duration;
use tessera_storage::{BufferMode, StoreOptions};

/// How hard a commit pushes data to stable media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForceOnCommit {
    /// Leave flushing to the operating system.
    No,
    /// Force file data.
    #[default]
    Force,
    /// Force file data and metadata.
    ForceMetadata,
}

/// Configuration for opening a journal.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend selection and sizing.
    pub store: StoreOptions,

    /// Durability of each commit.
    pub force_on_commit: ForceOnCommit,

    /// How long released space stays readable for historical views.
    pub min_release_age: Duration,

    /// Number of threads serving read tasks.
    pub read_pool_size: usize,

    /// How long the write service keeps a commit group open.
    pub group_commit_timeout: Duration,

    /// Largest number of tasks in one commit group.
    pub max_group_size: usize,

    /// How long a task waits for a resource lock.
    pub lock_timeout: Duration,

    /// How long shutdown waits before interrupting running tasks.
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreOptions::default(),
            force_on_commit: ForceOnCommit::Force,
            min_release_age: Duration::ZERO,
            read_pool_size: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(4),
            group_commit_timeout: Duration::from_millis(100),
            max_group_size: 100,
            lock_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for a heap-resident journal.
    #[must_use]
    pub fn transient() -> Self {
        Self::default().mode(BufferMode::Transient)
    }

    /// Configuration for a file-backed journal.
    #[must_use]
    pub fn disk(mode: BufferMode, path: impl Into<PathBuf>) -> Self {
        let mut config = Self::default().mode(mode);
        config.store = config.store.file(path);
        config
    }

    /// Sets the backend kind.
    #[must_use]
    pub fn mode(mut self, mode: BufferMode) -> Self {
        self.store.mode = mode;
        self
    }

    /// Replaces the store options.
    #[must_use]
    pub fn store(mut self, store: StoreOptions) -> Self {
        self.store = store;
        self
    }

    /// Sets the commit durability.
    #[must_use]
    pub const fn force_on_commit(mut self, value: ForceOnCommit) -> Self {
        self.force_on_commit = value;
        self
    }

    /// Sets the minimum release age.
    #[must_use]
    pub const fn min_release_age(mut self, age: Duration) -> Self {
        self.min_release_age = age;
        self
    }

    /// Sets the read pool size.
    #[must_use]
    pub const fn read_pool_size(mut self, size: usize) -> Self {
        self.read_pool_size = size;
        self
    }

    /// Sets the group commit window.
    #[must_use]
    pub const fn group_commit_timeout(mut self, timeout: Duration) -> Self {
        self.group_commit_timeout = timeout;
        self
    }

    /// Sets the maximum group size.
    #[must_use]
    pub const fn max_group_size(mut self, size: usize) -> Self {
        self.max_group_size = size;
        self
    }

    /// Sets the lock timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the shutdown timeout.
    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}
