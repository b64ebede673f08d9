//! # Tessera Core
//!
//! A single-writer, multi-reader transactional journal.
//!
//! This crate provides:
//! - Root blocks and the commit protocol over a [`tessera_storage`] backend
//! - Commit records and an index that makes every commit addressable
//! - Named, versioned indices with live, historical and isolated views
//! - Transactions: unisolated, read-committed, read-only and read-write
//! - A concurrency manager with a read pool and a group-committing writer
//!
//! ## Commit protocol
//!
//! A commit checkpoints every changed index, writes a commit record, adds
//! it to the commit record index, forces the backend and finally writes
//! the root block slot that is not current. A crash at any point leaves
//! the other slot, and with it the previous commit, intact.
//!
//! ## Example
//!
//! ```rust
//! use tessera_core::{Config, IndexMetadata, IndexView, Journal, Task, TxId};
//!
//! let journal = Journal::open(Config::transient()).unwrap();
//! journal.register_index(IndexMetadata::new("users")).unwrap();
//! journal.commit().unwrap();
//!
//! let task = Task::new(TxId::UNISOLATED, ["users"], |ctx| {
//!     ctx.index("users")?.insert(b"alice", b"1")?;
//!     Ok(())
//! });
//! let handle = journal.submit(task);
//! handle.get().unwrap();
//! assert!(journal.index("users").unwrap().contains(b"alice").unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
pub mod commit;
pub mod concurrency;
mod config;
mod engine;
mod error;
pub mod index;
mod journal;
mod root_block;
mod stats;
pub mod transaction;
mod types;

pub use commit::{CommitRecord, CommitRecordIndex, NODE_FANOUT};
pub use concurrency::{ConcurrencyManager, LockManager, LockMode, Task, TaskContext, TaskHandle};
pub use config::{Config, ForceOnCommit};
pub use error::{JournalError, JournalResult};
pub use index::{
    CanonicalCache, IndexMetadata, IndexView, IsolatedIndex, LiveHandle, LiveIndex, LiveReader,
    ReadCommittedIndex, ReadOnlyIndex, Tuple, VersionedBTree, UNCOMMITTED,
};
pub use journal::Journal;
pub use root_block::{select_current, RootBlock, ROOT_BLOCK_MAGIC, ROOT_BLOCK_VERSION};
pub use stats::{JournalStats, StatsSnapshot};
pub use transaction::{TransactionManager, Tx, TxState};
pub use types::{IsolationLevel, Timestamp, TxId};

pub use tessera_storage::{Address, BufferMode, StorageBackend, StorageError, StoreOptions};
