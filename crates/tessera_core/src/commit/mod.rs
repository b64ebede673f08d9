//! Commit records and the index that makes history addressable.

mod index;
mod record;

pub use index::{CommitRecordIndex, NODE_FANOUT};
pub use record::CommitRecord;
