//! Named indices and their views.
//!
//! The journal persists only one opaque checkpoint address per named
//! index. Everything else, the ordered map and its versioned tuples, lives
//! here behind the [`IndexView`] trait.

mod btree;
mod cache;
mod historical;
mod isolated;
mod live;
mod metadata;
mod read_committed;
mod traits;

pub use btree::{Tuple, VersionedBTree, UNCOMMITTED};
pub use cache::CanonicalCache;
pub use historical::ReadOnlyIndex;
pub use isolated::IsolatedIndex;
pub(crate) use live::WriteGate;
pub use live::{LiveHandle, LiveIndex, LiveReader};
pub use metadata::IndexMetadata;
pub use read_committed::ReadCommittedIndex;
pub(crate) use read_committed::CommittedResolver;
pub use traits::IndexView;
