use crate::error::{JournalError, JournalResult};
use crate::index::{IndexView, ReadOnlyIndex, Tuple};
use std::sync::{Arc, Weak};

/// Resolves the committed state of a named index at the time of the call.
pub(crate) trait CommittedResolver: Send + Sync {
    /// View of `name` as of the most recent commit, if it exists there.
    fn committed_view(&self, name: &str) -> JournalResult<Option<Arc<ReadOnlyIndex>>>;
}

/// A read-only view that follows the most recent commit.
///
/// Every call re-resolves the index against the current commit record, so
/// consecutive calls may observe different commits but never a partial one.
pub struct ReadCommittedIndex {
    name: String,
    resolver: Weak<dyn CommittedResolver>,
}

impl std::fmt::Debug for ReadCommittedIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadCommittedIndex")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ReadCommittedIndex {
    pub(crate) fn new(name: impl Into<String>, resolver: Weak<dyn CommittedResolver>) -> Self {
        Self {
            name: name.into(),
            resolver,
        }
    }

    /// The historical view currently backing this index.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the journal is gone and `NoSuchIndex` if the
    /// index is absent from the current commit.
    pub fn current(&self) -> JournalResult<Arc<ReadOnlyIndex>> {
        let resolver = self.resolver.upgrade().ok_or(JournalError::Closed)?;
        resolver
            .committed_view(&self.name)?
            .ok_or_else(|| JournalError::NoSuchIndex {
                name: self.name.clone(),
            })
    }
}

impl IndexView for ReadCommittedIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn tuple(&self, key: &[u8]) -> JournalResult<Option<Tuple>> {
        self.current()?.tuple(key)
    }

    fn insert(&self, _key: &[u8], _value: &[u8]) -> JournalResult<Option<Vec<u8>>> {
        Err(JournalError::ReadOnly {
            index: self.name.clone(),
        })
    }

    fn remove(&self, _key: &[u8]) -> JournalResult<Option<Vec<u8>>> {
        Err(JournalError::ReadOnly {
            index: self.name.clone(),
        })
    }

    fn entries(&self) -> JournalResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.current()?.entries()
    }

    fn len(&self) -> JournalResult<usize> {
        self.current()?.len()
    }
}
