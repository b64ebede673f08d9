//! The view interface shared by every index resolution.

use crate::error::JournalResult;
use crate::index::Tuple;

/// A resolved view of a named index.
///
/// Which state the view reads, and whether it accepts writes, depends on
/// how it was resolved: live (unisolated), historical, isolated within a
/// read-write transaction, or read-committed.
pub trait IndexView: Send + Sync {
    /// Name of the index.
    fn name(&self) -> &str;

    /// The tuple for `key`, delete markers included.
    ///
    /// # Errors
    ///
    /// Returns an error if the view cannot be resolved.
    fn tuple(&self, key: &[u8]) -> JournalResult<Option<Tuple>>;

    /// The visible value for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the view cannot be resolved.
    fn lookup(&self, key: &[u8]) -> JournalResult<Option<Vec<u8>>> {
        Ok(self.tuple(key)?.and_then(|t| t.value))
    }

    /// Whether `key` has a visible value.
    ///
    /// # Errors
    ///
    /// Returns an error if the view cannot be resolved.
    fn contains(&self, key: &[u8]) -> JournalResult<bool> {
        Ok(self.lookup(key)?.is_some())
    }

    /// Writes `value` under `key`, returning the previously visible value.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` for views that do not accept writes.
    fn insert(&self, key: &[u8], value: &[u8]) -> JournalResult<Option<Vec<u8>>>;

    /// Deletes `key`, returning the previously visible value.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` for views that do not accept writes.
    fn remove(&self, key: &[u8]) -> JournalResult<Option<Vec<u8>>>;

    /// Visible entries in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the view cannot be resolved.
    fn entries(&self) -> JournalResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Number of visible entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the view cannot be resolved.
    fn len(&self) -> JournalResult<usize> {
        Ok(self.entries()?.len())
    }

    /// True when no entry is visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the view cannot be resolved.
    fn is_empty(&self) -> JournalResult<bool> {
        Ok(self.len()? == 0)
    }
}
