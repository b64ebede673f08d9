//! Core type definitions for Tessera.

use std::fmt;

/// Milliseconds since the Unix epoch. Zero means "no commit".
pub type Timestamp = u64;

/// Identifier of a transaction, or one of the sentinel scopes.
///
/// The sign encodes the isolation: read-write transactions are negative
/// (`-start`), read-only and read-committed transactions are positive
/// (`+start`). Zero is the unisolated scope and `-1` the read-committed
/// sentinel, neither of which has a transaction object behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId(i64);

impl TxId {
    /// The live, directly-mutable scope.
    pub const UNISOLATED: TxId = TxId(0);

    /// Reads whatever was most recently committed, without a transaction.
    pub const READ_COMMITTED: TxId = TxId(-1);

    /// Reinterprets a raw identifier.
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn as_raw(self) -> i64 {
        self.0
    }

    pub(crate) const fn read_write(start: Timestamp) -> Self {
        Self(-(start as i64))
    }

    pub(crate) const fn read_only(start: Timestamp) -> Self {
        Self(start as i64)
    }

    /// Start timestamp encoded in the identifier.
    #[must_use]
    pub const fn start(self) -> Timestamp {
        self.0.unsigned_abs()
    }

    /// True for the unisolated and read-committed sentinels.
    #[must_use]
    pub const fn is_sentinel(self) -> bool {
        self.0 == 0 || self.0 == -1
    }

    /// True for a read-write transaction identifier.
    #[must_use]
    pub const fn is_read_write(self) -> bool {
        self.0 < -1
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UNISOLATED => f.write_str("tx:unisolated"),
            Self::READ_COMMITTED => f.write_str("tx:read-committed"),
            Self(raw) => write!(f, "tx:{raw}"),
        }
    }
}

/// Isolation requested from [`crate::Journal::new_tx`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// No transaction: operate on the live indices.
    Unisolated,
    /// Track the most recent commit on every index resolution.
    ReadCommitted,
    /// Read the state as of the given commit time, forever.
    ReadOnly(Timestamp),
    /// Private write set over the last commit, validated at commit.
    ReadWrite,
}
