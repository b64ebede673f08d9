//! Error types for the Tessera journal.

use crate::types::TxId;
use std::sync::Arc;
use std::time::Duration;
use tessera_storage::StorageError;
use thiserror::Error;

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors that can occur in journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[source] StorageError),

    /// The backend cannot hold more data.
    #[error("capacity exceeded: {0}")]
    Capacity(#[source] StorageError),

    /// A write-write conflict was detected while validating a transaction.
    #[error("validation failed for {tx} on index {index}")]
    Validation {
        /// The transaction that failed validation.
        tx: TxId,
        /// The index holding the conflicting write.
        index: String,
    },

    /// A resource lock could not be acquired in time.
    #[error("lock on {resource} not granted within {waited:?}")]
    Contention {
        /// The contended resource.
        resource: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The concurrency manager refused the task.
    #[error("task rejected: {reason}")]
    Rejected {
        /// Why the task was rejected.
        reason: String,
    },

    /// A task was submitted more than once.
    #[error("task already submitted")]
    Resubmitted,

    /// The transaction is not active (terminal, unknown or a sentinel).
    #[error("transaction not active: {tx}")]
    TxNotActive {
        /// The transaction identifier.
        tx: TxId,
    },

    /// A write was attempted through a read-only view.
    #[error("index {index} is read-only in this view")]
    ReadOnly {
        /// The index name.
        index: String,
    },

    /// A task touched a resource it did not declare.
    #[error("resource not declared by task: {resource}")]
    UndeclaredResource {
        /// The resource name.
        resource: String,
    },

    /// No index is registered under the name.
    #[error("no such index: {name}")]
    NoSuchIndex {
        /// The index name.
        name: String,
    },

    /// An index is already registered under the name.
    #[error("index already exists: {name}")]
    IndexExists {
        /// The index name.
        name: String,
    },

    /// The task was cancelled before it produced a result.
    #[error("task cancelled")]
    Cancelled,

    /// The task observed an interrupt.
    #[error("task interrupted")]
    Interrupted,

    /// The group commit a task belonged to failed.
    #[error("group commit failed: {0}")]
    GroupCommit(#[source] Arc<JournalError>),

    /// Invalid journal format or version.
    #[error("invalid journal format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Serialized index state could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The journal is closed.
    #[error("journal is closed")]
    Closed,
}

impl JournalError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a rejection error.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// True for write-write conflicts.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        match self {
            Self::Validation { .. } => true,
            Self::GroupCommit(inner) => inner.is_validation(),
            _ => false,
        }
    }

    /// True for capacity failures.
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        match self {
            Self::Capacity(_) => true,
            Self::GroupCommit(inner) => inner.is_capacity(),
            _ => false,
        }
    }
}

impl From<StorageError> for JournalError {
    fn from(err: StorageError) -> Self {
        if err.is_capacity() {
            Self::Capacity(err)
        } else {
            Self::Storage(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_errors_are_lifted() {
        let err: JournalError = StorageError::Capacity {
            needed: 10,
            user_extent: 100,
            limit: 100,
        }
        .into();
        assert!(err.is_capacity());

        let err: JournalError = StorageError::Closed.into();
        assert!(matches!(err, JournalError::Storage(StorageError::Closed)));
    }

    #[test]
    fn group_failure_keeps_cause() {
        let cause = Arc::new(JournalError::Capacity(StorageError::RecordTooLarge {
            len: 2,
            max: 1,
        }));
        let err = JournalError::GroupCommit(cause);
        assert!(err.is_capacity());
        assert!(!err.is_validation());
        assert!(err.to_string().contains("group commit failed"));
    }

    #[test]
    fn error_messages() {
        let err = JournalError::Validation {
            tx: TxId::from_raw(-42),
            index: "abc".into(),
        };
        assert_eq!(err.to_string(), "validation failed for tx:-42 on index abc");

        let err = JournalError::invalid_operation("nope");
        assert_eq!(err.to_string(), "invalid operation: nope");
    }
}
