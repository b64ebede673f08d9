//! Error types for storage operations.

use crate::address::Address;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The address was never written by this store.
    #[error("address not written: {address} (next offset {next_offset})")]
    AddressNotWritten {
        /// The address that was requested.
        address: Address,
        /// The current write cursor of the store.
        next_offset: u64,
    },

    /// The null address was passed where a record address is required.
    #[error("address is null")]
    NullAddress,

    /// A record failed its checksum on read.
    #[error("checksum mismatch at {address}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// The record address.
        address: Address,
        /// The checksum stored with the record.
        expected: u32,
        /// The checksum computed over the payload read back.
        actual: u32,
    },

    /// The store cannot grow to hold the requested bytes.
    #[error("capacity exceeded: need {needed} more bytes, user extent {user_extent}, limit {limit}")]
    Capacity {
        /// Bytes that did not fit.
        needed: u64,
        /// The user extent at the time of the request.
        user_extent: u64,
        /// The extent the store is not allowed to pass.
        limit: u64,
    },

    /// The record exceeds the byte count an address can carry.
    #[error("record too large: {len} bytes exceeds maximum of {max} bytes")]
    RecordTooLarge {
        /// Requested record length.
        len: usize,
        /// Maximum record length.
        max: usize,
    },

    /// An argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not supported by this backend.
    #[error("operation not supported by {mode} backend: {operation}")]
    Unsupported {
        /// The backend kind.
        mode: &'static str,
        /// The rejected operation.
        operation: &'static str,
    },

    /// The storage file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the backing file.
    #[error("backing file is locked by another process: {0}")]
    Locked(String),

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    /// Returns true for the capacity family of errors.
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Capacity { .. } | Self::RecordTooLarge { .. })
    }
}
