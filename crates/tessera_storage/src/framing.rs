//! Record framing.
//!
//! With checksums enabled a record is stored as `payload || crc32(payload)`
//! (little endian). Without checksums the payload is stored as is. The
//! record address always carries the payload length, never the framed one.

use crate::address::Address;
use crate::error::{StorageError, StorageResult};

/// Size of the trailing checksum.
pub const CHECKSUM_SIZE: usize = 4;

/// Computes the CRC32 of a byte slice.
#[must_use]
pub fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Number of bytes a payload occupies on the backend.
#[must_use]
pub const fn stored_len(payload_len: usize, checksums: bool) -> usize {
    if checksums {
        payload_len + CHECKSUM_SIZE
    } else {
        payload_len
    }
}

/// Frames a payload for storage.
#[must_use]
pub fn encode(payload: &[u8], checksums: bool) -> Vec<u8> {
    let mut frame = Vec::with_capacity(stored_len(payload.len(), checksums));
    frame.extend_from_slice(payload);
    if checksums {
        frame.extend_from_slice(&checksum(payload).to_le_bytes());
    }
    frame
}

/// Strips and verifies the framing of a stored record.
///
/// # Errors
///
/// Returns `ChecksumMismatch` if the trailing checksum does not match the
/// payload, or `Corrupted` if the frame is shorter than its trailer.
pub fn decode(address: Address, mut frame: Vec<u8>, checksums: bool) -> StorageResult<Vec<u8>> {
    if !checksums {
        return Ok(frame);
    }
    if frame.len() < CHECKSUM_SIZE {
        return Err(StorageError::Corrupted(format!(
            "frame at {address} shorter than its checksum"
        )));
    }
    let split = frame.len() - CHECKSUM_SIZE;
    let mut trailer = [0u8; CHECKSUM_SIZE];
    trailer.copy_from_slice(&frame[split..]);
    let expected = u32::from_le_bytes(trailer);
    frame.truncate(split);
    let actual = checksum(&frame);
    if expected != actual {
        return Err(StorageError::ChecksumMismatch {
            address,
            expected,
            actual,
        });
    }
    Ok(frame)
}
