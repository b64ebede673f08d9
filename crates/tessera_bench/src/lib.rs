//! Benchmark utilities.

#![warn(missing_docs)]

use rand::Rng;

/// Generate random record data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` distinct big-endian keys.
pub fn keys(count: usize) -> Vec<Vec<u8>> {
    (0..count as u64).map(|i| i.to_be_bytes().to_vec()).collect()
}
