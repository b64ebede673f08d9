//! Property-based test generators using proptest.

use proptest::prelude::*;
use std::collections::BTreeMap;

/// Largest payload produced by [`payload_strategy`].
pub const MAX_PAYLOAD: usize = 4096;

/// Strategy for non-empty record payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..=MAX_PAYLOAD)
}

/// Strategy for a batch of record payloads.
pub fn payloads_strategy(max: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(payload_strategy(), 1..=max.max(1))
}

/// Strategy for index names.
///
/// Names starting with a double underscore are reserved and never produced.
pub fn index_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,23}").expect("valid regex")
}

/// Strategy for index keys.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..32)
}

/// Strategy for a set of key/value entries.
pub fn entries_strategy(max: usize) -> impl Strategy<Value = BTreeMap<Vec<u8>, Vec<u8>>> {
    prop::collection::btree_map(
        key_strategy(),
        prop::collection::vec(any::<u8>(), 0..64),
        0..=max,
    )
}

/// Strategy for strictly increasing positive commit times.
pub fn commit_times_strategy(max: usize) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::btree_set(1i64..1_000_000, 1..=max.max(1))
        .prop_map(|times| times.into_iter().collect())
}

/// Strategy for a lookup time around a set of commit times.
pub fn lookup_time_strategy() -> impl Strategy<Value = i64> {
    0i64..1_100_000
}
