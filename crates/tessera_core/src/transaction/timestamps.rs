//! Timestamp issuance.

use crate::types::Timestamp;
use parking_lot::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

/// Issues wall-clock millisecond timestamps, forced strictly increasing.
#[derive(Debug, Default)]
pub struct TimestampService {
    last: Mutex<Timestamp>,
}

impl TimestampService {
    /// Creates a service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a timestamp greater than every one issued before.
    pub fn next(&self) -> Timestamp {
        let mut last = self.last.lock();
        let ts = now_millis().max(*last + 1);
        *last = ts;
        ts
    }

    /// The most recently issued timestamp.
    #[must_use]
    pub fn last(&self) -> Timestamp {
        *self.last.lock()
    }

    /// Ensures future timestamps are greater than `ts`.
    pub fn advance_past(&self, ts: Timestamp) {
        let mut last = self.last.lock();
        if *last < ts {
            *last = ts;
        }
    }
}
