//! Concurrent read/write stress drivers.
//!
//! [`round_trip`] runs writer and reader threads against one backend.
//! Writers store random payloads and publish their addresses; readers pick
//! published addresses at random and compare the bytes they get back. With
//! one writer this is the multiple-reader, one-writer case; with several it
//! is multiple readers and multiple writers. [`close_under_readers`]
//! shuts a backend down while readers are still busy.

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tessera_storage::{Address, StorageBackend, StorageError};
use tracing::warn;

/// Configuration for a stress run.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of writer threads.
    pub writers: usize,
    /// Number of reader threads.
    pub readers: usize,
    /// Records written by each writer.
    pub records_per_writer: usize,
    /// Largest payload written.
    pub max_payload: usize,
    /// Seed for the payload generators.
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            writers: 4,
            readers: 4,
            records_per_writer: 500,
            max_payload: 1024,
            seed: 0x7e55_e7a,
        }
    }
}

impl StressConfig {
    /// Sets the number of writers.
    #[must_use]
    pub const fn writers(mut self, n: usize) -> Self {
        self.writers = n;
        self
    }

    /// Sets the number of readers.
    #[must_use]
    pub const fn readers(mut self, n: usize) -> Self {
        self.readers = n;
        self
    }

    /// Sets the number of records each writer stores.
    #[must_use]
    pub const fn records_per_writer(mut self, n: usize) -> Self {
        self.records_per_writer = n;
        self
    }

    /// Sets the largest payload size.
    #[must_use]
    pub const fn max_payload(mut self, n: usize) -> Self {
        self.max_payload = n;
        self
    }
}

/// Outcome of a stress run.
#[derive(Debug, Clone, Default)]
pub struct StressReport {
    /// Records written.
    pub writes: usize,
    /// Records read back by readers.
    pub reads: usize,
    /// Writes or reads that returned an error.
    pub failures: usize,
    /// Reads that returned different bytes than were written.
    pub mismatches: usize,
    /// Wall time of the run.
    pub duration: Duration,
}

impl StressReport {
    /// True when nothing failed and every read matched.
    pub fn is_clean(&self) -> bool {
        self.failures == 0 && self.mismatches == 0
    }

    /// Reads and writes per second.
    pub fn ops_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            (self.writes + self.reads) as f64 / secs
        } else {
            0.0
        }
    }
}

type Published = RwLock<Vec<(Address, Arc<[u8]>)>>;

/// Runs concurrent writers and readers against `backend`.
///
/// After the threads finish, every published record is read once more and
/// compared.
pub fn round_trip(backend: &Arc<dyn StorageBackend>, config: &StressConfig) -> StressReport {
    let published: Published = RwLock::new(Vec::new());
    let writers_done = AtomicBool::new(false);
    let reads = AtomicUsize::new(0);
    let failures = AtomicUsize::new(0);
    let mismatches = AtomicUsize::new(0);
    let max_payload = config.max_payload.max(1);

    let start = Instant::now();
    thread::scope(|scope| {
        let writers: Vec<_> = (0..config.writers)
            .map(|w| {
                let (published, failures) = (&published, &failures);
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(w as u64));
                    for _ in 0..config.records_per_writer {
                        let mut payload = vec![0u8; rng.gen_range(1..=max_payload)];
                        rng.fill(&mut payload[..]);
                        match backend.write(&payload) {
                            Ok(addr) => published.write().push((addr, payload.into())),
                            Err(e) => {
                                warn!(error = %e, "stress write failed");
                                failures.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                })
            })
            .collect();

        for r in 0..config.readers {
            let (published, writers_done) = (&published, &writers_done);
            let (reads, failures, mismatches) = (&reads, &failures, &mismatches);
            scope.spawn(move || {
                let mut rng = StdRng::seed_from_u64(!config.seed.wrapping_add(r as u64));
                while !writers_done.load(Ordering::Acquire) {
                    let pick = {
                        let published = published.read();
                        if published.is_empty() {
                            None
                        } else {
                            Some(published[rng.gen_range(0..published.len())].clone())
                        }
                    };
                    let Some((addr, expected)) = pick else {
                        thread::yield_now();
                        continue;
                    };
                    reads.fetch_add(1, Ordering::Relaxed);
                    match backend.read(addr) {
                        Ok(bytes) if bytes[..] == expected[..] => {}
                        Ok(_) => {
                            mismatches.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            warn!(error = %e, %addr, "stress read failed");
                            failures.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }

        for writer in writers {
            if writer.join().is_err() {
                failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        writers_done.store(true, Ordering::Release);
    });

    let published = published.into_inner();
    for (addr, expected) in &published {
        match backend.read(*addr) {
            Ok(bytes) if bytes[..] == expected[..] => {}
            Ok(_) => {
                mismatches.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    StressReport {
        writes: published.len(),
        reads: reads.into_inner(),
        failures: failures.into_inner(),
        mismatches: mismatches.into_inner(),
        duration: start.elapsed(),
    }
}

/// Closes `backend` while reader threads are still reading from it.
///
/// The records are written and forced up front, then `interrupt` runs,
/// for example to drop a file handle the readers must reopen. Once every
/// reader has read something the backend is closed; readers stop at the first
/// [`StorageError::Closed`]. Any other error, and any read returning the
/// wrong bytes, is counted against the run.
pub fn close_under_readers(
    backend: &Arc<dyn StorageBackend>,
    config: &StressConfig,
    interrupt: impl FnOnce(),
) -> StressReport {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut published = Vec::new();
    let mut failures = 0;
    for _ in 0..config.records_per_writer.max(1) {
        let mut payload = vec![0u8; rng.gen_range(1..=config.max_payload.max(1))];
        rng.fill(&mut payload[..]);
        match backend.write(&payload) {
            Ok(addr) => published.push((addr, payload)),
            Err(e) => {
                warn!(error = %e, "stress write failed");
                failures += 1;
            }
        }
    }
    if backend.force(true).is_err() {
        failures += 1;
    }
    interrupt();

    let started = AtomicUsize::new(0);
    let closed = AtomicBool::new(false);
    let reads = AtomicUsize::new(0);
    let errors = AtomicUsize::new(failures);
    let mismatches = AtomicUsize::new(0);

    let start = Instant::now();
    thread::scope(|scope| {
        for r in 0..config.readers {
            let (published, started, closed) = (&published, &started, &closed);
            let (reads, errors, mismatches) = (&reads, &errors, &mismatches);
            scope.spawn(move || {
                let mut rng = StdRng::seed_from_u64(!config.seed.wrapping_add(r as u64));
                let mut first = true;
                while !published.is_empty() && !closed.load(Ordering::Acquire) {
                    let (addr, expected) = &published[rng.gen_range(0..published.len())];
                    reads.fetch_add(1, Ordering::Relaxed);
                    match backend.read(*addr) {
                        Ok(bytes) if bytes == *expected => {}
                        Ok(_) => {
                            mismatches.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(StorageError::Closed) => break,
                        Err(e) => {
                            warn!(error = %e, %addr, "read racing close failed");
                            errors.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    if first {
                        first = false;
                        started.fetch_add(1, Ordering::AcqRel);
                    }
                }
            });
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while started.load(Ordering::Acquire) < config.readers && Instant::now() < deadline {
            thread::yield_now();
        }
        if let Err(e) = backend.close() {
            warn!(error = %e, "close under readers failed");
            errors.fetch_add(1, Ordering::Relaxed);
        }
        closed.store(true, Ordering::Release);
    });

    StressReport {
        writes: published.len(),
        reads: reads.into_inner(),
        failures: errors.into_inner(),
        mismatches: mismatches.into_inner(),
        duration: start.elapsed(),
    }
}
