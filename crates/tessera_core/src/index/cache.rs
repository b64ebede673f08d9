//! Canonicalizing cache of weakly held objects.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};

/// Maps keys to weakly held values so that concurrent resolutions of the
/// same key share one instance.
///
/// The cache never keeps a value alive: once the last caller drops its
/// `Arc`, the next resolution loads a fresh one.
#[derive(Debug)]
pub struct CanonicalCache<K, V> {
    entries: Mutex<HashMap<K, Weak<V>>>,
}

impl<K, V> Default for CanonicalCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V> CanonicalCache<K, V> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The live instance for `key`, if any caller still holds one.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.lock().get(key).and_then(Weak::upgrade)
    }

    /// Returns the canonical instance for `key`, loading it when absent.
    ///
    /// The loader runs under the cache lock, so it must not resolve other
    /// keys of the same cache.
    ///
    /// # Errors
    ///
    /// Propagates the loader's error.
    pub fn get_or_try_insert<E>(
        &self,
        key: K,
        load: impl FnOnce() -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        let mut entries = self.entries.lock();
        if let Some(value) = entries.get(&key).and_then(Weak::upgrade) {
            return Ok(value);
        }
        let value = Arc::new(load()?);
        entries.insert(key, Arc::downgrade(&value));
        // Sweep dead entries each time the map doubles.
        if entries.len() > 64 && entries.len().is_power_of_two() {
            entries.retain(|_, weak| weak.strong_count() > 0);
        }
        Ok(value)
    }

    /// Registers an already built instance, returning the canonical one.
    pub fn insert(&self, key: K, value: Arc<V>) -> Arc<V> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&key).and_then(Weak::upgrade) {
            return existing;
        }
        entries.insert(key, Arc::downgrade(&value));
        value
    }

    /// Number of keys whose value is still alive.
    pub fn live_len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
