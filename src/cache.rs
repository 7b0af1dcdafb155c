//! In-process cache for values read from artifact files.
//!
//! Entries remember when they were stored; callers decide per read how old is
//! too old.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry<V> {
    value: V,
    stored_at: Instant,
}

#[derive(Debug)]
pub struct ArtifactCache<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> Default for ArtifactCache<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V: Clone> ArtifactCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value and its age, however old.
    pub fn get(&self, key: &K) -> Option<(V, Duration)> {
        let entries = self.entries.read();
        entries
            .get(key)
            .map(|e| (e.value.clone(), e.stored_at.elapsed()))
    }

    /// Cached value only if it was stored less than `max_age` ago.
    pub fn get_fresh(&self, key: &K, max_age: Duration) -> Option<V> {
        self.get(key)
            .filter(|(_, age)| *age < max_age)
            .map(|(value, _)| value)
    }

    pub fn put(&self, key: K, value: V) {
        self.entries.write().insert(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drops every entry.
    pub fn invalidate(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
