//! Generic lock-guarded key-value cache.
//!
//! [`Cache`] is the building block for every in-process cache in this crate. It is a
//! `HashMap` behind a `RwLock`:
//!
//! - readers proceed concurrently
//! - a writer excludes readers and other writers for the duration of the mutation
//! - there is no eviction, TTL or size bound; entries live until overwritten or
//!   until [`Cache::clear`] swaps in an empty map
//!
//! The lock only ever guards the in-memory map access. Callers must not hold it
//! across an `.await`, which the API enforces by never handing out guards.
//!
//! # Example
//!
//! ```
//! use slotguard_core::cache::Cache;
//!
//! let cache: Cache<String, u32> = Cache::new();
//! cache.set("a".to_string(), 1);
//!
//! assert_eq!(cache.get("a"), Some(1));
//! assert_eq!(cache.get("b"), None);
//! ```

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A concurrent map with shared reads and exclusive writes.
pub struct Cache<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash,
{
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    // A panic while holding the lock cannot leave the map half-written: every
    // mutation below is a single HashMap call. Recover the guard instead of
    // propagating poison.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, V>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, V>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a copy of the value stored under `key`.
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        V: Clone,
    {
        self.read().get(key).cloned()
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn set(&self, key: K, value: V) {
        self.write().insert(key, value);
    }

    /// Atomically replace the entry for `key` with `f(current)`.
    ///
    /// `f` runs under the write lock, so no other reader or writer observes the
    /// map between the read of the old value and the write of the new one.
    /// Returns a copy of the stored value.
    pub fn update<F>(&self, key: K, f: F) -> V
    where
        F: FnOnce(Option<&V>) -> V,
        V: Clone,
    {
        let mut entries = self.write();
        let value = f(entries.get(&key));
        entries.insert(key, value.clone());
        value
    }

    /// Return the value for `key`, inserting `make()` first if it is missing.
    pub fn get_or_insert_with<F>(&self, key: K, make: F) -> V
    where
        F: FnOnce() -> V,
        V: Clone,
    {
        if let Some(value) = self.read().get(&key) {
            return value.clone();
        }
        self.write().entry(key).or_insert_with(make).clone()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the cache has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Keep only the entries for which `keep` returns true.
    ///
    /// Runs under the write lock. Returns the number of entries removed.
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|key, value| keep(key, value));
        before - entries.len()
    }

    /// Swap in an empty map.
    ///
    /// Concurrent readers observe either the full old map or the empty one.
    pub fn clear(&self) {
        let old = std::mem::take(&mut *self.write());
        drop(old);
    }
}

impl<K, V> Default for Cache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for Cache<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache").field("len", &self.len()).finish()
    }
}
