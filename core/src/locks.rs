//! In-process mirror of per-schedule row locks.
//!
//! The durable store's row lock serializes admission attempts for one schedule,
//! but it is released by the store at commit, before the committing task gets to
//! update the admission tracker. Stores take a [`RowLocks`] guard together with
//! the row lock and hold it until the commit hook has run, so the next attempt on
//! the same schedule in this process always sees the updated tracker.

use crate::cache::Cache;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guard returned by [`RowLocks::acquire`]; dropping it releases the lock.
pub type RowGuard = OwnedMutexGuard<()>;

/// Registry of async mutexes, one per key.
pub struct RowLocks<K> {
    locks: Cache<K, Arc<Mutex<()>>>,
}

impl<K> RowLocks<K>
where
    K: Eq + Hash,
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            locks: Cache::new(),
        }
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Waiters are served in the order tokio's mutex grants them, which is FIFO,
    /// but callers must not rely on any particular ordering.
    pub async fn acquire(&self, key: K) -> RowGuard {
        let lock = self.locks.get_or_insert_with(key, || Arc::new(Mutex::new(())));
        lock.lock_owned().await
    }

    /// Forget keys nobody holds or waits for.
    ///
    /// A key in use keeps its mutex, so pruning never lets two holders in at
    /// once. Returns the number of keys removed.
    pub fn prune(&self) -> usize {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1)
    }

    /// Number of keys currently registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no key is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K> std::fmt::Debug for RowLocks<K>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowLocks").field("keys", &self.len()).finish()
    }
}

impl<K> Default for RowLocks<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks: Arc<RowLocks<&str>> = Arc::new(RowLocks::new());
        let guard = locks.acquire("s-1").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.acquire("s-1").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        let acquired = tokio::time::timeout(Duration::from_secs(1), contender).await;
        assert!(matches!(acquired, Ok(Ok(_))));
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks: RowLocks<&str> = RowLocks::new();
        let _a = locks.acquire("s-1").await;

        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("s-2")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn prune_keeps_held_keys_only() {
        let locks: RowLocks<&str> = RowLocks::new();
        let held = locks.acquire("held").await;
        drop(locks.acquire("idle").await);

        assert_eq!(locks.prune(), 1);
        assert_eq!(locks.len(), 1);

        drop(held);
        assert_eq!(locks.prune(), 1);
        assert!(locks.is_empty());
    }
}
