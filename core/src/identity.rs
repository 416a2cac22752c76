//! Read-through identity cache.
//!
//! Maps user ids to user records. A miss loads the record from the store and
//! populates the cache; a store miss is reported and not cached. Entries are never
//! invalidated, which is sound only because user records do not change after
//! creation. [`IdentityCache::clear`] drops everything on a full reset.
//!
//! Concurrent misses for the same id may both query the store and both write the
//! cache. Both writes carry the same row, so the race is harmless.

use crate::cache::Cache;
use crate::error::IdentityError;
use crate::metrics;
use crate::store::{AdmissionTransaction, UserStore};
use crate::types::{User, UserId};

/// Cache of user records keyed by id.
#[derive(Debug, Default)]
pub struct IdentityCache {
    users: Cache<UserId, User>,
}

impl IdentityCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `user_id`, loading it from `store` on a miss.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::NotFound`] if the store has no such user
    /// - [`IdentityError::Store`] if the lookup fails
    pub async fn resolve<S>(&self, store: &S, user_id: &UserId) -> Result<User, IdentityError>
    where
        S: UserStore,
    {
        if let Some(user) = self.hit(user_id) {
            return Ok(user);
        }
        let loaded = store.find_user(user_id).await?;
        self.fill(user_id, loaded)
    }

    /// Resolve `user_id`, loading it through the open transaction `tx` on a miss.
    ///
    /// Used while `tx` holds a schedule lock: the lookup reuses the
    /// transaction's connection instead of taking a second one from the pool.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::NotFound`] if the store has no such user
    /// - [`IdentityError::Store`] if the lookup fails
    pub async fn resolve_in<T>(&self, tx: &mut T, user_id: &UserId) -> Result<User, IdentityError>
    where
        T: AdmissionTransaction,
    {
        if let Some(user) = self.hit(user_id) {
            return Ok(user);
        }
        let loaded = tx.find_user(user_id).await?;
        self.fill(user_id, loaded)
    }

    fn hit(&self, user_id: &UserId) -> Option<User> {
        let cached = self.users.get(user_id);
        metrics::record_identity_lookup(cached.is_some());
        cached
    }

    fn fill(&self, user_id: &UserId, loaded: Option<User>) -> Result<User, IdentityError> {
        let Some(user) = loaded else {
            tracing::debug!(%user_id, "User not found in store");
            return Err(IdentityError::NotFound(user_id.clone()));
        };

        self.users.set(user.id.clone(), user.clone());
        Ok(user)
    }

    /// Cached copy of `user_id`, without touching the store.
    #[must_use]
    pub fn cached(&self, user_id: &UserId) -> Option<User> {
        self.users.get(user_id)
    }

    /// Store a freshly created user so the first lookup is a hit.
    pub fn prime(&self, user: User) {
        self.users.set(user.id.clone(), user);
    }

    /// Number of cached users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no user is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Drop every cached user.
    pub fn clear(&self) {
        self.users.clear();
    }
}
