//! Durable store abstraction consumed by the admission core.
//!
//! The store owns the authoritative `users`, `schedules` and `reservations`
//! rows. The core needs three things from it:
//!
//! - point lookups of users by id ([`UserStore`])
//! - transactions with row-locking reads and inserts ([`AdmissionStore`] /
//!   [`AdmissionTransaction`])
//! - identifier generation ([`AdmissionStore::new_id`])
//!
//! # Implementations
//!
//! - `PostgresStore` (in `slotguard-postgres`): production implementation
//! - `InMemoryStore` (in `slotguard-testing`): fast, deterministic testing
//!
//! # Transactions
//!
//! A transaction is rolled back when it is dropped without calling
//! [`AdmissionTransaction::commit`]. If the request future is dropped before
//! commit, nothing is persisted and the commit hook never runs. Once commit has
//! started, the caller runs it to completion on its own task (see
//! `AdmissionService::reserve`), so a commit the store applied always runs its
//! hook.

use crate::error::StoreError;
use crate::types::{EntityKind, Reservation, Schedule, ScheduleId, User, UserId};
use std::fmt;
use std::future::Future;
use std::str::FromStr;

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Transaction isolation level requested from the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Statement-level snapshots (the `PostgreSQL` default)
    #[default]
    ReadCommitted,
    /// Transaction-level snapshot
    RepeatableRead,
    /// Full serializability
    Serializable,
}

impl IsolationLevel {
    /// SQL spelling of this level.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], " ").as_str() {
            "read committed" => Ok(Self::ReadCommitted),
            "repeatable read" => Ok(Self::RepeatableRead),
            "serializable" => Ok(Self::Serializable),
            other => Err(format!("unknown isolation level: {other}")),
        }
    }
}

/// Point lookups of users.
pub trait UserStore: Send + Sync {
    /// Load a user by id.
    ///
    /// Returns `Ok(None)` when the user does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the lookup fails.
    fn find_user(&self, id: &UserId) -> impl Future<Output = Result<Option<User>>> + Send;
}

/// A durable store able to run the admission protocol.
pub trait AdmissionStore: UserStore {
    /// Transaction handle produced by [`AdmissionStore::begin`].
    ///
    /// Transactions own their connection, so a commit can be driven to
    /// completion on its own task.
    type Transaction: AdmissionTransaction + 'static;

    /// Start a transaction with the given isolation level.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if no connection is available or the
    /// transaction cannot be started.
    fn begin(
        &self,
        isolation: IsolationLevel,
    ) -> impl Future<Output = Result<Self::Transaction>> + Send;

    /// Insert a user.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UniqueViolation`] if the id is taken, or
    /// [`StoreError::Database`] on failure.
    fn insert_user(&self, user: &User) -> impl Future<Output = Result<()>> + Send;

    /// Insert a schedule.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UniqueViolation`] if the id is taken, or
    /// [`StoreError::Database`] on failure.
    fn insert_schedule(&self, schedule: &Schedule) -> impl Future<Output = Result<()>> + Send;

    /// Generate an identifier for a new row of `kind`.
    ///
    /// Identifiers are unique; no ordering is implied.
    fn new_id(&self, kind: EntityKind) -> String {
        let _ = kind;
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// Remove every reservation, schedule and user, then insert `seed`, in one
    /// transaction. In-process schedule locks nobody holds are forgotten.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on failure; nothing is removed then.
    fn reset(&self, seed: &User) -> impl Future<Output = Result<()>> + Send;
}

/// An open transaction.
///
/// Dropping the handle without committing rolls the transaction back.
pub trait AdmissionTransaction: Send {
    /// Lock the schedule row and read its capacity.
    ///
    /// Blocks until any other transaction holding the row lock commits or rolls
    /// back. Returns `Ok(None)` if the schedule does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the read fails.
    fn lock_schedule(
        &mut self,
        schedule_id: &ScheduleId,
    ) -> impl Future<Output = Result<Option<i32>>> + Send;

    /// Load a user by id through this transaction's connection.
    ///
    /// Returns `Ok(None)` when the user does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the lookup fails.
    fn find_user(&mut self, id: &UserId) -> impl Future<Output = Result<Option<User>>> + Send;

    /// Whether `user_id` already holds a reservation on `schedule_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the read fails.
    fn has_reservation(
        &mut self,
        schedule_id: &ScheduleId,
        user_id: &UserId,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Number of reservations on `schedule_id` visible to this transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the read fails.
    fn count_reservations(
        &mut self,
        schedule_id: &ScheduleId,
    ) -> impl Future<Output = Result<u32>> + Send;

    /// Insert a reservation row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UniqueViolation`] if the (schedule, user) pair is
    /// taken, or [`StoreError::Database`] on failure.
    fn insert_reservation(
        &mut self,
        reservation: &Reservation,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Commit, then run `on_commit`.
    ///
    /// `on_commit` runs only if the durable commit succeeded, and before any lock
    /// this transaction mediates in-process is released.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UniqueViolation`] if a deferred constraint rejects the
    /// commit, or [`StoreError::Database`] on failure. `on_commit` is not run then.
    fn commit<F>(self, on_commit: F) -> impl Future<Output = Result<()>> + Send
    where
        F: FnOnce() + Send,
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_level_parses_loose_spellings() {
        assert_eq!("read_committed".parse(), Ok(IsolationLevel::ReadCommitted));
        assert_eq!("Repeatable-Read".parse(), Ok(IsolationLevel::RepeatableRead));
        assert_eq!(" SERIALIZABLE ".parse(), Ok(IsolationLevel::Serializable));
        assert!("snapshot".parse::<IsolationLevel>().is_err());
    }

    #[test]
    fn isolation_level_sql() {
        assert_eq!(IsolationLevel::default().to_string(), "READ COMMITTED");
    }
}
