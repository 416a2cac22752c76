//! Error types for the durable store and the admission protocol.

use crate::types::{ScheduleId, UserId};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a durable store implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Connection, query or transaction failure.
    #[error("Database error: {0}")]
    Database(String),

    /// A uniqueness constraint rejected a write.
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation {
        /// Name of the violated constraint (or the table when unknown)
        constraint: String,
    },

    /// The operation did not finish within its time budget.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Schema migration failed.
    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Errors from resolving a user through the identity cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// No user with this identifier exists in the store.
    #[error("User not found: {0}")]
    NotFound(UserId),

    /// The store lookup failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Rejections and failures of the reservation admission protocol.
///
/// Every variant except [`AdmissionError::Store`] is an expected business
/// outcome and is reported to the caller as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// The schedule does not exist.
    #[error("Schedule not found: {0}")]
    NotFound(ScheduleId),

    /// The schedule exists but cannot accept reservations (capacity <= 0).
    #[error("Schedule {schedule_id} has invalid capacity {capacity}")]
    InvalidSchedule {
        /// The schedule
        schedule_id: ScheduleId,
        /// Capacity as stored
        capacity: i32,
    },

    /// The reserving user could not be resolved.
    #[error("User not found: {0}")]
    UnknownUser(UserId),

    /// The user already holds a reservation on this schedule.
    #[error("User {user_id} already reserved schedule {schedule_id}")]
    AlreadyReserved {
        /// The schedule
        schedule_id: ScheduleId,
        /// The user
        user_id: UserId,
    },

    /// The schedule has no remaining capacity.
    #[error("Schedule {schedule_id} is full (capacity {capacity})")]
    CapacityExceeded {
        /// The schedule
        schedule_id: ScheduleId,
        /// Capacity recorded by the admission tracker
        capacity: u32,
    },

    /// The caller is not allowed to perform this operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The durable store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AdmissionError {
    /// Short, stable label used for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidSchedule { .. } => "invalid_schedule",
            Self::UnknownUser(_) => "unknown_user",
            Self::AlreadyReserved { .. } => "already_reserved",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::Forbidden(_) => "forbidden",
            Self::Store(_) => "store_error",
        }
    }

    /// Whether this is an infrastructure failure rather than a business rejection.
    #[must_use]
    pub const fn is_store_error(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}
