//! Domain types for schedule admission.
//!
//! Users, schedules and reservations are owned by the durable store; the types here
//! are the snapshots the core passes around and caches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Identifiers
// ============================================================================

/// Error type for identifier parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid identifier: {0:?}")]
pub struct ParseIdError(String);

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a trusted identifier (no validation).
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the wrapper, returning the raw identifier.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(ParseIdError(s.to_string()));
                }
                Ok(Self(trimmed.to_string()))
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Unique identifier of a user.
    UserId
);

string_id!(
    /// Unique identifier of a schedule.
    ScheduleId
);

string_id!(
    /// Unique identifier of a reservation.
    ReservationId
);

/// Entity kinds that receive generated identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A row in `users`
    User,
    /// A row in `schedules`
    Schedule,
    /// A row in `reservations`
    Reservation,
}

impl EntityKind {
    /// Table backing this entity kind.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Schedule => "schedules",
            Self::Reservation => "reservations",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A registered user.
///
/// Records are treated as immutable after creation, which is what lets the
/// identity cache keep them for the lifetime of the process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User identifier
    pub id: UserId,
    /// Contact email (redacted for most viewers, see [`User::redacted_for`])
    pub email: String,
    /// Display name
    pub nickname: String,
    /// Staff users may create schedules and see every email
    pub staff: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Build a user record.
    #[must_use]
    pub fn new(
        id: UserId,
        email: impl Into<String>,
        nickname: impl Into<String>,
        staff: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            email: email.into(),
            nickname: nickname.into(),
            staff,
            created_at,
        }
    }

    /// Whether `viewer` may see this user's email.
    ///
    /// Staff see everything, users see themselves, everyone else sees nothing.
    /// Anonymous viewers are allowed through, matching the session-less listing
    /// path where no caller identity is known.
    #[must_use]
    pub fn email_visible_to(&self, viewer: Option<&User>) -> bool {
        match viewer {
            None => true,
            Some(viewer) => viewer.staff || viewer.id == self.id,
        }
    }

    /// Copy of this user as `viewer` is allowed to see it.
    #[must_use]
    pub fn redacted_for(&self, viewer: Option<&User>) -> Self {
        let mut user = self.clone();
        if !self.email_visible_to(viewer) {
            user.email.clear();
        }
        user
    }
}

/// A bookable unit with a finite capacity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Schedule identifier
    pub id: ScheduleId,
    /// Human-readable title
    pub title: String,
    /// Maximum number of reservations; fixed at creation
    pub capacity: i32,
    /// Committed reservations; derived from the reservations table, never persisted
    pub reserved: i32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    /// Build a schedule with no reservations.
    #[must_use]
    pub fn new(
        id: ScheduleId,
        title: impl Into<String>,
        capacity: i32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            capacity,
            reserved: 0,
            created_at,
        }
    }
}

/// One user's claim on one schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation identifier
    pub id: ReservationId,
    /// Reserved schedule
    pub schedule_id: ScheduleId,
    /// Reserving user
    pub user_id: UserId,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}
