//! # Slotguard Core
//!
//! Admission control for capacity-bounded schedules.
//!
//! Many users race to reserve the last slots of a schedule. This crate keeps the
//! number of committed reservations per schedule within its capacity while keeping
//! the hot read paths (is this schedule full? who is this user?) in memory.
//!
//! ## Components
//!
//! - [`cache::Cache`]: generic `RwLock`-guarded map, the base of every cache here
//! - [`identity::IdentityCache`]: read-through cache of user records
//! - [`tracker::AdmissionTracker`]: per-schedule capacity/consumed/saturated cache
//! - [`admission::AdmissionService`]: the reservation protocol, run inside a
//!   store transaction with the schedule row locked
//! - [`store`]: the durable store traits the protocol runs against
//!
//! ## Architecture
//!
//! ```text
//!   reserve(schedule, user)
//!          │
//!          ▼
//! ┌──────────────────┐   lock row / duplicate check / insert / commit
//! │ AdmissionService │ ─────────────────────────────────────────────▶ AdmissionStore
//! └──────────────────┘                                                (source of truth)
//!     │           │
//!     ▼           ▼
//! IdentityCache  AdmissionTracker
//!  (users)       (fast "schedule full" rejection)
//! ```
//!
//! The caches are secondary, read-optimized copies scoped to one process. They are
//! not coherent across processes.
//!
//! ## Example
//!
//! ```ignore
//! use slotguard_core::admission::{AdmissionConfig, AdmissionService};
//! use slotguard_core::environment::SystemClock;
//! use std::sync::Arc;
//!
//! let service = AdmissionService::new(store, Arc::new(SystemClock), AdmissionConfig::default());
//! let staff = service.initialize().await?;
//! let schedule = service.create_schedule(&staff.id, "Morning session", 2).await?;
//! let user = service.register_user("a@example.com", "a").await?;
//!
//! let reservation = service.reserve(&schedule.id, &user.id).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admission;
pub mod cache;
pub mod error;
pub mod identity;
pub mod locks;
pub mod metrics;
pub mod store;
pub mod tracker;
pub mod types;

pub use admission::{AdmissionConfig, AdmissionService};
pub use error::{AdmissionError, IdentityError, StoreError};
pub use store::{AdmissionStore, AdmissionTransaction, IsolationLevel, UserStore};
pub use tracker::TrackerEntry;
pub use types::{EntityKind, Reservation, ReservationId, Schedule, ScheduleId, User, UserId};

/// Environment module - injected dependencies
///
/// Traits for the side effects the core needs from its host, so tests can
/// substitute deterministic implementations.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
