//! # Slotguard Testing
//!
//! Testing utilities for slotguard.
//!
//! This crate provides:
//! - [`InMemoryStore`]: an in-memory store with row locks, commit/rollback
//!   semantics, access counters and fault injection
//! - [`FixedClock`] / [`test_clock`]: deterministic time
//! - [`fixtures`]: builders for users, schedules and services
//!
//! ## Example
//!
//! ```ignore
//! use slotguard_testing::fixtures;
//!
//! #[tokio::test]
//! async fn last_slot() {
//!     let (store, service) = fixtures::service();
//!     let schedule = fixtures::schedule("s-1", 1);
//!     store.seed_schedule(schedule.clone());
//!     // ...
//! }
//! ```

pub mod store;

pub use store::{InMemoryStore, InMemoryTransaction};

/// Mock implementations of environment traits.
pub mod mocks {
    use chrono::{DateTime, Utc};
    use slotguard_core::environment::Clock;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use slotguard_testing::mocks::FixedClock;
    /// use slotguard_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Builders for common test data.
pub mod fixtures {
    use super::mocks::test_clock;
    use super::InMemoryStore;
    use slotguard_core::environment::Clock;
    use slotguard_core::{
        AdmissionConfig, AdmissionService, Reservation, ReservationId, Schedule, ScheduleId, User,
        UserId,
    };
    use std::sync::Arc;

    /// A non-staff user whose email is `<id>@example.com`.
    #[must_use]
    pub fn user(id: &str) -> User {
        User::new(UserId::new(id), format!("{id}@example.com"), id, false, test_clock().now())
    }

    /// A staff user.
    #[must_use]
    pub fn staff(id: &str) -> User {
        User {
            staff: true,
            ..user(id)
        }
    }

    /// A schedule with the given capacity.
    #[must_use]
    pub fn schedule(id: &str, capacity: i32) -> Schedule {
        Schedule::new(ScheduleId::new(id), format!("Schedule {id}"), capacity, test_clock().now())
    }

    /// A committed reservation, for seeding pre-existing data.
    #[must_use]
    pub fn reservation(id: &str, schedule: &Schedule, user: &User) -> Reservation {
        Reservation {
            id: ReservationId::new(id),
            schedule_id: schedule.id.clone(),
            user_id: user.id.clone(),
            created_at: test_clock().now(),
        }
    }

    /// A service over a fresh in-memory store with default configuration.
    #[must_use]
    pub fn service() -> (InMemoryStore, Arc<AdmissionService<InMemoryStore>>) {
        service_with(AdmissionConfig::default())
    }

    /// A service over a fresh in-memory store.
    #[must_use]
    pub fn service_with(
        config: AdmissionConfig,
    ) -> (InMemoryStore, Arc<AdmissionService<InMemoryStore>>) {
        let store = InMemoryStore::new();
        let service = AdmissionService::new(Arc::new(store.clone()), Arc::new(test_clock()), config);
        (store, Arc::new(service))
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slotguard=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use slotguard_core::environment::Clock;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn staff_fixture_is_staff() {
        assert!(fixtures::staff("admin").staff);
        assert!(!fixtures::user("alice").staff);
    }
}
