//! Reservation admission service.
//!
//! [`AdmissionService`] owns the identity cache and the admission tracker and runs
//! the reservation protocol against an [`AdmissionStore`]. It replaces process-wide
//! cache singletons: build one per process (or per test), share it behind an
//! `Arc`, and call [`AdmissionService::reset_all`] whenever the store's tables are
//! wiped.
//!
//! # Protocol
//!
//! `reserve(schedule, user)` runs in one store transaction:
//!
//! ```text
//! 1. lock schedule row, read capacity     → NotFound / InvalidSchedule
//! 2. resolve user via identity cache      → UnknownUser
//! 3. authoritative duplicate check        → AlreadyReserved
//! 4. tracker entry saturated?             → CapacityExceeded (no row scan)
//! 5. insert reservation
//! 6. commit
//! 7. tracker.consumed += 1 (commit hook)
//! ```
//!
//! Any failure in 1-5 drops the transaction, which rolls it back; the tracker is
//! only touched in step 7. The tracker update happens after the durable commit,
//! so a crash between 6 and 7 leaves the tracker one admission behind and the
//! next attempt may admit one reservation too many. That window is accepted.
//! Within a running process the store runs the hook before releasing its
//! in-process schedule lock, so the next attempt on the same schedule always
//! sees the updated entry.
//!
//! The user is resolved through the open transaction, so an attempt holding a
//! schedule lock never waits for a second pooled connection.
//!
//! [`AdmissionConfig::timeout`] bounds steps 1-5 only. Steps 6-7 run on a
//! spawned task: once a commit may have reached the store, its hook runs even if
//! the caller has given up, so the tracker never misses an applied admission.

use crate::environment::Clock;
use crate::error::{AdmissionError, IdentityError, StoreError};
use crate::identity::IdentityCache;
use crate::metrics;
use crate::store::{AdmissionStore, AdmissionTransaction, IsolationLevel};
use crate::tracker::{AdmissionTracker, TrackerEntry};
use crate::types::{EntityKind, Reservation, ReservationId, Schedule, ScheduleId, User, UserId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Email of the staff user seeded by [`AdmissionService::initialize`].
pub const PRIOR_USER_EMAIL: &str = "isucon2021_prior@isucon.net";

/// Nickname of the staff user seeded by [`AdmissionService::initialize`].
pub const PRIOR_USER_NICKNAME: &str = "isucon";

/// Tuning for the admission protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// Isolation level of admission transactions
    pub isolation: IsolationLevel,
    /// Upper bound on the pre-commit part of `reserve`, lock waits included
    /// (`None` = unbounded). The commit itself is never cut short.
    pub timeout: Option<Duration>,
    /// Seed a new tracker entry from a reservation count instead of zero.
    ///
    /// Off by default: the tracker then assumes a schedule it has never seen has
    /// no reservations, which holds right after [`AdmissionService::initialize`]
    /// but not after a restart over existing data.
    pub seed_from_store: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::ReadCommitted,
            timeout: Some(Duration::from_secs(30)),
            seed_from_store: false,
        }
    }
}

/// Admission control over one durable store.
pub struct AdmissionService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: AdmissionConfig,
    identities: IdentityCache,
    tracker: Arc<AdmissionTracker>,
}

impl<S> AdmissionService<S>
where
    S: AdmissionStore,
{
    /// Create a service with empty caches.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: AdmissionConfig) -> Self {
        Self {
            store,
            clock,
            config,
            identities: IdentityCache::new(),
            tracker: Arc::new(AdmissionTracker::new()),
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// The identity cache.
    #[must_use]
    pub const fn identities(&self) -> &IdentityCache {
        &self.identities
    }

    /// Current tracker entry for `schedule_id` (`None` while Unknown).
    #[must_use]
    pub fn tracker_entry(&self, schedule_id: &ScheduleId) -> Option<TrackerEntry> {
        self.tracker.get(schedule_id)
    }

    /// Resolve a user through the identity cache.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::NotFound`] if no such user exists
    /// - [`IdentityError::Store`] if the store lookup fails
    pub async fn resolve(&self, user_id: &UserId) -> Result<User, IdentityError> {
        self.identities.resolve(self.store.as_ref(), user_id).await
    }

    /// Admit `user_id` onto `schedule_id`.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::NotFound`]: no such schedule
    /// - [`AdmissionError::InvalidSchedule`]: capacity is zero or negative
    /// - [`AdmissionError::UnknownUser`]: the user cannot be resolved
    /// - [`AdmissionError::AlreadyReserved`]: the user already holds a reservation
    /// - [`AdmissionError::CapacityExceeded`]: the schedule is saturated
    /// - [`AdmissionError::Store`]: the store failed or the attempt timed out
    #[tracing::instrument(skip_all, fields(%schedule_id, %user_id))]
    pub async fn reserve(
        &self,
        schedule_id: &ScheduleId,
        user_id: &UserId,
    ) -> Result<Reservation, AdmissionError> {
        let started = Instant::now();

        let result = match self.prepare_within_limit(schedule_id, user_id).await {
            Ok(prepared) => self.commit(prepared).await,
            Err(error) => Err(error),
        };

        match &result {
            Ok(reservation) => {
                metrics::record_admission("admitted", started.elapsed());
                tracing::info!(reservation_id = %reservation.id, "Reservation admitted");
            }
            Err(error) => {
                metrics::record_admission(error.kind(), started.elapsed());
                if error.is_store_error() {
                    tracing::error!(error = ?error, "Reservation failed");
                } else {
                    tracing::debug!(reason = error.kind(), "Reservation rejected");
                }
            }
        }

        result
    }

    async fn prepare_within_limit(
        &self,
        schedule_id: &ScheduleId,
        user_id: &UserId,
    ) -> Result<Prepared<S::Transaction>, AdmissionError> {
        match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, self.prepare(schedule_id, user_id))
                .await
                .unwrap_or_else(|_| Err(StoreError::Timeout(limit).into())),
            None => self.prepare(schedule_id, user_id).await,
        }
    }

    /// Steps 1-5: everything up to, not including, the commit.
    async fn prepare(
        &self,
        schedule_id: &ScheduleId,
        user_id: &UserId,
    ) -> Result<Prepared<S::Transaction>, AdmissionError> {
        let mut tx = self.store.begin(self.config.isolation).await?;

        let capacity = match tx.lock_schedule(schedule_id).await? {
            None => return Err(AdmissionError::NotFound(schedule_id.clone())),
            Some(stored) => u32::try_from(stored)
                .ok()
                .filter(|capacity| *capacity > 0)
                .ok_or_else(|| AdmissionError::InvalidSchedule {
                    schedule_id: schedule_id.clone(),
                    capacity: stored,
                })?,
        };

        let user = self
            .identities
            .resolve_in(&mut tx, user_id)
            .await
            .map_err(|error| match error {
                IdentityError::NotFound(id) => AdmissionError::UnknownUser(id),
                IdentityError::Store(error) => AdmissionError::Store(error),
            })?;

        // Duplicates are checked against the store, never the cache.
        if tx.has_reservation(schedule_id, &user.id).await? {
            return Err(already_reserved(schedule_id, &user.id));
        }

        let entry = match self.tracker.get(schedule_id) {
            Some(entry) => entry,
            None if self.config.seed_from_store => {
                TrackerEntry::new(capacity, tx.count_reservations(schedule_id).await?)
            }
            None => TrackerEntry::new(capacity, 0),
        };
        if entry.saturated {
            return Err(AdmissionError::CapacityExceeded {
                schedule_id: schedule_id.clone(),
                capacity: entry.capacity,
            });
        }

        let reservation = Reservation {
            id: ReservationId::new(self.store.new_id(EntityKind::Reservation)),
            schedule_id: schedule_id.clone(),
            user_id: user.id,
            created_at: self.clock.now(),
        };
        tx.insert_reservation(&reservation)
            .await
            .map_err(|error| duplicate_or_store(error, &reservation.schedule_id, &reservation.user_id))?;

        Ok(Prepared {
            tx,
            reservation,
            entry,
        })
    }

    /// Steps 6-7, on a task of their own.
    ///
    /// Neither the admission timeout nor a dropped caller can interrupt a
    /// commit that may already have reached the store; the tracker hook runs
    /// whenever the commit succeeds.
    async fn commit(&self, prepared: Prepared<S::Transaction>) -> Result<Reservation, AdmissionError> {
        let Prepared {
            tx,
            reservation,
            entry,
        } = prepared;

        let tracker = Arc::clone(&self.tracker);
        let schedule_id = reservation.schedule_id.clone();
        let committing = tokio::spawn(
            tx.commit(move || {
                let updated = tracker.record_admission(&schedule_id, entry);
                tracing::debug!(
                    consumed = updated.consumed,
                    capacity = updated.capacity,
                    "Tracker updated"
                );
            })
            .in_current_span(),
        );

        match committing.await {
            Ok(Ok(())) => Ok(reservation),
            Ok(Err(error)) => Err(duplicate_or_store(
                error,
                &reservation.schedule_id,
                &reservation.user_id,
            )),
            Err(error) => Err(StoreError::Database(format!("Commit task failed: {error}")).into()),
        }
    }

    /// Clear the identity cache and the admission tracker.
    ///
    /// Must be called whenever the store's tables are wiped, or the caches keep
    /// serving rows that no longer exist.
    pub fn reset_all(&self) {
        self.identities.clear();
        self.tracker.clear();
        tracing::info!("Admission caches reset");
    }

    /// Wipe the store, seed the prior staff user and reset the caches.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] if the store reset fails; the caches are
    /// left untouched then.
    #[tracing::instrument(skip_all)]
    pub async fn initialize(&self) -> Result<User, AdmissionError> {
        let seed = User::new(
            UserId::new(self.store.new_id(EntityKind::User)),
            PRIOR_USER_EMAIL,
            PRIOR_USER_NICKNAME,
            true,
            self.clock.now(),
        );

        self.store.reset(&seed).await.inspect_err(|error| {
            tracing::error!(error = ?error, "Store reset failed");
        })?;
        self.reset_all();

        tracing::info!(user_id = %seed.id, "Store initialized");
        Ok(seed)
    }

    /// Create a non-staff user and prime the identity cache with it.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] if the insert fails.
    #[tracing::instrument(skip(self))]
    pub async fn register_user(&self, email: &str, nickname: &str) -> Result<User, AdmissionError> {
        let user = User::new(
            UserId::new(self.store.new_id(EntityKind::User)),
            email,
            nickname,
            false,
            self.clock.now(),
        );

        self.store.insert_user(&user).await?;
        self.identities.prime(user.clone());

        tracing::debug!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Create a schedule on behalf of `actor`, who must be staff.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::UnknownUser`]: `actor` cannot be resolved
    /// - [`AdmissionError::Forbidden`]: `actor` is not staff
    /// - [`AdmissionError::InvalidSchedule`]: `capacity` is negative; nothing is stored
    /// - [`AdmissionError::Store`]: the insert fails
    #[tracing::instrument(skip(self))]
    pub async fn create_schedule(
        &self,
        actor: &UserId,
        title: &str,
        capacity: i32,
    ) -> Result<Schedule, AdmissionError> {
        let actor = self.resolve(actor).await.map_err(|error| match error {
            IdentityError::NotFound(id) => AdmissionError::UnknownUser(id),
            IdentityError::Store(error) => AdmissionError::Store(error),
        })?;
        if !actor.staff {
            return Err(AdmissionError::Forbidden(format!(
                "user {} may not create schedules",
                actor.id
            )));
        }

        let schedule_id = ScheduleId::new(self.store.new_id(EntityKind::Schedule));
        if capacity < 0 {
            return Err(AdmissionError::InvalidSchedule {
                schedule_id,
                capacity,
            });
        }

        let schedule = Schedule::new(schedule_id, title, capacity, self.clock.now());
        self.store.insert_schedule(&schedule).await?;

        tracing::debug!(schedule_id = %schedule.id, capacity, "Schedule created");
        Ok(schedule)
    }
}

/// A transaction that passed every check and holds the inserted row.
struct Prepared<T> {
    tx: T,
    reservation: Reservation,
    entry: TrackerEntry,
}

fn already_reserved(schedule_id: &ScheduleId, user_id: &UserId) -> AdmissionError {
    AdmissionError::AlreadyReserved {
        schedule_id: schedule_id.clone(),
        user_id: user_id.clone(),
    }
}

// The (schedule, user) unique constraint backs up the duplicate check.
fn duplicate_or_store(error: StoreError, schedule_id: &ScheduleId, user_id: &UserId) -> AdmissionError {
    match error {
        StoreError::UniqueViolation { .. } => already_reserved(schedule_id, user_id),
        other => AdmissionError::Store(other),
    }
}
