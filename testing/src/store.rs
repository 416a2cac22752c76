//! In-memory implementation of the store traits.
//!
//! Behaves like the production store where the admission protocol can tell the
//! difference:
//!
//! - `lock_schedule` blocks while another transaction holds the schedule
//! - inserts are invisible to other transactions until commit
//! - dropping a transaction rolls it back
//! - the (schedule, user) pair is unique
//!
//! It also counts store accesses and can inject commit failures and delays, which
//! the production store obviously cannot.

use slotguard_core::locks::{RowGuard, RowLocks};
use slotguard_core::store::{AdmissionStore, AdmissionTransaction, IsolationLevel, Result, UserStore};
use slotguard_core::{Reservation, Schedule, ScheduleId, StoreError, User, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const RESERVATION_UNIQUE: &str = "reservations_schedule_id_user_id_key";

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    schedules: HashMap<ScheduleId, Schedule>,
    reservations: Vec<Reservation>,
}

impl Tables {
    fn holds(&self, schedule_id: &ScheduleId, user_id: &UserId) -> bool {
        self.reservations
            .iter()
            .any(|r| &r.schedule_id == schedule_id && &r.user_id == user_id)
    }

    fn count(&self, schedule_id: &ScheduleId) -> usize {
        self.reservations
            .iter()
            .filter(|r| &r.schedule_id == schedule_id)
            .count()
    }
}

#[derive(Debug, Default)]
struct Counters {
    user_lookups: AtomicUsize,
    reservation_counts: AtomicUsize,
    transactions: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_commit: AtomicBool,
    commit_delay: Mutex<Option<Duration>>,
    acknowledge_delay: Mutex<Option<Duration>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory store for tests.
///
/// Cloning is cheap and every clone shares the same tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
    row_locks: Arc<RowLocks<ScheduleId>>,
    counters: Arc<Counters>,
    faults: Arc<Faults>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a user directly, bypassing the trait (test setup).
    pub fn seed_user(&self, user: User) {
        lock(&self.tables).users.insert(user.id.clone(), user);
    }

    /// Insert a schedule directly (test setup).
    pub fn seed_schedule(&self, schedule: Schedule) {
        lock(&self.tables).schedules.insert(schedule.id.clone(), schedule);
    }

    /// Insert a committed reservation directly (test setup).
    pub fn seed_reservation(&self, reservation: Reservation) {
        lock(&self.tables).reservations.push(reservation);
    }

    /// Committed reservations on `schedule_id`.
    #[must_use]
    pub fn reservations_for(&self, schedule_id: &ScheduleId) -> Vec<Reservation> {
        lock(&self.tables)
            .reservations
            .iter()
            .filter(|r| &r.schedule_id == schedule_id)
            .cloned()
            .collect()
    }

    /// Number of committed reservations on `schedule_id`.
    #[must_use]
    pub fn reservation_count(&self, schedule_id: &ScheduleId) -> usize {
        lock(&self.tables).count(schedule_id)
    }

    /// Committed schedule row, if any.
    #[must_use]
    pub fn schedule(&self, schedule_id: &ScheduleId) -> Option<Schedule> {
        lock(&self.tables).schedules.get(schedule_id).cloned()
    }

    /// Number of users in the store.
    #[must_use]
    pub fn user_count(&self) -> usize {
        lock(&self.tables).users.len()
    }

    /// How many times `find_user` was called.
    #[must_use]
    pub fn user_lookups(&self) -> usize {
        self.counters.user_lookups.load(Ordering::SeqCst)
    }

    /// How many times `count_reservations` was called, across all transactions.
    #[must_use]
    pub fn reservation_counts(&self) -> usize {
        self.counters.reservation_counts.load(Ordering::SeqCst)
    }

    /// Number of schedule keys in the in-process lock registry.
    #[must_use]
    pub fn registered_locks(&self) -> usize {
        self.row_locks.len()
    }

    /// How many transactions were started.
    #[must_use]
    pub fn transactions(&self) -> usize {
        self.counters.transactions.load(Ordering::SeqCst)
    }

    /// How many transactions committed.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.counters.commits.load(Ordering::SeqCst)
    }

    /// How many transactions were dropped without committing.
    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.counters.rollbacks.load(Ordering::SeqCst)
    }

    /// Make the next commit fail with a database error.
    pub fn fail_next_commit(&self) {
        self.faults.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Sleep this long inside every commit, before anything is applied.
    pub fn set_commit_delay(&self, delay: Option<Duration>) {
        *lock(&self.faults.commit_delay) = delay;
    }

    /// Sleep this long inside every commit, after its rows are applied and before
    /// it returns: a `COMMIT` the server has executed but not yet acknowledged.
    pub fn set_acknowledge_delay(&self, delay: Option<Duration>) {
        *lock(&self.faults.acknowledge_delay) = delay;
    }
}

impl UserStore for InMemoryStore {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>> {
        self.counters.user_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.tables).users.get(id).cloned())
    }
}

impl AdmissionStore for InMemoryStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self, isolation: IsolationLevel) -> Result<InMemoryTransaction> {
        self.counters.transactions.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(%isolation, "In-memory transaction started");

        Ok(InMemoryTransaction {
            store: self.clone(),
            locked: HashSet::new(),
            guards: Vec::new(),
            pending: Vec::new(),
            finished: false,
        })
    }

    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut tables = lock(&self.tables);
        if tables.users.contains_key(&user.id) {
            return Err(StoreError::UniqueViolation {
                constraint: "users_pkey".to_string(),
            });
        }
        tables.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn insert_schedule(&self, schedule: &Schedule) -> Result<()> {
        let mut tables = lock(&self.tables);
        if tables.schedules.contains_key(&schedule.id) {
            return Err(StoreError::UniqueViolation {
                constraint: "schedules_pkey".to_string(),
            });
        }
        tables.schedules.insert(schedule.id.clone(), schedule.clone());
        Ok(())
    }

    async fn reset(&self, seed: &User) -> Result<()> {
        {
            let mut tables = lock(&self.tables);
            *tables = Tables::default();
            tables.users.insert(seed.id.clone(), seed.clone());
        }
        self.row_locks.prune();
        Ok(())
    }
}

/// Transaction over an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryTransaction {
    store: InMemoryStore,
    locked: HashSet<ScheduleId>,
    guards: Vec<RowGuard>,
    pending: Vec<Reservation>,
    finished: bool,
}

impl InMemoryTransaction {
    fn pending_holds(&self, schedule_id: &ScheduleId, user_id: &UserId) -> bool {
        self.pending
            .iter()
            .any(|r| &r.schedule_id == schedule_id && &r.user_id == user_id)
    }
}

impl AdmissionTransaction for InMemoryTransaction {
    async fn lock_schedule(&mut self, schedule_id: &ScheduleId) -> Result<Option<i32>> {
        if !lock(&self.store.tables).schedules.contains_key(schedule_id) {
            return Ok(None);
        }

        if self.locked.insert(schedule_id.clone()) {
            let guard = self.store.row_locks.acquire(schedule_id.clone()).await;
            self.guards.push(guard);
        }

        Ok(lock(&self.store.tables)
            .schedules
            .get(schedule_id)
            .map(|schedule| schedule.capacity))
    }

    async fn find_user(&mut self, id: &UserId) -> Result<Option<User>> {
        self.store.find_user(id).await
    }

    async fn has_reservation(&mut self, schedule_id: &ScheduleId, user_id: &UserId) -> Result<bool> {
        let committed = lock(&self.store.tables).holds(schedule_id, user_id);
        Ok(committed || self.pending_holds(schedule_id, user_id))
    }

    async fn count_reservations(&mut self, schedule_id: &ScheduleId) -> Result<u32> {
        self.store.counters.reservation_counts.fetch_add(1, Ordering::SeqCst);
        let committed = lock(&self.store.tables).count(schedule_id);
        let pending = self
            .pending
            .iter()
            .filter(|r| &r.schedule_id == schedule_id)
            .count();
        u32::try_from(committed + pending)
            .map_err(|e| StoreError::Database(format!("Reservation count overflow: {e}")))
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        let duplicate = lock(&self.store.tables).holds(&reservation.schedule_id, &reservation.user_id)
            || self.pending_holds(&reservation.schedule_id, &reservation.user_id);
        if duplicate {
            return Err(StoreError::UniqueViolation {
                constraint: RESERVATION_UNIQUE.to_string(),
            });
        }
        self.pending.push(reservation.clone());
        Ok(())
    }

    async fn commit<F>(mut self, on_commit: F) -> Result<()>
    where
        F: FnOnce() + Send,
    {
        let delay = *lock(&self.store.faults.commit_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.store.faults.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("injected commit failure".to_string()));
        }

        {
            let mut tables = lock(&self.store.tables);
            if self
                .pending
                .iter()
                .any(|r| tables.holds(&r.schedule_id, &r.user_id))
            {
                return Err(StoreError::UniqueViolation {
                    constraint: RESERVATION_UNIQUE.to_string(),
                });
            }
            tables.reservations.append(&mut self.pending);
        }

        self.finished = true;
        self.store.counters.commits.fetch_add(1, Ordering::SeqCst);

        let acknowledge = *lock(&self.store.faults.acknowledge_delay);
        if let Some(delay) = acknowledge {
            tokio::time::sleep(delay).await;
        }

        // Row guards are still held here; they drop with `self`.
        on_commit();
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.store.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
            tracing::trace!(discarded = self.pending.len(), "In-memory transaction rolled back");
        }
    }
}
