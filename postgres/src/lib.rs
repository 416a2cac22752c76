//! `PostgreSQL` store for slotguard admission control.
//!
//! Implements [`AdmissionStore`] over a sqlx connection pool. Schedule rows are
//! locked with `SELECT ... FOR UPDATE`; the per-schedule in-process guard from
//! [`RowLocks`] is taken once the row lock is held and released after the commit
//! hook. Every read inside an admission goes through the transaction's own
//! connection.
//!
//! # Example
//!
//! ```no_run
//! use slotguard_postgres::PostgresStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresStore::new("postgres://localhost/slotguard").await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use slotguard_core::locks::{RowGuard, RowLocks};
use slotguard_core::store::Result;
use slotguard_core::{
    AdmissionStore, AdmissionTransaction, IsolationLevel, Reservation, Schedule, ScheduleId,
    StoreError, User, UserId, UserStore,
};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row};
use std::sync::Arc;

/// Map a sqlx error to a [`StoreError`], keeping unique violations distinct.
fn map_sqlx_error(context: &str, error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &error {
        if db_err.is_unique_violation() {
            return StoreError::UniqueViolation {
                constraint: db_err
                    .constraint()
                    .or_else(|| db_err.table())
                    .unwrap_or("unknown")
                    .to_string(),
            };
        }
    }
    StoreError::Database(format!("{context}: {error}"))
}

const fn set_isolation_sql(isolation: IsolationLevel) -> &'static str {
    match isolation {
        IsolationLevel::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
        IsolationLevel::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
        IsolationLevel::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
    }
}

fn user_from_row(row: &PgRow) -> std::result::Result<User, sqlx::Error> {
    let id: String = row.try_get("id")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    Ok(User {
        id: UserId::new(id),
        email: row.try_get("email")?,
        nickname: row.try_get("nickname")?,
        staff: row.try_get("staff")?,
        created_at,
    })
}

/// `PostgreSQL`-backed [`AdmissionStore`].
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    row_locks: Arc<RowLocks<ScheduleId>>,
}

impl PostgresStore {
    /// Connect to `database_url` with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection cannot be established.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("Failed to connect", e))?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            row_locks: Arc::new(RowLocks::new()),
        }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Number of schedule keys in the in-process lock registry.
    #[must_use]
    pub fn registered_locks(&self) -> usize {
        self.row_locks.len()
    }

    /// Apply the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Migration`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("pool_size", &self.pool.size())
            .field("row_locks", &self.row_locks)
            .finish()
    }
}

impl UserStore for PostgresStore {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, email, nickname, staff, created_at FROM users WHERE id = $1 LIMIT 1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("Failed to load user", e))?;

        row.as_ref()
            .map(user_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("Failed to decode user", e))
    }
}

impl AdmissionStore for PostgresStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self, isolation: IsolationLevel) -> Result<PostgresTransaction> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("Failed to begin transaction", e))?;

        sqlx::query(set_isolation_sql(isolation))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("Failed to set isolation level", e))?;

        Ok(PostgresTransaction {
            tx,
            row_locks: Arc::clone(&self.row_locks),
            guards: Vec::new(),
            locked: Vec::new(),
        })
    }

    async fn insert_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, email, nickname, staff, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(user.id.as_str())
        .bind(&user.email)
        .bind(&user.nickname)
        .bind(user.staff)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("Failed to insert user", e))?;
        Ok(())
    }

    async fn insert_schedule(&self, schedule: &Schedule) -> Result<()> {
        sqlx::query("INSERT INTO schedules (id, title, capacity, created_at) VALUES ($1, $2, $3, $4)")
            .bind(schedule.id.as_str())
            .bind(&schedule.title)
            .bind(schedule.capacity)
            .bind(schedule.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to insert schedule", e))?;
        Ok(())
    }

    async fn reset(&self, seed: &User) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("Failed to begin reset", e))?;

        sqlx::query("TRUNCATE reservations, schedules, users")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("Failed to truncate tables", e))?;

        sqlx::query(
            "INSERT INTO users (id, email, nickname, staff, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(seed.id.as_str())
        .bind(&seed.email)
        .bind(&seed.nickname)
        .bind(seed.staff)
        .bind(seed.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("Failed to insert seed user", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("Failed to commit reset", e))?;
        let pruned = self.row_locks.prune();
        tracing::info!(seed = %seed.id, pruned, "Store reset");
        Ok(())
    }
}

/// Transaction over a [`PostgresStore`].
///
/// Dropping it without committing returns the connection to the pool, which
/// rolls the transaction back.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    row_locks: Arc<RowLocks<ScheduleId>>,
    guards: Vec<RowGuard>,
    locked: Vec<ScheduleId>,
}

impl std::fmt::Debug for PostgresTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresTransaction")
            .field("locked", &self.locked)
            .finish_non_exhaustive()
    }
}

impl AdmissionTransaction for PostgresTransaction {
    async fn lock_schedule(&mut self, schedule_id: &ScheduleId) -> Result<Option<i32>> {
        let capacity: Option<i32> =
            sqlx::query_scalar("SELECT capacity FROM schedules WHERE id = $1 LIMIT 1 FOR UPDATE")
                .bind(schedule_id.as_str())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("Failed to lock schedule", e))?;

        // The row lock comes first; a guard holder never waits on the database,
        // and missing schedules never enter the registry.
        if capacity.is_some() && !self.locked.contains(schedule_id) {
            let guard = self.row_locks.acquire(schedule_id.clone()).await;
            self.guards.push(guard);
            self.locked.push(schedule_id.clone());
        }

        Ok(capacity)
    }

    async fn find_user(&mut self, id: &UserId) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, email, nickname, staff, created_at FROM users WHERE id = $1 LIMIT 1",
        )
        .bind(id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("Failed to load user", e))?;

        row.as_ref()
            .map(user_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("Failed to decode user", e))
    }

    async fn has_reservation(&mut self, schedule_id: &ScheduleId, user_id: &UserId) -> Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM reservations WHERE schedule_id = $1 AND user_id = $2)",
        )
        .bind(schedule_id.as_str())
        .bind(user_id.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("Failed to check reservation", e))
    }

    async fn count_reservations(&mut self, schedule_id: &ScheduleId) -> Result<u32> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reservations WHERE schedule_id = $1")
            .bind(schedule_id.as_str())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("Failed to count reservations", e))?;

        u32::try_from(count)
            .map_err(|e| StoreError::Database(format!("Reservation count out of range: {e}")))
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        sqlx::query(
            "INSERT INTO reservations (id, schedule_id, user_id, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(reservation.id.as_str())
        .bind(reservation.schedule_id.as_str())
        .bind(reservation.user_id.as_str())
        .bind(reservation.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("Failed to insert reservation", e))?;
        Ok(())
    }

    async fn commit<F>(self, on_commit: F) -> Result<()>
    where
        F: FnOnce() + Send,
    {
        let Self { tx, guards, .. } = self;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("Failed to commit", e))?;

        on_commit();
        drop(guards);
        Ok(())
    }
}
