//! Slotguard application wiring.
//!
//! Configuration, telemetry and store selection for the `slotguard` binary.
//! The admission logic itself lives in `slotguard-core`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod demo;
pub mod telemetry;

use config::PostgresConfig;
use slotguard_core::StoreError;
use slotguard_postgres::PostgresStore;
use sqlx::postgres::PgPoolOptions;

/// Connect to `PostgreSQL` with the configured pool settings and migrate.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if `config.url` is unset or the pool cannot
/// connect, or [`StoreError::Migration`] if migrations fail.
pub async fn connect_postgres(config: &PostgresConfig) -> Result<PostgresStore, StoreError> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| StoreError::Database("DATABASE_URL is not set".to_string()))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout())
        .connect(url)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;

    let store = PostgresStore::from_pool(pool);
    if config.run_migrations {
        store.migrate().await?;
    }
    Ok(store)
}
