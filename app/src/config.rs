//! Configuration management for the slotguard binary.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Unparseable values fall back to the default rather than failing startup.

use serde::{Deserialize, Serialize};
use slotguard_core::{AdmissionConfig, IsolationLevel};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `PostgreSQL` configuration
    pub postgres: PostgresConfig,
    /// Admission protocol tuning
    pub admission: AdmissionSettings,
    /// Process-level settings
    pub server: ServerConfig,
    /// Demo workload
    pub demo: DemoConfig,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Connection URL; the in-memory store is used when unset
    pub url: Option<String>,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections in the pool
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
    /// Apply migrations on startup
    pub run_migrations: bool,
}

/// Admission protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionSettings {
    /// Per-attempt timeout in milliseconds (0 disables it)
    pub timeout_ms: u64,
    /// Seed unseen tracker entries from a reservation count
    pub seed_from_store: bool,
    /// Transaction isolation level, e.g. `read committed`
    pub isolation: String,
}

/// Process-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// Prometheus scrape address; metrics are not exported when unset
    pub metrics_addr: Option<SocketAddr>,
}

/// Demo workload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Capacity of the demo schedule
    pub capacity: i32,
    /// Number of users racing for it
    pub users: usize,
}

impl Config {
    /// Load configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            postgres: PostgresConfig {
                url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
                max_connections: parsed(&lookup, "DATABASE_MAX_CONNECTIONS").unwrap_or(10),
                min_connections: parsed(&lookup, "DATABASE_MIN_CONNECTIONS").unwrap_or(2),
                connect_timeout: parsed(&lookup, "DATABASE_CONNECT_TIMEOUT").unwrap_or(30),
                run_migrations: parsed(&lookup, "DATABASE_RUN_MIGRATIONS").unwrap_or(true),
            },
            admission: AdmissionSettings {
                timeout_ms: parsed(&lookup, "ADMISSION_TIMEOUT_MS").unwrap_or(30_000),
                seed_from_store: parsed(&lookup, "ADMISSION_SEED_FROM_STORE").unwrap_or(false),
                isolation: lookup("ADMISSION_ISOLATION")
                    .unwrap_or_else(|| IsolationLevel::default().to_string()),
            },
            server: ServerConfig {
                log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "slotguard=info".to_string()),
                metrics_addr: parsed(&lookup, "METRICS_ADDR"),
            },
            demo: DemoConfig {
                capacity: parsed(&lookup, "DEMO_CAPACITY").unwrap_or(5),
                users: parsed(&lookup, "DEMO_USERS").unwrap_or(20),
            },
        }
    }
}

/// Look up `key` and parse it, treating unparseable values as unset.
fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl PostgresConfig {
    /// Connection timeout as a [`Duration`].
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

impl AdmissionSettings {
    /// Build the core [`AdmissionConfig`].
    ///
    /// An unrecognized isolation level falls back to the default with a warning.
    #[must_use]
    pub fn to_admission_config(&self) -> AdmissionConfig {
        let isolation = self.isolation.parse().unwrap_or_else(|error| {
            tracing::warn!(%error, "Falling back to default isolation level");
            IsolationLevel::default()
        });

        AdmissionConfig {
            isolation,
            timeout: (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms)),
            seed_from_store: self.seed_from_store,
        }
    }
}
