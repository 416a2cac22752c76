//! Slotguard demo binary.
//!
//! Runs a reservation race against `PostgreSQL` when `DATABASE_URL` is set, or
//! against the in-memory store otherwise, and prints the outcome as JSON.

use anyhow::Context;
use slotguard::config::Config;
use slotguard::{connect_postgres, demo, telemetry};
use slotguard_core::environment::SystemClock;
use slotguard_core::{AdmissionConfig, AdmissionService, AdmissionStore};
use slotguard_testing::InMemoryStore;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = Config::from_env();
    telemetry::init_tracing(&config.server.log_level);
    info!("Starting slotguard");

    if let Some(addr) = config.server.metrics_addr {
        telemetry::install_metrics(addr).context("Failed to start metrics exporter")?;
    }

    let admission = config.admission.to_admission_config();
    info!(
        isolation = %admission.isolation,
        timeout = ?admission.timeout,
        seed_from_store = admission.seed_from_store,
        "Configuration loaded"
    );

    if config.postgres.url.is_some() {
        info!("Connecting to PostgreSQL...");
        let store = connect_postgres(&config.postgres)
            .await
            .context("Failed to set up PostgreSQL store")?;
        info!("PostgreSQL store ready");
        run(store, admission, &config).await
    } else {
        info!("DATABASE_URL not set, using the in-memory store");
        run(InMemoryStore::new(), admission, &config).await
    }
}

async fn run<S>(store: S, admission: AdmissionConfig, config: &Config) -> anyhow::Result<()>
where
    S: AdmissionStore + 'static,
{
    let service = Arc::new(AdmissionService::new(
        Arc::new(store),
        Arc::new(SystemClock),
        admission,
    ));

    let report = demo::run(service, &config.demo)
        .await
        .context("Demo run failed")?;
    info!(
        admitted = report.admitted.len(),
        rejections = ?report.rejections,
        "Demo finished"
    );

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
