//! Demo workload: a burst of users racing for one schedule.

use futures::future::join_all;
use serde::Serialize;
use slotguard_core::{
    AdmissionError, AdmissionService, AdmissionStore, Reservation, Schedule, TrackerEntry, User,
};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::DemoConfig;

/// Outcome of [`run`].
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    /// The contested schedule, with `reserved` filled in
    pub schedule: Schedule,
    /// Users that took part
    pub users: Vec<User>,
    /// Committed reservations, in completion order
    pub admitted: Vec<Reservation>,
    /// Rejections by kind, including one deliberate duplicate attempt
    pub rejections: BTreeMap<&'static str, usize>,
    /// Tracker entry after the race
    pub tracker: Option<TrackerEntry>,
}

/// Reset the store, create a schedule and race `config.users` users for it.
///
/// # Errors
///
/// Returns [`AdmissionError`] if setup fails or a reservation attempt fails
/// with a store error. Business rejections are counted in the report.
pub async fn run<S>(
    service: Arc<AdmissionService<S>>,
    config: &DemoConfig,
) -> Result<DemoReport, AdmissionError>
where
    S: AdmissionStore + 'static,
{
    let staff = service.initialize().await?;
    let mut schedule = service
        .create_schedule(&staff.id, "demo session", config.capacity)
        .await?;

    let mut users = Vec::with_capacity(config.users);
    for i in 0..config.users {
        users.push(
            service
                .register_user(&format!("user-{i}@example.com"), &format!("user-{i}"))
                .await?,
        );
    }

    let attempts = users.iter().map(|user| {
        let service = Arc::clone(&service);
        let schedule_id = schedule.id.clone();
        let user_id = user.id.clone();
        async move { service.reserve(&schedule_id, &user_id).await }
    });
    let mut results = join_all(attempts).await;

    if let Some(first) = results.iter().find_map(|r| r.as_ref().ok()).cloned() {
        results.push(service.reserve(&first.schedule_id, &first.user_id).await);
    }

    let mut admitted = Vec::new();
    let mut rejections = BTreeMap::new();
    for result in results {
        match result {
            Ok(reservation) => admitted.push(reservation),
            Err(error) if error.is_store_error() => return Err(error),
            Err(error) => *rejections.entry(error.kind()).or_insert(0) += 1,
        }
    }

    schedule.reserved = i32::try_from(admitted.len()).unwrap_or(i32::MAX);
    let tracker = service.tracker_entry(&schedule.id);
    let users = users.iter().map(|user| user.redacted_for(Some(&staff))).collect();

    Ok(DemoReport {
        schedule,
        users,
        admitted,
        rejections,
        tracker,
    })
}
