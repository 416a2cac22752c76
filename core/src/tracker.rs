//! Per-schedule admission tracker.
//!
//! The tracker caches, for each schedule this process has admitted reservations
//! on, the schedule's capacity and the number of reservations committed through
//! this process. It lets the admission protocol reject attempts on a full
//! schedule without counting reservation rows.
//!
//! # States
//!
//! ```text
//! Unknown ──first admission──▶ Tracking ──consumed >= capacity──▶ Saturated
//!    ▲                                                                │
//!    └──────────────────────────── clear() ───────────────────────────┘
//! ```
//!
//! Entries only ever grow: `consumed` is incremented after each committed
//! admission and never recomputed from the store. An entry is a cache of a derived
//! fact, not the source of truth.

use crate::cache::Cache;
use crate::metrics;
use crate::types::ScheduleId;
use serde::{Deserialize, Serialize};

/// Tracker state for one schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerEntry {
    /// Capacity copied from the schedule at first observation
    pub capacity: u32,
    /// Committed reservations observed by this process
    pub consumed: u32,
    /// `consumed >= capacity`
    pub saturated: bool,
}

impl TrackerEntry {
    /// Entry for a schedule first observed with `consumed` prior reservations.
    #[must_use]
    pub const fn new(capacity: u32, consumed: u32) -> Self {
        Self {
            capacity,
            consumed,
            saturated: consumed >= capacity,
        }
    }

    /// Entry after one more committed admission.
    #[must_use]
    pub const fn admitted(self) -> Self {
        Self::new(self.capacity, self.consumed.saturating_add(1))
    }

    /// Slots left before saturation.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.consumed)
    }
}

/// Admission tracker for all schedules.
#[derive(Debug, Default)]
pub struct AdmissionTracker {
    entries: Cache<ScheduleId, TrackerEntry>,
}

impl AdmissionTracker {
    /// Create an empty tracker (every schedule Unknown).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entry for `schedule_id`, if the schedule is being tracked.
    #[must_use]
    pub fn get(&self, schedule_id: &ScheduleId) -> Option<TrackerEntry> {
        self.entries.get(schedule_id)
    }

    /// Record one committed admission on `schedule_id`.
    ///
    /// `first_seen` is the entry the admission was checked against; it is
    /// materialized if the schedule is not tracked yet (first admission, or a
    /// reset raced with the commit). Returns the updated entry.
    pub fn record_admission(&self, schedule_id: &ScheduleId, first_seen: TrackerEntry) -> TrackerEntry {
        let updated = self
            .entries
            .update(schedule_id.clone(), |current| current.copied().unwrap_or(first_seen).admitted());

        if updated.saturated && updated.consumed == updated.capacity {
            metrics::record_schedule_saturated();
            tracing::info!(%schedule_id, capacity = updated.capacity, "Schedule saturated");
        }
        updated
    }

    /// Number of tracked schedules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no schedule is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return every schedule to Unknown.
    pub fn clear(&self) {
        self.entries.clear();
        metrics::reset_saturated_schedules();
    }
}
