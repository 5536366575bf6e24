//! Reconciliation planning: the pure diff between a batch of observations
//! and the currently active records for one source.
//!
//! Planning is separated from persistence so every store implementation
//! (PostgreSQL, in-memory fake) applies the same mutation semantics, and
//! the diff itself is testable without a database. Stores apply a plan
//! atomically — all mutations or none.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{InventoryObservation, InventoryRecord, InventoryValue};
use crate::run::RunCounts;

/// Insert a fresh active record for an entity key with no active record.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedInsert {
    pub entity_key: String,
    pub value: InventoryValue,
    pub raw: String,
}

/// The observed value differs: update value, raw snapshot,
/// last-changed-at, and last-observed-at.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChange {
    pub record_id: Uuid,
    pub value: InventoryValue,
    pub raw: String,
}

/// Mutation set for one source's batch, applied under a single
/// transaction. `observed_at` is the batch's shared observation time and
/// doubles as last-changed-at for inserts and changes — distinguishing
/// "still true" (touch) from "changed".
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    pub observed_at: DateTime<Utc>,
    pub inserts: Vec<PlannedInsert>,
    pub changes: Vec<PlannedChange>,
    /// Records whose value is unchanged: only last-observed-at advances.
    pub touches: Vec<Uuid>,
    /// Active records the batch no longer reports: active flag cleared.
    pub deactivations: Vec<Uuid>,
}

impl ReconcilePlan {
    /// Mutation counters. `observed` and `malformed` belong to the parse
    /// stage and are filled in by the pipeline.
    pub fn counts(&self) -> RunCounts {
        RunCounts {
            observed: 0,
            inserted: self.inserts.len() as u32,
            updated: self.changes.len() as u32,
            deactivated: self.deactivations.len() as u32,
            malformed: 0,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.inserts.is_empty()
            && self.changes.is_empty()
            && self.touches.is_empty()
            && self.deactivations.is_empty()
    }
}

/// Diff a batch of observations against the active records of one source.
///
/// Duplicate entity keys within the batch collapse to the last occurrence
/// (last-write-wins per source). `active` must contain only active
/// records, all belonging to the same source as the observations.
pub fn plan(
    active: &[InventoryRecord],
    observations: &[InventoryObservation],
    observed_at: DateTime<Utc>,
) -> ReconcilePlan {
    let mut latest: Vec<&InventoryObservation> = Vec::with_capacity(observations.len());
    let mut seen: HashSet<&str> = HashSet::new();
    for obs in observations.iter().rev() {
        if seen.insert(obs.entity_key.as_str()) {
            latest.push(obs);
        }
    }
    latest.reverse();

    let by_key: HashMap<&str, &InventoryRecord> = active
        .iter()
        .map(|r| (r.entity_key.as_str(), r))
        .collect();

    let mut plan = ReconcilePlan {
        observed_at,
        ..ReconcilePlan::default()
    };

    for obs in latest {
        match by_key.get(obs.entity_key.as_str()) {
            None => plan.inserts.push(PlannedInsert {
                entity_key: obs.entity_key.clone(),
                value: obs.value,
                raw: obs.raw.clone(),
            }),
            Some(record) if record.value != obs.value => plan.changes.push(PlannedChange {
                record_id: record.id,
                value: obs.value,
                raw: obs.raw.clone(),
            }),
            Some(record) => plan.touches.push(record.id),
        }
    }

    let observed_keys: HashSet<&str> = observations.iter().map(|o| o.entity_key.as_str()).collect();
    for record in active {
        if !observed_keys.contains(record.entity_key.as_str()) {
            plan.deactivations.push(record.id);
        }
    }

    plan
}
