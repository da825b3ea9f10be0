//! Store seam: the logical key-value document store the engine runs against.
//!
//! The engine only needs five operations (keyed get, create, recency query,
//! shared scan, conditional patch), expressed as the [`PlanStore`] trait.
//! The PostgreSQL implementation lives in the `itinera-db` crate; the
//! [`memory::MemoryPlanStore`] here backs engine and handler tests.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Attribute key prefix for indexed flight payloads (`flight_info_1`, ...).
pub const FLIGHT_ATTR_PREFIX: &str = "flight_info_";
/// Attribute key prefix for indexed accommodation payloads (`accmo_info_1`, ...).
pub const ACCMO_ATTR_PREFIX: &str = "accmo_info_";

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// The root persisted travel-plan entity, keyed `(owner_id, plan_id)`.
///
/// `attrs` is the indexed attribute namespace: `flight_info_i` and
/// `accmo_info_i` keys (1-based, gap-free) holding serialized payloads.
/// Invariant: `total_flights` / `total_accommodations` equal the number of
/// indexed attributes actually present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub owner_id: String,
    pub plan_id: i64,
    pub name: String,
    /// Serialized day-keyed schedule map, flights/accommodations removed.
    pub itinerary_schedules: Option<String>,
    /// Legacy raw AI-generated text for records that were never normalized.
    pub plan_text: Option<String>,
    pub attrs: BTreeMap<String, String>,
    pub total_flights: i32,
    pub total_accommodations: i32,
    pub paid_plan: i32,
    /// Comma-separated collaborator identities; `None` when unshared.
    pub shared_email: Option<String>,
    pub start_date: Option<NaiveDate>,
    /// Optimistic-concurrency token; bumped by every successful update.
    pub version: i64,
    pub last_updated: DateTime<Utc>,
}

impl PlanRecord {
    /// Deserialized flight payloads, in index order. Index gaps are not
    /// assumed: iteration stops at the first missing index. Unparseable
    /// entries are skipped with a warning.
    pub fn flights(&self) -> Vec<Value> {
        self.indexed_values(FLIGHT_ATTR_PREFIX)
    }

    /// Deserialized accommodation payloads, in index order.
    pub fn accommodations(&self) -> Vec<Value> {
        self.indexed_values(ACCMO_ATTR_PREFIX)
    }

    fn indexed_values(&self, prefix: &str) -> Vec<Value> {
        let mut values = Vec::new();
        for i in 1.. {
            let key = format!("{prefix}{i}");
            let Some(raw) = self.attrs.get(&key) else {
                break;
            };
            match serde_json::from_str(raw) {
                Ok(value) => values.push(value),
                Err(err) => warn!(key, %err, "skipping unparseable indexed attribute"),
            }
        }
        values
    }

    /// Size of the serialized record, compared against the store's
    /// per-item ceiling before writes.
    pub fn serialized_size(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// An attribute-level mutation: only named attributes change, everything
/// else is untouched. `flight_attrs` / `accmo_attrs` replace their whole
/// indexed namespace when set, which keeps the count invariant intact
/// (stale higher-indexed attributes cannot survive a shrink).
#[derive(Debug, Clone, PartialEq)]
pub struct PlanPatch {
    pub name: Option<String>,
    pub itinerary_schedules: Option<String>,
    pub flight_attrs: Option<Vec<String>>,
    pub accmo_attrs: Option<Vec<String>>,
    /// `Some(None)` clears the sharing list; `None` leaves it untouched.
    pub shared_email: Option<Option<String>>,
    pub paid_plan: Option<i32>,
    /// Always applied; every update touches `last_updated`.
    pub last_updated: DateTime<Utc>,
}

impl PlanPatch {
    pub fn new(last_updated: DateTime<Utc>) -> Self {
        Self {
            name: None,
            itinerary_schedules: None,
            flight_attrs: None,
            accmo_attrs: None,
            shared_email: None,
            paid_plan: None,
            last_updated,
        }
    }

    /// Apply the patch to a record in place. Does not bump `version`;
    /// store implementations do that on successful conditional write.
    pub fn apply(&self, record: &mut PlanRecord) {
        if let Some(name) = &self.name {
            record.name = name.clone();
        }
        if let Some(schedules) = &self.itinerary_schedules {
            record.itinerary_schedules = Some(schedules.clone());
        }
        if let Some(flights) = &self.flight_attrs {
            replace_namespace(&mut record.attrs, FLIGHT_ATTR_PREFIX, flights);
            record.total_flights = flights.len() as i32;
        }
        if let Some(stays) = &self.accmo_attrs {
            replace_namespace(&mut record.attrs, ACCMO_ATTR_PREFIX, stays);
            record.total_accommodations = stays.len() as i32;
        }
        if let Some(shared) = &self.shared_email {
            record.shared_email = shared.clone();
        }
        if let Some(paid) = self.paid_plan {
            record.paid_plan = paid;
        }
        record.last_updated = self.last_updated;
    }
}

fn replace_namespace(attrs: &mut BTreeMap<String, String>, prefix: &str, values: &[String]) {
    attrs.retain(|key, _| !is_indexed_key(key, prefix));
    for (i, value) in values.iter().enumerate() {
        attrs.insert(format!("{prefix}{}", i + 1), value.clone());
    }
}

fn is_indexed_key(key: &str, prefix: &str) -> bool {
    key.strip_prefix(prefix)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Projection returned by the shared scan: just enough to match the
/// caller against the sharing list and re-fetch the canonical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedCandidate {
    pub owner_id: String,
    pub plan_id: i64,
    pub shared_email: String,
}

/// Errors from the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a plan already exists under this key")]
    Duplicate,

    #[error("plan not found")]
    NotFound,

    #[error("version conflict: the plan changed since it was read")]
    VersionConflict,

    #[error("backend error: {0:#}")]
    Backend(anyhow::Error),
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        Self::Backend(err)
    }
}

/// The key-value document store the engine runs against.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Direct lookup by full key.
    async fn get(&self, owner_id: &str, plan_id: i64) -> Result<Option<PlanRecord>, StoreError>;

    /// Create a new record; fails with [`StoreError::Duplicate`] when the
    /// key is already taken.
    async fn put(&self, record: PlanRecord) -> Result<(), StoreError>;

    /// The owner's most recently updated plan, via the recency index.
    async fn query_newest(&self, owner_id: &str) -> Result<Option<PlanRecord>, StoreError>;

    /// Collection-wide scan for records with this `plan_id` and a
    /// non-empty sharing list.
    async fn scan_shared(&self, plan_id: i64) -> Result<Vec<SharedCandidate>, StoreError>;

    /// Conditional attribute-level patch. Fails with
    /// [`StoreError::VersionConflict`] when `expected_version` is stale and
    /// [`StoreError::NotFound`] when the key is absent. Returns the
    /// updated record.
    async fn update(
        &self,
        owner_id: &str,
        plan_id: i64,
        expected_version: i64,
        patch: PlanPatch,
    ) -> Result<PlanRecord, StoreError>;
}
