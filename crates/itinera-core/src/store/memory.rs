//! In-memory [`PlanStore`] used by engine and handler tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{PlanPatch, PlanRecord, PlanStore, SharedCandidate, StoreError};

/// A `BTreeMap`-backed store. Scan order is key order, which makes the
/// shared-scan tie-break deterministic in tests.
#[derive(Debug, Default)]
pub struct MemoryPlanStore {
    records: Mutex<BTreeMap<(String, i64), PlanRecord>>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, bypassing create-time checks.
    pub async fn insert(&self, record: PlanRecord) {
        let key = (record.owner_id.clone(), record.plan_id);
        self.records.lock().await.insert(key, record);
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    async fn get(&self, owner_id: &str, plan_id: i64) -> Result<Option<PlanRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.get(&(owner_id.to_owned(), plan_id)).cloned())
    }

    async fn put(&self, record: PlanRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let key = (record.owner_id.clone(), record.plan_id);
        if records.contains_key(&key) {
            return Err(StoreError::Duplicate);
        }
        records.insert(key, record);
        Ok(())
    }

    async fn query_newest(&self, owner_id: &str) -> Result<Option<PlanRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| r.owner_id == owner_id)
            .max_by_key(|r| r.last_updated)
            .cloned())
    }

    async fn scan_shared(&self, plan_id: i64) -> Result<Vec<SharedCandidate>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| r.plan_id == plan_id)
            .filter_map(|r| {
                let shared = r.shared_email.as_deref().filter(|s| !s.is_empty())?;
                Some(SharedCandidate {
                    owner_id: r.owner_id.clone(),
                    plan_id: r.plan_id,
                    shared_email: shared.to_owned(),
                })
            })
            .collect())
    }

    async fn update(
        &self,
        owner_id: &str,
        plan_id: i64,
        expected_version: i64,
        patch: PlanPatch,
    ) -> Result<PlanRecord, StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&(owner_id.to_owned(), plan_id))
            .ok_or(StoreError::NotFound)?;
        if record.version != expected_version {
            return Err(StoreError::VersionConflict);
        }
        patch.apply(record);
        record.version = expected_version + 1;
        Ok(record.clone())
    }
}
