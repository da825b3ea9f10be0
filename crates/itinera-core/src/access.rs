//! Access resolution: who may touch a plan, and under which record.
//!
//! Ownership is the fast path: the caller's own `(owner_id, plan_id)` key.
//! On a miss the resolver falls back to a collection scan for records with
//! the same plan id and a non-empty sharing list, matching the caller
//! against the comma-separated entries. A miss on both paths is a uniform
//! not-found; callers cannot distinguish "absent" from "not yours".

use tracing::{debug, info};

use crate::error::EngineError;
use crate::identity::Identity;
use crate::store::{PlanRecord, PlanStore};

/// Permission tier granted by resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessTier {
    Owner,
    /// Caller appears on the owner's sharing list.
    Shared,
}

/// A resolved record plus the caller's tier against it.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessContext {
    pub record: PlanRecord,
    pub tier: AccessTier,
}

impl AccessContext {
    pub fn is_owner(&self) -> bool {
        self.tier == AccessTier::Owner
    }

    /// The identity the record belongs to, regardless of tier.
    pub fn owner_id(&self) -> &str {
        &self.record.owner_id
    }
}

/// Resolve the record a caller may act on for `plan_id`.
pub async fn resolve_access(
    store: &dyn PlanStore,
    caller: &Identity,
    plan_id: i64,
) -> Result<AccessContext, EngineError> {
    if let Some(record) = store
        .get(caller.as_str(), plan_id)
        .await
        .map_err(EngineError::from_store)?
    {
        return Ok(AccessContext {
            record,
            tier: AccessTier::Owner,
        });
    }

    debug!(plan_id, "no owned record, scanning sharing lists");
    let candidates = store
        .scan_shared(plan_id)
        .await
        .map_err(EngineError::from_store)?;

    for candidate in candidates {
        // A record the caller owns is never reached via sharing.
        if candidate.owner_id == caller.as_str() {
            continue;
        }
        let listed = candidate
            .shared_email
            .split(',')
            .map(str::trim)
            .any(|entry| entry == caller.as_str());
        if !listed {
            continue;
        }

        // Re-fetch the canonical record; the scan projection is partial.
        let Some(record) = store
            .get(&candidate.owner_id, plan_id)
            .await
            .map_err(EngineError::from_store)?
        else {
            continue;
        };
        info!(
            plan_id,
            owner = %record.owner_id,
            "caller granted shared access"
        );
        return Ok(AccessContext {
            record,
            tier: AccessTier::Shared,
        });
    }

    Err(EngineError::NotFound)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::store::memory::MemoryPlanStore;

    fn record(owner: &str, plan_id: i64, shared: Option<&str>) -> PlanRecord {
        PlanRecord {
            owner_id: owner.into(),
            plan_id,
            name: "공유 테스트".into(),
            itinerary_schedules: None,
            plan_text: None,
            attrs: BTreeMap::new(),
            total_flights: 0,
            total_accommodations: 0,
            paid_plan: 0,
            shared_email: shared.map(str::to_owned),
            start_date: None,
            version: 1,
            last_updated: Utc::now(),
        }
    }

    fn identity(email: &str) -> Identity {
        Identity::new(email).unwrap()
    }

    #[tokio::test]
    async fn owner_resolves_directly() {
        let store = MemoryPlanStore::new();
        store.insert(record("me@example.com", 1, None)).await;

        let ctx = resolve_access(&store, &identity("me@example.com"), 1)
            .await
            .unwrap();
        assert!(ctx.is_owner());
        assert_eq!(ctx.owner_id(), "me@example.com");
    }

    #[tokio::test]
    async fn shared_caller_resolves_via_scan() {
        let store = MemoryPlanStore::new();
        store
            .insert(record(
                "owner@example.com",
                7,
                Some("a@example.com , friend@example.com"),
            ))
            .await;

        let ctx = resolve_access(&store, &identity("friend@example.com"), 7)
            .await
            .unwrap();
        assert_eq!(ctx.tier, AccessTier::Shared);
        assert_eq!(ctx.owner_id(), "owner@example.com");
    }

    #[tokio::test]
    async fn unlisted_caller_gets_not_found() {
        let store = MemoryPlanStore::new();
        store
            .insert(record("owner@example.com", 7, Some("friend@example.com")))
            .await;

        let err = resolve_access(&store, &identity("stranger@example.com"), 7)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound));
    }

    #[tokio::test]
    async fn partial_email_match_does_not_grant_access() {
        let store = MemoryPlanStore::new();
        store
            .insert(record("owner@example.com", 7, Some("friend@example.com")))
            .await;

        // Entry comparison is exact, not substring.
        let err = resolve_access(&store, &identity("friend@example.co"), 7)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound));
    }

    #[tokio::test]
    async fn first_matching_share_wins_in_scan_order() {
        let store = MemoryPlanStore::new();
        store
            .insert(record("alice@example.com", 7, Some("me@example.com")))
            .await;
        store
            .insert(record("bob@example.com", 7, Some("me@example.com")))
            .await;

        let ctx = resolve_access(&store, &identity("me@example.com"), 7)
            .await
            .unwrap();
        assert_eq!(ctx.owner_id(), "alice@example.com");
    }

    #[tokio::test]
    async fn missing_plan_is_not_found() {
        let store = MemoryPlanStore::new();
        let err = resolve_access(&store, &identity("me@example.com"), 99)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound));
    }
}
