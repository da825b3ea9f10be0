//! Plan service facade: create, update, and load, shared by every entry
//! point. Handlers adapt wire shapes to these requests and map
//! [`EngineError`] to status codes; no business rule lives outside this
//! crate.

use chrono::Utc;
use rand::Rng;
use tracing::{info, warn};

use crate::access::resolve_access;
use crate::error::EngineError;
use crate::identity::Identity;
use crate::itinerary::{DayMap, DayPlan};
use crate::normalize::normalize_plan;
use crate::reconstruct::{ReconstructedPlan, reconstruct_plan};
use crate::store::{ACCMO_ATTR_PREFIX, FLIGHT_ATTR_PREFIX, PlanRecord, PlanStore, StoreError};
use crate::update::{UpdateFields, UpdateMode, build_patch};

/// Tunables shared by the service operations.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Per-record serialized size ceiling, in bytes.
    pub size_limit: usize,
    /// Accept creates without title/data by synthesizing an empty plan.
    /// Off by default; meant for local development.
    pub permissive_default_data: bool,
    /// Attempts at allocating an unused plan id before giving up.
    pub id_attempts: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            size_limit: 400 * 1024,
            permissive_default_data: false,
            id_attempts: 16,
        }
    }
}

/// A create request, after wire-shape adaptation (the legacy `name` /
/// `plans` aliases are resolved by the caller).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreatePlanRequest {
    pub title: Option<String>,
    pub data: Option<DayMap>,
    pub flight_infos: Option<Vec<serde_json::Value>>,
    pub accommodation_infos: Option<Vec<serde_json::Value>>,
    pub shared_email: Option<String>,
    pub paid_plan: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePlanRequest {
    pub plan_id: i64,
    pub mode: UpdateMode,
    pub fields: UpdateFields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPlanRequest {
    ById(i64),
    /// The caller's most recently updated plan.
    Newest,
}

/// Create a new plan for the caller. Returns the allocated plan id.
pub async fn create_plan(
    store: &dyn PlanStore,
    identity: Option<&Identity>,
    config: &ServiceConfig,
    request: CreatePlanRequest,
) -> Result<i64, EngineError> {
    let identity = identity.ok_or(EngineError::MissingIdentity)?;

    let (title, data) = match (request.title, request.data) {
        (Some(title), Some(data)) => (title, data),
        _ if config.permissive_default_data => {
            warn!("create without title/data, synthesizing empty plan");
            let mut data = DayMap::new();
            data.insert(
                1,
                DayPlan {
                    title: "1일차".to_owned(),
                    ..DayPlan::default()
                },
            );
            ("기본 여행 계획".to_owned(), data)
        }
        _ => {
            return Err(EngineError::Validation(
                "title and data are required".to_owned(),
            ));
        }
    };

    let normalized = normalize_plan(&data, request.flight_infos, request.accommodation_infos);
    let now = Utc::now();

    let mut record = PlanRecord {
        owner_id: identity.as_str().to_owned(),
        plan_id: 0,
        name: title,
        itinerary_schedules: Some(serialize_schedules(&normalized.schedules)?),
        plan_text: None,
        attrs: Default::default(),
        total_flights: normalized.flights.len() as i32,
        total_accommodations: normalized.accommodations.len() as i32,
        paid_plan: request.paid_plan,
        shared_email: request.shared_email.filter(|s| !s.trim().is_empty()),
        start_date: None,
        version: 1,
        last_updated: now,
    };
    for (i, offer) in normalized.flights.iter().enumerate() {
        record
            .attrs
            .insert(format!("{FLIGHT_ATTR_PREFIX}{}", i + 1), serialize(offer)?);
    }
    for (i, stay) in normalized.accommodations.iter().enumerate() {
        record
            .attrs
            .insert(format!("{ACCMO_ATTR_PREFIX}{}", i + 1), serialize(stay)?);
    }

    let size = record.serialized_size();
    if size > config.size_limit {
        return Err(EngineError::SizeExceeded {
            size,
            limit: config.size_limit,
        });
    }

    // Time-based ids collide under load; retry with a fresh id until the
    // conditional put succeeds.
    for attempt in 0..config.id_attempts {
        record.plan_id = generate_plan_id();
        match store.put(record.clone()).await {
            Ok(()) => {
                info!(plan_id = record.plan_id, owner = %identity, "plan created");
                return Ok(record.plan_id);
            }
            Err(StoreError::Duplicate) => {
                warn!(plan_id = record.plan_id, attempt, "plan id collision, retrying");
            }
            Err(err) => return Err(EngineError::from_store(err)),
        }
    }
    Err(EngineError::from_store(StoreError::Duplicate))
}

/// Update an existing plan the caller may act on.
pub async fn update_plan(
    store: &dyn PlanStore,
    identity: Option<&Identity>,
    config: &ServiceConfig,
    request: UpdatePlanRequest,
) -> Result<PlanRecord, EngineError> {
    let identity = identity.ok_or(EngineError::MissingIdentity)?;
    let ctx = resolve_access(store, identity, request.plan_id).await?;

    let patch = build_patch(
        request.mode,
        ctx.is_owner(),
        ctx.owner_id(),
        request.fields,
        Utc::now(),
    )?;

    // Size-check the would-be result before writing.
    let mut preview = ctx.record.clone();
    patch.apply(&mut preview);
    let size = preview.serialized_size();
    if size > config.size_limit {
        return Err(EngineError::SizeExceeded {
            size,
            limit: config.size_limit,
        });
    }

    let owner = ctx.owner_id().to_owned();
    let updated = store
        .update(&owner, request.plan_id, ctx.record.version, patch)
        .await
        .map_err(EngineError::from_store)?;
    info!(
        plan_id = request.plan_id,
        owner = %owner,
        mode = %request.mode,
        "plan updated"
    );
    Ok(updated)
}

/// Load a plan and rebuild its day-keyed view.
pub async fn load_plan(
    store: &dyn PlanStore,
    identity: Option<&Identity>,
    request: LoadPlanRequest,
) -> Result<ReconstructedPlan, EngineError> {
    let identity = identity.ok_or(EngineError::MissingIdentity)?;

    let record = match request {
        LoadPlanRequest::ById(plan_id) => resolve_access(store, identity, plan_id).await?.record,
        LoadPlanRequest::Newest => store
            .query_newest(identity.as_str())
            .await
            .map_err(EngineError::from_store)?
            .ok_or(EngineError::NotFound)?,
    };

    Ok(reconstruct_plan(&record))
}

/// An 8-digit id: milliseconds since epoch modulo 10^7, with one random
/// trailing digit.
fn generate_plan_id() -> i64 {
    let time_part = Utc::now().timestamp_millis() % 10_000_000;
    let random_digit = rand::rng().random_range(0..10);
    time_part * 10 + random_digit
}

fn serialize(value: &serde_json::Value) -> Result<String, EngineError> {
    serde_json::to_string(value)
        .map_err(|err| EngineError::Validation(format!("payload not serializable: {err}")))
}

fn serialize_schedules(schedules: &DayMap) -> Result<String, EngineError> {
    serde_json::to_string(schedules)
        .map_err(|err| EngineError::Validation(format!("schedules not serializable: {err}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::memory::MemoryPlanStore;

    fn identity(email: &str) -> Identity {
        Identity::new(email).unwrap()
    }

    fn day_map(value: serde_json::Value) -> DayMap {
        serde_json::from_value(value).unwrap()
    }

    fn create_request() -> CreatePlanRequest {
        CreatePlanRequest {
            title: Some("오사카 여행".to_owned()),
            data: Some(day_map(json!({
                "1": { "title": "1일차", "schedules": [
                    { "type": "Flight_Departure",
                      "flightOfferDetails": { "flightOfferData": {
                          "id": "F1",
                          "itineraries": [
                              { "segments": [ { "departure": { "at": "2025-05-10T09:30:00" } } ] }
                          ]
                      } } },
                    { "name": "도톤보리", "time": "19:00" }
                ] }
            }))),
            ..CreatePlanRequest::default()
        }
    }

    #[tokio::test]
    async fn create_then_load_roundtrip() {
        let store = MemoryPlanStore::new();
        let config = ServiceConfig::default();
        let me = identity("me@example.com");

        let plan_id = create_plan(&store, Some(&me), &config, create_request())
            .await
            .unwrap();
        assert!(plan_id > 0 && plan_id < 100_000_000);

        let loaded = load_plan(&store, Some(&me), LoadPlanRequest::ById(plan_id))
            .await
            .unwrap();
        assert_eq!(loaded.title, "오사카 여행");
        assert_eq!(loaded.flights.len(), 1);
        // The stored schedules kept only the generic item.
        let stored = store.get("me@example.com", plan_id).await.unwrap().unwrap();
        assert!(!stored.itinerary_schedules.unwrap().contains("Flight_Departure"));
    }

    #[tokio::test]
    async fn renormalizing_reconstructed_view_is_stable() {
        let store = MemoryPlanStore::new();
        let config = ServiceConfig::default();
        let me = identity("me@example.com");

        let request = CreatePlanRequest {
            title: Some("재정규화 여행".to_owned()),
            data: Some(day_map(json!({
                "1": { "title": "1일차", "date": "2025-05-10", "schedules": [
                    { "type": "Flight_Departure",
                      "flightOfferDetails": { "flightOfferData": {
                          "id": "F1",
                          "itineraries": [
                              { "segments": [ { "departure": { "at": "2025-05-10T09:30:00" } } ] }
                          ]
                      } } },
                    { "type": "accommodation", "time": "체크인",
                      "hotelDetails": {
                          "hotel": { "hotel_id": 42, "hotel_name": "난바 호텔" },
                          "checkIn": "2025-05-10",
                          "checkOut": "2025-05-12"
                      } },
                    { "name": "도톤보리", "time": "19:00" }
                ] }
            }))),
            ..CreatePlanRequest::default()
        };

        let plan_id = create_plan(&store, Some(&me), &config, request)
            .await
            .unwrap();
        let loaded = load_plan(&store, Some(&me), LoadPlanRequest::ById(plan_id))
            .await
            .unwrap();
        // The loaded day view has flight and stay items re-interleaved.
        assert!(loaded.day_plans[&1].schedules.len() > 1);

        // Feeding that view back through normalization yields the same
        // partition: identical offer ids and stay keys, schedules reduced
        // to the same generic items.
        let renormalized = normalize_plan(&loaded.day_plans, None, None);
        let ids: Vec<&str> = renormalized
            .flights
            .iter()
            .filter_map(|f| f["id"].as_str())
            .collect();
        assert_eq!(ids, vec!["F1"]);
        assert_eq!(renormalized.accommodations.len(), 1);
        assert_eq!(renormalized.accommodations[0]["hotel"]["hotel_id"], 42);
        assert_eq!(renormalized.accommodations[0]["checkIn"], "2025-05-10");
        assert_eq!(renormalized.schedules[&1].schedules.len(), 1);
        assert_eq!(renormalized.schedules[&1].schedules[0]["name"], "도톤보리");
    }

    #[tokio::test]
    async fn create_requires_identity() {
        let store = MemoryPlanStore::new();
        let err = create_plan(&store, None, &ServiceConfig::default(), create_request())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingIdentity));
    }

    #[tokio::test]
    async fn create_requires_title_and_data() {
        let store = MemoryPlanStore::new();
        let me = identity("me@example.com");
        let err = create_plan(
            &store,
            Some(&me),
            &ServiceConfig::default(),
            CreatePlanRequest::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn permissive_config_synthesizes_empty_plan() {
        let store = MemoryPlanStore::new();
        let config = ServiceConfig {
            permissive_default_data: true,
            ..ServiceConfig::default()
        };
        let me = identity("me@example.com");

        let plan_id = create_plan(&store, Some(&me), &config, CreatePlanRequest::default())
            .await
            .unwrap();
        let loaded = load_plan(&store, Some(&me), LoadPlanRequest::ById(plan_id))
            .await
            .unwrap();
        assert_eq!(loaded.title, "기본 여행 계획");
        assert_eq!(loaded.day_plans.len(), 1);
    }

    #[tokio::test]
    async fn oversized_plan_is_rejected_with_size() {
        let store = MemoryPlanStore::new();
        let config = ServiceConfig {
            size_limit: 256,
            ..ServiceConfig::default()
        };
        let me = identity("me@example.com");

        let err = create_plan(&store, Some(&me), &config, create_request())
            .await
            .unwrap_err();
        match err {
            EngineError::SizeExceeded { size, limit } => {
                assert!(size > limit);
                assert_eq!(limit, 256);
            }
            other => panic!("expected size exceeded, got {other:?}"),
        }
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn id_generation_gives_up_after_exhausting_attempts() {
        use crate::store::{PlanPatch, SharedCandidate};

        // Every key is taken, as far as this store is concerned.
        struct SaturatedStore;

        #[async_trait::async_trait]
        impl PlanStore for SaturatedStore {
            async fn get(&self, _: &str, _: i64) -> Result<Option<PlanRecord>, StoreError> {
                Ok(None)
            }
            async fn put(&self, _: PlanRecord) -> Result<(), StoreError> {
                Err(StoreError::Duplicate)
            }
            async fn query_newest(&self, _: &str) -> Result<Option<PlanRecord>, StoreError> {
                Ok(None)
            }
            async fn scan_shared(&self, _: i64) -> Result<Vec<SharedCandidate>, StoreError> {
                Ok(Vec::new())
            }
            async fn update(
                &self,
                _: &str,
                _: i64,
                _: i64,
                _: PlanPatch,
            ) -> Result<PlanRecord, StoreError> {
                Err(StoreError::NotFound)
            }
        }

        let config = ServiceConfig {
            id_attempts: 3,
            ..ServiceConfig::default()
        };
        let me = identity("me@example.com");
        let err = create_plan(&SaturatedStore, Some(&me), &config, create_request())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::Duplicate)));
    }

    #[tokio::test]
    async fn update_touches_only_named_attributes() {
        let store = MemoryPlanStore::new();
        let config = ServiceConfig::default();
        let me = identity("me@example.com");

        let mut request = create_request();
        request.shared_email = Some("friend@example.com".to_owned());
        let plan_id = create_plan(&store, Some(&me), &config, request)
            .await
            .unwrap();

        let updated = update_plan(
            &store,
            Some(&me),
            &config,
            UpdatePlanRequest {
                plan_id,
                mode: UpdateMode::PaidPlan,
                fields: UpdateFields {
                    paid_plan: Some(2),
                    ..UpdateFields::default()
                },
            },
        )
        .await
        .unwrap();

        assert_eq!(updated.paid_plan, 2);
        assert_eq!(updated.shared_email.as_deref(), Some("friend@example.com"));
        assert_eq!(updated.name, "오사카 여행");
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn shared_caller_updates_owner_record() {
        let store = MemoryPlanStore::new();
        let config = ServiceConfig::default();
        let owner = identity("owner@example.com");
        let friend = identity("friend@example.com");

        let mut request = create_request();
        request.shared_email = Some("friend@example.com".to_owned());
        let plan_id = create_plan(&store, Some(&owner), &config, request)
            .await
            .unwrap();

        let updated = update_plan(
            &store,
            Some(&friend),
            &config,
            UpdatePlanRequest {
                plan_id,
                mode: UpdateMode::PlanData,
                fields: UpdateFields {
                    title: Some("친구가 수정".to_owned()),
                    ..UpdateFields::default()
                },
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.owner_id, "owner@example.com");
        assert_eq!(updated.name, "친구가 수정");
        // The sharing list survives a collaborator's data update untouched.
        assert_eq!(updated.shared_email.as_deref(), Some("friend@example.com"));

        // Sharing settings stay owner-only.
        let err = update_plan(
            &store,
            Some(&friend),
            &config,
            UpdatePlanRequest {
                plan_id,
                mode: UpdateMode::SharedEmail,
                fields: UpdateFields {
                    shared_email: Some("other@example.com".to_owned()),
                    ..UpdateFields::default()
                },
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn load_newest_picks_most_recent() {
        let store = MemoryPlanStore::new();
        let config = ServiceConfig::default();
        let me = identity("me@example.com");

        let first = create_plan(&store, Some(&me), &config, create_request())
            .await
            .unwrap();
        let mut second_request = create_request();
        second_request.title = Some("두번째 여행".to_owned());
        let second = create_plan(&store, Some(&me), &config, second_request)
            .await
            .unwrap();
        // Bump the second plan so it is strictly newer.
        update_plan(
            &store,
            Some(&me),
            &config,
            UpdatePlanRequest {
                plan_id: second,
                mode: UpdateMode::PaidPlan,
                fields: UpdateFields {
                    paid_plan: Some(1),
                    ..UpdateFields::default()
                },
            },
        )
        .await
        .unwrap();

        let loaded = load_plan(&store, Some(&me), LoadPlanRequest::Newest)
            .await
            .unwrap();
        assert_eq!(loaded.plan_id, second);
        assert_ne!(loaded.plan_id, first);
    }

    #[tokio::test]
    async fn load_missing_plan_is_not_found() {
        let store = MemoryPlanStore::new();
        let me = identity("me@example.com");
        let err = load_plan(&store, Some(&me), LoadPlanRequest::ById(1234))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound));
        let err = load_plan(&store, Some(&me), LoadPlanRequest::Newest)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound));
    }
}
