//! HTTP surface: save, change, and load travel plans.
//!
//! Handlers adapt the legacy wire shapes (aliases like `name`/`plans` for
//! `title`/`data`, scalar `flightInfo` next to the `flightInfos` array) to
//! the engine's requests and map [`EngineError`] variants to status codes.
//! No business rule lives here.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::warn;

use itinera_core::{
    CreatePlanRequest, EngineError, Identity, LoadPlanRequest, PlanStore, ReconstructedPlan,
    ServiceConfig, UpdateFields, UpdateMode, UpdatePlanRequest, create_plan, load_plan,
    update_plan,
};
use itinera_core::identity::identity_from_bearer;
use itinera_core::itinerary::DayMap;

// ---------------------------------------------------------------------------
// State and errors
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PlanStore>,
    pub config: ServiceConfig,
}

pub struct AppError {
    status: StatusCode,
    body: Value,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: json!({ "success": false, "message": message.into() }),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        let (status, body) = match err {
            EngineError::MissingIdentity => (
                StatusCode::UNAUTHORIZED,
                json!({ "success": false, "message": message }),
            ),
            EngineError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                json!({ "success": false, "message": message }),
            ),
            EngineError::SizeExceeded { size, limit } => (
                StatusCode::BAD_REQUEST,
                json!({
                    "success": false,
                    "message": message,
                    "current_size": size,
                    "max_size": limit,
                }),
            ),
            EngineError::NotFound => (
                StatusCode::NOT_FOUND,
                json!({ "success": false, "message": message }),
            ),
            EngineError::PermissionDenied { ref owner } => (
                StatusCode::FORBIDDEN,
                json!({
                    "success": false,
                    "message": message,
                    "owner_email": owner,
                }),
            ),
            EngineError::Conflict => (
                StatusCode::CONFLICT,
                json!({ "success": false, "message": message }),
            ),
            EngineError::Store(_) => {
                warn!(%message, "store failure surfaced to client");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "success": false, "message": message }),
                )
            }
        };
        Self { status, body }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn bearer_identity(headers: &HeaderMap) -> Option<Identity> {
    let header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    identity_from_bearer(header)
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SaveRequest {
    title: Option<String>,
    data: Option<Value>,
    /// Legacy aliases for `title` / `data`.
    name: Option<String>,
    plans: Option<Value>,
    #[serde(rename = "flightInfos")]
    flight_infos: Option<Vec<Value>>,
    #[serde(rename = "flightInfo")]
    flight_info: Option<Value>,
    #[serde(rename = "accommodationInfos")]
    accommodation_infos: Option<Vec<Value>>,
    accmo_info: Option<Value>,
    shared_email: Option<String>,
    paid_plan: Option<i32>,
    /// Presence means the caller wanted the change API.
    plan_id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChangeRequest {
    plan_id: Option<Value>,
    update_type: Option<String>,
    title: Option<String>,
    data: Option<Value>,
    #[serde(rename = "flightInfos")]
    flight_infos: Option<Vec<Value>>,
    #[serde(rename = "accommodationInfos")]
    accommodation_infos: Option<Vec<Value>>,
    shared_email: Option<String>,
    paid_plan: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoadRequest {
    id: Option<Value>,
    #[serde(rename = "planId")]
    plan_id: Option<Value>,
    newest: Option<bool>,
}

/// Accepts both numeric and stringified plan ids.
fn parse_plan_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_day_map(value: Value) -> Result<DayMap, AppError> {
    serde_json::from_value(value)
        .map_err(|err| AppError::bad_request(format!("invalid plan data: {err}")))
}

/// Legacy precedence: the plural array wins when non-empty, then the
/// scalar field (wrapped), then nothing.
fn coalesce_payloads(plural: Option<Vec<Value>>, scalar: Option<Value>) -> Option<Vec<Value>> {
    match plural {
        Some(list) if !list.is_empty() => Some(list),
        _ => scalar.map(|value| match value {
            Value::Array(list) => list,
            single => vec![single],
        }),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn save_plan_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SaveRequest>,
) -> Result<Json<Value>, AppError> {
    if body.plan_id.as_ref().and_then(parse_plan_id).is_some() {
        return Err(AppError {
            status: StatusCode::BAD_REQUEST,
            body: json!({
                "success": false,
                "message": "이 API는 새로운 계획 저장만 지원합니다. 기존 계획 수정은 change API를 사용해주세요.",
                "redirect_api": "/api/travel/change",
            }),
        });
    }

    let identity = bearer_identity(&headers);
    let (title, data) = match (body.title, body.data) {
        (Some(title), Some(data)) => (Some(title), Some(data)),
        _ => (body.name, body.plans),
    };
    let request = CreatePlanRequest {
        title,
        data: data.map(parse_day_map).transpose()?,
        flight_infos: coalesce_payloads(body.flight_infos, body.flight_info),
        accommodation_infos: coalesce_payloads(body.accommodation_infos, body.accmo_info),
        shared_email: body.shared_email,
        paid_plan: body.paid_plan.unwrap_or(0),
    };

    let plan_id = create_plan(
        state.store.as_ref(),
        identity.as_ref(),
        &state.config,
        request,
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "새로운 여행 계획이 저장되었습니다.",
        "plan_id": plan_id,
    })))
}

async fn change_plan_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChangeRequest>,
) -> Result<Json<Value>, AppError> {
    let plan_id = body
        .plan_id
        .as_ref()
        .and_then(parse_plan_id)
        .ok_or_else(|| AppError::bad_request("plan_id is required"))?;

    let identity = bearer_identity(&headers);
    let request = UpdatePlanRequest {
        plan_id,
        mode: UpdateMode::parse(body.update_type.as_deref()),
        fields: UpdateFields {
            title: body.title,
            data: body.data.map(parse_day_map).transpose()?,
            flight_infos: body.flight_infos,
            accommodation_infos: body.accommodation_infos,
            shared_email: body.shared_email,
            paid_plan: body.paid_plan,
        },
    };

    let updated = update_plan(
        state.store.as_ref(),
        identity.as_ref(),
        &state.config,
        request,
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "여행 계획이 수정되었습니다.",
        "plan_id": updated.plan_id,
        "updated_item": {
            "name": updated.name,
            "paid_plan": updated.paid_plan,
            "shared_email": updated.shared_email,
            "total_flights": updated.total_flights,
            "total_accommodations": updated.total_accommodations,
            "version": updated.version,
            "last_updated": updated.last_updated,
        },
    })))
}

async fn load_plan_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<LoadRequest>>,
) -> Result<Json<Value>, AppError> {
    let Json(body) = body.unwrap_or_default();
    let identity = bearer_identity(&headers);

    let by_id = body
        .id
        .as_ref()
        .or(body.plan_id.as_ref())
        .and_then(parse_plan_id);
    let request = match by_id {
        Some(plan_id) => LoadPlanRequest::ById(plan_id),
        None if body.newest.unwrap_or(true) => LoadPlanRequest::Newest,
        None => return Err(AppError::bad_request("specify \"newest\": true or an id")),
    };

    let plan = load_plan(state.store.as_ref(), identity.as_ref(), request).await?;
    Ok(Json(load_response(plan)))
}

fn load_response(plan: ReconstructedPlan) -> Value {
    json!({
        "message": "여행 계획을 성공적으로 불러왔습니다.",
        "plan": [{
            "id": plan.plan_id,
            "title": plan.title,
            "start_date": plan.start_date,
            "itinerary_schedules": plan.day_plans,
            "fallback_text": plan.fallback_text,
        }],
        "flightInfo": plan.flights.first(),
        "flightInfos": plan.flights,
        "isRoundTrip": plan.is_round_trip,
        "accommodationInfo": plan.accommodations.first(),
        "accommodationInfos": plan.accommodations,
    })
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/travel/save", post(save_plan_handler))
        .route("/api/travel/change", put(change_plan_handler))
        .route("/api/travel/load", post(load_plan_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
