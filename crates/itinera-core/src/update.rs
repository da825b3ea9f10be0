//! Update dispatch: turn a requested update mode plus submitted fields
//! into the minimal attribute patch, enforcing tier restrictions.
//!
//! Modes touch disjoint attribute sets. `plan_data` and `full` run the
//! normalizer over submitted itinerary data so flights and stays land in
//! the indexed namespace instead of the persisted schedules. Sharing
//! settings are owner-only: `shared_email` mode fails for a shared
//! collaborator with the true owner named, while `full` mode skips the
//! field silently.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::error::EngineError;
use crate::itinerary::DayMap;
use crate::normalize::{normalize_plan, optimize_accommodation, sanitize_value};
use crate::store::PlanPatch;

/// Which attribute set an update touches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateMode {
    /// Everything submitted, opportunistically.
    #[default]
    Full,
    /// Name, schedules, and the indexed flight/stay namespaces.
    PlanData,
    /// The sharing list only.
    SharedEmail,
    /// The paid tier flag only.
    PaidPlan,
}

impl UpdateMode {
    /// Lenient parse used at the request boundary: an unknown or absent
    /// mode falls back to `Full`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None => Self::Full,
            Some("full") => Self::Full,
            Some("plan_data") => Self::PlanData,
            Some("shared_email") => Self::SharedEmail,
            Some("paid_plan") => Self::PaidPlan,
            Some(other) => {
                warn!(mode = other, "unknown update mode, treating as full");
                Self::Full
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::PlanData => "plan_data",
            Self::SharedEmail => "shared_email",
            Self::PaidPlan => "paid_plan",
        }
    }
}

impl std::fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields submitted with an update request. Absent fields stay untouched,
/// except where a mode defines a default (see [`build_patch`]).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateFields {
    pub title: Option<String>,
    pub data: Option<DayMap>,
    pub flight_infos: Option<Vec<Value>>,
    pub accommodation_infos: Option<Vec<Value>>,
    /// An empty string clears the sharing list.
    pub shared_email: Option<String>,
    pub paid_plan: Option<i32>,
}

/// Build the attribute patch for one update.
///
/// `is_owner` is the caller's resolved tier; `owner_id` names the record
/// owner for permission errors.
pub fn build_patch(
    mode: UpdateMode,
    is_owner: bool,
    owner_id: &str,
    fields: UpdateFields,
    now: DateTime<Utc>,
) -> Result<PlanPatch, EngineError> {
    let mut patch = PlanPatch::new(now);

    match mode {
        UpdateMode::PlanData => {
            apply_plan_data(&mut patch, &fields)?;
        }
        UpdateMode::SharedEmail => {
            if !is_owner {
                return Err(EngineError::PermissionDenied {
                    owner: owner_id.to_owned(),
                });
            }
            patch.shared_email = Some(normalize_shared(fields.shared_email));
        }
        UpdateMode::PaidPlan => {
            patch.paid_plan = Some(fields.paid_plan.unwrap_or(0));
        }
        UpdateMode::Full => {
            apply_plan_data(&mut patch, &fields)?;
            if let Some(shared) = fields.shared_email {
                if is_owner {
                    patch.shared_email = Some(normalize_shared(Some(shared)));
                } else {
                    warn!(owner = owner_id, "shared caller may not change sharing, skipped");
                }
            }
            if let Some(paid) = fields.paid_plan {
                patch.paid_plan = Some(paid);
            }
        }
    }

    Ok(patch)
}

/// Name, schedules, and indexed payload namespaces, from whatever the
/// request carried. Submitted day data goes through the normalizer; direct
/// payload lists without day data are stored as given, after optimization
/// and sanitization.
fn apply_plan_data(patch: &mut PlanPatch, fields: &UpdateFields) -> Result<(), EngineError> {
    patch.name = fields.title.clone();

    if let Some(data) = &fields.data {
        let normalized = normalize_plan(
            data,
            fields.flight_infos.clone(),
            fields.accommodation_infos.clone(),
        );
        let schedules = serde_json::to_string(&normalized.schedules).map_err(|err| {
            EngineError::Validation(format!("schedules not serializable: {err}"))
        })?;
        patch.itinerary_schedules = Some(schedules);
        patch.flight_attrs = Some(serialize_all(&normalized.flights)?);
        patch.accmo_attrs = Some(serialize_all(&normalized.accommodations)?);
    } else {
        if let Some(flights) = &fields.flight_infos {
            let cleaned: Vec<Value> = flights.iter().cloned().map(sanitize_value).collect();
            patch.flight_attrs = Some(serialize_all(&cleaned)?);
        }
        if let Some(stays) = &fields.accommodation_infos {
            let cleaned: Vec<Value> = stays
                .iter()
                .cloned()
                .map(|stay| sanitize_value(optimize_accommodation(stay)))
                .collect();
            patch.accmo_attrs = Some(serialize_all(&cleaned)?);
        }
    }
    Ok(())
}

fn normalize_shared(raw: Option<String>) -> Option<String> {
    raw.filter(|s| !s.trim().is_empty())
}

fn serialize(value: &Value) -> Result<String, EngineError> {
    serde_json::to_string(value)
        .map_err(|err| EngineError::Validation(format!("payload not serializable: {err}")))
}

fn serialize_all(values: &[Value]) -> Result<Vec<String>, EngineError> {
    values.iter().map(serialize).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn day_map(value: Value) -> DayMap {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn unknown_mode_falls_back_to_full() {
        assert_eq!(UpdateMode::parse(Some("plan_data")), UpdateMode::PlanData);
        assert_eq!(UpdateMode::parse(Some("whatever")), UpdateMode::Full);
        assert_eq!(UpdateMode::parse(None), UpdateMode::Full);
    }

    #[test]
    fn plan_data_normalizes_submitted_days() {
        let fields = UpdateFields {
            title: Some("수정된 여행".into()),
            data: Some(day_map(json!({
                "1": { "title": "1일차", "schedules": [
                    { "type": "Flight_OneWay",
                      "flightOfferDetails": { "flightOfferData": { "id": "F1" } } },
                    { "name": "시장 구경", "time": "11:00" }
                ] }
            }))),
            ..UpdateFields::default()
        };

        let patch =
            build_patch(UpdateMode::PlanData, true, "owner@example.com", fields, Utc::now())
                .unwrap();
        assert_eq!(patch.name.as_deref(), Some("수정된 여행"));
        assert_eq!(patch.flight_attrs.as_ref().unwrap().len(), 1);
        // The flight item left the persisted schedules.
        let schedules = patch.itinerary_schedules.unwrap();
        assert!(!schedules.contains("Flight_OneWay"));
        assert!(schedules.contains("시장 구경"));
        // Disjoint sets: plan_data never touches sharing or tier.
        assert_eq!(patch.shared_email, None);
        assert_eq!(patch.paid_plan, None);
    }

    #[test]
    fn direct_lists_without_day_data_are_stored_optimized() {
        let fields = UpdateFields {
            accommodation_infos: Some(vec![json!({
                "hotel": { "hotel_id": 1, "review_nr": 99 },
                "checkIn": "2025-05-10"
            })]),
            ..UpdateFields::default()
        };

        let patch =
            build_patch(UpdateMode::PlanData, true, "owner@example.com", fields, Utc::now())
                .unwrap();
        let attrs = patch.accmo_attrs.unwrap();
        assert_eq!(attrs.len(), 1);
        assert!(!attrs[0].contains("review_nr"));
        assert!(patch.itinerary_schedules.is_none());
    }

    #[test]
    fn shared_email_mode_rejects_shared_caller_naming_owner() {
        let fields = UpdateFields {
            shared_email: Some("new@example.com".into()),
            ..UpdateFields::default()
        };

        let err = build_patch(
            UpdateMode::SharedEmail,
            false,
            "owner@example.com",
            fields,
            Utc::now(),
        )
        .unwrap_err();
        match err {
            EngineError::PermissionDenied { owner } => assert_eq!(owner, "owner@example.com"),
            other => panic!("expected permission denied, got {other:?}"),
        }
    }

    #[test]
    fn shared_email_mode_clears_on_empty() {
        let fields = UpdateFields {
            shared_email: Some("  ".into()),
            ..UpdateFields::default()
        };
        let patch = build_patch(
            UpdateMode::SharedEmail,
            true,
            "owner@example.com",
            fields,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(patch.shared_email, Some(None));
    }

    #[test]
    fn full_mode_skips_sharing_for_shared_caller() {
        let fields = UpdateFields {
            title: Some("제목만".into()),
            shared_email: Some("sneaky@example.com".into()),
            paid_plan: Some(1),
            ..UpdateFields::default()
        };

        let patch =
            build_patch(UpdateMode::Full, false, "owner@example.com", fields, Utc::now()).unwrap();
        assert_eq!(patch.name.as_deref(), Some("제목만"));
        assert_eq!(patch.shared_email, None);
        assert_eq!(patch.paid_plan, Some(1));
    }

    #[test]
    fn paid_plan_mode_defaults_to_zero() {
        let patch = build_patch(
            UpdateMode::PaidPlan,
            true,
            "owner@example.com",
            UpdateFields::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(patch.paid_plan, Some(0));
        assert!(patch.name.is_none());
    }
}
