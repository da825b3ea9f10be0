//! Write-side normalization: split a day-keyed itinerary into generic
//! schedules plus deduplicated, sorted flight and accommodation payloads.
//!
//! Flights and stays are not persisted inline; they live in the indexed
//! attribute namespace and are re-interleaved into days at read time by
//! [`crate::reconstruct`]. Directly submitted payload lists take precedence
//! over extraction from the schedule items.

use serde_json::{Map, Value};
use tracing::debug;

use crate::itinerary::{
    DayMap, DayPlan, ScheduleItem, StayMarker, accommodation_check_in, accommodation_hotel_id,
    offer_departure_at, offer_identity, parse_stay_date,
};

/// Result of normalizing one itinerary for storage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedPlan {
    /// Day-keyed schedules with flight and accommodation items removed and
    /// embedded payloads stripped from the remaining items.
    pub schedules: DayMap,
    /// Deduplicated flight offers in departure order.
    pub flights: Vec<Value>,
    /// Deduplicated, optimized accommodation payloads in check-in order.
    pub accommodations: Vec<Value>,
}

/// Normalize a day-keyed itinerary.
///
/// When `direct_flights` / `direct_stays` are given they replace the lists
/// extracted from the schedule items; extraction still runs either way so
/// the persisted schedules are cleaned of flight and accommodation items.
pub fn normalize_plan(
    days: &DayMap,
    direct_flights: Option<Vec<Value>>,
    direct_stays: Option<Vec<Value>>,
) -> NormalizedPlan {
    let mut extracted_flights: Vec<Value> = Vec::new();
    let mut extracted_stays: Vec<Value> = Vec::new();
    let mut schedules = DayMap::new();

    for (&day, plan) in days {
        let mut kept = Vec::with_capacity(plan.schedules.len());
        for item in &plan.schedules {
            match ScheduleItem::classify(item.clone()) {
                ScheduleItem::Flight(flight) => {
                    if let Some(offer) = flight.offer() {
                        let id = offer_identity(offer);
                        let duplicate = extracted_flights
                            .iter()
                            .any(|existing| offer_identity(existing) == id);
                        if duplicate {
                            debug!(day, "skipping duplicate flight offer");
                        } else {
                            extracted_flights.push(offer.clone());
                        }
                    }
                }
                ScheduleItem::Accommodation(stay) => {
                    // Only check-in items carry the payload; check-out items
                    // (and untagged stays) are dropped outright and rebuilt
                    // at read time.
                    if stay.marker == Some(StayMarker::CheckIn) {
                        if let Some(details) = stay.details() {
                            let key = stay_identity(details);
                            let duplicate = extracted_stays
                                .iter()
                                .any(|existing| stay_identity(existing) == key);
                            if duplicate {
                                debug!(day, "skipping duplicate accommodation");
                            } else {
                                extracted_stays.push(details.clone());
                            }
                        }
                    }
                }
                ScheduleItem::Generic(value) => {
                    kept.push(sanitize_value(strip_embedded_payloads(value)));
                }
            }
        }
        schedules.insert(
            day,
            DayPlan {
                title: plan.title.clone(),
                schedules: kept,
                extra: plan.extra.clone(),
            },
        );
    }

    // Missing departure/check-in dates sort first, like an epoch default.
    extracted_flights.sort_by_key(|offer| offer_departure_at(offer, 0));
    extracted_stays.sort_by_key(|details| {
        accommodation_check_in(details).and_then(|raw| parse_stay_date(&raw))
    });

    let flights = direct_flights.unwrap_or(extracted_flights);
    let stays = direct_stays.unwrap_or(extracted_stays);

    NormalizedPlan {
        schedules,
        flights: flights.into_iter().map(sanitize_value).collect(),
        accommodations: stays
            .into_iter()
            .map(|stay| sanitize_value(optimize_accommodation(stay)))
            .collect(),
    }
}

/// Deduplication key for accommodation payloads. Two payloads with neither
/// a hotel id nor a check-in date still compare equal, matching the
/// write-side dedup behavior.
fn stay_identity(details: &Value) -> (Option<String>, Option<String>) {
    (
        accommodation_hotel_id(details),
        accommodation_check_in(details),
    )
}

fn strip_embedded_payloads(value: Value) -> Value {
    match value {
        Value::Object(mut obj) => {
            obj.remove("hotelDetails");
            obj.remove("flightOfferDetails");
            Value::Object(obj)
        }
        other => other,
    }
}

/// Recursively replace non-finite numbers with null. Parsed JSON cannot
/// carry them, but payloads assembled in process can.
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::Number(n) => {
            if n.as_f64().is_some_and(f64::is_finite) || n.is_i64() || n.is_u64() {
                Value::Number(n)
            } else {
                Value::Null
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::Object(obj) => Value::Object(
            obj.into_iter()
                .map(|(k, v)| (k, sanitize_value(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Shrink an accommodation payload before storage: drop non-essential
/// hotel fields, cap room photo and facility lists, truncate a long room
/// description, drop verbose pricing detail.
pub fn optimize_accommodation(mut details: Value) -> Value {
    if let Some(hotel) = details.get_mut("hotel").and_then(Value::as_object_mut) {
        hotel.remove("review_nr");
        hotel.remove("distance_to_center");
    }

    if let Some(room) = details.get_mut("room").and_then(Value::as_object_mut) {
        cap_array(room, "photos", 2);
        cap_array(room, "facilities", 5);

        if let Some(Value::String(description)) = room.get_mut("description") {
            if description.chars().count() > 200 {
                let truncated: String = description.chars().take(200).collect();
                *description = format!("{truncated}...");
            }
        }

        room.remove("priceBreakdown");
        room.remove("blockInfo");
        room.remove("highlights");
    }

    details
}

fn cap_array(obj: &mut Map<String, Value>, key: &str, limit: usize) {
    if let Some(Value::Array(items)) = obj.get_mut(key) {
        items.truncate(limit);
    }
}
