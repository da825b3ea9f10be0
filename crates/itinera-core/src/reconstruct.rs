//! Read-side projection: rebuild the day-keyed itinerary view from a
//! stored record, re-interleaving flights and accommodations.
//!
//! Inverse of [`crate::normalize`]. Never mutates the record; everything
//! here works on copies. Legacy records that were saved before
//! normalization existed carry raw model text instead of a schedule map,
//! which goes through [`crate::recovery`] first.

use chrono::NaiveDate;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::itinerary::{
    CHECK_IN_TIME, CHECK_OUT_TIME, DayMap, DayPlan, FlightKind, accommodation_check_in,
    accommodation_check_out, accommodation_hotel_id, offer_departure_at, offer_itinerary_count,
    parse_stay_date,
};
use crate::recovery::{RecoveredPlan, parse_model_text};
use crate::store::PlanRecord;

/// The caller-facing view of one stored plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructedPlan {
    pub plan_id: i64,
    pub title: String,
    /// Stored start date, else the first recovered day's date.
    pub start_date: Option<NaiveDate>,
    /// Day-keyed schedules with flight and stay items re-inserted.
    pub day_plans: DayMap,
    /// The flat flight offer list, in index order.
    pub flights: Vec<Value>,
    /// The flat accommodation list, in index order.
    pub accommodations: Vec<Value>,
    /// First offer spans more than one itinerary.
    pub is_round_trip: bool,
    /// Raw model text, only when nothing structured could be recovered.
    pub fallback_text: Option<String>,
}

/// Rebuild the day-keyed view of a stored record.
pub fn reconstruct_plan(record: &PlanRecord) -> ReconstructedPlan {
    let mut fallback_text = None;
    let mut day_plans = match &record.itinerary_schedules {
        Some(raw) => match serde_json::from_str::<DayMap>(raw) {
            Ok(map) => map,
            Err(err) => {
                warn!(plan_id = record.plan_id, %err, "stored schedules unparseable");
                DayMap::new()
            }
        },
        None => match &record.plan_text {
            Some(text) => match parse_model_text(text) {
                RecoveredPlan::Structured(value) => days_to_map(value.get("days")),
                RecoveredPlan::Unstructured { text } => {
                    fallback_text = Some(text);
                    DayMap::new()
                }
            },
            None => DayMap::new(),
        },
    };

    let flights = record.flights();
    let accommodations = record.accommodations();

    let start_date = record
        .start_date
        .or_else(|| day_plans.values().find_map(DayPlan::date));

    if let Some(start) = start_date {
        for offer in &flights {
            insert_flight_items(&mut day_plans, offer, start);
        }
        for details in &accommodations {
            insert_stay_items(&mut day_plans, details, start);
        }
    } else if !flights.is_empty() || !accommodations.is_empty() {
        debug!(
            plan_id = record.plan_id,
            "no start date; flights and stays stay flat"
        );
    }

    for plan in day_plans.values_mut() {
        sort_day_schedules(&mut plan.schedules);
    }

    let is_round_trip = flights
        .first()
        .is_some_and(|offer| offer_itinerary_count(offer) > 1);

    ReconstructedPlan {
        plan_id: record.plan_id,
        title: record.name.clone(),
        start_date,
        day_plans,
        flights,
        accommodations,
        is_round_trip,
        fallback_text,
    }
}

/// Convert a recovered `days` value (array- or object-shaped) into the
/// day-keyed map. Array entries without a `day` number take their
/// sequential position.
fn days_to_map(days: Option<&Value>) -> DayMap {
    let mut map = DayMap::new();
    match days {
        Some(Value::Array(list)) => {
            for (idx, day) in list.iter().enumerate() {
                let number = day
                    .get("day")
                    .and_then(Value::as_u64)
                    .map(|n| n as u32)
                    .unwrap_or(idx as u32 + 1);
                map.insert(number, day_from_value(number, day));
            }
        }
        Some(Value::Object(obj)) => {
            for (key, day) in obj {
                let Ok(number) = key.parse::<u32>() else {
                    continue;
                };
                map.insert(number, day_from_value(number, day));
            }
        }
        _ => {}
    }
    map
}

fn day_from_value(number: u32, day: &Value) -> DayPlan {
    let title = day
        .get("title")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| format!("{number}일차"));
    let schedules = day
        .get("schedules")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut extra = Map::new();
    if let Some(date) = day.get("date") {
        extra.insert("date".to_owned(), date.clone());
    }
    DayPlan {
        title,
        schedules,
        extra,
    }
}

/// 1-based day number of `date` relative to `start`; `None` before day 1.
fn day_number(start: NaiveDate, date: NaiveDate) -> Option<u32> {
    let offset = (date - start).num_days();
    (offset >= 0).then(|| offset as u32 + 1)
}

fn day_bucket(day_plans: &mut DayMap, day: u32) -> &mut DayPlan {
    day_plans.entry(day).or_insert_with(|| DayPlan {
        title: format!("{day}일차"),
        ..DayPlan::default()
    })
}

/// Insert one synthesized item per offer itinerary on its departure day.
/// Legs without a parseable departure stay in the flat list only.
fn insert_flight_items(day_plans: &mut DayMap, offer: &Value, start: NaiveDate) {
    let legs = offer_itinerary_count(offer);
    for leg in 0..legs {
        let Some(departure) = offer_departure_at(offer, leg) else {
            continue;
        };
        let Some(day) = day_number(start, departure.date()) else {
            continue;
        };
        let kind = match (legs > 1, leg) {
            (false, _) => FlightKind::OneWay,
            (true, 0) => FlightKind::Outbound,
            (true, _) => FlightKind::Return,
        };
        let name = match kind {
            FlightKind::Outbound => "출국 항공편",
            FlightKind::Return => "귀국 항공편",
            FlightKind::OneWay => "편도 항공편",
        };
        day_bucket(day_plans, day).schedules.push(json!({
            "type": kind.tag(),
            "name": name,
            "time": departure.format("%H:%M").to_string(),
            "category": "항공편",
            "flightOfferDetails": { "flightOfferData": offer }
        }));
    }
}

/// Insert a check-in item on the check-in day and a check-out item on the
/// check-out day.
fn insert_stay_items(day_plans: &mut DayMap, details: &Value, start: NaiveDate) {
    let name = details
        .get("hotel")
        .and_then(|h| h.get("hotel_name"))
        .and_then(Value::as_str)
        .unwrap_or("숙소")
        .to_owned();

    let markers = [
        (accommodation_check_in(details), CHECK_IN_TIME),
        (accommodation_check_out(details), CHECK_OUT_TIME),
    ];
    for (raw_date, time) in markers {
        let Some(date) = raw_date.as_deref().and_then(parse_stay_date) else {
            continue;
        };
        let Some(day) = day_number(start, date) else {
            debug!(
                hotel = accommodation_hotel_id(details),
                "stay date precedes start date"
            );
            continue;
        };
        day_bucket(day_plans, day).schedules.push(json!({
            "type": "accommodation",
            "name": name,
            "time": time,
            "category": "숙소",
            "hotelDetails": details
        }));
    }
}

/// Sort one day's items: a check-in anchors first, a check-out anchors
/// last, everything else compares by its time-of-day string.
fn sort_day_schedules(schedules: &mut [Value]) {
    schedules.sort_by(|a, b| {
        let (rank_a, time_a) = sort_key(a);
        let (rank_b, time_b) = sort_key(b);
        rank_a.cmp(&rank_b).then_with(|| time_a.cmp(time_b))
    });
}

fn sort_key(item: &Value) -> (u8, &str) {
    let time = item.get("time").and_then(Value::as_str).unwrap_or("");
    let rank = match time {
        CHECK_IN_TIME => 0,
        CHECK_OUT_TIME => 2,
        _ => 1,
    };
    // Anchors ignore the time string so two anchors stay in insertion order.
    (rank, if rank == 1 { time } else { "" })
}
