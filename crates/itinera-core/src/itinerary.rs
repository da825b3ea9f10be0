//! Day-keyed itinerary model.
//!
//! Schedule items are classified into an explicit tagged union once, at
//! ingestion, instead of re-inferring "is this a flight?" from ad hoc field
//! presence downstream. Flight offers and hotel payloads stay as opaque
//! `serde_json::Value`s (the store persists them verbatim) with typed
//! accessors for the fields the engine needs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Time-of-day marker value for an accommodation check-in item.
pub const CHECK_IN_TIME: &str = "체크인";
/// Time-of-day marker value for an accommodation check-out item.
pub const CHECK_OUT_TIME: &str = "체크아웃";

/// Day number -> day plan. JSON object keys are the stringified 1-based day
/// numbers; `u32` keys keep iteration in numeric rather than lexicographic
/// order.
pub type DayMap = BTreeMap<u32, DayPlan>;

/// One day of an itinerary: a display title plus an ordered item list.
///
/// Unknown per-day fields (e.g. a `date`) are preserved through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayPlan {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub schedules: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DayPlan {
    /// The day's `date` field (`YYYY-MM-DD`), when present and parseable.
    pub fn date(&self) -> Option<NaiveDate> {
        let raw = self.extra.get("date")?.as_str()?;
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
    }
}

// ---------------------------------------------------------------------------
// Schedule item classification
// ---------------------------------------------------------------------------

/// Flight subtype carried in the item's `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightKind {
    Outbound,
    Return,
    OneWay,
}

impl FlightKind {
    /// The wire tag used in schedule items.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Outbound => "Flight_Departure",
            Self::Return => "Flight_Return",
            Self::OneWay => "Flight_OneWay",
        }
    }

    /// Parse a wire tag; `None` for anything that is not a flight tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Flight_Departure" => Some(Self::Outbound),
            "Flight_Return" => Some(Self::Return),
            "Flight_OneWay" => Some(Self::OneWay),
            _ => None,
        }
    }
}

impl fmt::Display for FlightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for FlightKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s).ok_or(())
    }
}

/// Check-in/check-out marker on an accommodation item, carried in its
/// `time` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StayMarker {
    CheckIn,
    CheckOut,
}

impl StayMarker {
    pub fn time_value(&self) -> &'static str {
        match self {
            Self::CheckIn => CHECK_IN_TIME,
            Self::CheckOut => CHECK_OUT_TIME,
        }
    }

    pub fn from_time(time: &str) -> Option<Self> {
        match time {
            CHECK_IN_TIME => Some(Self::CheckIn),
            CHECK_OUT_TIME => Some(Self::CheckOut),
            _ => None,
        }
    }
}

/// A flight schedule item: subtype tag plus the raw item object.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightItem {
    pub kind: FlightKind,
    pub value: Map<String, Value>,
}

impl FlightItem {
    /// The embedded flight offer payload, when present.
    pub fn offer(&self) -> Option<&Value> {
        self.value.get("flightOfferDetails")?.get("flightOfferData")
    }

    /// The offer's identity field, used for deduplication.
    pub fn offer_id(&self) -> Option<String> {
        offer_identity(self.offer()?)
    }
}

/// An accommodation schedule item: stay marker plus the raw item object.
#[derive(Debug, Clone, PartialEq)]
pub struct AccommodationItem {
    /// `None` when the item's `time` is neither marker value.
    pub marker: Option<StayMarker>,
    pub value: Map<String, Value>,
}

impl AccommodationItem {
    /// The embedded hotel/room payload, when present.
    pub fn details(&self) -> Option<&Value> {
        self.value.get("hotelDetails")
    }
}

/// A schedule item, classified once at ingestion.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleItem {
    Flight(FlightItem),
    Accommodation(AccommodationItem),
    /// Free-form activity; anything without a flight or accommodation tag.
    Generic(Value),
}

impl ScheduleItem {
    /// Classify a raw schedule item by its `type` tag.
    pub fn classify(value: Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::Generic(value);
        };
        let tag = obj.get("type").and_then(Value::as_str).unwrap_or_default();

        if let Some(kind) = FlightKind::from_tag(tag) {
            return Self::Flight(FlightItem {
                kind,
                value: obj.clone(),
            });
        }
        if tag == "accommodation" {
            let marker = obj
                .get("time")
                .and_then(Value::as_str)
                .and_then(StayMarker::from_time);
            return Self::Accommodation(AccommodationItem {
                marker,
                value: obj.clone(),
            });
        }
        Self::Generic(value)
    }
}

// ---------------------------------------------------------------------------
// Payload accessors
// ---------------------------------------------------------------------------

/// The identity field of a flight offer payload.
pub fn offer_identity(offer: &Value) -> Option<String> {
    match offer.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First-segment departure timestamp of the given itinerary of an offer.
///
/// Offer timestamps are local naive datetimes (`2025-05-10T09:30:00`),
/// occasionally with an offset suffix; both forms parse.
pub fn offer_departure_at(offer: &Value, itinerary: usize) -> Option<NaiveDateTime> {
    let at = offer
        .get("itineraries")?
        .get(itinerary)?
        .get("segments")?
        .get(0)?
        .get("departure")?
        .get("at")?
        .as_str()?;
    parse_offer_datetime(at)
}

/// Number of itineraries in an offer (1 = one-way, 2 = round trip).
pub fn offer_itinerary_count(offer: &Value) -> usize {
    offer
        .get("itineraries")
        .and_then(Value::as_array)
        .map(|a| a.len())
        .unwrap_or(0)
}

fn parse_offer_datetime(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt);
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_local())
        .ok()
}

/// Hotel identity of an accommodation payload.
pub fn accommodation_hotel_id(details: &Value) -> Option<String> {
    match details.get("hotel")?.get("hotel_id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Check-in date string of an accommodation payload (kept raw for identity
/// comparison; parse separately for bucketing).
pub fn accommodation_check_in(details: &Value) -> Option<String> {
    details
        .get("checkIn")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Check-out date string of an accommodation payload.
pub fn accommodation_check_out(details: &Value) -> Option<String> {
    details
        .get("checkOut")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Parse an accommodation date string (`YYYY-MM-DD`, possibly with a time
/// suffix).
pub fn parse_stay_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}
