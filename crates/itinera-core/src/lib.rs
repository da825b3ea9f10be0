//! Core engine for travel plan reconciliation and access control.
//!
//! The pipeline, leaf-first:
//! - [`recovery`] turns raw model-generated text into a best-effort
//!   structured itinerary; it never fails outright.
//! - [`normalize`] splits a day-keyed itinerary into generic schedules plus
//!   deduplicated, sorted flight/accommodation attributes for storage.
//! - [`reconstruct`] is the read-side inverse: it rebuilds the day-keyed
//!   view from a stored record, re-interleaving flights and stays.
//! - [`access`] resolves the effective owner and permission tier for a
//!   caller, falling back to a shared-email scan.
//! - [`update`] builds the minimal attribute patch for a requested update
//!   mode and enforces tier-based field restrictions.
//! - [`service`] ties the above together behind create/update/load
//!   operations shared by every entry point.

pub mod access;
pub mod error;
pub mod identity;
pub mod itinerary;
pub mod normalize;
pub mod reconstruct;
pub mod recovery;
pub mod service;
pub mod store;
pub mod update;

pub use access::{AccessContext, AccessTier, resolve_access};
pub use error::EngineError;
pub use identity::Identity;
pub use itinerary::{DayMap, DayPlan, FlightKind, ScheduleItem, StayMarker};
pub use normalize::{NormalizedPlan, normalize_plan};
pub use reconstruct::{ReconstructedPlan, reconstruct_plan};
pub use recovery::{RecoveredPlan, parse_model_text};
pub use service::{
    CreatePlanRequest, LoadPlanRequest, ServiceConfig, UpdatePlanRequest, create_plan, load_plan,
    update_plan,
};
pub use store::{PlanPatch, PlanRecord, PlanStore, SharedCandidate, StoreError};
pub use update::{UpdateFields, UpdateMode, build_patch};
