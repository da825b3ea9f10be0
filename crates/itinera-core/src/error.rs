//! Engine error taxonomy.
//!
//! Recovery-ladder degradation is never an error: the text recovery parser
//! always produces a defined value. Everything here is terminal for the
//! current request; nothing is retried inside the engine.

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the reconciliation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No caller identity could be derived from the request credential.
    #[error("no caller identity: a bearer credential with an email claim is required")]
    MissingIdentity,

    /// Client-side input problem (missing required fields, bad plan id).
    #[error("{0}")]
    Validation(String),

    /// The serialized record would exceed the store's per-item ceiling.
    /// Checked before any write; no partial persistence occurs.
    #[error("serialized plan is {size} bytes, exceeding the {limit}-byte store limit")]
    SizeExceeded { size: usize, limit: usize },

    /// No direct or shared match for the requested plan. Surfaced uniformly
    /// so callers cannot distinguish "absent" from "forbidden".
    #[error("travel plan not found or not accessible")]
    NotFound,

    /// A shared collaborator attempted an owner-only mutation. Carries the
    /// true owner so the caller can request access.
    #[error("only the plan owner may change sharing settings (owner: {owner})")]
    PermissionDenied { owner: String },

    /// The record changed between read and conditional write.
    #[error("plan was modified concurrently; reload and retry")]
    Conflict,

    /// Backing store failure, surfaced with the underlying message.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Fold store-level outcomes into the engine taxonomy.
    ///
    /// `NotFound` and `VersionConflict` have engine-level meanings; other
    /// store errors pass through as [`EngineError::Store`].
    pub(crate) fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound,
            StoreError::VersionConflict => Self::Conflict,
            other => Self::Store(other),
        }
    }
}
