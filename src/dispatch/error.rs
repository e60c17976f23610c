//! Dispatch error taxonomy.
//!
//! Every rejected operation carries a distinguishable reason so the
//! provider-facing layer can explain why an action failed.

use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::CallbackStatus;
use crate::models::ProviderId;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Validation failed: {0}")]
    Validation(String),

    /// `existing` is `None` only when a concurrent enqueue had not settled.
    #[error("Encounter {encounter_id} already has an unresolved callback{}", callback_suffix(.existing))]
    DuplicateWork {
        encounter_id: Uuid,
        existing: Option<Uuid>,
    },

    #[error("Unknown encounter: {0}")]
    UnknownEncounter(Uuid),

    #[error("Unknown callback: {0}")]
    UnknownCallback(Uuid),

    #[error("Invalid priority: {0}")]
    InvalidPriority(String),

    #[error("Callback {callback_id} already claimed by {holder}")]
    AlreadyAssigned { callback_id: Uuid, holder: ProviderId },

    #[error("Callback {callback_id} is held by {holder}, not {caller}")]
    NotOwner {
        callback_id: Uuid,
        holder: ProviderId,
        caller: ProviderId,
    },

    #[error("Cannot {action} callback {callback_id} in state {from}")]
    InvalidState {
        callback_id: Uuid,
        from: CallbackStatus,
        action: &'static str,
    },

    #[error("Outcome is required to complete a callback")]
    MissingOutcome,

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),

    #[error("Dispatch state lock poisoned")]
    LockPoisoned,
}

fn callback_suffix(existing: &Option<Uuid>) -> String {
    existing.map(|id| format!(" {id}")).unwrap_or_default()
}

impl DispatchError {
    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Validation(_) => "VALIDATION_ERROR",
            DispatchError::DuplicateWork { .. } => "DUPLICATE_WORK",
            DispatchError::UnknownEncounter(_) => "UNKNOWN_ENCOUNTER",
            DispatchError::UnknownCallback(_) => "UNKNOWN_CALLBACK",
            DispatchError::InvalidPriority(_) => "INVALID_PRIORITY",
            DispatchError::AlreadyAssigned { .. } => "ALREADY_ASSIGNED",
            DispatchError::NotOwner { .. } => "NOT_OWNER",
            DispatchError::InvalidState { .. } => "INVALID_STATE",
            DispatchError::MissingOutcome => "MISSING_OUTCOME",
            DispatchError::Store(_) => "STORE_ERROR",
            DispatchError::LockPoisoned => "INTERNAL",
        }
    }

    /// Conflicts mean the caller's view is stale: refresh and re-decide.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DispatchError::AlreadyAssigned { .. }
                | DispatchError::NotOwner { .. }
                | DispatchError::InvalidState { .. }
                | DispatchError::DuplicateWork { .. }
        )
    }
}
