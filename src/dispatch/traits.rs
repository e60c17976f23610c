//! Persistence seams of the dispatch engine.
//!
//! The engine owns ordering and ownership rules; durability is delegated:
//! - EncounterStore: create/read/update patient cases (never delete)
//! - CallbackLedger: durable callback state, written in the same unit of
//!   work as the encounter it affects

use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::CallbackStatus;
use crate::models::{Callback, Encounter, EncounterFilter};

pub trait EncounterStore: Send + Sync {
    /// Persist a new encounter and, when follow-up is required, its first
    /// callback. Both land or neither does.
    fn create_encounter(
        &self,
        encounter: &Encounter,
        callback: Option<&Callback>,
    ) -> Result<(), DatabaseError>;

    fn get_encounter(&self, id: &Uuid) -> Result<Option<Encounter>, DatabaseError>;

    fn update_encounter(&self, encounter: &Encounter) -> Result<(), DatabaseError>;

    fn list_encounters(&self, filter: &EncounterFilter) -> Result<Vec<Encounter>, DatabaseError>;
}

pub trait CallbackLedger: Send + Sync {
    /// Persist a freshly enqueued callback for an existing encounter.
    fn insert_callback(&self, callback: &Callback) -> Result<(), DatabaseError>;

    /// Persist a callback transition together with the encounter status it
    /// implies, atomically.
    fn commit_transition(
        &self,
        callback: &Callback,
        encounter: Option<&Encounter>,
    ) -> Result<(), DatabaseError>;

    fn get_callback(&self, id: &Uuid) -> Result<Option<Callback>, DatabaseError>;

    /// Callbacks in any of `statuses`, oldest enqueue first.
    fn load_callbacks(&self, statuses: &[CallbackStatus]) -> Result<Vec<Callback>, DatabaseError>;

    /// Highest enqueue sequence ever issued, 0 when empty.
    fn max_enqueue_seq(&self) -> Result<u64, DatabaseError>;
}

/// Everything the dispatch service needs from its backing store.
pub trait DispatchStore: EncounterStore + CallbackLedger {}

impl<T: EncounterStore + CallbackLedger> DispatchStore for T {}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify traits are object-safe (can be used as `dyn Trait`)
    #[test]
    fn traits_are_object_safe() {
        fn _assert_encounters(_: &dyn EncounterStore) {}
        fn _assert_ledger(_: &dyn CallbackLedger) {}
        fn _assert_store(_: &dyn DispatchStore) {}
    }
}
