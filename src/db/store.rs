//! SQLite-backed implementation of the dispatch persistence traits.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use uuid::Uuid;

use super::repository;
use super::sqlite::{open_database, open_memory_database};
use super::DatabaseError;
use crate::dispatch::traits::{CallbackLedger, EncounterStore};
use crate::models::enums::CallbackStatus;
use crate::models::{Callback, Encounter, EncounterFilter};

/// One SQLite connection shared behind a mutex. rusqlite connections are
/// `Send` but not `Sync`; statements are short, so the mutex is only held
/// for the duration of a single statement or transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::from_connection(open_database(path)?))
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::from_connection(open_memory_database()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }
}

impl EncounterStore for SqliteStore {
    fn create_encounter(
        &self,
        encounter: &Encounter,
        callback: Option<&Callback>,
    ) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        repository::insert_encounter(&tx, encounter)?;
        if let Some(cb) = callback {
            repository::insert_callback(&tx, cb)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_encounter(&self, id: &Uuid) -> Result<Option<Encounter>, DatabaseError> {
        let conn = self.lock()?;
        repository::get_encounter(&conn, id)
    }

    fn update_encounter(&self, encounter: &Encounter) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        repository::update_encounter(&conn, encounter)
    }

    fn list_encounters(&self, filter: &EncounterFilter) -> Result<Vec<Encounter>, DatabaseError> {
        let conn = self.lock()?;
        repository::list_encounters(&conn, filter)
    }
}

impl CallbackLedger for SqliteStore {
    fn insert_callback(&self, callback: &Callback) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        repository::insert_callback(&conn, callback)
    }

    fn commit_transition(
        &self,
        callback: &Callback,
        encounter: Option<&Encounter>,
    ) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        repository::update_callback(&tx, callback)?;
        if let Some(enc) = encounter {
            repository::update_encounter(&tx, enc)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_callback(&self, id: &Uuid) -> Result<Option<Callback>, DatabaseError> {
        let conn = self.lock()?;
        repository::get_callback(&conn, id)
    }

    fn load_callbacks(&self, statuses: &[CallbackStatus]) -> Result<Vec<Callback>, DatabaseError> {
        let conn = self.lock()?;
        repository::load_callbacks(&conn, statuses)
    }

    fn max_enqueue_seq(&self) -> Result<u64, DatabaseError> {
        let conn = self.lock()?;
        repository::max_enqueue_seq(&conn)
    }
}
