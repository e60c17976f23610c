use std::str::FromStr;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::enums::{CallbackPriority, CallbackStatus, FailureReason};
use crate::models::{Callback, ProviderId};

const CALLBACK_COLUMNS: &str = "id, encounter_id, msisdn_hash, priority, status, provider_id,
    outcome, notes, failure_reason, release_count, enqueue_seq, created_at, assigned_at,
    completed_at, updated_at";

pub fn insert_callback(conn: &Connection, cb: &Callback) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO callbacks
         (id, encounter_id, msisdn_hash, priority, status, provider_id, outcome, notes,
          failure_reason, release_count, enqueue_seq, created_at, assigned_at,
          completed_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            cb.id.to_string(),
            cb.encounter_id.to_string(),
            cb.msisdn_hash,
            cb.priority.as_str(),
            cb.status.as_str(),
            cb.provider_id.as_ref().map(|p| p.as_str()),
            cb.outcome,
            cb.notes,
            cb.failure_reason.map(|r| r.as_str()),
            cb.release_count,
            cb.enqueue_seq as i64,
            format_timestamp(&cb.created_at),
            cb.assigned_at.as_ref().map(format_timestamp),
            cb.completed_at.as_ref().map(format_timestamp),
            format_timestamp(&cb.updated_at),
        ],
    )?;
    Ok(())
}

/// Persist the lifecycle fields of a callback. Encounter link, contact hash,
/// priority and creation data are immutable.
pub fn update_callback(conn: &Connection, cb: &Callback) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE callbacks
         SET status = ?1, provider_id = ?2, outcome = ?3, notes = ?4, failure_reason = ?5,
             release_count = ?6, assigned_at = ?7, completed_at = ?8, updated_at = ?9
         WHERE id = ?10",
        params![
            cb.status.as_str(),
            cb.provider_id.as_ref().map(|p| p.as_str()),
            cb.outcome,
            cb.notes,
            cb.failure_reason.map(|r| r.as_str()),
            cb.release_count,
            cb.assigned_at.as_ref().map(format_timestamp),
            cb.completed_at.as_ref().map(format_timestamp),
            format_timestamp(&cb.updated_at),
            cb.id.to_string(),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "callback".into(),
            id: cb.id.to_string(),
        });
    }
    Ok(())
}

pub fn get_callback(conn: &Connection, id: &Uuid) -> Result<Option<Callback>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {CALLBACK_COLUMNS} FROM callbacks WHERE id = ?1"),
            params![id.to_string()],
            read_row,
        )
        .optional()?;
    row.map(callback_from_row).transpose()
}

/// Callbacks whose status is one of `statuses`, oldest first.
pub fn load_callbacks(
    conn: &Connection,
    statuses: &[CallbackStatus],
) -> Result<Vec<Callback>, DatabaseError> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = (1..=statuses.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {CALLBACK_COLUMNS} FROM callbacks
         WHERE status IN ({placeholders})
         ORDER BY enqueue_seq ASC"
    ))?;
    let rows = stmt.query_map(params_from_iter(statuses.iter().map(|s| s.as_str())), read_row)?;

    let mut callbacks = Vec::new();
    for row in rows {
        callbacks.push(callback_from_row(row?)?);
    }
    Ok(callbacks)
}

pub fn max_enqueue_seq(conn: &Connection) -> Result<u64, DatabaseError> {
    let max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(enqueue_seq), 0) FROM callbacks",
        [],
        |row| row.get(0),
    )?;
    u64::try_from(max).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

// ═══════════════════════════════════════════
// Internal row mapping
// ═══════════════════════════════════════════

struct CallbackRow {
    id: String,
    encounter_id: String,
    msisdn_hash: String,
    priority: String,
    status: String,
    provider_id: Option<String>,
    outcome: Option<String>,
    notes: Option<String>,
    failure_reason: Option<String>,
    release_count: u32,
    enqueue_seq: i64,
    created_at: String,
    assigned_at: Option<String>,
    completed_at: Option<String>,
    updated_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<CallbackRow> {
    Ok(CallbackRow {
        id: row.get(0)?,
        encounter_id: row.get(1)?,
        msisdn_hash: row.get(2)?,
        priority: row.get(3)?,
        status: row.get(4)?,
        provider_id: row.get(5)?,
        outcome: row.get(6)?,
        notes: row.get(7)?,
        failure_reason: row.get(8)?,
        release_count: row.get(9)?,
        enqueue_seq: row.get(10)?,
        created_at: row.get(11)?,
        assigned_at: row.get(12)?,
        completed_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn callback_from_row(row: CallbackRow) -> Result<Callback, DatabaseError> {
    Ok(Callback {
        id: parse_uuid(&row.id)?,
        encounter_id: parse_uuid(&row.encounter_id)?,
        msisdn_hash: row.msisdn_hash,
        priority: CallbackPriority::from_str(&row.priority)?,
        status: CallbackStatus::from_str(&row.status)?,
        provider_id: row.provider_id.map(ProviderId::new),
        outcome: row.outcome,
        notes: row.notes,
        failure_reason: row
            .failure_reason
            .as_deref()
            .map(FailureReason::from_str)
            .transpose()?,
        release_count: row.release_count,
        enqueue_seq: u64::try_from(row.enqueue_seq)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        created_at: parse_timestamp(&row.created_at)?,
        assigned_at: row.assigned_at.as_deref().map(parse_timestamp).transpose()?,
        completed_at: row.completed_at.as_deref().map(parse_timestamp).transpose()?,
        updated_at: parse_timestamp(&row.updated_at)?,
    })
}
