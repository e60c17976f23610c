//! Repository layer: entity-scoped database operations.
//!
//! Free functions over a borrowed `Connection`, so callers decide the
//! transaction boundary.

mod callback;
mod encounter;

pub use callback::*;
pub use encounter::*;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DatabaseError;

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::ConstraintViolation(format!("bad timestamp {raw}: {e}")))
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
