use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::enums::{AgeGroup, Channel, EncounterStatus, RiskCode, Urgency};
use crate::models::{Encounter, EncounterFilter, ProviderId};

const ENCOUNTER_COLUMNS: &str = "id, patient_name, msisdn_hash, patient_age, age_group,
    patient_gender, chief_complaint, symptoms, duration, medical_history, status, urgency,
    channel, risk_code, consent_given, consent_version, assigned_provider_id, notes,
    created_at, updated_at";

/// Default page size for encounter listings.
const DEFAULT_LIST_LIMIT: u32 = 100;

pub fn insert_encounter(conn: &Connection, enc: &Encounter) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO encounters
         (id, patient_name, msisdn_hash, patient_age, age_group, patient_gender,
          chief_complaint, symptoms, duration, medical_history, status, urgency,
          channel, risk_code, consent_given, consent_version, assigned_provider_id,
          notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                 ?17, ?18, ?19, ?20)",
        params![
            enc.id.to_string(),
            enc.patient_name,
            enc.msisdn_hash,
            enc.patient_age,
            enc.age_group.map(|g| g.as_str()),
            enc.patient_gender,
            enc.chief_complaint,
            enc.symptoms,
            enc.duration,
            enc.medical_history,
            enc.status.as_str(),
            enc.urgency.as_str(),
            enc.channel.as_str(),
            enc.risk_code.map(|r| r.as_str()),
            enc.consent_given as i32,
            enc.consent_version,
            enc.assigned_provider_id.as_ref().map(|p| p.as_str()),
            enc.notes,
            format_timestamp(&enc.created_at),
            format_timestamp(&enc.updated_at),
        ],
    )?;
    Ok(())
}

/// Persist the mutable fields of an encounter. Identity, intake data and
/// `created_at` are immutable and never rewritten.
pub fn update_encounter(conn: &Connection, enc: &Encounter) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE encounters
         SET status = ?1, urgency = ?2, assigned_provider_id = ?3, notes = ?4, updated_at = ?5
         WHERE id = ?6",
        params![
            enc.status.as_str(),
            enc.urgency.as_str(),
            enc.assigned_provider_id.as_ref().map(|p| p.as_str()),
            enc.notes,
            format_timestamp(&enc.updated_at),
            enc.id.to_string(),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "encounter".into(),
            id: enc.id.to_string(),
        });
    }
    Ok(())
}

pub fn get_encounter(conn: &Connection, id: &Uuid) -> Result<Option<Encounter>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {ENCOUNTER_COLUMNS} FROM encounters WHERE id = ?1"),
            params![id.to_string()],
            read_row,
        )
        .optional()?;
    row.map(encounter_from_row).transpose()
}

pub fn list_encounters(
    conn: &Connection,
    filter: &EncounterFilter,
) -> Result<Vec<Encounter>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENCOUNTER_COLUMNS} FROM encounters
         WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR channel = ?2)
         ORDER BY created_at DESC
         LIMIT ?3 OFFSET ?4"
    ))?;

    let rows = stmt.query_map(
        params![
            filter.status.map(|s| s.as_str()),
            filter.channel.map(|c| c.as_str()),
            filter.limit.unwrap_or(DEFAULT_LIST_LIMIT),
            filter.skip.unwrap_or(0),
        ],
        read_row,
    )?;

    let mut encounters = Vec::new();
    for row in rows {
        encounters.push(encounter_from_row(row?)?);
    }
    Ok(encounters)
}

// ═══════════════════════════════════════════
// Internal row mapping
// ═══════════════════════════════════════════

struct EncounterRow {
    id: String,
    patient_name: Option<String>,
    msisdn_hash: Option<String>,
    patient_age: Option<u8>,
    age_group: Option<String>,
    patient_gender: Option<String>,
    chief_complaint: String,
    symptoms: Option<String>,
    duration: Option<String>,
    medical_history: Option<String>,
    status: String,
    urgency: String,
    channel: String,
    risk_code: Option<String>,
    consent_given: i32,
    consent_version: Option<String>,
    assigned_provider_id: Option<String>,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<EncounterRow> {
    Ok(EncounterRow {
        id: row.get(0)?,
        patient_name: row.get(1)?,
        msisdn_hash: row.get(2)?,
        patient_age: row.get(3)?,
        age_group: row.get(4)?,
        patient_gender: row.get(5)?,
        chief_complaint: row.get(6)?,
        symptoms: row.get(7)?,
        duration: row.get(8)?,
        medical_history: row.get(9)?,
        status: row.get(10)?,
        urgency: row.get(11)?,
        channel: row.get(12)?,
        risk_code: row.get(13)?,
        consent_given: row.get(14)?,
        consent_version: row.get(15)?,
        assigned_provider_id: row.get(16)?,
        notes: row.get(17)?,
        created_at: row.get(18)?,
        updated_at: row.get(19)?,
    })
}

fn encounter_from_row(row: EncounterRow) -> Result<Encounter, DatabaseError> {
    Ok(Encounter {
        id: parse_uuid(&row.id)?,
        patient_name: row.patient_name,
        msisdn_hash: row.msisdn_hash,
        patient_age: row.patient_age,
        age_group: row.age_group.as_deref().map(AgeGroup::from_str).transpose()?,
        patient_gender: row.patient_gender,
        chief_complaint: row.chief_complaint,
        symptoms: row.symptoms,
        duration: row.duration,
        medical_history: row.medical_history,
        status: EncounterStatus::from_str(&row.status)?,
        urgency: Urgency::from_str(&row.urgency)?,
        channel: Channel::from_str(&row.channel)?,
        risk_code: row.risk_code.as_deref().map(RiskCode::from_str).transpose()?,
        consent_given: row.consent_given != 0,
        consent_version: row.consent_version,
        assigned_provider_id: row.assigned_provider_id.map(ProviderId::new),
        notes: row.notes,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use chrono::Duration;
    use crate::models::now;

    fn make_encounter(channel: Channel) -> Encounter {
        let now = now();
        Encounter {
            id: Uuid::new_v4(),
            patient_name: Some("Ada".into()),
            msisdn_hash: Some("hash".into()),
            patient_age: Some(34),
            age_group: Some(AgeGroup::Age18To49),
            patient_gender: Some("female".into()),
            chief_complaint: "fever and headache".into(),
            symptoms: None,
            duration: Some("2 days".into()),
            medical_history: None,
            status: EncounterStatus::Pending,
            urgency: Urgency::High,
            channel,
            risk_code: Some(RiskCode::MalariaSuspect),
            consent_given: true,
            consent_version: Some("v0.1-EN-USSD".into()),
            assigned_provider_id: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn insert_and_get_round_trip() {
        let conn = open_memory_database().unwrap();
        let enc = make_encounter(Channel::Ussd);
        insert_encounter(&conn, &enc).unwrap();

        let loaded = get_encounter(&conn, &enc.id).unwrap().unwrap();
        assert_eq!(loaded, enc);
    }

    #[test]
    fn get_missing_returns_none() {
        let conn = open_memory_database().unwrap();
        assert!(get_encounter(&conn, &Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn update_persists_mutable_fields() {
        let conn = open_memory_database().unwrap();
        let mut enc = make_encounter(Channel::Web);
        insert_encounter(&conn, &enc).unwrap();

        enc.status = EncounterStatus::InProgress;
        enc.assigned_provider_id = Some(ProviderId::from("nurse-1"));
        enc.notes = Some("called twice".into());
        enc.touch(now() + Duration::seconds(1));
        update_encounter(&conn, &enc).unwrap();

        let loaded = get_encounter(&conn, &enc.id).unwrap().unwrap();
        assert_eq!(loaded.status, EncounterStatus::InProgress);
        assert_eq!(loaded.assigned_provider_id, Some(ProviderId::from("nurse-1")));
        assert_eq!(loaded.notes.as_deref(), Some("called twice"));
        assert!(loaded.updated_at > loaded.created_at);
    }

    #[test]
    fn update_missing_is_not_found() {
        let conn = open_memory_database().unwrap();
        let enc = make_encounter(Channel::Web);
        let err = update_encounter(&conn, &enc).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn list_filters_and_pages() {
        let conn = open_memory_database().unwrap();
        for channel in [Channel::Web, Channel::Ussd, Channel::Ussd] {
            insert_encounter(&conn, &make_encounter(channel)).unwrap();
        }

        let ussd = list_encounters(
            &conn,
            &EncounterFilter {
                channel: Some(Channel::Ussd),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(ussd.len(), 2);

        let page = list_encounters(
            &conn,
            &EncounterFilter {
                limit: Some(1),
                skip: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(page.len(), 1);
    }
}
