use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{AgeGroup, Channel, EncounterStatus, RiskCode, Urgency};
use super::ProviderId;

/// A patient case. Created once at intake, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encounter {
    pub id: Uuid,
    pub patient_name: Option<String>,
    /// Peppered hash of the caller's phone number. The raw number is never stored.
    pub msisdn_hash: Option<String>,
    pub patient_age: Option<u8>,
    pub age_group: Option<AgeGroup>,
    pub patient_gender: Option<String>,
    pub chief_complaint: String,
    pub symptoms: Option<String>,
    pub duration: Option<String>,
    pub medical_history: Option<String>,
    pub status: EncounterStatus,
    pub urgency: Urgency,
    pub channel: Channel,
    pub risk_code: Option<RiskCode>,
    pub consent_given: bool,
    pub consent_version: Option<String>,
    pub assigned_provider_id: Option<ProviderId>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Encounter {
    /// Refresh `updated_at`, never moving it behind `created_at` or its
    /// previous value when the wall clock steps backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.max(self.updated_at).max(self.created_at);
    }

    /// Append a line to the free-text notes.
    pub fn append_note(&mut self, line: &str) {
        match &mut self.notes {
            Some(existing) if !existing.is_empty() => {
                existing.push('\n');
                existing.push_str(line);
            }
            _ => self.notes = Some(line.to_string()),
        }
    }
}

/// Provider-side edit of an encounter (status, urgency, notes).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EncounterUpdate {
    pub status: Option<EncounterStatus>,
    pub urgency: Option<Urgency>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EncounterFilter {
    pub status: Option<EncounterStatus>,
    pub channel: Option<Channel>,
    pub skip: Option<u32>,
    pub limit: Option<u32>,
}
