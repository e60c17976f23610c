use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{
    AgeGroup, CallbackPriority, CallbackStatus, Channel, CompletionKind, FailureReason, RiskCode,
    Urgency,
};
use super::ProviderId;

/// One unit of live follow-up work for an encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Callback {
    pub id: Uuid,
    pub encounter_id: Uuid,
    pub msisdn_hash: String,
    pub priority: CallbackPriority,
    pub status: CallbackStatus,
    pub provider_id: Option<ProviderId>,
    pub outcome: Option<String>,
    pub notes: Option<String>,
    pub failure_reason: Option<FailureReason>,
    /// Times the callback went back to the queue after its holder disappeared.
    pub release_count: u32,
    /// FIFO tiebreaker for callbacks created within the same instant.
    pub enqueue_seq: u64,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Callback {
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.max(self.updated_at).max(self.created_at);
    }

    /// Check the field/status invariants. Returns the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.provider_id.is_some() != self.status.holds_provider() {
            return Err(format!(
                "provider_id {:?} inconsistent with status {}",
                self.provider_id, self.status
            ));
        }
        if self.assigned_at.is_some() != self.provider_id.is_some() {
            return Err("assigned_at must be set iff provider_id is set".into());
        }
        if self.completed_at.is_some() != self.status.is_terminal() {
            return Err(format!(
                "completed_at inconsistent with status {}",
                self.status
            ));
        }
        if self.failure_reason.is_some() != (self.status == CallbackStatus::Failed) {
            return Err("failure_reason must be set iff status is failed".into());
        }
        if self.updated_at < self.created_at {
            return Err("updated_at precedes created_at".into());
        }
        Ok(())
    }
}

/// Provider's report when finishing a callback.
#[derive(Debug, Clone, Deserialize)]
pub struct Completion {
    pub outcome: String,
    pub notes: Option<String>,
    #[serde(default = "default_completion_kind")]
    pub kind: CompletionKind,
}

fn default_completion_kind() -> CompletionKind {
    CompletionKind::Reached
}

impl Completion {
    pub fn reached(outcome: impl Into<String>) -> Self {
        Self {
            outcome: outcome.into(),
            notes: None,
            kind: CompletionKind::Reached,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CallbackFilter {
    pub status: Option<CallbackStatus>,
    pub priority: Option<CallbackPriority>,
}

/// A callback joined with the encounter context a provider needs to
/// triage the queue visually.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackView {
    #[serde(flatten)]
    pub callback: Callback,
    pub urgency: Urgency,
    pub risk_code: Option<RiskCode>,
    pub age_group: Option<AgeGroup>,
    pub patient_gender: Option<String>,
    pub channel: Channel,
    pub chief_complaint: String,
}
