//! Dispatch API: the operations providers and intake gateways call.
//!
//! Composes the classifier, the encounter store, the callback queue and the
//! assignment coordinator. Every mutating operation returns the resulting
//! entity state.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::coordinator::AssignmentCoordinator;
use super::error::DispatchError;
use super::locks::EncounterLocks;
use super::queue::{parse_priority, CallbackQueue};
use super::traits::{DispatchStore, EncounterStore};
use crate::config::DispatchConfig;
use crate::db::SqliteStore;
use crate::models::enums::{CallbackPriority, EncounterStatus};
use crate::models::{
    normalize_msisdn, now, Callback, CallbackFilter, CallbackView, Completion, Encounter,
    EncounterFilter, EncounterUpdate, ProviderContext, ProviderId, SubmissionRequest,
    TriageSubmission,
};
use crate::privacy::{hash_msisdn, mask_msisdn};
use crate::triage::{classify, requires_callback, Assessment};

/// Result of intake: the created encounter, its callback when follow-up is
/// required, and the classification that drove both.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitResult {
    pub encounter: Encounter,
    pub callback: Option<Callback>,
    pub assessment: Assessment,
}

/// Patient- or provider-initiated callback request for an existing encounter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackRequest {
    /// Number to call back. Falls back to the one captured at intake.
    pub msisdn: Option<String>,
    /// Priority override. Defaults to the one derived from the encounter urgency.
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub in_progress: usize,
}

pub struct DispatchService {
    store: Arc<dyn DispatchStore>,
    queue: Arc<CallbackQueue>,
    coordinator: AssignmentCoordinator,
    encounter_locks: Arc<EncounterLocks>,
    hash_pepper: String,
    consent_version: String,
    assignment_timeout: Option<std::time::Duration>,
}

impl DispatchService {
    /// Open the SQLite store at the configured path and rebuild the queue.
    pub fn open(config: &DispatchConfig) -> Result<Self, DispatchError> {
        let store = SqliteStore::open(&config.db_path)?;
        tracing::info!(path = %config.db_path.display(), "Dispatch store opened");
        Self::new(Arc::new(store), config)
    }

    pub fn new(store: Arc<dyn DispatchStore>, config: &DispatchConfig) -> Result<Self, DispatchError> {
        let queue = Arc::new(CallbackQueue::hydrate(store.clone())?);
        let encounter_locks = Arc::new(EncounterLocks::new());
        let coordinator = AssignmentCoordinator::new(
            store.clone(),
            queue.clone(),
            encounter_locks.clone(),
            config.max_releases,
        );
        Ok(Self {
            store,
            queue,
            coordinator,
            encounter_locks,
            hash_pepper: config.hash_pepper.clone(),
            consent_version: config.consent_version.clone(),
            assignment_timeout: config.assignment_timeout,
        })
    }

    // ── Intake ──────────────────────────────────────────────────────────

    /// Validate, classify and persist a submission. When follow-up is
    /// required the encounter and its callback are stored together.
    pub fn submit_triage(&self, request: SubmissionRequest) -> Result<SubmitResult, DispatchError> {
        let submission = TriageSubmission::try_from(request).map_err(DispatchError::Validation)?;
        self.submit(submission)
    }

    pub fn submit(&self, submission: TriageSubmission) -> Result<SubmitResult, DispatchError> {
        let assessment = classify(&submission);
        let needs_callback = requires_callback(&submission, &assessment);
        let msisdn_hash = submission
            .msisdn
            .as_deref()
            .map(|m| hash_msisdn(m, &self.hash_pepper));
        if needs_callback && msisdn_hash.is_none() {
            return Err(DispatchError::Validation(
                "msisdn is required when a callback is needed".into(),
            ));
        }

        let ts = now();
        let consent_given = submission.consent.unwrap_or(false);
        let encounter = Encounter {
            id: Uuid::new_v4(),
            patient_name: submission.patient_name.clone(),
            msisdn_hash: msisdn_hash.clone(),
            patient_age: submission.patient_age,
            age_group: submission.effective_age_group(),
            patient_gender: submission.patient_gender.clone(),
            chief_complaint: submission.chief_complaint.clone(),
            symptoms: submission.symptoms.clone(),
            duration: submission.duration.clone(),
            medical_history: submission.medical_history.clone(),
            status: EncounterStatus::Pending,
            urgency: assessment.urgency,
            channel: submission.channel,
            risk_code: assessment.risk_code,
            consent_given,
            consent_version: consent_given.then(|| self.consent_version.clone()),
            assigned_provider_id: None,
            notes: None,
            created_at: ts,
            updated_at: ts,
        };

        let callback = match msisdn_hash.filter(|_| needs_callback) {
            Some(hash) => {
                let reservation = self.queue.reserve(encounter.id)?;
                let cb = self
                    .queue
                    .prepare(encounter.id, assessment.callback_priority(), &hash);
                self.store.create_encounter(&encounter, Some(&cb))?;
                reservation.commit(cb.clone())?;
                Some(cb)
            }
            None => {
                self.store.create_encounter(&encounter, None)?;
                None
            }
        };

        let masked = submission.msisdn.as_deref().map(mask_msisdn);
        tracing::info!(
            encounter_id = %encounter.id,
            channel = %encounter.channel,
            msisdn = masked.as_deref().unwrap_or("-"),
            urgency = %encounter.urgency,
            risk_code = ?encounter.risk_code,
            callback_id = ?callback.as_ref().map(|cb| cb.id),
            "Triage submitted"
        );
        Ok(SubmitResult {
            encounter,
            callback,
            assessment,
        })
    }

    /// Enqueue a callback for an encounter that exists already.
    pub fn request_callback(
        &self,
        encounter_id: &Uuid,
        request: CallbackRequest,
    ) -> Result<Callback, DispatchError> {
        let encounter = self.require_encounter(encounter_id)?;
        let priority = match request.priority.as_deref() {
            Some(raw) => parse_priority(raw)?,
            None => CallbackPriority::from_urgency(encounter.urgency),
        };
        let msisdn_hash = match request.msisdn.as_deref() {
            Some(raw) => {
                let msisdn = normalize_msisdn(raw).map_err(DispatchError::Validation)?;
                tracing::debug!(
                    encounter_id = %encounter.id,
                    msisdn = %mask_msisdn(&msisdn),
                    "Callback number supplied with request"
                );
                hash_msisdn(&msisdn, &self.hash_pepper)
            }
            None => encounter.msisdn_hash.ok_or_else(|| {
                DispatchError::Validation("no phone number on file for this encounter".into())
            })?,
        };
        self.queue.enqueue(encounter.id, priority, &msisdn_hash)
    }

    // ── Queue views ─────────────────────────────────────────────────────

    /// Callbacks in dispatch order, joined with their encounter context.
    pub fn list_callbacks(&self, filter: CallbackFilter) -> Result<Vec<CallbackView>, DispatchError> {
        let mut encounters = HashMap::new();
        self.queue
            .peek_ordered(filter.status)?
            .into_iter()
            .filter(|cb| filter.priority.map_or(true, |p| cb.priority == p))
            .map(|cb| self.view(cb, &mut encounters))
            .collect()
    }

    /// Head of the queue without claiming it.
    pub fn next_callback(&self) -> Result<Option<CallbackView>, DispatchError> {
        let mut encounters = HashMap::new();
        self.queue
            .dequeue_candidate()?
            .map(|cb| self.view(cb, &mut encounters))
            .transpose()
    }

    pub fn get_callback(&self, id: &Uuid) -> Result<CallbackView, DispatchError> {
        let cb = self.queue.get(id)?;
        self.view(cb, &mut HashMap::new())
    }

    pub fn stats(&self) -> Result<QueueStats, DispatchError> {
        let tally = self.queue.tally()?;
        Ok(QueueStats {
            queued: tally.queued,
            in_progress: tally.in_progress,
        })
    }

    // ── Provider actions ────────────────────────────────────────────────

    pub fn assign_callback(&self, id: &Uuid, ctx: &ProviderContext) -> Result<Callback, DispatchError> {
        self.coordinator.assign(id, &ctx.provider_id)
    }

    pub fn claim_next_callback(&self, ctx: &ProviderContext) -> Result<Option<Callback>, DispatchError> {
        self.coordinator.claim_next(&ctx.provider_id)
    }

    pub fn complete_callback(
        &self,
        id: &Uuid,
        ctx: &ProviderContext,
        completion: Completion,
    ) -> Result<Callback, DispatchError> {
        self.coordinator.complete(id, &ctx.provider_id, completion)
    }

    /// Administrative return of a held callback to the queue.
    pub fn release_callback(&self, id: &Uuid) -> Result<Callback, DispatchError> {
        self.coordinator.release(id)
    }

    /// Administrative release of everything a provider holds, e.g. when
    /// their shift ends or they drop off the network.
    pub fn release_provider(&self, provider: &ProviderId) -> Result<Vec<Callback>, DispatchError> {
        self.coordinator.release_provider(provider)
    }

    /// Release callbacks held past the assignment timeout. Returns how many
    /// were released; a disabled timeout releases nothing.
    pub fn release_expired(&self) -> Result<usize, DispatchError> {
        let Some(timeout) = self.assignment_timeout else {
            return Ok(0);
        };
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "Assignment timeout out of range; nothing expires"
            );
            return Ok(0);
        };
        let released = self.coordinator.release_expired(now(), timeout)?;
        Ok(released.len())
    }

    // ── Encounters ──────────────────────────────────────────────────────

    pub fn get_encounter(&self, id: &Uuid) -> Result<Encounter, DispatchError> {
        self.require_encounter(id)
    }

    pub fn list_encounters(&self, filter: &EncounterFilter) -> Result<Vec<Encounter>, DispatchError> {
        Ok(self.store.list_encounters(filter)?)
    }

    /// Provider edit of status, urgency or notes.
    pub fn update_encounter(
        &self,
        id: &Uuid,
        ctx: &ProviderContext,
        update: EncounterUpdate,
    ) -> Result<Encounter, DispatchError> {
        let _stripe = self.encounter_locks.lock(id)?;
        let mut enc = self.require_encounter(id)?;

        if let Some(status) = update.status.filter(|s| *s != enc.status) {
            // Callback transitions own the status while follow-up is open.
            if let Some(callback_id) = self.queue.active_for(id)? {
                let cb = self.queue.get(&callback_id)?;
                return Err(DispatchError::Validation(format!(
                    "Encounter has {} callback {callback_id}; complete or release it before changing status",
                    cb.status
                )));
            }
            if !enc.status.can_transition_to(status) {
                return Err(DispatchError::Validation(format!(
                    "Cannot move encounter from {} to {}",
                    enc.status, status
                )));
            }
            enc.status = status;
            match status {
                EncounterStatus::InProgress => {
                    enc.assigned_provider_id = Some(ctx.provider_id.clone())
                }
                EncounterStatus::Pending => enc.assigned_provider_id = None,
                EncounterStatus::Completed | EncounterStatus::Closed => {}
            }
        }
        if let Some(urgency) = update.urgency {
            enc.urgency = urgency;
        }
        if let Some(notes) = update.notes {
            enc.notes = Some(notes);
        }
        enc.touch(now());
        self.store.update_encounter(&enc)?;

        tracing::info!(
            encounter_id = %enc.id,
            provider_id = %ctx.provider_id,
            status = %enc.status,
            "Encounter updated"
        );
        Ok(enc)
    }

    fn require_encounter(&self, id: &Uuid) -> Result<Encounter, DispatchError> {
        self.store
            .get_encounter(id)?
            .ok_or(DispatchError::UnknownEncounter(*id))
    }

    fn view(
        &self,
        callback: Callback,
        cache: &mut HashMap<Uuid, Encounter>,
    ) -> Result<CallbackView, DispatchError> {
        if !cache.contains_key(&callback.encounter_id) {
            let enc = self.require_encounter(&callback.encounter_id)?;
            cache.insert(enc.id, enc);
        }
        let enc = cache
            .get(&callback.encounter_id)
            .ok_or(DispatchError::UnknownEncounter(callback.encounter_id))?;
        Ok(CallbackView {
            urgency: enc.urgency,
            risk_code: enc.risk_code,
            age_group: enc.age_group,
            patient_gender: enc.patient_gender.clone(),
            channel: enc.channel,
            chief_complaint: enc.chief_complaint.clone(),
            callback,
        })
    }
}
