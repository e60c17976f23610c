//! Assignment Coordinator: the only writer of callback lifecycle state.
//!
//! Every transition runs under the callback's own lock: validate against the
//! current state, build the next state, persist callback and encounter in one
//! store transaction, then swap the in-memory copy. A failed persist leaves
//! memory untouched, so the queue never shows a state the store lacks.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::error::DispatchError;
use super::locks::EncounterLocks;
use super::queue::{lock, CallbackQueue};
use super::traits::{CallbackLedger, DispatchStore, EncounterStore};
use crate::models::enums::{CallbackStatus, EncounterStatus, FailureReason};
use crate::models::{now, Callback, Completion, Encounter, ProviderId};

/// Effect a callback transition has on its encounter.
#[derive(Debug, Clone)]
enum EncounterSync {
    Assigned(ProviderId),
    Completed { outcome: String },
    Requeued { note: Option<String> },
}

impl EncounterSync {
    fn target(&self) -> EncounterStatus {
        match self {
            EncounterSync::Assigned(_) => EncounterStatus::InProgress,
            EncounterSync::Completed { .. } => EncounterStatus::Completed,
            EncounterSync::Requeued { .. } => EncounterStatus::Pending,
        }
    }

    fn apply(self, enc: &mut Encounter) {
        match self {
            EncounterSync::Assigned(provider) => {
                enc.status = EncounterStatus::InProgress;
                enc.assigned_provider_id = Some(provider);
            }
            EncounterSync::Completed { outcome } => {
                enc.status = EncounterStatus::Completed;
                enc.append_note(&format!("Callback outcome: {outcome}"));
            }
            EncounterSync::Requeued { note } => {
                enc.status = EncounterStatus::Pending;
                enc.assigned_provider_id = None;
                if let Some(note) = note {
                    enc.append_note(&note);
                }
            }
        }
    }
}

pub struct AssignmentCoordinator {
    store: Arc<dyn DispatchStore>,
    queue: Arc<CallbackQueue>,
    encounter_locks: Arc<EncounterLocks>,
    max_releases: u32,
}

impl AssignmentCoordinator {
    pub fn new(
        store: Arc<dyn DispatchStore>,
        queue: Arc<CallbackQueue>,
        encounter_locks: Arc<EncounterLocks>,
        max_releases: u32,
    ) -> Self {
        Self {
            store,
            queue,
            encounter_locks,
            max_releases,
        }
    }

    /// Claim a queued callback for a provider. Exactly one of any number of
    /// concurrent claims on the same callback succeeds.
    pub fn assign(&self, id: &Uuid, provider: &ProviderId) -> Result<Callback, DispatchError> {
        let result = self.transition(id, "assign", |cb, ts| {
            match cb.status {
                CallbackStatus::Queued => {}
                CallbackStatus::InProgress => {
                    return Err(DispatchError::AlreadyAssigned {
                        callback_id: cb.id,
                        holder: cb.provider_id.clone().unwrap_or_else(|| ProviderId::new("")),
                    })
                }
                from => {
                    return Err(DispatchError::InvalidState {
                        callback_id: cb.id,
                        from,
                        action: "assign",
                    })
                }
            }
            let mut next = cb.clone();
            next.status = CallbackStatus::InProgress;
            next.provider_id = Some(provider.clone());
            next.assigned_at = Some(ts.max(cb.created_at));
            next.touch(ts);
            Ok((next, EncounterSync::Assigned(provider.clone())))
        });

        match &result {
            Ok(cb) => tracing::info!(
                callback_id = %cb.id,
                encounter_id = %cb.encounter_id,
                provider_id = %provider,
                "Callback assigned"
            ),
            Err(e) if e.is_conflict() => tracing::debug!(
                callback_id = %id,
                provider_id = %provider,
                error = %e,
                "Assign rejected"
            ),
            Err(_) => {}
        }
        result
    }

    /// Finish a callback held by `provider`.
    pub fn complete(
        &self,
        id: &Uuid,
        provider: &ProviderId,
        completion: Completion,
    ) -> Result<Callback, DispatchError> {
        let outcome = completion.outcome.trim().to_string();
        let result = self.transition(id, "complete", |cb, ts| {
            if cb.status != CallbackStatus::InProgress {
                return Err(DispatchError::InvalidState {
                    callback_id: cb.id,
                    from: cb.status,
                    action: "complete",
                });
            }
            let holder = cb.provider_id.clone().unwrap_or_else(|| ProviderId::new(""));
            if &holder != provider {
                return Err(DispatchError::NotOwner {
                    callback_id: cb.id,
                    holder,
                    caller: provider.clone(),
                });
            }
            if outcome.is_empty() {
                return Err(DispatchError::MissingOutcome);
            }

            let (status, failure_reason) = completion.kind.terminal_status();
            let mut next = cb.clone();
            next.status = status;
            next.failure_reason = failure_reason;
            next.outcome = Some(outcome.clone());
            next.notes = completion.notes.clone().filter(|n| !n.trim().is_empty());
            next.completed_at = Some(ts.max(cb.created_at));
            next.touch(ts);

            let sync = match failure_reason {
                None => EncounterSync::Completed {
                    outcome: outcome.clone(),
                },
                Some(reason) => EncounterSync::Requeued {
                    note: Some(format!("Callback failed ({reason}): {outcome}")),
                },
            };
            Ok((next, sync))
        });

        if let Ok(cb) = &result {
            tracing::info!(
                callback_id = %cb.id,
                encounter_id = %cb.encounter_id,
                provider_id = %provider,
                status = %cb.status,
                "Callback completed"
            );
        }
        result
    }

    /// Return an in-progress callback to the queue. After `max_releases`
    /// returns it is failed as abandoned instead.
    pub fn release(&self, id: &Uuid) -> Result<Callback, DispatchError> {
        let max_releases = self.max_releases;
        let result = self.transition(id, "release", |cb, ts| {
            if cb.status != CallbackStatus::InProgress {
                return Err(DispatchError::InvalidState {
                    callback_id: cb.id,
                    from: cb.status,
                    action: "release",
                });
            }
            let mut next = cb.clone();
            next.release_count = cb.release_count.saturating_add(1);
            let note = if next.release_count > max_releases {
                next.status = CallbackStatus::Failed;
                next.failure_reason = Some(FailureReason::Abandoned);
                next.completed_at = Some(ts.max(cb.created_at));
                Some(format!(
                    "Callback abandoned after {} releases",
                    next.release_count
                ))
            } else {
                next.status = CallbackStatus::Queued;
                next.provider_id = None;
                next.assigned_at = None;
                None
            };
            next.touch(ts);
            Ok((next, EncounterSync::Requeued { note }))
        });

        if let Ok(cb) = &result {
            tracing::warn!(
                callback_id = %cb.id,
                encounter_id = %cb.encounter_id,
                status = %cb.status,
                release_count = cb.release_count,
                "Callback released"
            );
        }
        result
    }

    /// Release everything a provider holds, e.g. when their session ends.
    pub fn release_provider(&self, provider: &ProviderId) -> Result<Vec<Callback>, DispatchError> {
        let held: Vec<Uuid> = self
            .queue
            .peek_ordered(Some(CallbackStatus::InProgress))?
            .into_iter()
            .filter(|cb| cb.provider_id.as_ref() == Some(provider))
            .map(|cb| cb.id)
            .collect();
        self.release_all(&held)
    }

    /// Release callbacks claimed longer than `timeout` ago. A deadline past
    /// the representable range never expires.
    pub fn release_expired(
        &self,
        at: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<Callback>, DispatchError> {
        let expired: Vec<Uuid> = self
            .queue
            .peek_ordered(Some(CallbackStatus::InProgress))?
            .into_iter()
            .filter(|cb| {
                cb.assigned_at
                    .and_then(|t| t.checked_add_signed(timeout))
                    .is_some_and(|deadline| deadline <= at)
            })
            .map(|cb| cb.id)
            .collect();
        self.release_all(&expired)
    }

    /// Claim the highest-priority queued callback. Candidates taken by a
    /// concurrent claimer are skipped.
    pub fn claim_next(&self, provider: &ProviderId) -> Result<Option<Callback>, DispatchError> {
        for candidate in self.queue.peek_ordered(Some(CallbackStatus::Queued))? {
            match self.assign(&candidate.id, provider) {
                Ok(cb) => return Ok(Some(cb)),
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    fn release_all(&self, ids: &[Uuid]) -> Result<Vec<Callback>, DispatchError> {
        let mut released = Vec::with_capacity(ids.len());
        for id in ids {
            match self.release(id) {
                Ok(cb) => released.push(cb),
                // Completed or released by someone else since the snapshot.
                Err(DispatchError::InvalidState { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(released)
    }

    fn transition<F>(
        &self,
        id: &Uuid,
        action: &'static str,
        plan: F,
    ) -> Result<Callback, DispatchError>
    where
        F: FnOnce(&Callback, DateTime<Utc>) -> Result<(Callback, EncounterSync), DispatchError>,
    {
        let slot = match self.queue.slot(id) {
            Ok(slot) => slot,
            Err(DispatchError::UnknownCallback(_)) => {
                // Retired or unknown. Finished work has no onward transition.
                let finished = self.queue.get(id)?;
                plan(&finished, now())?;
                return Err(DispatchError::InvalidState {
                    callback_id: finished.id,
                    from: finished.status,
                    action,
                });
            }
            Err(e) => return Err(e),
        };
        let mut current = lock(&slot)?;
        let (next, sync) = plan(&*current, now())?;
        debug_assert_eq!(next.check_invariants(), Ok(()));

        let _stripe = self.encounter_locks.lock(&next.encounter_id)?;
        let encounter = self.sync_encounter(&next.encounter_id, sync)?;
        self.store.commit_transition(&next, encounter.as_ref())?;

        *current = next.clone();
        if next.status.is_terminal() {
            self.queue.retire(&next)?;
        }
        Ok(next)
    }

    /// Load the encounter and apply the transition's effect, unless the
    /// encounter's own lifecycle forbids the move (closed, or completed by
    /// a provider edit).
    fn sync_encounter(
        &self,
        encounter_id: &Uuid,
        sync: EncounterSync,
    ) -> Result<Option<Encounter>, DispatchError> {
        let mut enc = self
            .store
            .get_encounter(encounter_id)?
            .ok_or(DispatchError::UnknownEncounter(*encounter_id))?;
        let target = sync.target();
        if enc.status != target && !enc.status.can_transition_to(target) {
            tracing::debug!(
                %encounter_id,
                from = %enc.status,
                to = %target,
                "Encounter status left unchanged by callback transition"
            );
            return Ok(None);
        }
        sync.apply(&mut enc);
        enc.touch(now());
        Ok(Some(enc))
    }
}
