//! Callback Queue: priority-ordered pending follow-up work.
//!
//! Order is (priority desc, created_at asc, enqueue_seq asc). Priority and
//! creation time never change after enqueue, so an item's position in the
//! index is fixed for its whole life; only its status moves. Each callback
//! sits behind its own mutex.
//!
//! Only unresolved callbacks live in memory. A callback that reaches done or
//! failed is retired from the index, and reads of it go to the store.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::DispatchError;
use super::traits::{CallbackLedger, DispatchStore, EncounterStore};
use crate::models::enums::{CallbackPriority, CallbackStatus};
use crate::models::{now, Callback};

/// A callback behind its own lock. Transitions hold this for their whole
/// validate-persist-apply sequence.
pub(crate) type CallbackSlot = Arc<Mutex<Callback>>;

const UNRESOLVED: [CallbackStatus; 2] = [CallbackStatus::Queued, CallbackStatus::InProgress];
const RESOLVED: [CallbackStatus; 2] = [CallbackStatus::Done, CallbackStatus::Failed];

/// How long an enqueue waits for a concurrent one on the same encounter to
/// settle before reporting the duplicate without its id.
const RESERVATION_WAIT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<CallbackPriority>,
    created_at: DateTime<Utc>,
    seq: u64,
}

impl QueueKey {
    fn of(cb: &Callback) -> Self {
        Self {
            priority: Reverse(cb.priority),
            created_at: cb.created_at,
            seq: cb.enqueue_seq,
        }
    }
}

/// Unresolved-work registry entry for one encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveWork {
    /// An enqueue is persisting a callback for this encounter.
    Reserved,
    Callback(Uuid),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueTally {
    pub queued: usize,
    pub in_progress: usize,
}

pub struct CallbackQueue {
    store: Arc<dyn DispatchStore>,
    slots: RwLock<HashMap<Uuid, CallbackSlot>>,
    order: RwLock<BTreeMap<QueueKey, Uuid>>,
    active: Mutex<HashMap<Uuid, ActiveWork>>,
    /// Signalled whenever a `Reserved` entry is committed or dropped.
    settled: Condvar,
    next_seq: AtomicU64,
}

impl CallbackQueue {
    /// Rebuild the queue from the unresolved callbacks in the store.
    pub fn hydrate(store: Arc<dyn DispatchStore>) -> Result<Self, DispatchError> {
        let callbacks = store.load_callbacks(&UNRESOLVED)?;
        let next_seq = store.max_enqueue_seq()?.saturating_add(1);
        let queue = Self {
            store,
            slots: RwLock::new(HashMap::new()),
            order: RwLock::new(BTreeMap::new()),
            active: Mutex::new(HashMap::new()),
            settled: Condvar::new(),
            next_seq: AtomicU64::new(next_seq),
        };

        for cb in callbacks {
            queue.index(cb)?;
        }

        let tally = queue.tally()?;
        tracing::info!(
            queued = tally.queued,
            in_progress = tally.in_progress,
            next_seq,
            "Callback queue hydrated"
        );
        Ok(queue)
    }

    /// Enqueue follow-up work for an existing encounter.
    ///
    /// Rejected with `DuplicateWork` while the encounter still has a queued
    /// or in-progress callback, so a retried submission cannot dispatch twice.
    pub fn enqueue(
        &self,
        encounter_id: Uuid,
        priority: CallbackPriority,
        msisdn_hash: &str,
    ) -> Result<Callback, DispatchError> {
        if self.store.get_encounter(&encounter_id)?.is_none() {
            return Err(DispatchError::UnknownEncounter(encounter_id));
        }
        if msisdn_hash.trim().is_empty() {
            return Err(DispatchError::Validation(
                "a contact reference is required for a callback".into(),
            ));
        }

        let reservation = self.reserve(encounter_id)?;
        let callback = self.prepare(encounter_id, priority, msisdn_hash);
        if let Err(e) = self.store.insert_callback(&callback) {
            if !e.is_unique_violation() {
                return Err(e.into());
            }
            // Written by another process sharing the database file.
            tracing::warn!(%encounter_id, "Store already holds unresolved callback");
            drop(reservation);
            let existing = self
                .store
                .load_callbacks(&UNRESOLVED)?
                .into_iter()
                .find(|cb| cb.encounter_id == encounter_id)
                .map(|cb| cb.id);
            return Err(DispatchError::DuplicateWork {
                encounter_id,
                existing,
            });
        }
        reservation.commit(callback.clone())?;

        tracing::info!(
            callback_id = %callback.id,
            %encounter_id,
            priority = %callback.priority,
            "Callback enqueued"
        );
        Ok(callback)
    }

    /// Snapshot of callbacks in dispatch order, optionally restricted to one
    /// status. Done and failed callbacks are read from the store.
    pub fn peek_ordered(
        &self,
        status: Option<CallbackStatus>,
    ) -> Result<Vec<Callback>, DispatchError> {
        let live = self.live_ordered(status)?;
        let resolved: &[CallbackStatus] = match &status {
            Some(s) if s.is_unresolved() => return Ok(live),
            Some(s) => std::slice::from_ref(s),
            None => &RESOLVED,
        };

        // A callback retired between the two reads shows up in both; the
        // store copy is the newer one.
        let mut merged: HashMap<Uuid, Callback> =
            live.into_iter().map(|cb| (cb.id, cb)).collect();
        for cb in self.store.load_callbacks(resolved)? {
            merged.insert(cb.id, cb);
        }
        let mut out: Vec<Callback> = merged
            .into_values()
            .filter(|cb| status.map_or(true, |s| cb.status == s))
            .collect();
        out.sort_by_key(QueueKey::of);
        Ok(out)
    }

    /// Head of the queued ordering, without claiming it.
    pub fn dequeue_candidate(&self) -> Result<Option<Callback>, DispatchError> {
        for slot in self.ordered_slots()? {
            let cb = lock(&slot)?;
            if cb.status == CallbackStatus::Queued {
                return Ok(Some(cb.clone()));
            }
        }
        Ok(None)
    }

    pub fn get(&self, id: &Uuid) -> Result<Callback, DispatchError> {
        match self.slot(id) {
            Ok(slot) => Ok(lock(&slot)?.clone()),
            Err(DispatchError::UnknownCallback(_)) => self
                .store
                .get_callback(id)?
                .ok_or(DispatchError::UnknownCallback(*id)),
            Err(e) => Err(e),
        }
    }

    /// Unresolved callback for an encounter, if any.
    pub fn active_for(&self, encounter_id: &Uuid) -> Result<Option<Uuid>, DispatchError> {
        let active = lock(&self.active)?;
        Ok(match active.get(encounter_id) {
            Some(ActiveWork::Callback(id)) => Some(*id),
            _ => None,
        })
    }

    /// Number of unresolved callbacks.
    pub fn len(&self) -> usize {
        self.slots.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued and in-progress counts in one pass.
    pub fn tally(&self) -> Result<QueueTally, DispatchError> {
        let mut tally = QueueTally::default();
        for slot in self.ordered_slots()? {
            match lock(&slot)?.status {
                CallbackStatus::Queued => tally.queued += 1,
                CallbackStatus::InProgress => tally.in_progress += 1,
                CallbackStatus::Done | CallbackStatus::Failed => {}
            }
        }
        Ok(tally)
    }

    // ── Crate-internal plumbing for the coordinator and service ────────

    /// Lock cell of an unresolved callback.
    pub(crate) fn slot(&self, id: &Uuid) -> Result<CallbackSlot, DispatchError> {
        let slots = self.slots.read().map_err(|_| DispatchError::LockPoisoned)?;
        slots
            .get(id)
            .cloned()
            .ok_or(DispatchError::UnknownCallback(*id))
    }

    /// Claim the single unresolved-work slot for an encounter. The returned
    /// guard frees the slot on drop unless committed.
    ///
    /// A concurrent enqueue that is still persisting is waited on briefly so
    /// the duplicate can name the callback it created.
    pub(crate) fn reserve(&self, encounter_id: Uuid) -> Result<Reservation<'_>, DispatchError> {
        let deadline = Instant::now() + RESERVATION_WAIT;
        let mut active = lock(&self.active)?;
        loop {
            match active.get(&encounter_id) {
                Some(ActiveWork::Callback(existing)) => {
                    return Err(DispatchError::DuplicateWork {
                        encounter_id,
                        existing: Some(*existing),
                    })
                }
                Some(ActiveWork::Reserved) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(DispatchError::DuplicateWork {
                            encounter_id,
                            existing: None,
                        });
                    }
                    active = self
                        .settled
                        .wait_timeout(active, remaining)
                        .map_err(|_| DispatchError::LockPoisoned)?
                        .0;
                }
                None => {
                    active.insert(encounter_id, ActiveWork::Reserved);
                    break;
                }
            }
        }
        Ok(Reservation {
            queue: self,
            encounter_id,
            committed: false,
        })
    }

    /// Build a new queued callback with the next FIFO sequence number.
    pub(crate) fn prepare(
        &self,
        encounter_id: Uuid,
        priority: CallbackPriority,
        msisdn_hash: &str,
    ) -> Callback {
        let ts = now();
        Callback {
            id: Uuid::new_v4(),
            encounter_id,
            msisdn_hash: msisdn_hash.to_string(),
            priority,
            status: CallbackStatus::Queued,
            provider_id: None,
            outcome: None,
            notes: None,
            failure_reason: None,
            release_count: 0,
            enqueue_seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            created_at: ts,
            assigned_at: None,
            completed_at: None,
            updated_at: ts,
        }
    }

    /// Drop a callback that reached a terminal state: free its encounter for
    /// new work and take it out of the in-memory index. Call while holding
    /// the callback's lock, after its terminal state is persisted.
    pub(crate) fn retire(&self, cb: &Callback) -> Result<(), DispatchError> {
        {
            let mut active = lock(&self.active)?;
            if active.get(&cb.encounter_id) == Some(&ActiveWork::Callback(cb.id)) {
                active.remove(&cb.encounter_id);
            }
        }
        self.order
            .write()
            .map_err(|_| DispatchError::LockPoisoned)?
            .remove(&QueueKey::of(cb));
        self.slots
            .write()
            .map_err(|_| DispatchError::LockPoisoned)?
            .remove(&cb.id);
        Ok(())
    }

    fn index(&self, cb: Callback) -> Result<(), DispatchError> {
        if cb.status.is_terminal() {
            return Ok(());
        }
        let id = cb.id;
        let key = QueueKey::of(&cb);
        lock(&self.active)?.insert(cb.encounter_id, ActiveWork::Callback(id));
        self.slots
            .write()
            .map_err(|_| DispatchError::LockPoisoned)?
            .insert(id, Arc::new(Mutex::new(cb)));
        self.order
            .write()
            .map_err(|_| DispatchError::LockPoisoned)?
            .insert(key, id);
        Ok(())
    }

    fn live_ordered(&self, status: Option<CallbackStatus>) -> Result<Vec<Callback>, DispatchError> {
        let mut out = Vec::new();
        for slot in self.ordered_slots()? {
            let cb = lock(&slot)?;
            if status.map_or(true, |s| cb.status == s) {
                out.push(cb.clone());
            }
        }
        Ok(out)
    }

    fn ordered_slots(&self) -> Result<Vec<CallbackSlot>, DispatchError> {
        let order = self.order.read().map_err(|_| DispatchError::LockPoisoned)?;
        let slots = self.slots.read().map_err(|_| DispatchError::LockPoisoned)?;
        Ok(order
            .values()
            .filter_map(|id| slots.get(id).cloned())
            .collect())
    }
}

/// Exclusive right to create the unresolved callback for one encounter.
pub(crate) struct Reservation<'a> {
    queue: &'a CallbackQueue,
    encounter_id: Uuid,
    committed: bool,
}

impl Reservation<'_> {
    /// Make a persisted callback visible in the queue.
    pub(crate) fn commit(mut self, callback: Callback) -> Result<(), DispatchError> {
        let result = self.queue.index(callback);
        self.committed = result.is_ok();
        self.queue.settled.notify_all();
        result
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Ok(mut active) = self.queue.active.lock() {
            if active.get(&self.encounter_id) == Some(&ActiveWork::Reserved) {
                active.remove(&self.encounter_id);
            }
        }
        self.queue.settled.notify_all();
    }
}

/// Parse a priority from the string boundary.
pub fn parse_priority(raw: &str) -> Result<CallbackPriority, DispatchError> {
    CallbackPriority::from_str(raw.trim())
        .map_err(|_| DispatchError::InvalidPriority(raw.to_string()))
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, DispatchError> {
    mutex.lock().map_err(|_| DispatchError::LockPoisoned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::models::enums::{Channel, EncounterStatus, Urgency};
    use crate::models::Encounter;
    use chrono::Duration;

    fn store() -> Arc<dyn DispatchStore> {
        Arc::new(SqliteStore::open_in_memory().unwrap())
    }

    fn seed(store: &Arc<dyn DispatchStore>) -> Uuid {
        let ts = now();
        let enc = Encounter {
            id: Uuid::new_v4(),
            patient_name: None,
            msisdn_hash: Some("hash".into()),
            patient_age: None,
            age_group: None,
            patient_gender: None,
            chief_complaint: "fever".into(),
            symptoms: None,
            duration: None,
            medical_history: None,
            status: EncounterStatus::Pending,
            urgency: Urgency::Medium,
            channel: Channel::Ussd,
            risk_code: None,
            consent_given: true,
            consent_version: None,
            assigned_provider_id: None,
            notes: None,
            created_at: ts,
            updated_at: ts,
        };
        store.create_encounter(&enc, None).unwrap();
        enc.id
    }

    #[test]
    fn orders_by_priority_then_age() {
        let store = store();
        let queue = CallbackQueue::hydrate(store.clone()).unwrap();

        let a = queue.enqueue(seed(&store), CallbackPriority::Medium, "a").unwrap();
        let b = queue.enqueue(seed(&store), CallbackPriority::Urgent, "b").unwrap();
        let c = queue.enqueue(seed(&store), CallbackPriority::Medium, "c").unwrap();

        let ids: Vec<Uuid> = queue
            .peek_ordered(Some(CallbackStatus::Queued))
            .unwrap()
            .iter()
            .map(|cb| cb.id)
            .collect();
        assert_eq!(ids, vec![b.id, a.id, c.id]);
        assert_eq!(queue.dequeue_candidate().unwrap().unwrap().id, b.id);
    }

    #[test]
    fn key_orders_older_low_behind_newer_high() {
        let t0 = now();
        let mk = |priority, created_at, seq| Callback {
            id: Uuid::new_v4(),
            encounter_id: Uuid::new_v4(),
            msisdn_hash: "h".into(),
            priority,
            status: CallbackStatus::Queued,
            provider_id: None,
            outcome: None,
            notes: None,
            failure_reason: None,
            release_count: 0,
            enqueue_seq: seq,
            created_at,
            assigned_at: None,
            completed_at: None,
            updated_at: created_at,
        };
        let old_low = mk(CallbackPriority::Low, t0 - Duration::hours(6), 1);
        let new_high = mk(CallbackPriority::High, t0, 2);
        let newer_low = mk(CallbackPriority::Low, t0, 3);

        assert!(QueueKey::of(&new_high) < QueueKey::of(&old_low));
        assert!(QueueKey::of(&old_low) < QueueKey::of(&newer_low));
    }

    #[test]
    fn duplicate_enqueue_is_rejected_and_queue_unchanged() {
        let store = store();
        let queue = CallbackQueue::hydrate(store.clone()).unwrap();
        let encounter_id = seed(&store);

        let first = queue.enqueue(encounter_id, CallbackPriority::High, "h").unwrap();
        let err = queue
            .enqueue(encounter_id, CallbackPriority::Urgent, "h")
            .unwrap_err();
        match err {
            DispatchError::DuplicateWork { existing, .. } => assert_eq!(existing, Some(first.id)),
            other => panic!("expected DuplicateWork, got {other:?}"),
        }
        assert_eq!(queue.len(), 1);
        assert_eq!(store.load_callbacks(CallbackStatus::ALL).unwrap().len(), 1);
    }

    #[test]
    fn unknown_encounter_is_rejected() {
        let queue = CallbackQueue::hydrate(store()).unwrap();
        let err = queue
            .enqueue(Uuid::new_v4(), CallbackPriority::Low, "h")
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownEncounter(_)));
        assert!(queue.is_empty());
    }

    #[test]
    fn failed_persist_frees_the_reservation() {
        let store = store();
        let queue = CallbackQueue::hydrate(store.clone()).unwrap();
        let encounter_id = seed(&store);
        {
            let _reservation = queue.reserve(encounter_id).unwrap();
            assert!(matches!(
                queue.reserve(encounter_id),
                Err(DispatchError::DuplicateWork { existing: None, .. })
            ));
        }
        assert!(queue.enqueue(encounter_id, CallbackPriority::Low, "h").is_ok());
    }

    #[test]
    fn invalid_priority_string() {
        assert!(matches!(
            parse_priority("critical"),
            Err(DispatchError::InvalidPriority(_))
        ));
        assert_eq!(parse_priority(" urgent ").unwrap(), CallbackPriority::Urgent);
    }

    #[test]
    fn hydrate_restores_order_and_sequence() {
        let store = store();
        let (first, second) = {
            let queue = CallbackQueue::hydrate(store.clone()).unwrap();
            let a = queue.enqueue(seed(&store), CallbackPriority::Low, "a").unwrap();
            let b = queue.enqueue(seed(&store), CallbackPriority::High, "b").unwrap();
            (a, b)
        };

        let queue = CallbackQueue::hydrate(store.clone()).unwrap();
        let ordered = queue.peek_ordered(None).unwrap();
        assert_eq!(ordered[0].id, second.id);
        assert_eq!(ordered[1].id, first.id);
        assert_eq!(queue.active_for(&first.encounter_id).unwrap(), Some(first.id));

        let third = queue.enqueue(seed(&store), CallbackPriority::Low, "c").unwrap();
        assert!(third.enqueue_seq > second.enqueue_seq);
    }

    #[test]
    fn concurrent_enqueue_reports_the_settled_callback() {
        let store = store();
        let queue = CallbackQueue::hydrate(store.clone()).unwrap();
        let encounter_id = seed(&store);

        let reservation = queue.reserve(encounter_id).unwrap();
        let created = std::thread::scope(|scope| {
            let waiter = scope.spawn(|| queue.enqueue(encounter_id, CallbackPriority::High, "h"));
            std::thread::sleep(std::time::Duration::from_millis(50));

            let cb = queue.prepare(encounter_id, CallbackPriority::High, "h");
            store.insert_callback(&cb).unwrap();
            reservation.commit(cb.clone()).unwrap();

            match waiter.join().unwrap() {
                Err(DispatchError::DuplicateWork { existing, .. }) => assert_eq!(existing, Some(cb.id)),
                other => panic!("expected DuplicateWork, got {other:?}"),
            }
            cb
        });
        assert_eq!(queue.active_for(&encounter_id).unwrap(), Some(created.id));
    }

    #[test]
    fn store_unique_violation_is_duplicate_work() {
        let store = store();
        let queue = CallbackQueue::hydrate(store.clone()).unwrap();
        let encounter_id = seed(&store);

        // Written behind the queue's back, e.g. by a second process.
        let foreign = queue.prepare(encounter_id, CallbackPriority::Low, "h");
        store.insert_callback(&foreign).unwrap();

        match queue.enqueue(encounter_id, CallbackPriority::Low, "h") {
            Err(DispatchError::DuplicateWork { existing, .. }) => {
                assert_eq!(existing, Some(foreign.id))
            }
            other => panic!("expected DuplicateWork, got {other:?}"),
        }
        assert_eq!(queue.active_for(&encounter_id).unwrap(), None);
    }

    #[test]
    fn retired_callbacks_leave_memory_but_stay_readable() {
        let store = store();
        let queue = CallbackQueue::hydrate(store.clone()).unwrap();
        let mut cb = queue.enqueue(seed(&store), CallbackPriority::High, "h").unwrap();
        let open = queue.enqueue(seed(&store), CallbackPriority::Low, "h").unwrap();

        cb.status = CallbackStatus::Failed;
        cb.provider_id = Some("p1".into());
        cb.assigned_at = Some(now());
        cb.completed_at = Some(now());
        cb.failure_reason = Some(crate::models::enums::FailureReason::Abandoned);
        store.commit_transition(&cb, None).unwrap();
        queue.retire(&cb).unwrap();

        assert_eq!(queue.len(), 1);
        assert!(matches!(queue.slot(&cb.id), Err(DispatchError::UnknownCallback(_))));
        assert_eq!(queue.get(&cb.id).unwrap().status, CallbackStatus::Failed);
        assert_eq!(queue.active_for(&cb.encounter_id).unwrap(), None);

        let failed = queue.peek_ordered(Some(CallbackStatus::Failed)).unwrap();
        assert_eq!(failed.len(), 1);
        let all: Vec<Uuid> = queue.peek_ordered(None).unwrap().iter().map(|c| c.id).collect();
        assert_eq!(all, vec![cb.id, open.id]);
        assert_eq!(queue.tally().unwrap(), QueueTally { queued: 1, in_progress: 0 });

        // Restart sees only the open callback, and sequences keep climbing.
        let reloaded = CallbackQueue::hydrate(store.clone()).unwrap();
        assert_eq!(reloaded.len(), 1);
        let next = reloaded.enqueue(seed(&store), CallbackPriority::Low, "h").unwrap();
        assert!(next.enqueue_seq > open.enqueue_seq);
    }
}
