//! The subject → job map and the single delivery path for job events.
//!
//! At most one job is current per subject key. An event reaches a
//! consumer only if, at delivery time, its job is still the current job
//! for its subject and has not yet delivered a terminal event. Start,
//! retire and deliver are serialised by the map lock, which makes the
//! identity check and the send atomic with respect to supersession.
//!
//! Lock order is map, then slot. Nothing outside this module runs while
//! either lock is held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use fairvalue_core::types::{new_job_id, JobId, Timestamp};
use fairvalue_core::SubjectKey;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::events::{JobNotification, JobState, ProgressEvent, RetireReason};

/// Capacity of the notification broadcast channel.
///
/// Slow subscribers that fall behind by more than this many
/// notifications will receive a `RecvError::Lagged` error.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One tracked job: identity, lifecycle state and cancellation.
#[derive(Debug)]
pub struct JobSlot {
    job_id: JobId,
    subject: SubjectKey,
    created_at: Timestamp,
    cancel: CancellationToken,
    /// Cancelled once a terminal event has been applied.
    finished: CancellationToken,
    inner: Mutex<SlotInner>,
    task_id: Mutex<Option<String>>,
}

#[derive(Debug)]
struct SlotInner {
    state: JobState,
    /// Dropped on the terminal transition, which ends the consumer's stream.
    consumer: Option<mpsc::UnboundedSender<ProgressEvent>>,
    outcome: Option<ProgressEvent>,
}

impl JobSlot {
    fn new(subject: SubjectKey, consumer: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self {
            job_id: new_job_id(),
            subject,
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            inner: Mutex::new(SlotInner {
                state: JobState::Requested,
                consumer: Some(consumer),
                outcome: None,
            }),
            task_id: Mutex::new(None),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn subject(&self) -> &SubjectKey {
        &self.subject
    }

    /// Token cancelled when the job is retired or times out.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn state(&self) -> JobState {
        lock(&self.inner).state
    }

    /// Server-issued task id, once the poll transport has one.
    pub fn task_id(&self) -> Option<String> {
        lock(&self.task_id).clone()
    }

    pub fn set_task_id(&self, task_id: String) {
        *lock(&self.task_id) = Some(task_id);
    }

    /// The terminal event, once one has been delivered.
    pub async fn outcome(&self) -> Option<ProgressEvent> {
        self.finished.cancelled().await;
        lock(&self.inner).outcome.clone()
    }

    /// Time since the job was registered.
    fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    /// Hand `event` to the consumer unless a terminal was already delivered.
    fn apply(&self, event: ProgressEvent) -> bool {
        let mut inner = lock(&self.inner);
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = inner.state.after(&event);
        let outcome = event.is_terminal().then(|| event.clone());
        if let Some(ref consumer) = inner.consumer {
            // A closed receiver only means nobody is listening any more.
            let _ = consumer.send(event);
        }
        if outcome.is_some() {
            inner.consumer = None;
            inner.outcome = outcome;
            self.finished.cancel();
        }
        true
    }
}

/// Owned registry of current jobs, one per subject key.
pub struct JobRegistry {
    slots: Mutex<HashMap<SubjectKey, Arc<JobSlot>>>,
    notifications: broadcast::Sender<JobNotification>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            slots: Mutex::new(HashMap::new()),
            notifications,
        }
    }

    /// Register a new job for `subject`, superseding any current one.
    ///
    /// The previous job (if any) is marked cancelled, its consumer gets a
    /// final `Cancelled` and its token is cancelled before this returns,
    /// so nothing its transport produces afterwards can be delivered.
    pub fn register(
        &self,
        subject: SubjectKey,
    ) -> (Arc<JobSlot>, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let slot = Arc::new(JobSlot::new(subject.clone(), tx));

        let superseded = {
            let mut slots = lock(&self.slots);
            slots
                .insert(subject, Arc::clone(&slot))
                .filter(|previous| previous.apply(ProgressEvent::Cancelled))
        };

        if let Some(previous) = superseded {
            previous.cancel.cancel();
            tracing::info!(
                subject = %previous.subject,
                job_id = %previous.job_id,
                new_job_id = %slot.job_id,
                "Superseding active analysis job",
            );
            self.notify(&previous, ProgressEvent::Cancelled);
        }

        tracing::debug!(subject = %slot.subject, job_id = %slot.job_id, "Registered analysis job");
        (slot, rx)
    }

    /// Move a freshly registered job to `Active`.
    pub fn activate(&self, slot: &Arc<JobSlot>) {
        let _slots = lock(&self.slots);
        let mut inner = lock(&slot.inner);
        if inner.state == JobState::Requested {
            inner.state = JobState::Active;
        }
    }

    /// Deliver `event` if `slot` is still current and not yet terminal.
    ///
    /// Returns whether the event reached the consumer. A delivered
    /// terminal event removes the job from the registry.
    pub fn deliver(&self, slot: &Arc<JobSlot>, event: ProgressEvent) -> bool {
        let accepted = {
            let mut slots = lock(&self.slots);
            if !is_current(&slots, slot) {
                false
            } else {
                let terminal = event.is_terminal();
                let accepted = slot.apply(event.clone());
                if accepted && terminal {
                    slots.remove(&slot.subject);
                }
                accepted
            }
        };

        if accepted {
            self.notify(slot, event);
        } else {
            tracing::debug!(
                subject = %slot.subject,
                job_id = %slot.job_id,
                event = event.kind(),
                "Dropping event for retired analysis job",
            );
        }
        accepted
    }

    /// Retire `slot`: deliver `Cancelled` (if still live), cancel its
    /// token and forget it. Idempotent.
    pub fn retire(&self, slot: &Arc<JobSlot>, reason: RetireReason) -> bool {
        let retired = {
            let mut slots = lock(&self.slots);
            if is_current(&slots, slot) {
                slots.remove(&slot.subject);
            }
            slot.apply(ProgressEvent::Cancelled)
        };
        slot.cancel.cancel();

        if retired {
            tracing::info!(
                subject = %slot.subject,
                job_id = %slot.job_id,
                reason = reason.as_str(),
                age_ms = slot.age().num_milliseconds(),
                "Analysis job retired",
            );
            self.notify(slot, ProgressEvent::Cancelled);
        }
        retired
    }

    /// Retire whatever job is current for `subject`.
    pub fn retire_subject(&self, subject: &SubjectKey, reason: RetireReason) -> bool {
        let current = self.current(subject);
        match current {
            Some(slot) => self.retire(&slot, reason),
            None => false,
        }
    }

    /// Retire every current job. Returns how many were live.
    pub fn retire_all(&self, reason: RetireReason) -> usize {
        let drained: Vec<Arc<JobSlot>> = {
            let mut slots = lock(&self.slots);
            slots
                .drain()
                .map(|(_, slot)| slot)
                .filter(|slot| slot.apply(ProgressEvent::Cancelled))
                .collect()
        };

        for slot in &drained {
            slot.cancel.cancel();
            tracing::info!(
                subject = %slot.subject,
                job_id = %slot.job_id,
                reason = reason.as_str(),
                age_ms = slot.age().num_milliseconds(),
                "Analysis job retired",
            );
            self.notify(slot, ProgressEvent::Cancelled);
        }
        drained.len()
    }

    pub fn current(&self, subject: &SubjectKey) -> Option<Arc<JobSlot>> {
        lock(&self.slots).get(subject).cloned()
    }

    pub fn is_current(&self, slot: &Arc<JobSlot>) -> bool {
        is_current(&lock(&self.slots), slot)
    }

    /// Subjects with a live job, sorted.
    pub fn active_subjects(&self) -> Vec<SubjectKey> {
        let mut subjects: Vec<_> = lock(&self.slots).keys().cloned().collect();
        subjects.sort();
        subjects
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to every delivered event across all jobs.
    pub fn subscribe(&self) -> broadcast::Receiver<JobNotification> {
        self.notifications.subscribe()
    }

    fn notify(&self, slot: &JobSlot, event: ProgressEvent) {
        // Ignore send errors -- they only mean no active subscribers.
        let _ = self.notifications.send(JobNotification {
            subject: slot.subject.clone(),
            job_id: slot.job_id,
            event,
            timestamp: Utc::now(),
        });
    }
}

fn is_current(slots: &HashMap<SubjectKey, Arc<JobSlot>>, slot: &Arc<JobSlot>) -> bool {
    slots
        .get(&slot.subject)
        .is_some_and(|current| Arc::ptr_eq(current, slot))
}

/// Lock a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
