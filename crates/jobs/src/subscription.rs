//! Consumer side of a started job.

use std::sync::Arc;

use fairvalue_core::types::JobId;
use fairvalue_core::SubjectKey;
use futures::Stream;
use tokio::sync::mpsc;

use crate::error::JobError;
use crate::events::{JobState, ProgressEvent, RetireReason};
use crate::registry::{JobRegistry, JobSlot};

/// Callback consumer for one job.
///
/// Callbacks run in order on a dedicated dispatcher task, never while
/// registry locks are held. Exactly one of `on_complete`, `on_error` or
/// `on_cancelled` is called, and it is the last call.
pub trait JobObserver: Send + Sync + 'static {
    fn on_progress(&self, _step: u32, _total: Option<u32>, _label: Option<&str>) {}

    fn on_heartbeat(&self, _note: Option<&str>) {}

    fn on_complete(&self, _result: &serde_json::Value) {}

    fn on_error(&self, _error: &JobError) {}

    fn on_cancelled(&self) {}
}

/// Forward every event of one job to an observer until the terminal.
pub(crate) async fn dispatch(
    mut events: mpsc::UnboundedReceiver<ProgressEvent>,
    observer: Arc<dyn JobObserver>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::Progress { step, total, label } => {
                observer.on_progress(step, total, label.as_deref())
            }
            ProgressEvent::Heartbeat { note } => observer.on_heartbeat(note.as_deref()),
            ProgressEvent::Complete { result } => {
                observer.on_complete(&result);
                return;
            }
            ProgressEvent::Failed { error } => {
                observer.on_error(&error);
                return;
            }
            ProgressEvent::Cancelled => {
                observer.on_cancelled();
                return;
            }
        }
    }
}

/// Handle returned by [`JobController::start`](crate::JobController::start).
///
/// Yields the job's events in order, ending after exactly one terminal
/// event. Dropping the subscription retires the job (its consumer is
/// gone), which cancels the underlying transport.
pub struct JobSubscription {
    slot: Arc<JobSlot>,
    registry: Arc<JobRegistry>,
    /// `None` when an observer's dispatcher owns the event stream.
    events: Option<mpsc::UnboundedReceiver<ProgressEvent>>,
}

impl JobSubscription {
    pub(crate) fn new(
        slot: Arc<JobSlot>,
        registry: Arc<JobRegistry>,
        events: Option<mpsc::UnboundedReceiver<ProgressEvent>>,
    ) -> Self {
        Self {
            slot,
            registry,
            events,
        }
    }

    /// Next event, or `None` once the terminal event has been taken.
    ///
    /// Always `None` for subscriptions created with an observer.
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        match self.events {
            Some(ref mut events) => events.recv().await,
            None => None,
        }
    }

    /// Wait for the terminal event, discarding progress.
    ///
    /// With an observer the events belong to the observer; this still
    /// resolves with the terminal event once it has been delivered, so
    /// returning never retires a running job.
    pub async fn wait(mut self) -> Option<ProgressEvent> {
        if self.events.is_none() {
            return self.slot.outcome().await;
        }
        let mut last = None;
        while let Some(event) = self.next_event().await {
            last = Some(event);
        }
        last.filter(ProgressEvent::is_terminal)
    }

    /// Convert into a [`Stream`] of events. Dropping the stream retires
    /// the job like dropping the subscription does.
    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            let event = subscription.next_event().await?;
            Some((event, subscription))
        })
    }

    /// Cancel the job. Returns `false` if it had already finished.
    pub fn cancel(&self) -> bool {
        self.registry.retire(&self.slot, RetireReason::Cancelled)
    }

    /// `true` until a terminal event has been delivered.
    pub fn is_active(&self) -> bool {
        !self.state().is_terminal()
    }

    pub fn state(&self) -> JobState {
        self.slot.state()
    }

    pub fn job_id(&self) -> JobId {
        self.slot.job_id()
    }

    /// Server task id, available once the poll transport has queued the job.
    pub fn task_id(&self) -> Option<String> {
        self.slot.task_id()
    }

    pub fn subject(&self) -> &SubjectKey {
        self.slot.subject()
    }
}

impl Drop for JobSubscription {
    fn drop(&mut self) {
        self.registry.retire(&self.slot, RetireReason::Teardown);
    }
}

impl std::fmt::Debug for JobSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSubscription")
            .field("subject", self.slot.subject())
            .field("job_id", &self.slot.job_id())
            .field("state", &self.slot.state())
            .finish()
    }
}
