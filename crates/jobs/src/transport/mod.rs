//! Interchangeable ways of observing one analysis job.
//!
//! A transport turns a [`JobRequest`] into non-terminal events pushed
//! through an [`EventSink`] and a single returned [`Terminal`]. The
//! controller owns delivery of the terminal; transports never see the
//! consumer directly.

mod direct;
mod poll;
mod stream;

use std::sync::Arc;

use async_trait::async_trait;
use fairvalue_core::types::JobId;
use fairvalue_core::{JobRequest, SubjectKey};
use tokio_util::sync::CancellationToken;

pub use direct::DirectTransport;
pub use poll::PollTransport;
pub use stream::StreamTransport;

use crate::events::{ProgressEvent, Terminal};
use crate::registry::{JobRegistry, JobSlot};
use crate::watchdog::Watchdog;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether the job should be guarded by an inactivity watchdog.
    fn uses_watchdog(&self) -> bool {
        true
    }

    /// Run the job to its end.
    ///
    /// Must return promptly with [`Terminal::Cancelled`] once `cancel`
    /// fires, and must not issue further requests after that (apart from
    /// a best-effort server-side cancel).
    async fn run(
        &self,
        request: &JobRequest,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Terminal;
}

/// Where a transport reports what it receives.
///
/// Every inbound record resets the job's watchdog; events are routed
/// through the registry's liveness filter.
pub struct EventSink {
    registry: Arc<JobRegistry>,
    slot: Arc<JobSlot>,
    watchdog: Option<Watchdog>,
}

impl EventSink {
    pub fn new(registry: Arc<JobRegistry>, slot: Arc<JobSlot>, watchdog: Option<Watchdog>) -> Self {
        Self {
            registry,
            slot,
            watchdog,
        }
    }

    /// Deliver a non-terminal event. Returns `false` if the job is no
    /// longer current.
    pub fn emit(&self, event: ProgressEvent) -> bool {
        self.touch();
        self.registry.deliver(&self.slot, event)
    }

    /// Record inbound activity without producing an event.
    pub fn touch(&self) {
        if let Some(ref watchdog) = self.watchdog {
            watchdog.reset();
        }
    }

    pub fn set_task_id(&self, task_id: String) {
        self.slot.set_task_id(task_id);
    }

    pub fn disarm(&self) {
        if let Some(ref watchdog) = self.watchdog {
            watchdog.disarm();
        }
    }

    pub fn subject(&self) -> &SubjectKey {
        self.slot.subject()
    }

    pub fn job_id(&self) -> JobId {
        self.slot.job_id()
    }
}
