//! Public entry point: start, observe and cancel analysis jobs.
//!
//! The controller owns the [`JobRegistry`] and the transports. Each
//! started job runs on its own driver task:
//!
//! 1. The job is registered (superseding any current job for the same
//!    subject) before any request is issued.
//! 2. An inactivity [`Watchdog`] is armed when the transport needs one.
//! 3. The transport runs until it produces a terminal; the terminal is
//!    delivered through the registry, which drops it if the job has been
//!    retired in the meantime.

use std::sync::Arc;
use std::time::Duration;

use fairvalue_core::{JobRequest, SubjectKey};
use tokio::sync::broadcast;

use crate::api::{AnalysisApi, AnalysisApiError};
use crate::config::JobsConfig;
use crate::error::JobError;
use crate::events::{JobNotification, ProgressEvent, RetireReason, Terminal};
use crate::registry::{JobRegistry, JobSlot};
use crate::subscription::{dispatch, JobObserver, JobSubscription};
use crate::transport::{DirectTransport, EventSink, PollTransport, StreamTransport, Transport};
use crate::watchdog::Watchdog;

/// Per-start options.
#[derive(Debug, Clone, Copy)]
pub struct StartOptions {
    /// Observe progress (stream or poll). When `false` the result is
    /// fetched in a single request with no progress and no watchdog.
    pub observe_progress: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            observe_progress: true,
        }
    }
}

impl StartOptions {
    pub fn without_progress() -> Self {
        Self {
            observe_progress: false,
        }
    }
}

pub struct JobController {
    registry: Arc<JobRegistry>,
    inactivity_timeout: Duration,
    /// Preferred progress transport (stream, or poll when streaming is off).
    progress: Arc<dyn Transport>,
    direct: Arc<dyn Transport>,
}

impl JobController {
    /// Build a controller talking to the service described by `config`.
    pub fn new(config: &JobsConfig) -> Result<Self, AnalysisApiError> {
        let api = AnalysisApi::new(config)?;
        let polling: Arc<dyn Transport> =
            Arc::new(PollTransport::new(api.clone(), config.poll_interval));

        let progress: Arc<dyn Transport> = if config.streaming_enabled {
            Arc::new(StreamTransport::new(api.clone()).with_fallback(polling))
        } else {
            polling
        };

        tracing::info!(
            base_url = %config.base_url,
            transport = progress.name(),
            inactivity_timeout_secs = config.inactivity_timeout.as_secs(),
            "Job controller ready",
        );

        Ok(Self::with_transports(
            progress,
            Arc::new(DirectTransport::new(api)),
            config.inactivity_timeout,
        ))
    }

    /// Build a controller around explicit transports.
    pub fn with_transports(
        progress: Arc<dyn Transport>,
        direct: Arc<dyn Transport>,
        inactivity_timeout: Duration,
    ) -> Self {
        Self {
            registry: Arc::new(JobRegistry::new()),
            inactivity_timeout,
            progress,
            direct,
        }
    }

    /// Start a job and pull its events from the returned subscription.
    ///
    /// Any job currently running for the same subject is superseded: its
    /// consumer receives `Cancelled` and nothing else from it afterwards.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, request: JobRequest, options: StartOptions) -> JobSubscription {
        let (slot, events) = self.registry.register(request.subject().clone());
        self.spawn_driver(request, Arc::clone(&slot), options);
        JobSubscription::new(slot, Arc::clone(&self.registry), Some(events))
    }

    /// Start a job whose events are pushed to `observer`.
    ///
    /// The returned subscription only controls the job: `next_event`
    /// yields nothing, while `wait` resolves with the terminal event once
    /// delivered. Dropping it before then still retires the job, and the
    /// observer sees `on_cancelled`.
    pub fn start_with(
        &self,
        request: JobRequest,
        options: StartOptions,
        observer: Arc<dyn JobObserver>,
    ) -> JobSubscription {
        let (slot, events) = self.registry.register(request.subject().clone());
        tokio::spawn(dispatch(events, observer));
        self.spawn_driver(request, Arc::clone(&slot), options);
        JobSubscription::new(slot, Arc::clone(&self.registry), None)
    }

    /// Cancel the current job for `subject`, if any.
    pub fn cancel_subject(&self, subject: &SubjectKey) -> bool {
        self.registry.retire_subject(subject, RetireReason::Cancelled)
    }

    pub fn is_running(&self, subject: &SubjectKey) -> bool {
        self.registry.current(subject).is_some()
    }

    pub fn active_subjects(&self) -> Vec<SubjectKey> {
        self.registry.active_subjects()
    }

    /// Subscribe to every event delivered to any job's consumer.
    pub fn subscribe(&self) -> broadcast::Receiver<JobNotification> {
        self.registry.subscribe()
    }

    /// Retire every running job.
    pub fn shutdown(&self) {
        let retired = self.registry.retire_all(RetireReason::Shutdown);
        tracing::info!(retired, "Job controller shut down");
    }

    fn spawn_driver(&self, request: JobRequest, slot: Arc<JobSlot>, options: StartOptions) {
        let transport = if options.observe_progress {
            Arc::clone(&self.progress)
        } else {
            Arc::clone(&self.direct)
        };
        tokio::spawn(drive(
            Arc::clone(&self.registry),
            slot,
            transport,
            request,
            self.inactivity_timeout,
        ));
    }
}

async fn drive(
    registry: Arc<JobRegistry>,
    slot: Arc<JobSlot>,
    transport: Arc<dyn Transport>,
    request: JobRequest,
    inactivity_timeout: Duration,
) {
    registry.activate(&slot);
    tracing::info!(
        subject = %slot.subject(),
        job_id = %slot.job_id(),
        transport = transport.name(),
        "Starting analysis job",
    );

    let watchdog = transport
        .uses_watchdog()
        .then(|| arm_watchdog(Arc::clone(&registry), Arc::clone(&slot), inactivity_timeout));
    let sink = EventSink::new(Arc::clone(&registry), Arc::clone(&slot), watchdog);

    let terminal = transport.run(&request, &sink, slot.cancel_token()).await;
    sink.disarm();

    match terminal {
        Terminal::Complete(_) => tracing::info!(
            subject = %slot.subject(),
            job_id = %slot.job_id(),
            "Analysis job completed",
        ),
        Terminal::Failed(ref error) => tracing::warn!(
            subject = %slot.subject(),
            job_id = %slot.job_id(),
            error_kind = error.kind(),
            error = %error,
            "Analysis job failed",
        ),
        Terminal::Cancelled => tracing::debug!(
            subject = %slot.subject(),
            job_id = %slot.job_id(),
            "Analysis job stopped",
        ),
    }

    registry.deliver(&slot, terminal.into_event());
}

/// Arm a watchdog that fails the job with a timeout and stops its transport.
fn arm_watchdog(registry: Arc<JobRegistry>, slot: Arc<JobSlot>, bound: Duration) -> Watchdog {
    Watchdog::arm(bound, move || {
        tracing::warn!(
            subject = %slot.subject(),
            job_id = %slot.job_id(),
            idle_secs = bound.as_secs(),
            "Analysis job timed out waiting for the service",
        );
        registry.deliver(
            &slot,
            ProgressEvent::Failed {
                error: JobError::InactivityTimeout { idle: bound },
            },
        );
        slot.cancel_token().cancel();
    })
}
