//! Job events delivered to consumers.
//!
//! Every transport produces the same [`ProgressEvent`] sequence, so the
//! consumer never needs to know how its job is being observed.

use fairvalue_core::types::{JobId, Timestamp};
use fairvalue_core::SubjectKey;
use serde::Serialize;

use crate::error::JobError;

/// One event in a job's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A pipeline step started (step N of M).
    Progress {
        step: u32,
        total: Option<u32>,
        /// Description of the step, if the service sent one.
        label: Option<String>,
    },

    /// The service is alive but has nothing new to report.
    Heartbeat { note: Option<String> },

    /// The job finished. Terminal.
    Complete { result: serde_json::Value },

    /// The job failed. Terminal.
    Failed {
        #[serde(serialize_with = "serialize_error")]
        error: JobError,
    },

    /// The job was cancelled or superseded. Terminal.
    Cancelled,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }

    /// Short name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Complete { .. } => "complete",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

fn serialize_error<S: serde::Serializer>(error: &JobError, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&error.to_string())
}

/// How a transport run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Complete(serde_json::Value),
    Failed(JobError),
    Cancelled,
}

impl Terminal {
    pub fn into_event(self) -> ProgressEvent {
        match self {
            Self::Complete(result) => ProgressEvent::Complete { result },
            Self::Failed(error) => ProgressEvent::Failed { error },
            Self::Cancelled => ProgressEvent::Cancelled,
        }
    }
}

impl From<JobError> for Terminal {
    fn from(error: JobError) -> Self {
        Self::Failed(error)
    }
}

/// Lifecycle state of a tracked job.
///
/// `Requested -> Active -> {Completed | Failed | Cancelled}`; terminal
/// states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Requested,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// State a job moves to when `event` is delivered.
    pub fn after(self, event: &ProgressEvent) -> Self {
        if self.is_terminal() {
            return self;
        }
        match event {
            ProgressEvent::Complete { .. } => Self::Completed,
            ProgressEvent::Failed { .. } => Self::Failed,
            ProgressEvent::Cancelled => Self::Cancelled,
            ProgressEvent::Progress { .. } | ProgressEvent::Heartbeat { .. } => Self::Active,
        }
    }
}

/// Why a job was retired without reaching a terminal event on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireReason {
    /// The consumer asked for cancellation.
    Cancelled,
    /// A newer job for the same subject was started.
    Superseded,
    /// The owning subscription was dropped.
    Teardown,
    /// The controller is shutting down.
    Shutdown,
}

impl RetireReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Superseded => "superseded",
            Self::Teardown => "teardown",
            Self::Shutdown => "shutdown",
        }
    }
}

/// A delivered event, fanned out to observability subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct JobNotification {
    pub subject: SubjectKey,
    pub job_id: JobId,
    pub event: ProgressEvent,
    pub timestamp: Timestamp,
}
