//! Analysis service message types.
//!
//! Push-stream records carry a JSON payload of the shape
//! `{"type": "<kind>", ...}` after the `data: ` prefix; this module
//! deserializes them into a strongly-typed [`StreamMessage`] enum. The
//! REST responses of the poll transport live here too.

use fairvalue_core::job_events::{
    FRAME_TYPE_COMPLETE, FRAME_TYPE_ERROR, FRAME_TYPE_HEARTBEAT, FRAME_TYPE_PROGRESS,
    JOB_STATUS_CANCELLED, JOB_STATUS_COMPLETED, JOB_STATUS_FAILED, JOB_STATUS_PENDING,
    JOB_STATUS_RUNNING,
};
use serde::Deserialize;

/// All known push-stream record types.
///
/// Deserialized via the internally-tagged `"type"` field. Unknown types
/// fail to parse; the frame decoder logs and skips them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamMessage {
    /// A pipeline step started.
    Progress(ProgressData),

    /// Keep-alive while a slow step runs.
    Heartbeat(HeartbeatData),

    /// The analysis finished; `data` is the opaque result.
    Complete {
        #[serde(default)]
        data: serde_json::Value,
    },

    /// The analysis failed on the server.
    Error {
        #[serde(default = "default_error_message")]
        message: String,
    },
}

/// Payload for `progress` records.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressData {
    /// Current step number (1-based).
    pub step: u32,
    /// Total number of steps, when the server knows it.
    #[serde(default)]
    pub total: Option<u32>,
    /// Human-readable description of the step.
    #[serde(default)]
    pub task: Option<String>,
}

/// Payload for `heartbeat` records.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HeartbeatData {
    #[serde(default, alias = "message")]
    pub warning: Option<String>,
}

impl StreamMessage {
    /// Wire `type` tag of this record.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress(_) => FRAME_TYPE_PROGRESS,
            Self::Heartbeat(_) => FRAME_TYPE_HEARTBEAT,
            Self::Complete { .. } => FRAME_TYPE_COMPLETE,
            Self::Error { .. } => FRAME_TYPE_ERROR,
        }
    }
}

fn default_error_message() -> String {
    "Analysis failed".to_string()
}

/// Parse one push-stream payload (the text after `data: `).
///
/// Returns `Err` for malformed JSON or unknown `type` values.
pub fn parse_message(payload: &str) -> Result<StreamMessage, serde_json::Error> {
    serde_json::from_str(payload)
}

// ---------------------------------------------------------------------------
// Poll transport REST payloads
// ---------------------------------------------------------------------------

/// Response of the start-job call.
///
/// The server either queued the job (`{"task_id": ...}`) or already had
/// a result (cache hit) and returned it inline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StartResponse {
    Queued { task_id: String },
    Ready(serde_json::Value),
}

/// Server-side lifecycle tag of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RemoteStatus {
    /// Wire tag of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => JOB_STATUS_PENDING,
            Self::Running => JOB_STATUS_RUNNING,
            Self::Completed => JOB_STATUS_COMPLETED,
            Self::Failed => JOB_STATUS_FAILED,
            Self::Cancelled => JOB_STATUS_CANCELLED,
        }
    }
}

/// Response of the job-status call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobStatusResponse {
    pub status: RemoteStatus,
    /// Completion percentage (0-100).
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Description of the current phase, if the server provides one.
    #[serde(default)]
    pub message: Option<String>,
}

impl JobStatusResponse {
    /// Progress percentage clamped to `0..=100` and rounded to a step.
    pub fn percent(&self) -> u32 {
        if self.progress.is_finite() {
            self.progress.clamp(0.0, 100.0).round() as u32
        } else {
            0
        }
    }
}

/// Response of the cancel-job call.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelResponse {
    #[serde(default)]
    pub message: Option<String>,
}
