//! Wire tag constants for the analysis service protocol.
//!
//! Used by the push-stream frame parser (`type` field of each `data:`
//! record) and by the poll transport (`status` field of a job status
//! response).

// ---------------------------------------------------------------------------
// Push-stream frame types
// ---------------------------------------------------------------------------

/// Literal prefix that marks a protocol record on the push stream.
pub const FRAME_PREFIX: &str = "data: ";

/// Step-level progress update.
pub const FRAME_TYPE_PROGRESS: &str = "progress";

/// Keep-alive record; carries an optional advisory note.
pub const FRAME_TYPE_HEARTBEAT: &str = "heartbeat";

/// Final result of the analysis.
pub const FRAME_TYPE_COMPLETE: &str = "complete";

/// Server-reported failure.
pub const FRAME_TYPE_ERROR: &str = "error";

// ---------------------------------------------------------------------------
// Poll-transport job status tags
// ---------------------------------------------------------------------------

/// Job accepted but not yet picked up by a worker.
pub const JOB_STATUS_PENDING: &str = "pending";

/// Job is executing.
pub const JOB_STATUS_RUNNING: &str = "running";

/// Job finished and carries a result.
pub const JOB_STATUS_COMPLETED: &str = "completed";

/// Job failed on the server.
pub const JOB_STATUS_FAILED: &str = "failed";

/// Job was cancelled on the server.
pub const JOB_STATUS_CANCELLED: &str = "cancelled";
