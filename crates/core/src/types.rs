/// Locally generated correlation id for one tracked job.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh correlation id for a new job handle.
pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4()
}
