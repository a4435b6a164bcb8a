/// Errors raised while building domain values, before any network activity.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Input rejected by validation (bad ticker, blank override, ...).
    #[error("Validation failed: {0}")]
    Validation(String),
}
