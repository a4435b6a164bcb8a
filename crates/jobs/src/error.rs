//! Terminal failure classification surfaced to job consumers.

use std::time::Duration;

use crate::api::AnalysisApiError;

/// Why a job ended in failure.
///
/// The `Display` text is suitable for direct display to an end user; the
/// variant (and the `detail` of connectivity failures) is kept for
/// diagnostics. Cancellation is not an error and has no variant here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// The analysis service could not be reached (refused, DNS, TLS,
    /// connect timeout, or the connection dropped mid-stream).
    #[error("Unable to reach the analysis service")]
    Connectivity {
        /// Underlying transport error text.
        detail: String,
    },

    /// No record arrived from the service within the inactivity bound.
    #[error("No response from the analysis service for {} seconds", .idle.as_secs())]
    InactivityTimeout { idle: Duration },

    /// The service explicitly reported a failure.
    #[error("{0}")]
    Remote(String),

    /// The push stream closed without ever delivering a result.
    #[error("stream ended without completion")]
    Incomplete,
}

impl JobError {
    pub fn connectivity(detail: impl Into<String>) -> Self {
        Self::Connectivity {
            detail: detail.into(),
        }
    }

    /// Short machine-readable classification, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connectivity { .. } => "connectivity",
            Self::InactivityTimeout { .. } => "inactivity_timeout",
            Self::Remote(_) => "remote",
            Self::Incomplete => "incomplete",
        }
    }
}

impl From<AnalysisApiError> for JobError {
    fn from(err: AnalysisApiError) -> Self {
        match err {
            AnalysisApiError::Request(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                Self::connectivity(e.to_string())
            }
            AnalysisApiError::Request(e) => {
                Self::Remote(format!("Invalid response from the analysis service: {e}"))
            }
            AnalysisApiError::ApiError { status, body } => Self::Remote(remote_message(status, &body)),
        }
    }
}

/// Pull a human-readable message out of an error response body.
///
/// Looks for the `detail`, `message` and `error` fields of a JSON body in
/// that order, falling back to the raw body text.
fn remote_message(status: u16, body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["detail", "message", "error"]
                .iter()
                .find_map(|field| value.get(field).and_then(|v| v.as_str()).map(str::to_string))
        });

    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => format!("Analysis service returned HTTP {status}"),
        None => body.trim().to_string(),
    }
}
