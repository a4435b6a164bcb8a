//! REST client for the analysis service endpoints.
//!
//! Wraps the job-related HTTP surface (push stream, job start, status,
//! cancellation, direct fetch) using [`reqwest`].

use fairvalue_core::JobRequest;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};

use crate::config::JobsConfig;
use crate::messages::{CancelResponse, JobStatusResponse, StartResponse};

/// HTTP client for one analysis service.
#[derive(Debug, Clone)]
pub struct AnalysisApi {
    client: reqwest::Client,
    base_url: String,
}

/// Errors from the analysis REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Analysis API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl AnalysisApi {
    /// Build a client from configuration.
    ///
    /// Only the connect phase is bounded; a stream may stay open as long
    /// as records keep arriving.
    pub fn new(config: &JobsConfig) -> Result<Self, AnalysisApiError> {
        let mut headers = HeaderMap::new();
        if let Some(ref token) = config.api_token {
            if let Ok(mut value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            } else {
                tracing::warn!("FAIRVALUE_API_TOKEN is not a valid header value, ignoring it");
            }
        }

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self::with_client(client, config.base_url.clone()))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    /// Open the push stream for a request.
    ///
    /// Sends `GET /api/stocks/{ticker}/analyze/stream`. The response is
    /// returned as-is so the caller can inspect the status (to decide on
    /// a fallback) before consuming the body incrementally.
    pub async fn open_stream(
        &self,
        request: &JobRequest,
    ) -> Result<reqwest::Response, AnalysisApiError> {
        let response = self
            .client
            .get(format!(
                "{}/api/stocks/{}/analyze/stream",
                self.base_url,
                request.subject()
            ))
            .query(&request.query_pairs())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        Ok(response)
    }

    /// Start a queued analysis job.
    ///
    /// Sends `POST /api/stocks/{ticker}/analyze` with the overrides as a
    /// JSON body. The service answers with a task id, or with the result
    /// itself when it already has one cached.
    pub async fn start_job(&self, request: &JobRequest) -> Result<StartResponse, AnalysisApiError> {
        let response = self
            .client
            .post(format!(
                "{}/api/stocks/{}/analyze",
                self.base_url,
                request.subject()
            ))
            .json(request.overrides())
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch the status of a queued job (`GET /api/jobs/{task_id}`).
    pub async fn job_status(&self, task_id: &str) -> Result<JobStatusResponse, AnalysisApiError> {
        let response = self
            .client
            .get(format!("{}/api/jobs/{}", self.base_url, task_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Ask the service to cancel a queued or running job
    /// (`DELETE /api/jobs/{task_id}`).
    pub async fn cancel_job(&self, task_id: &str) -> Result<CancelResponse, AnalysisApiError> {
        let response = self
            .client
            .delete(format!("{}/api/jobs/{}", self.base_url, task_id))
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        // Some deployments answer 204 with no body.
        let body = response.text().await?;
        Ok(serde_json::from_str(&body).unwrap_or(CancelResponse { message: None }))
    }

    /// Fetch a complete analysis in one request, without progress
    /// (`GET /api/stocks/{ticker}/analysis`).
    pub async fn fetch_analysis(
        &self,
        request: &JobRequest,
    ) -> Result<serde_json::Value, AnalysisApiError> {
        let response = self
            .client
            .get(format!(
                "{}/api/stocks/{}/analysis",
                self.base_url,
                request.subject()
            ))
            .query(&request.query_pairs())
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`AnalysisApiError::ApiError`]
    /// containing the status and body text on failure.
    pub(crate) async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, AnalysisApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(AnalysisApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, AnalysisApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
