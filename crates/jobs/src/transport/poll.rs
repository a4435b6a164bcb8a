use std::time::Duration;

use async_trait::async_trait;
use fairvalue_core::JobRequest;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{EventSink, Transport};
use crate::api::{AnalysisApi, AnalysisApiError};
use crate::error::JobError;
use crate::events::{ProgressEvent, Terminal};
use crate::messages::{RemoteStatus, StartResponse};

/// Upper bound on each request made while stopping: the server cancel, and
/// the start call still in flight when cancellation arrived.
const CANCEL_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll-loop transport: queue the job, then fetch its status on a fixed
/// interval until the service reports a terminal state.
pub struct PollTransport {
    api: AnalysisApi,
    interval: Duration,
}

impl PollTransport {
    pub fn new(api: AnalysisApi, interval: Duration) -> Self {
        Self { api, interval }
    }

    async fn poll(&self, task_id: &str, sink: &EventSink, cancel: &CancellationToken) -> Terminal {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_reported: Option<(RemoteStatus, u32)> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancel_remote(task_id).await,
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancel_remote(task_id).await,
                result = self.api.job_status(task_id) => result,
            };

            let status = match fetched {
                Ok(status) => status,
                Err(AnalysisApiError::ApiError { status: code, body }) if is_permanent(code) => {
                    tracing::warn!(task_id, status = code, "Job status rejected by the service");
                    let error = AnalysisApiError::ApiError { status: code, body };
                    return Terminal::Failed(error.into());
                }
                Err(e) => {
                    tracing::warn!(task_id, error = %e, "Job status fetch failed, retrying");
                    continue;
                }
            };
            sink.touch();

            match status.status {
                RemoteStatus::Pending | RemoteStatus::Running => {
                    let percent = status.percent();
                    if last_reported == Some((status.status, percent)) {
                        continue;
                    }
                    last_reported = Some((status.status, percent));
                    let label = status
                        .message
                        .clone()
                        .unwrap_or_else(|| status.status.as_str().to_string());
                    sink.emit(ProgressEvent::Progress {
                        step: percent,
                        total: Some(100),
                        label: Some(label),
                    });
                }
                RemoteStatus::Completed => {
                    return Terminal::Complete(status.result.unwrap_or(serde_json::Value::Null));
                }
                RemoteStatus::Failed => {
                    let message = status
                        .error
                        .unwrap_or_else(|| "Analysis failed".to_string());
                    return Terminal::Failed(JobError::Remote(message));
                }
                RemoteStatus::Cancelled => return Terminal::Cancelled,
            }
        }
    }

    async fn cancel_remote(&self, task_id: &str) -> Terminal {
        match tokio::time::timeout(CANCEL_REQUEST_TIMEOUT, self.api.cancel_job(task_id)).await {
            Ok(Ok(response)) => tracing::info!(
                task_id,
                message = response.message.as_deref().unwrap_or(""),
                "Cancelled analysis job on the service",
            ),
            Ok(Err(e)) => tracing::warn!(task_id, error = %e, "Server-side cancel failed"),
            Err(_) => tracing::warn!(task_id, "Server-side cancel timed out"),
        }
        Terminal::Cancelled
    }
}

/// Client errors other than throttling will not go away on retry.
fn is_permanent(status: u16) -> bool {
    (400..500).contains(&status) && status != 408 && status != 429
}

#[async_trait]
impl Transport for PollTransport {
    fn name(&self) -> &'static str {
        "poll"
    }

    async fn run(
        &self,
        request: &JobRequest,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Terminal {
        let start = self.api.start_job(request);
        tokio::pin!(start);
        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // The service may already have queued the job; learn its id
                // so it can be cancelled there too.
                return match tokio::time::timeout(CANCEL_REQUEST_TIMEOUT, &mut start).await {
                    Ok(Ok(StartResponse::Queued { task_id })) => {
                        sink.set_task_id(task_id.clone());
                        self.cancel_remote(&task_id).await
                    }
                    Ok(_) => Terminal::Cancelled,
                    Err(_) => {
                        tracing::warn!(
                            subject = %request.subject(),
                            "Start request still pending after cancel, abandoning it",
                        );
                        Terminal::Cancelled
                    }
                };
            }
            result = &mut start => result,
        };

        let task_id = match started {
            Ok(StartResponse::Queued { task_id }) => task_id,
            Ok(StartResponse::Ready(result)) => {
                tracing::info!(subject = %request.subject(), "Analysis served from cache");
                return Terminal::Complete(result);
            }
            Err(e) => {
                tracing::warn!(
                    subject = %request.subject(),
                    error = %e,
                    "Failed to start analysis job",
                );
                return Terminal::Failed(e.into());
            }
        };

        sink.touch();
        sink.set_task_id(task_id.clone());
        tracing::info!(
            subject = %request.subject(),
            job_id = %sink.job_id(),
            task_id = %task_id,
            "Analysis job queued",
        );

        self.poll(&task_id, sink, cancel).await
    }
}
