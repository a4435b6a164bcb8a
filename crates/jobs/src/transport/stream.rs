use std::sync::Arc;

use async_trait::async_trait;
use fairvalue_core::JobRequest;
use tokio_util::sync::CancellationToken;

use super::{EventSink, Transport};
use crate::api::AnalysisApi;
use crate::codec::FrameDecoder;
use crate::error::JobError;
use crate::events::{ProgressEvent, Terminal};
use crate::messages::StreamMessage;

/// Status codes meaning "this service has no stream endpoint".
const FALLBACK_STATUSES: [u16; 3] = [404, 405, 501];

/// Push-stream transport: one long-lived request whose body is decoded
/// incrementally into frames.
pub struct StreamTransport {
    api: AnalysisApi,
    fallback: Option<Arc<dyn Transport>>,
}

impl StreamTransport {
    pub fn new(api: AnalysisApi) -> Self {
        Self {
            api,
            fallback: None,
        }
    }

    /// Continue on `fallback` when the stream endpoint does not exist.
    pub fn with_fallback(mut self, fallback: Arc<dyn Transport>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

#[async_trait]
impl Transport for StreamTransport {
    fn name(&self) -> &'static str {
        "stream"
    }

    async fn run(
        &self,
        request: &JobRequest,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Terminal {
        tracing::info!(
            subject = %request.subject(),
            job_id = %sink.job_id(),
            "Opening analysis stream",
        );

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Terminal::Cancelled,
            result = self.api.open_stream(request) => result,
        };

        let response = match opened {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    subject = %request.subject(),
                    error = %e,
                    "Failed to open analysis stream",
                );
                return Terminal::Failed(e.into());
            }
        };

        let status = response.status().as_u16();
        if let Some(ref fallback) = self.fallback {
            if FALLBACK_STATUSES.contains(&status) {
                tracing::info!(
                    subject = %request.subject(),
                    status,
                    fallback = fallback.name(),
                    "Stream endpoint unavailable, falling back",
                );
                drop(response);
                return fallback.run(request, sink, cancel).await;
            }
        }

        let mut response = match AnalysisApi::ensure_success(response).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(subject = %request.subject(), error = %e, "Analysis stream rejected");
                return Terminal::Failed(e.into());
            }
        };

        let mut decoder = FrameDecoder::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(subject = %request.subject(), "Abandoning analysis stream");
                    return Terminal::Cancelled;
                }
                chunk = response.chunk() => chunk,
            };

            match chunk {
                Ok(Some(bytes)) => {
                    sink.touch();
                    for message in decoder.feed(&bytes) {
                        if let Some(terminal) = forward(message, sink) {
                            return terminal;
                        }
                    }
                }
                Ok(None) => {
                    for message in decoder.finish() {
                        if let Some(terminal) = forward(message, sink) {
                            return terminal;
                        }
                    }
                    tracing::warn!(
                        subject = %request.subject(),
                        skipped_frames = decoder.skipped(),
                        "Analysis stream ended without completion",
                    );
                    return Terminal::Failed(JobError::Incomplete);
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        return Terminal::Cancelled;
                    }
                    tracing::warn!(
                        subject = %request.subject(),
                        error = %e,
                        "Analysis stream connection lost",
                    );
                    return Terminal::Failed(JobError::connectivity(format!("connection lost: {e}")));
                }
            }
        }
    }
}

/// Push non-terminal records to the sink; return the terminal if this
/// record ends the job.
fn forward(message: StreamMessage, sink: &EventSink) -> Option<Terminal> {
    match message {
        StreamMessage::Progress(progress) => {
            sink.emit(ProgressEvent::Progress {
                step: progress.step,
                total: progress.total,
                label: progress.task,
            });
            None
        }
        StreamMessage::Heartbeat(heartbeat) => {
            sink.emit(ProgressEvent::Heartbeat {
                note: heartbeat.warning,
            });
            None
        }
        StreamMessage::Complete { data } => Some(Terminal::Complete(data)),
        StreamMessage::Error { message } => Some(Terminal::Failed(JobError::Remote(message))),
    }
}
