use async_trait::async_trait;
use fairvalue_core::JobRequest;
use tokio_util::sync::CancellationToken;

use super::{EventSink, Transport};
use crate::api::AnalysisApi;
use crate::events::Terminal;

/// Single request/response fetch for callers that do not watch progress.
pub struct DirectTransport {
    api: AnalysisApi,
}

impl DirectTransport {
    pub fn new(api: AnalysisApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Transport for DirectTransport {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn uses_watchdog(&self) -> bool {
        false
    }

    async fn run(
        &self,
        request: &JobRequest,
        _sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Terminal {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Terminal::Cancelled,
            result = self.api.fetch_analysis(request) => result,
        };

        match fetched {
            Ok(result) => Terminal::Complete(result),
            Err(e) => {
                tracing::warn!(subject = %request.subject(), error = %e, "Analysis fetch failed");
                Terminal::Failed(e.into())
            }
        }
    }
}
