//! Integration tests for the push-stream transport.
//!
//! Short-lived streams are served by wiremock; streams that must stay
//! open, hang or drop mid-body use the hand-rolled chunked server from
//! `common`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{chunked_server, drain, frame, harness, request, test_api, test_config, Chunk};
use fairvalue_jobs::error::JobError;
use fairvalue_jobs::events::{ProgressEvent, Terminal};
use fairvalue_jobs::transport::{PollTransport, StreamTransport, Transport};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn mount_stream(server: &MockServer, ticker: &str, status: u16, body: String) {
    Mock::given(method("GET"))
        .and(path(format!("/api/stocks/{ticker}/analyze/stream")))
        .respond_with(
            ResponseTemplate::new(status).set_body_raw(body, "text/event-stream"),
        )
        .mount(server)
        .await;
}

fn stream_transport(base_url: &str) -> StreamTransport {
    StreamTransport::new(test_api(base_url))
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

/// Progress and heartbeat records are forwarded in order and the
/// `complete` record becomes the terminal.
#[tokio::test]
async fn test_stream_completes_with_result() {
    let server = MockServer::start().await;
    let body = [
        ": stream opened\n".to_string(),
        frame(json!({"type": "progress", "step": 1, "total": 3, "task": "Fetching price"})),
        frame(json!({"type": "heartbeat", "warning": "still processing"})),
        frame(json!({"type": "progress", "step": 2, "total": 3, "task": "Running DCF"})),
        frame(json!({"type": "complete", "data": {"fair_value": 187.2}})),
    ]
    .concat();
    mount_stream(&server, "AAPL", 200, body).await;

    let mut h = harness("AAPL");
    let terminal = stream_transport(&server.uri())
        .run(&request("AAPL"), &h.sink, &h.cancel)
        .await;

    assert_eq!(terminal, Terminal::Complete(json!({"fair_value": 187.2})));
    let events = drain(&mut h.events);
    assert_eq!(
        events,
        vec![
            ProgressEvent::Progress {
                step: 1,
                total: Some(3),
                label: Some("Fetching price".into()),
            },
            ProgressEvent::Heartbeat {
                note: Some("still processing".into()),
            },
            ProgressEvent::Progress {
                step: 2,
                total: Some(3),
                label: Some("Running DCF".into()),
            },
        ]
    );
}

/// Malformed and unknown records are skipped without failing the job.
#[tokio::test]
async fn test_malformed_frames_are_skipped() {
    let server = MockServer::start().await;
    let body = [
        "data: {\"type\":\"progress\",\"step\":\n".to_string(),
        "data: not json at all\n".to_string(),
        frame(json!({"type": "telemetry", "cpu": 0.9})),
        frame(json!({"type": "progress", "step": 4})),
        frame(json!({"type": "complete", "data": {"ok": true}})),
    ]
    .concat();
    mount_stream(&server, "MSFT", 200, body).await;

    let mut h = harness("MSFT");
    let terminal = stream_transport(&server.uri())
        .run(&request("MSFT"), &h.sink, &h.cancel)
        .await;

    assert_eq!(terminal, Terminal::Complete(json!({"ok": true})));
    assert_eq!(drain(&mut h.events).len(), 1);
}

/// A terminal record without a trailing newline is still honoured.
#[tokio::test]
async fn test_unterminated_final_record_completes() {
    let addr = chunked_server(vec![
        Chunk::Data(frame(json!({"type": "progress", "step": 1}))),
        Chunk::Data("data: {\"type\":\"complete\",".into()),
        Chunk::Pause(Duration::from_millis(20)),
        Chunk::Data("\"data\":{\"v\":2}}".into()),
    ])
    .await;

    let h = harness("NVDA");
    let terminal = stream_transport(&format!("http://{addr}"))
        .run(&request("NVDA"), &h.sink, &h.cancel)
        .await;

    assert_eq!(terminal, Terminal::Complete(json!({"v": 2})));
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// A stream that closes without a `complete` record fails as incomplete.
#[tokio::test]
async fn test_stream_end_without_completion() {
    let server = MockServer::start().await;
    let body = frame(json!({"type": "progress", "step": 1, "total": 8}));
    mount_stream(&server, "AMD", 200, body).await;

    let mut h = harness("AMD");
    let terminal = stream_transport(&server.uri())
        .run(&request("AMD"), &h.sink, &h.cancel)
        .await;

    assert_eq!(terminal, Terminal::Failed(JobError::Incomplete));
    assert_eq!(
        JobError::Incomplete.to_string(),
        "stream ended without completion"
    );
    assert_eq!(drain(&mut h.events).len(), 1);
}

/// An `error` record ends the job with the server's message.
#[tokio::test]
async fn test_error_frame_is_remote_failure() {
    let server = MockServer::start().await;
    let body = [
        frame(json!({"type": "progress", "step": 1})),
        frame(json!({"type": "error", "message": "No filings found for ZZZZ"})),
        frame(json!({"type": "complete", "data": {}})),
    ]
    .concat();
    mount_stream(&server, "ZZZZ", 200, body).await;

    let h = harness("ZZZZ");
    let terminal = stream_transport(&server.uri())
        .run(&request("ZZZZ"), &h.sink, &h.cancel)
        .await;

    assert_eq!(
        terminal,
        Terminal::Failed(JobError::Remote("No filings found for ZZZZ".into()))
    );
}

/// Non-2xx responses surface the server's `detail` message.
#[tokio::test]
async fn test_server_error_status_is_remote_failure() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        "IBM",
        500,
        json!({"detail": "Valuation engine unavailable"}).to_string(),
    )
    .await;

    let h = harness("IBM");
    let terminal = stream_transport(&server.uri())
        .run(&request("IBM"), &h.sink, &h.cancel)
        .await;

    assert_eq!(
        terminal,
        Terminal::Failed(JobError::Remote("Valuation engine unavailable".into()))
    );
}

/// A refused connection is classified as a connectivity failure.
#[tokio::test]
async fn test_connection_refused_is_connectivity() {
    let h = harness("ORCL");
    let terminal = stream_transport("http://127.0.0.1:1")
        .run(&request("ORCL"), &h.sink, &h.cancel)
        .await;

    assert_matches!(terminal, Terminal::Failed(JobError::Connectivity { .. }));
}

/// A connection dropped mid-body is a connectivity failure too.
#[tokio::test]
async fn test_connection_lost_mid_stream() {
    let addr = chunked_server(vec![
        Chunk::Data(frame(json!({"type": "progress", "step": 1}))),
        Chunk::Pause(Duration::from_millis(20)),
        Chunk::Abort,
    ])
    .await;

    let mut h = harness("INTC");
    let terminal = stream_transport(&format!("http://{addr}"))
        .run(&request("INTC"), &h.sink, &h.cancel)
        .await;

    assert_matches!(terminal, Terminal::Failed(JobError::Connectivity { .. }));
    assert_eq!(drain(&mut h.events).len(), 1);
}

// ---------------------------------------------------------------------------
// Cancellation and fallback
// ---------------------------------------------------------------------------

/// Cancelling while the stream is open yields `Cancelled` promptly and
/// never a failure.
#[tokio::test]
async fn test_cancel_mid_stream() {
    let addr = chunked_server(vec![
        Chunk::Data(frame(json!({"type": "progress", "step": 1, "total": 5}))),
        Chunk::Hang,
    ])
    .await;

    let mut h = harness("META");
    let transport = stream_transport(&format!("http://{addr}"));
    let cancel = h.cancel.clone();
    let sink = h.sink;
    let run = tokio::spawn(async move { transport.run(&request("META"), &sink, &cancel).await });

    let first = tokio::time::timeout(Duration::from_secs(5), h.events.recv())
        .await
        .expect("first progress should arrive");
    assert_matches!(first, Some(ProgressEvent::Progress { step: 1, .. }));

    h.cancel.cancel();
    let terminal = tokio::time::timeout(Duration::from_secs(1), run)
        .await
        .expect("cancelled stream should stop promptly")
        .unwrap();
    assert_eq!(terminal, Terminal::Cancelled);
}

/// Cancelling before the stream opens issues no request.
#[tokio::test]
async fn test_cancel_before_open() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness("GOOG");
    h.cancel.cancel();
    let terminal = stream_transport(&server.uri())
        .run(&request("GOOG"), &h.sink, &h.cancel)
        .await;

    assert_eq!(terminal, Terminal::Cancelled);
}

/// A service without the stream endpoint is handled by the poll fallback.
#[tokio::test]
async fn test_missing_stream_endpoint_falls_back_to_poll() {
    let server = MockServer::start().await;
    mount_stream(&server, "KO", 404, String::new()).await;
    Mock::given(method("POST"))
        .and(path("/api/stocks/KO/analyze"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"ticker": "KO", "fair_value": 61.0})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let poll: Arc<dyn Transport> = Arc::new(PollTransport::new(
        test_api(&server.uri()),
        config.poll_interval,
    ));
    let transport = stream_transport(&server.uri()).with_fallback(poll);

    let h = harness("KO");
    let terminal = transport.run(&request("KO"), &h.sink, &h.cancel).await;

    assert_eq!(
        terminal,
        Terminal::Complete(json!({"ticker": "KO", "fair_value": 61.0}))
    );
}

/// Without a fallback, a missing stream endpoint is a remote failure.
#[tokio::test]
async fn test_missing_stream_endpoint_without_fallback_fails() {
    let server = MockServer::start().await;
    mount_stream(&server, "PEP", 404, json!({"detail": "Not Found"}).to_string()).await;

    let h = harness("PEP");
    let terminal = stream_transport(&server.uri())
        .run(&request("PEP"), &h.sink, &h.cancel)
        .await;

    assert_eq!(terminal, Terminal::Failed(JobError::Remote("Not Found".into())));
}
