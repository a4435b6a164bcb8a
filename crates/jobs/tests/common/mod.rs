#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fairvalue_core::{JobRequest, SubjectKey};
use fairvalue_jobs::api::AnalysisApi;
use fairvalue_jobs::events::{ProgressEvent, Terminal};
use fairvalue_jobs::registry::{JobRegistry, JobSlot};
use fairvalue_jobs::transport::{EventSink, Transport};
use fairvalue_jobs::JobsConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Config and request helpers
// ---------------------------------------------------------------------------

/// Build a test `JobsConfig` pointing at `base_url` with a short poll
/// interval so poll-loop tests finish quickly.
pub fn test_config(base_url: &str) -> JobsConfig {
    let mut config = JobsConfig::with_base_url(base_url).expect("valid test URL");
    config.poll_interval = Duration::from_millis(20);
    config.connect_timeout = Duration::from_secs(2);
    config
}

pub fn test_api(base_url: &str) -> AnalysisApi {
    AnalysisApi::new(&test_config(base_url)).expect("client should build")
}

pub fn request(ticker: &str) -> JobRequest {
    JobRequest::for_ticker(ticker).expect("valid ticker")
}

pub fn subject(ticker: &str) -> SubjectKey {
    SubjectKey::parse(ticker).expect("valid ticker")
}

/// A registered job with a sink (no watchdog) and the consumer's receiver.
pub struct Harness {
    pub registry: Arc<JobRegistry>,
    pub slot: Arc<JobSlot>,
    pub sink: EventSink,
    pub events: mpsc::UnboundedReceiver<ProgressEvent>,
    pub cancel: CancellationToken,
}

pub fn harness(ticker: &str) -> Harness {
    let registry = Arc::new(JobRegistry::new());
    let (slot, events) = registry.register(subject(ticker));
    registry.activate(&slot);
    let sink = EventSink::new(Arc::clone(&registry), Arc::clone(&slot), None);
    let cancel = slot.cancel_token().clone();
    Harness {
        registry,
        slot,
        sink,
        events,
        cancel,
    }
}

/// Everything currently queued for the consumer.
pub fn drain(events: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Frame a stream payload as a wire record.
pub fn frame(payload: serde_json::Value) -> String {
    format!("data: {payload}\n")
}

// ---------------------------------------------------------------------------
// Chunked streaming server
// ---------------------------------------------------------------------------

/// One step of a scripted streaming response.
#[derive(Debug, Clone)]
pub enum Chunk {
    /// Write this text as one HTTP chunk.
    Data(String),
    /// Wait before the next step.
    Pause(Duration),
    /// Keep the connection open without writing anything more.
    Hang,
    /// Close the socket without the terminating chunk.
    Abort,
}

/// Serve a single `text/event-stream` response, written chunk by chunk.
///
/// Accepts one connection, reads the request head, then plays `script`.
/// Ends with a proper terminating chunk unless the script hangs or aborts.
pub async fn chunked_server(script: Vec<Chunk>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };

        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => head.extend_from_slice(&buf[..n]),
            }
        }

        let headers = "HTTP/1.1 200 OK\r\n\
                       content-type: text/event-stream\r\n\
                       transfer-encoding: chunked\r\n\
                       connection: close\r\n\r\n";
        if socket.write_all(headers.as_bytes()).await.is_err() {
            return;
        }

        for step in script {
            match step {
                Chunk::Data(text) => {
                    let encoded = format!("{:x}\r\n{text}\r\n", text.len());
                    if socket.write_all(encoded.as_bytes()).await.is_err() {
                        return;
                    }
                    let _ = socket.flush().await;
                }
                Chunk::Pause(delay) => tokio::time::sleep(delay).await,
                Chunk::Hang => {
                    std::future::pending::<()>().await;
                }
                Chunk::Abort => return,
            }
        }

        let _ = socket.write_all(b"0\r\n\r\n").await;
        let _ = socket.shutdown().await;
    });

    addr
}

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

/// One action of a [`ScriptedTransport`] run.
#[derive(Debug, Clone)]
pub enum Step {
    Emit(ProgressEvent),
    /// Sleep; returns `Cancelled` early if cancelled (unless ignoring).
    Sleep(Duration),
    /// Wait for cancellation, then return `Cancelled`.
    Hang,
    /// From here on, behave like a transport that never checks cancellation.
    IgnoreCancel,
}

#[derive(Debug, Clone)]
pub struct Script {
    pub steps: Vec<Step>,
    pub terminal: Terminal,
}

impl Script {
    pub fn new(steps: Vec<Step>, terminal: Terminal) -> Self {
        Self { steps, terminal }
    }

    pub fn hang() -> Self {
        Self::new(vec![Step::Hang], Terminal::Cancelled)
    }
}

/// Transport that plays pre-recorded scripts, one per `run`.
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    watchdog: bool,
    /// Signalled each time a run observes cancellation.
    pub cancel_seen: Notify,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            watchdog: true,
            cancel_seen: Notify::new(),
        })
    }

    pub fn without_watchdog(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            watchdog: false,
            cancel_seen: Notify::new(),
        })
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn uses_watchdog(&self) -> bool {
        self.watchdog
    }

    async fn run(
        &self,
        _request: &JobRequest,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Terminal {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Script::hang);

        let mut honour_cancel = true;
        for step in script.steps {
            match step {
                Step::Emit(event) => {
                    sink.emit(event);
                }
                Step::Sleep(delay) if honour_cancel => {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            self.cancel_seen.notify_one();
                            return Terminal::Cancelled;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Step::Sleep(delay) => tokio::time::sleep(delay).await,
                Step::Hang => {
                    cancel.cancelled().await;
                    self.cancel_seen.notify_one();
                    return Terminal::Cancelled;
                }
                Step::IgnoreCancel => honour_cancel = false,
            }
        }
        script.terminal
    }
}

pub fn progress(step: u32) -> ProgressEvent {
    ProgressEvent::Progress {
        step,
        total: Some(10),
        label: None,
    }
}

pub fn heartbeat() -> ProgressEvent {
    ProgressEvent::Heartbeat { note: None }
}
