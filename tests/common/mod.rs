//! Shared test doubles: a scripted credential exchange and a channel-backed
//! transport connector that hands the server end of every accepted
//! connection to the test.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use slack_socket_mode::{
    ApiError, ConnectionOpen, ConnectionOpener, Connector, SocketModeResult, TransportEvent,
    TransportParts, TransportSink,
};
use tokio::sync::mpsc;

/// Credential exchange with optional scripted results. Once the script is
/// exhausted every call succeeds with a fresh single-use URL.
pub struct MockOpener {
    scripted: Mutex<VecDeque<Result<ConnectionOpen, ApiError>>>,
    calls: AtomicUsize,
}

impl MockOpener {
    pub fn new() -> Arc<Self> {
        Self::scripted(Vec::new())
    }

    pub fn scripted(results: Vec<Result<ConnectionOpen, ApiError>>) -> Arc<Self> {
        Arc::new(Self {
            scripted: Mutex::new(results.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queue a result for the next credential-exchange call.
    pub fn push(&self, result: Result<ConnectionOpen, ApiError>) {
        self.scripted.lock().unwrap().push_back(result);
    }
}

#[async_trait]
impl ConnectionOpener for MockOpener {
    async fn open_connection(&self, _app_token: &str) -> Result<ConnectionOpen, ApiError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(result) = self.scripted.lock().unwrap().pop_front() {
            return result;
        }
        Ok(ConnectionOpen::new(format!(
            "wss://mock.slack.test/link/{call}"
        )))
    }
}

/// The server end of an accepted mock connection.
pub struct ServerEnd {
    pub url: String,
    /// Push transport events toward the client. Sending fails once the
    /// client has detached this transport.
    pub events: mpsc::Sender<TransportEvent>,
    /// Text frames the client wrote to this connection.
    pub sent: mpsc::UnboundedReceiver<String>,
}

impl ServerEnd {
    pub async fn send_frame(&self, raw: &str) {
        self.events
            .send(TransportEvent::Message(raw.to_string()))
            .await
            .expect("transport still attached");
    }

    pub async fn hello(&self) {
        self.send_frame(r#"{"type":"hello"}"#).await;
    }

    pub async fn close(&self) {
        self.events
            .send(TransportEvent::Closed)
            .await
            .expect("transport still attached");
    }

    /// Resolves once the client has detached this transport.
    pub async fn detached(&self) {
        self.events.closed().await;
    }
}

/// Connector that accepts every dial instantly and reports the server end
/// of each accepted connection on a channel.
pub struct MockConnector {
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

pub fn mock_connector() -> (Arc<MockConnector>, mpsc::UnboundedReceiver<ServerEnd>) {
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    (
        Arc::new(MockConnector {
            accepted: accepted_tx,
        }),
        accepted_rx,
    )
}

struct MockSink {
    sent: mpsc::UnboundedSender<String>,
    events: mpsc::Sender<TransportEvent>,
}

#[async_trait]
impl TransportSink for MockSink {
    async fn send_text(&mut self, text: &str) -> SocketModeResult<()> {
        let _ = self.sent.send(text.to_string());
        Ok(())
    }

    async fn close(&mut self) -> SocketModeResult<()> {
        // The mock server honors every close request immediately.
        let _ = self.events.send(TransportEvent::Closed).await;
        Ok(())
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> SocketModeResult<TransportParts> {
        let (event_tx, event_rx) = mpsc::channel(16);
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        event_tx
            .send(TransportEvent::Opened)
            .await
            .expect("fresh channel has capacity");
        let _ = self.accepted.send(ServerEnd {
            url: url.to_string(),
            events: event_tx.clone(),
            sent: sent_rx,
        });
        Ok(TransportParts {
            sink: Box::new(MockSink {
                sent: sent_tx,
                events: event_tx,
            }),
            events: event_rx,
        })
    }
}

/// Install a test-friendly tracing subscriber; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Await a future with a generous deadline so a regression hangs the test
/// for seconds, not forever.
pub async fn within<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}
