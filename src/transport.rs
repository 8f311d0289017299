//! WebSocket transport abstraction.
//!
//! The session driver never touches a socket directly: each connection is a
//! [`TransportSink`] for writes plus a channel of [`TransportEvent`]s for
//! reads, produced by a [`Connector`]. The default connector dials over
//! `tokio-tungstenite`; tests swap in channel-backed fakes.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};
use tracing::{debug, trace};

use crate::error::{SocketModeError, SocketModeResult};

/// Event produced by the read half of a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The websocket handshake completed.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// A protocol-level ping arrived from the server.
    Ping,
    /// The socket closed, cleanly or not.
    Closed,
    /// The socket failed with an error.
    Failed(String),
}

/// Write half of a transport.
#[async_trait]
pub trait TransportSink: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: &str) -> SocketModeResult<()>;

    /// Initiate a graceful close. The matching [`TransportEvent::Closed`]
    /// arrives on the event channel once the close completes.
    async fn close(&mut self) -> SocketModeResult<()>;
}

/// A freshly established transport: its write half plus its event stream.
pub struct TransportParts {
    pub sink: Box<dyn TransportSink>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Establishes transports. One call per websocket URL; the URLs are
/// single-use, so a failed dial is reported and never retried here.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> SocketModeResult<TransportParts>;
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Production connector over `tokio-tungstenite`.
pub struct TungsteniteConnector {
    connect_timeout: Duration,
    channel_capacity: usize,
}

impl TungsteniteConnector {
    pub fn new(connect_timeout: Duration, channel_capacity: usize) -> Self {
        Self {
            connect_timeout,
            channel_capacity,
        }
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> SocketModeResult<TransportParts> {
        debug!(url, "establishing websocket connection");
        let connect = connect_async(url);
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| SocketModeError::websocket("websocket connect timed out"))?
            .map_err(|e| SocketModeError::websocket(e.to_string()))?;

        let (sink, mut source) = stream.split();
        let (event_tx, event_rx) = mpsc::channel(self.channel_capacity);

        tokio::spawn(async move {
            // The handshake already completed, so the open notification is
            // unconditional.
            if event_tx.send(TransportEvent::Opened).await.is_err() {
                return;
            }
            loop {
                let event = match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        trace!(len = text.len(), "websocket text frame received");
                        TransportEvent::Message(text.to_string())
                    }
                    Some(Ok(Message::Ping(_))) => TransportEvent::Ping,
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = event_tx.send(TransportEvent::Closed).await;
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(error)) => {
                        // An errored socket is finished; report the failure
                        // and then its close.
                        let _ = event_tx
                            .send(TransportEvent::Failed(error.to_string()))
                            .await;
                        let _ = event_tx.send(TransportEvent::Closed).await;
                        return;
                    }
                };
                if event_tx.send(event).await.is_err() {
                    return;
                }
            }
        });

        Ok(TransportParts {
            sink: Box::new(TungsteniteSink { inner: sink }),
            events: event_rx,
        })
    }
}

struct TungsteniteSink {
    inner: WsSink,
}

#[async_trait]
impl TransportSink for TungsteniteSink {
    async fn send_text(&mut self, text: &str) -> SocketModeResult<()> {
        self.inner
            .send(Message::text(text))
            .await
            .map_err(|e| SocketModeError::websocket(e.to_string()))
    }

    async fn close(&mut self) -> SocketModeResult<()> {
        self.inner
            .send(Message::Close(None))
            .await
            .map_err(|e| SocketModeError::websocket(e.to_string()))
    }
}
