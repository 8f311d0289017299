//! The Socket Mode client facade.
//!
//! A thin async surface over the session driver: commands go into the
//! serialized session queue, lifecycle notifications come back out as
//! events. The facade holds no connection state of its own; the flag
//! accessors are projections published by the driver.

use std::sync::Arc;

use serde_json::Value;
use tokio::{sync::{mpsc, oneshot}, task::JoinHandle};

use crate::{
    auth::{ConnectionOpen, ConnectionOpener},
    config::SocketModeConfig,
    driver::{self, Command, SessionFlags, SessionInput},
    error::{SocketModeError, SocketModeResult},
    events::{EventBus, EventStream, SocketModeEvent},
    transport::{Connector, TungsteniteConnector},
};

/// A long-lived Slack Socket Mode client.
///
/// ```no_run
/// use std::sync::Arc;
///
/// use slack_socket_mode::{SocketModeClient, SocketModeConfig, SocketModeEvent};
///
/// # async fn run(opener: Arc<dyn slack_socket_mode::ConnectionOpener>) -> slack_socket_mode::SocketModeResult<()> {
/// let config = SocketModeConfig::new("xapp-1-A1-token");
/// let client = SocketModeClient::new(config, opener)?;
///
/// let mut mentions = client.on("app_mention");
/// client.start().await?;
///
/// while let Some(SocketModeEvent::SlackEvent(event)) = mentions.recv().await {
///     if let Some(ack) = &event.ack {
///         ack.ack(serde_json::json!({})).await?;
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct SocketModeClient {
    input_tx: mpsc::Sender<SessionInput>,
    bus: EventBus,
    flags: Arc<SessionFlags>,
    driver: JoinHandle<()>,
}

impl SocketModeClient {
    /// Create a client that dials real websockets.
    pub fn new(
        config: SocketModeConfig,
        opener: Arc<dyn ConnectionOpener>,
    ) -> SocketModeResult<Self> {
        let connector = Arc::new(TungsteniteConnector::new(
            config.connect_timeout,
            config.transport_channel_capacity,
        ));
        Self::with_connector(config, opener, connector)
    }

    /// Create a client with a custom transport connector.
    pub fn with_connector(
        config: SocketModeConfig,
        opener: Arc<dyn ConnectionOpener>,
        connector: Arc<dyn Connector>,
    ) -> SocketModeResult<Self> {
        config.validate().map_err(SocketModeError::config)?;
        let bus = EventBus::new();
        let (input_tx, flags, driver) = driver::spawn(config, opener, connector, bus.clone());
        Ok(Self {
            input_tx,
            bus,
            flags,
            driver,
        })
    }

    /// Begin connecting. Resolves with the credential-exchange result once
    /// the session authenticates; rejects if the session terminates first.
    pub async fn start(&self) -> SocketModeResult<ConnectionOpen> {
        let mut authenticated = self.bus.once("authenticated");
        let mut disconnected = self.bus.once("disconnected");
        self.command(Command::Start).await?;
        tokio::select! {
            event = authenticated.recv() => match event {
                Some(SocketModeEvent::Authenticated(open)) => Ok(open),
                _ => Err(SocketModeError::internal("session driver terminated")),
            },
            event = disconnected.recv() => match event {
                Some(SocketModeEvent::Disconnected { error: Some(error) }) => {
                    Err((*error).clone())
                }
                _ => Err(SocketModeError::internal(
                    "disconnected before authenticating",
                )),
            },
        }
    }

    /// Disconnect and stay disconnected. Resolves once the session reaches
    /// the disconnected state, or fails with the error that ended the
    /// session if the disconnect raced a terminal failure. Safe to call at
    /// any time.
    pub async fn disconnect(&self) -> SocketModeResult<()> {
        let mut disconnected = self.bus.once("disconnected");
        self.command(Command::Disconnect).await?;
        match disconnected.recv().await {
            Some(SocketModeEvent::Disconnected { error: Some(error) }) => Err((*error).clone()),
            Some(_) => Ok(()),
            None => Err(SocketModeError::internal("session driver terminated")),
        }
    }

    /// Send an envelope over the serving connection. Fails unless the
    /// session is ready.
    pub async fn send(
        &self,
        envelope_id: impl Into<String>,
        payload: Value,
    ) -> SocketModeResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(Command::Send {
            envelope_id: envelope_id.into(),
            payload,
            reply: reply_tx,
        })
        .await?;
        reply_rx
            .await
            .map_err(|_| SocketModeError::internal("session driver terminated"))?
    }

    /// Subscribe to a named event: a lifecycle name (`"ready"`,
    /// `"disconnected"`, ...), an application event type (`"app_mention"`,
    /// `"slash_command"`, ...), or the catch-all `"slack_event"`.
    pub fn on(&self, event: &str) -> EventStream {
        self.bus.subscribe(event)
    }

    /// Subscribe to a single occurrence of a named event.
    pub fn once(&self, event: &str) -> EventStream {
        self.bus.once(event)
    }

    /// Whether the session currently holds an open websocket connection.
    pub fn connected(&self) -> bool {
        self.flags.connected()
    }

    /// Whether the session holds unexpired credentials.
    pub fn authenticated(&self) -> bool {
        self.flags.authenticated()
    }

    /// Whether the session can carry traffic right now.
    pub fn ready(&self) -> bool {
        self.flags.ready()
    }

    async fn command(&self, command: Command) -> SocketModeResult<()> {
        self.input_tx
            .send(SessionInput::Command(command))
            .await
            .map_err(|_| SocketModeError::internal("session driver terminated"))
    }
}

impl Drop for SocketModeClient {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
