//! The session driver task.
//!
//! Everything that can change the connection state funnels into one mpsc
//! queue: facade commands, socket events, heartbeat timeouts. A single task
//! consumes the queue, runs the transition table, and executes the resulting
//! effects, so no two state changes ever race. Facade methods and
//! acknowledgement handles talk to the driver exclusively through
//! [`SessionInput`].

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error, trace, warn};

use crate::{
    auth::ConnectionOpener,
    config::SocketModeConfig,
    error::{SocketModeError, SocketModeResult},
    events::{AGGREGATE_EVENT, Acker, EventBus, SlackEvent, SocketModeEvent},
    heartbeat::HeartbeatMonitor,
    protocol::{self, IncomingFrame, OutgoingEnvelope},
    sockets::{TransportId, TransportManager},
    state::{ConnectionState, Effect, StateEvent, TransitionContext, transition},
    transport::{Connector, TransportEvent},
};

/// Facade request to the driver.
#[derive(Debug)]
pub(crate) enum Command {
    Start,
    Disconnect,
    Send {
        envelope_id: String,
        payload: Value,
        reply: oneshot::Sender<SocketModeResult<()>>,
    },
}

/// One item on the serialized session queue.
#[derive(Debug)]
pub(crate) enum SessionInput {
    Command(Command),
    Socket {
        id: TransportId,
        event: TransportEvent,
    },
    HeartbeatTimeout {
        generation: u64,
    },
}

/// Lock-free snapshot of the derived state flags, readable from any task.
#[derive(Debug, Default)]
pub(crate) struct SessionFlags {
    connected: AtomicBool,
    authenticated: AtomicBool,
    ready: AtomicBool,
}

impl SessionFlags {
    pub(crate) fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub(crate) fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn project(&self, state: &ConnectionState) {
        self.connected.store(state.is_connected(), Ordering::Release);
        self.authenticated
            .store(state.is_authenticated(), Ordering::Release);
        self.ready.store(state.is_ready(), Ordering::Release);
    }
}

/// Spawn the driver task for one session.
pub(crate) fn spawn(
    config: SocketModeConfig,
    opener: Arc<dyn ConnectionOpener>,
    connector: Arc<dyn Connector>,
    bus: EventBus,
) -> (mpsc::Sender<SessionInput>, Arc<SessionFlags>, JoinHandle<()>) {
    let (input_tx, input_rx) = mpsc::channel(config.input_channel_capacity);
    let flags = Arc::new(SessionFlags::default());
    let session = Session {
        heartbeat: HeartbeatMonitor::new(config.ping_timeout, input_tx.clone()),
        transports: TransportManager::new(input_tx.clone()),
        config,
        opener,
        connector,
        bus,
        flags: Arc::clone(&flags),
        input_tx: input_tx.clone(),
        input_rx,
        state: ConnectionState::Disconnected,
        pending: VecDeque::new(),
        bad_connection: false,
    };
    let task = tokio::spawn(session.run());
    (input_tx, flags, task)
}

struct Session {
    config: SocketModeConfig,
    opener: Arc<dyn ConnectionOpener>,
    connector: Arc<dyn Connector>,
    bus: EventBus,
    flags: Arc<SessionFlags>,
    input_tx: mpsc::Sender<SessionInput>,
    input_rx: mpsc::Receiver<SessionInput>,
    state: ConnectionState,
    /// State-machine tokens awaiting processing, drained to exhaustion
    /// after every input.
    pending: VecDeque<StateEvent>,
    transports: TransportManager,
    heartbeat: HeartbeatMonitor,
    /// Set when the server went quiet; cleared when the replacement
    /// connection reaches ready and the stale one has been retired.
    bad_connection: bool,
}

impl Session {
    async fn run(mut self) {
        while let Some(input) = self.input_rx.recv().await {
            self.handle_input(input).await;
            self.drain().await;
        }
        self.heartbeat.cancel();
        self.transports.detach_all();
    }

    async fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Command(Command::Start) => {
                self.pending.push_back(StateEvent::Start);
            }
            SessionInput::Command(Command::Disconnect) => {
                self.pending.push_back(StateEvent::ExplicitDisconnect);
            }
            SessionInput::Command(Command::Send {
                envelope_id,
                payload,
                reply,
            }) => {
                let result = self.send_envelope(envelope_id, payload).await;
                let _ = reply.send(result);
            }
            SessionInput::Socket { id, event } => {
                if !self.transports.is_attached(id) {
                    trace!(?id, ?event, "dropping event from detached transport");
                    return;
                }
                self.handle_socket_event(event);
            }
            SessionInput::HeartbeatTimeout { generation } => {
                if self.heartbeat.is_current(generation) && self.state.is_ready() {
                    warn!("no server pings received within the timeout");
                    self.bad_connection = true;
                    self.pending.push_back(StateEvent::ServerPingsNotReceived);
                }
            }
        }
    }

    fn handle_socket_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                self.pending.push_back(StateEvent::WebSocketOpen);
            }
            TransportEvent::Message(text) => self.handle_message(&text),
            TransportEvent::Ping => {
                // A live server; push the quiet-server deadline out again.
                if self.state.is_ready() && !self.bad_connection {
                    self.heartbeat.arm();
                }
            }
            TransportEvent::Closed => {
                self.pending.push_back(StateEvent::WebSocketClose);
            }
            // Non-fatal on its own; the transport delivers its close
            // separately.
            TransportEvent::Failed(message) => {
                let error = Arc::new(SocketModeError::websocket(message));
                error!(%error, "websocket transport failed");
                self.bus.emit("error", SocketModeEvent::SocketError(error));
            }
        }
    }

    fn handle_message(&mut self, raw: &str) {
        let Some(frame) = protocol::decode_frame(raw) else {
            return;
        };
        if let Some(token) = protocol::control_token(&frame) {
            debug!(kind = %frame.kind, "control frame received");
            self.pending.push_back(token);
            return;
        }
        self.dispatch_application_frame(frame);
    }

    /// Raise an application frame under its event name and under the
    /// aggregate name every subscriber can use as a catch-all.
    fn dispatch_application_frame(&self, frame: IncomingFrame) {
        let name = protocol::event_name(&frame);
        let ack = frame
            .envelope_id
            .clone()
            .map(|id| Acker::new(id, self.input_tx.clone()));
        let event = SocketModeEvent::SlackEvent(SlackEvent {
            frame_type: frame.kind.clone(),
            event: protocol::inner_event(&frame).cloned(),
            body: frame.payload,
            ack,
        });
        trace!(%name, "dispatching application frame");
        self.bus.emit(&name, event.clone());
        self.bus.emit(AGGREGATE_EVENT, event);
    }

    async fn send_envelope(
        &mut self,
        envelope_id: String,
        payload: Value,
    ) -> SocketModeResult<()> {
        if !self.transports.has_transport() {
            return Err(SocketModeError::SendWhileDisconnected);
        }
        if !self.state.is_ready() {
            return Err(SocketModeError::SendWhileNotReady);
        }
        let envelope = OutgoingEnvelope {
            envelope_id,
            payload,
        };
        let text = serde_json::to_string(&envelope)
            .map_err(|e| SocketModeError::internal(e.to_string()))?;
        self.bus
            .emit("outgoing_message", SocketModeEvent::OutgoingMessage(envelope));
        self.transports.send_serving(&text).await
    }

    /// Step the machine until the token queue is empty.
    async fn drain(&mut self) {
        while let Some(event) = self.pending.pop_front() {
            let ctx = TransitionContext {
                auto_reconnect: self.config.auto_reconnect_enabled,
                bad_connection: self.bad_connection,
                has_transport: self.transports.has_transport(),
            };
            let Some(step) = transition(&self.state, &event, &ctx) else {
                trace!(state = self.state.label(), ?event, "event ignored");
                continue;
            };
            debug!(
                from = self.state.label(),
                to = step.next.label(),
                ?event,
                "state transition"
            );
            self.state = step.next;
            for effect in step.effects {
                self.apply(effect).await;
            }
            self.flags.project(&self.state);
        }
    }

    async fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::EmitConnecting => self.bus.emit("connecting", SocketModeEvent::Connecting),
            Effect::EmitConnected => self.bus.emit("connected", SocketModeEvent::Connected),
            Effect::EmitReady => self.bus.emit("ready", SocketModeEvent::Ready),
            Effect::EmitDisconnecting => {
                self.bus.emit("disconnecting", SocketModeEvent::Disconnecting);
            }
            Effect::EmitReconnecting => {
                self.bus.emit("reconnecting", SocketModeEvent::Reconnecting);
            }
            Effect::EmitDisconnected(error) => {
                self.bus
                    .emit("disconnected", SocketModeEvent::Disconnected { error });
            }
            Effect::EmitAuthenticated(open) => {
                self.bus
                    .emit("authenticated", SocketModeEvent::Authenticated(open));
            }
            Effect::EmitUnableToStart(error) => {
                self.bus.emit(
                    "unable_to_socket_mode_start",
                    SocketModeEvent::UnableToSocketModeStart(error),
                );
            }
            Effect::OpenConnection => {
                debug!("exchanging credentials for a websocket url");
                match self.opener.open_connection(&self.config.app_token).await {
                    Ok(open) => self.pending.push_back(StateEvent::AuthSuccess(open)),
                    Err(api_error) => {
                        warn!(%api_error, "credential exchange failed");
                        self.pending
                            .push_back(StateEvent::AuthFailure(Arc::new(api_error)));
                    }
                }
            }
            Effect::OpenTransport(url) => match self.connector.connect(&url).await {
                Ok(parts) => {
                    self.transports.attach(parts);
                }
                Err(error) => {
                    let error = Arc::new(error);
                    error!(%error, "unable to establish websocket connection");
                    self.bus.emit("error", SocketModeEvent::SocketError(error));
                    self.pending.push_back(StateEvent::WebSocketClose);
                }
            },
            Effect::TeardownTransport => self.transports.teardown(),
            Effect::CloseTransport => {
                if let Err(error) = self.transports.close_serving().await {
                    let error = Arc::new(error);
                    warn!(%error, "graceful close failed, dropping the socket");
                    self.bus.emit("error", SocketModeEvent::SocketError(error));
                    self.pending.push_back(StateEvent::WebSocketClose);
                }
            }
            Effect::StartHeartbeat => self.heartbeat.arm(),
            Effect::CancelHeartbeat => self.heartbeat.cancel(),
            Effect::ClearBadConnection => self.bad_connection = false,
            // Synthetic tokens run before anything queued behind them.
            Effect::Dispatch(token) => self.pending.push_front(token),
        }
    }
}
