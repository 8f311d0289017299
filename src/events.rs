//! Lifecycle and application event delivery.
//!
//! Subscribers register by event name and receive cloned events over
//! unbounded channels, so a slow subscriber can never stall the session
//! driver. The listener table is an `scc::HashMap` for lock-free emission
//! from the driver while subscribers come and go on other tasks.

use std::{
    fmt,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use futures_util::Stream;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::{
    auth::{ApiError, ConnectionOpen},
    driver::{Command, SessionInput},
    error::{SocketModeError, SocketModeResult},
    protocol::OutgoingEnvelope,
};

/// Name under which every application frame is additionally raised,
/// regardless of its own type.
pub const AGGREGATE_EVENT: &str = "slack_event";

/// An event delivered to subscribers.
#[derive(Clone, Debug)]
pub enum SocketModeEvent {
    /// The session started a connection attempt.
    Connecting,
    /// The server handshake (`hello`) completed.
    Connected,
    /// The session can carry traffic.
    Ready,
    /// A manual disconnect began.
    Disconnecting,
    /// The session is cycling back to a fresh connection attempt.
    Reconnecting,
    /// The session reached `disconnected`, with the terminal error if the
    /// disconnect was caused by one.
    Disconnected { error: Option<Arc<SocketModeError>> },
    /// The credential exchange succeeded.
    Authenticated(ConnectionOpen),
    /// A frame was written to the wire.
    OutgoingMessage(OutgoingEnvelope),
    /// A credential-exchange attempt failed.
    UnableToSocketModeStart(Arc<ApiError>),
    /// A non-fatal error (transport failures, rejected sends) surfaced.
    SocketError(Arc<SocketModeError>),
    /// An application frame arrived.
    SlackEvent(SlackEvent),
}

/// An application frame as delivered to subscribers.
#[derive(Clone)]
pub struct SlackEvent {
    /// Outer frame type (`events_api`, `slash_command`, ...).
    pub frame_type: String,
    /// The frame's application payload.
    pub body: Value,
    /// Inner event object for `events_api`-style frames.
    pub event: Option<Value>,
    /// Acknowledgement handle, present when the frame carried an
    /// `envelope_id`.
    pub ack: Option<Acker>,
}

impl fmt::Debug for SlackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackEvent")
            .field("frame_type", &self.frame_type)
            .field("acks", &self.ack.is_some())
            .finish_non_exhaustive()
    }
}

/// Handle for acknowledging a received envelope.
///
/// Acknowledgements are ordinary sends: they go through the session driver
/// and are rejected if the session is no longer ready.
#[derive(Clone)]
pub struct Acker {
    envelope_id: String,
    input_tx: mpsc::Sender<SessionInput>,
}

impl Acker {
    pub(crate) fn new(envelope_id: String, input_tx: mpsc::Sender<SessionInput>) -> Self {
        Self {
            envelope_id,
            input_tx,
        }
    }

    /// Identifier of the envelope this handle acknowledges.
    pub fn envelope_id(&self) -> &str {
        &self.envelope_id
    }

    /// Acknowledge the envelope with the given payload.
    pub async fn ack(&self, payload: Value) -> SocketModeResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.input_tx
            .send(SessionInput::Command(Command::Send {
                envelope_id: self.envelope_id.clone(),
                payload,
                reply: reply_tx,
            }))
            .await
            .map_err(|_| SocketModeError::SendWhileDisconnected)?;
        reply_rx
            .await
            .map_err(|_| SocketModeError::SendWhileDisconnected)?
    }
}

impl fmt::Debug for Acker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acker")
            .field("envelope_id", &self.envelope_id)
            .finish_non_exhaustive()
    }
}

struct Registration {
    id: u64,
    once: bool,
    tx: mpsc::UnboundedSender<SocketModeEvent>,
}

struct BusInner {
    listeners: scc::HashMap<String, Vec<Registration>>,
    next_id: AtomicU64,
}

/// Fan-out bus over named events.
#[derive(Clone)]
pub(crate) struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: scc::HashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a persistent subscription to `event`.
    pub(crate) fn subscribe(&self, event: &str) -> EventStream {
        self.register(event, false)
    }

    /// Register a subscription that is removed after one delivery.
    pub(crate) fn once(&self, event: &str) -> EventStream {
        self.register(event, true)
    }

    fn register(&self, event: &str, once: bool) -> EventStream {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let registration = Registration { id, once, tx };
        self.inner
            .listeners
            .entry_sync(event.to_string())
            .or_insert_with(Vec::new)
            .get_mut()
            .push(registration);
        EventStream {
            event: event.to_string(),
            id,
            bus: self.clone(),
            rx,
        }
    }

    /// Deliver `payload` to every subscriber of `event`. Closed and
    /// once-subscriptions are pruned as part of delivery.
    pub(crate) fn emit(&self, event: &str, payload: SocketModeEvent) {
        trace!(event, "emitting event");
        let _ = self.inner.listeners.update_sync(event, |_, regs| {
            regs.retain(|reg| reg.tx.send(payload.clone()).is_ok() && !reg.once);
        });
        let _ = self
            .inner
            .listeners
            .remove_if_sync(event, |regs| regs.is_empty());
    }

    fn unsubscribe(&self, event: &str, id: u64) {
        let _ = self.inner.listeners.update_sync(event, |_, regs| {
            regs.retain(|reg| reg.id != id);
        });
        let _ = self
            .inner
            .listeners
            .remove_if_sync(event, |regs| regs.is_empty());
    }
}

/// Stream of events for one subscription. Dropping the stream removes the
/// subscription.
pub struct EventStream {
    event: String,
    id: u64,
    bus: EventBus,
    rx: mpsc::UnboundedReceiver<SocketModeEvent>,
}

impl EventStream {
    /// Receive the next event, or `None` once the subscription is finished.
    pub async fn recv(&mut self) -> Option<SocketModeEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = SocketModeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.event, self.id);
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}
