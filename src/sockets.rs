//! Primary/secondary transport bookkeeping.
//!
//! A refresh opens its replacement websocket while the old one keeps
//! serving, so up to two transports are attached at once. The newest is
//! always the secondary; teardown retires the oldest and promotes the
//! secondary to primary. Every transport carries a [`TransportId`], and
//! socket events are stamped with the id of the transport that produced
//! them, so events from an already-detached socket can be fenced off.

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    driver::SessionInput,
    error::SocketModeResult,
    transport::{TransportEvent, TransportParts, TransportSink},
};

/// Identifier of a single attached transport, unique within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct TransportId(u64);

struct TransportHandle {
    id: TransportId,
    sink: Box<dyn TransportSink>,
    forwarder: JoinHandle<()>,
}

impl TransportHandle {
    fn detach(self) {
        self.forwarder.abort();
    }
}

/// Owns the attached transports on behalf of the session driver.
pub(crate) struct TransportManager {
    primary: Option<TransportHandle>,
    secondary: Option<TransportHandle>,
    next_id: u64,
    input_tx: mpsc::Sender<SessionInput>,
}

impl TransportManager {
    pub(crate) fn new(input_tx: mpsc::Sender<SessionInput>) -> Self {
        Self {
            primary: None,
            secondary: None,
            next_id: 0,
            input_tx,
        }
    }

    /// Attach a freshly connected transport and start forwarding its events
    /// into the session input queue. The first transport becomes primary;
    /// while a primary exists the new one is the secondary.
    pub(crate) fn attach(&mut self, parts: TransportParts) -> TransportId {
        self.next_id += 1;
        let id = TransportId(self.next_id);
        let forwarder = forward(id, parts.events, self.input_tx.clone());
        let handle = TransportHandle {
            id,
            sink: parts.sink,
            forwarder,
        };
        if self.primary.is_none() {
            debug!(transport_id = id.0, "attaching primary transport");
            self.primary = Some(handle);
        } else {
            if let Some(stale) = self.secondary.take() {
                // Two refreshes raced; only the newest replacement matters.
                warn!(transport_id = stale.id.0, "replacing stale secondary transport");
                stale.detach();
            }
            debug!(transport_id = id.0, "attaching secondary transport");
            self.secondary = Some(handle);
        }
        id
    }

    /// Retire the oldest transport. With a secondary attached this promotes
    /// it to primary; with only a primary this leaves no transport. Calling
    /// with nothing attached is a no-op.
    pub(crate) fn teardown(&mut self) {
        if let Some(old) = self.primary.take() {
            debug!(transport_id = old.id.0, "detaching transport");
            old.detach();
        }
        self.primary = self.secondary.take();
    }

    /// Detach everything immediately.
    pub(crate) fn detach_all(&mut self) {
        if let Some(handle) = self.primary.take() {
            handle.detach();
        }
        if let Some(handle) = self.secondary.take() {
            handle.detach();
        }
    }

    /// Send a text frame over the serving (primary) transport.
    pub(crate) async fn send_serving(&mut self, text: &str) -> SocketModeResult<()> {
        match self.primary.as_mut() {
            Some(handle) => handle.sink.send_text(text).await,
            None => Err(crate::error::SocketModeError::SendWhileDisconnected),
        }
    }

    /// Gracefully close the serving transport, if one is attached.
    pub(crate) async fn close_serving(&mut self) -> SocketModeResult<()> {
        match self.primary.as_mut() {
            Some(handle) => handle.sink.close().await,
            None => Ok(()),
        }
    }

    /// Whether `id` names a currently attached transport. Events from
    /// detached transports are stale and must be dropped.
    pub(crate) fn is_attached(&self, id: TransportId) -> bool {
        self.primary.as_ref().is_some_and(|h| h.id == id)
            || self.secondary.as_ref().is_some_and(|h| h.id == id)
    }

    pub(crate) fn has_transport(&self) -> bool {
        self.primary.is_some()
    }
}

impl Drop for TransportManager {
    fn drop(&mut self) {
        self.detach_all();
    }
}

fn forward(
    id: TransportId,
    mut events: mpsc::Receiver<TransportEvent>,
    input_tx: mpsc::Sender<SessionInput>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if input_tx
                .send(SessionInput::Socket { id, event })
                .await
                .is_err()
            {
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct NullSink;

    #[async_trait]
    impl TransportSink for NullSink {
        async fn send_text(&mut self, _text: &str) -> SocketModeResult<()> {
            Ok(())
        }

        async fn close(&mut self) -> SocketModeResult<()> {
            Ok(())
        }
    }

    fn parts() -> (TransportParts, mpsc::Sender<TransportEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (
            TransportParts {
                sink: Box::new(NullSink),
                events: rx,
            },
            tx,
        )
    }

    #[tokio::test]
    async fn test_first_transport_is_primary() {
        let (input_tx, _input_rx) = mpsc::channel(8);
        let mut manager = TransportManager::new(input_tx);
        assert!(!manager.has_transport());

        let (first, _tx) = parts();
        let id = manager.attach(first);
        assert!(manager.has_transport());
        assert!(manager.is_attached(id));
    }

    #[tokio::test]
    async fn test_teardown_promotes_secondary() {
        let (input_tx, _input_rx) = mpsc::channel(8);
        let mut manager = TransportManager::new(input_tx);

        let (first, _tx1) = parts();
        let (second, _tx2) = parts();
        let old = manager.attach(first);
        let new = manager.attach(second);

        manager.teardown();
        assert!(!manager.is_attached(old));
        assert!(manager.is_attached(new));
        assert!(manager.has_transport());

        manager.teardown();
        assert!(!manager.is_attached(new));
        assert!(!manager.has_transport());

        // Idempotent with nothing attached.
        manager.teardown();
        assert!(!manager.has_transport());
    }

    #[tokio::test]
    async fn test_stale_secondary_is_replaced() {
        let (input_tx, _input_rx) = mpsc::channel(8);
        let mut manager = TransportManager::new(input_tx);

        let (first, _tx1) = parts();
        let (second, _tx2) = parts();
        let (third, _tx3) = parts();
        manager.attach(first);
        let stale = manager.attach(second);
        let fresh = manager.attach(third);

        assert!(!manager.is_attached(stale));
        assert!(manager.is_attached(fresh));
    }

    #[tokio::test]
    async fn test_events_are_stamped_with_transport_id() {
        let (input_tx, mut input_rx) = mpsc::channel(8);
        let mut manager = TransportManager::new(input_tx);

        let (transport, event_tx) = parts();
        let id = manager.attach(transport);
        event_tx.send(TransportEvent::Opened).await.unwrap();

        match input_rx.recv().await.unwrap() {
            SessionInput::Socket { id: got, event } => {
                assert_eq!(got, id);
                assert_eq!(event, TransportEvent::Opened);
            }
            other => panic!("unexpected input: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_without_transport_is_rejected() {
        let (input_tx, _input_rx) = mpsc::channel(8);
        let mut manager = TransportManager::new(input_tx);
        assert_eq!(
            manager.send_serving("x").await,
            Err(crate::error::SocketModeError::SendWhileDisconnected)
        );
    }
}
