//! The Socket Mode envelope protocol.
//!
//! Outgoing frames are `{envelope_id, payload}` acknowledgements; incoming
//! frames are `{type, reason?, envelope_id?, payload}`. A small set of
//! control frames is intercepted and turned into state-machine tokens; all
//! other frames are application events dispatched to subscribers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::state::StateEvent;

/// Outgoing acknowledgement/send frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutgoingEnvelope {
    /// Identifier of the envelope being acknowledged.
    pub envelope_id: String,
    /// Arbitrary acknowledgement body.
    pub payload: Value,
}

/// Incoming frame as decoded off the wire.
#[derive(Clone, Debug, Deserialize)]
pub struct IncomingFrame {
    /// Outer frame type (`hello`, `disconnect`, `events_api`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Reason attached to `disconnect` frames.
    #[serde(default)]
    pub reason: Option<String>,
    /// Identifier expected back in the acknowledgement, when the frame
    /// wants one.
    #[serde(default)]
    pub envelope_id: Option<String>,
    /// Opaque application payload.
    #[serde(default)]
    pub payload: Value,
}

/// Decode a raw text frame.
///
/// A decode failure is logged and the frame dropped; a bad message must
/// never crash the session.
pub(crate) fn decode_frame(raw: &str) -> Option<IncomingFrame> {
    match serde_json::from_str(raw) {
        Ok(frame) => Some(frame),
        Err(error) => {
            warn!(%error, "unable to parse incoming websocket message");
            None
        }
    }
}

/// Map a recognized control frame to its state-machine token.
///
/// Control frames never reach the application.
pub(crate) fn control_token(frame: &IncomingFrame) -> Option<StateEvent> {
    match (frame.kind.as_str(), frame.reason.as_deref()) {
        ("hello", _) => Some(StateEvent::ServerHello),
        ("disconnect", Some("warning")) => Some(StateEvent::ServerDisconnectWarning),
        ("disconnect", Some("refresh_requested")) => Some(StateEvent::ServerDisconnectOldSocket),
        _ => None,
    }
}

/// Name under which an application frame is raised.
///
/// Frames declaring an inner event type (`events_api` envelopes carry
/// `payload.event.type`) are named after it; every other frame is named
/// after its outer type.
pub(crate) fn event_name(frame: &IncomingFrame) -> String {
    inner_event(frame)
        .and_then(|event| event.get("type").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| frame.kind.clone())
}

/// The inner event object carried by `events_api`-style frames, if any.
pub(crate) fn inner_event(frame: &IncomingFrame) -> Option<&Value> {
    frame.payload.get("event")
}
