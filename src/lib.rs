//! An async client for Slack's Socket Mode.
//!
//! Socket Mode delivers Slack application events over a long-lived
//! websocket instead of public HTTP endpoints. This crate maintains that
//! connection: it exchanges an app-level token for a single-use websocket
//! URL, keeps the socket alive across server-initiated refreshes with a
//! make-before-break handover, supervises server pings, and delivers
//! decoded application frames with acknowledgement handles.
//!
//! The session lifecycle is governed by a hierarchical state machine; every
//! state change runs on one driver task, so observers always see a
//! consistent ordering of lifecycle events. The credential exchange
//! (`apps.connections.open`) is injected through the [`ConnectionOpener`]
//! trait, keeping the HTTP client of your choice out of this crate.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use slack_socket_mode::{SocketModeClient, SocketModeConfig, SocketModeEvent};
//!
//! # async fn run(opener: Arc<dyn slack_socket_mode::ConnectionOpener>) -> slack_socket_mode::SocketModeResult<()> {
//! let client = SocketModeClient::new(SocketModeConfig::new("xapp-1-A1-token"), opener)?;
//! let mut events = client.on("slack_event");
//! client.start().await?;
//!
//! while let Some(SocketModeEvent::SlackEvent(event)) = events.recv().await {
//!     println!("received {}", event.frame_type);
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod recovery;
pub mod transport;

mod driver;
mod heartbeat;
mod sockets;
mod state;

pub use auth::{ApiError, ConnectionOpen, ConnectionOpener};
pub use client::SocketModeClient;
pub use config::SocketModeConfig;
pub use error::{SocketModeError, SocketModeResult};
pub use events::{Acker, EventStream, SlackEvent, SocketModeEvent};
pub use protocol::{IncomingFrame, OutgoingEnvelope};
pub use recovery::RecoverabilityVerdict;
pub use state::{ConnectedState, ConnectionState, SetupState};
pub use transport::{Connector, TransportEvent, TransportParts, TransportSink};
