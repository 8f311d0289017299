//! Error handling for the Socket Mode client.

use thiserror::Error;

use crate::auth::ApiError;

/// The main result type used throughout the client.
pub type SocketModeResult<T> = Result<T, SocketModeError>;

/// Comprehensive error type for all Socket Mode operations.
///
/// Variants hold owned strings rather than wrapped source errors so that
/// lifecycle events carrying an error can be cloned to every subscriber.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SocketModeError {
    /// A message was sent while no websocket was attached.
    #[error("cannot send a message when the client is not connected")]
    SendWhileDisconnected,

    /// A message was sent while the connection was not in the ready state.
    #[error("cannot send a message when the client is not ready")]
    SendWhileNotReady,

    /// WebSocket transport errors.
    #[error("websocket error: {message}")]
    WebSocket { message: String },

    /// Credential exchange (`apps.connections.open`) errors.
    #[error("credential exchange failed: {0}")]
    Api(#[from] ApiError),

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Internal errors (should not happen in normal operation).
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl SocketModeError {
    /// Create a websocket error.
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
