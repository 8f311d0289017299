//! The credential-exchange collaborator.
//!
//! Socket Mode sessions begin by trading the app-level token for a one-time
//! websocket URL via `apps.connections.open`. That REST call lives outside
//! this crate; the client only sees the [`ConnectionOpener`] trait and treats
//! the result as opaque apart from error classification (see
//! [`crate::recovery`]).

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Error returned by a failed credential-exchange attempt.
///
/// The shape mirrors the Slack Web API error codes: a `platform_error`
/// carries a machine-readable subtype (`invalid_auth`, `internal_error`, ...),
/// while request and HTTP errors indicate the call never completed a
/// platform round-trip.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The platform answered with an error subtype.
    #[error("platform error: {subtype}")]
    Platform { subtype: String },

    /// The request could not be sent or completed (DNS, socket, TLS, ...).
    #[error("request error: {message}")]
    Request { message: String },

    /// The platform answered with a non-OK HTTP status.
    #[error("http error: status {status}")]
    Http { status: u16 },
}

impl ApiError {
    /// Create a platform error with the given subtype.
    pub fn platform(subtype: impl Into<String>) -> Self {
        Self::Platform {
            subtype: subtype.into(),
        }
    }

    /// Create a request error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Create an HTTP error.
    pub fn http(status: u16) -> Self {
        Self::Http { status }
    }
}

/// Successful result of `apps.connections.open`.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionOpen {
    /// One-time websocket URL to connect to.
    pub url: String,
    /// Raw response body, passed through to the `authenticated` event.
    pub response: Value,
}

impl ConnectionOpen {
    /// Create a result from a URL alone, with an empty raw response.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            response: Value::Null,
        }
    }
}

/// Collaborator that performs the credential exchange.
///
/// The client invokes this once per connection attempt. Retrying is driven by
/// the connection state machine, never by the opener itself.
#[async_trait]
pub trait ConnectionOpener: Send + Sync + 'static {
    /// Exchange the app-level token for a one-time websocket URL.
    async fn open_connection(&self, app_token: &str) -> Result<ConnectionOpen, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = ApiError::platform("invalid_auth");
        assert_eq!(err.to_string(), "platform error: invalid_auth");

        let err = ApiError::http(503);
        assert_eq!(err.to_string(), "http error: status 503");
    }

    #[test]
    fn test_connection_open_defaults() {
        let open = ConnectionOpen::new("wss://wss-primary.slack.com/link/1");
        assert_eq!(open.url, "wss://wss-primary.slack.com/link/1");
        assert!(open.response.is_null());
    }
}
