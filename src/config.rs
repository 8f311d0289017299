//! Socket Mode client configuration.

use std::time::Duration;

/// Configuration for a [`crate::client::SocketModeClient`].
#[derive(Clone, Debug)]
pub struct SocketModeConfig {
    /// App-level token handed to the credential-exchange collaborator.
    pub app_token: String,
    /// Whether the client reconnects automatically after a non-manual
    /// disconnect.
    pub auto_reconnect_enabled: bool,
    /// How long to wait for pings from the server before deeming the
    /// connection stale.
    pub ping_timeout: Duration,
    /// Timeout for establishing a websocket connection.
    pub connect_timeout: Duration,
    /// Capacity of the session input queue.
    pub input_channel_capacity: usize,
    /// Capacity of each per-transport event channel.
    pub transport_channel_capacity: usize,
}

impl Default for SocketModeConfig {
    fn default() -> Self {
        Self {
            app_token: String::new(),
            auto_reconnect_enabled: true,
            ping_timeout: Duration::from_millis(30_000),
            connect_timeout: Duration::from_secs(10),
            input_channel_capacity: 64,
            transport_channel_capacity: 64,
        }
    }
}

impl SocketModeConfig {
    /// Create a configuration with the given app-level token.
    pub fn new(app_token: impl Into<String>) -> Self {
        Self {
            app_token: app_token.into(),
            ..Default::default()
        }
    }

    /// Set whether to reconnect automatically.
    #[must_use]
    pub fn auto_reconnect_enabled(mut self, enabled: bool) -> Self {
        self.auto_reconnect_enabled = enabled;
        self
    }

    /// Set the server ping timeout.
    #[must_use]
    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Set the websocket connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the session input queue capacity.
    #[must_use]
    pub fn input_channel_capacity(mut self, capacity: usize) -> Self {
        self.input_channel_capacity = capacity;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.app_token.is_empty() {
            return Err("an app-level token must be provided".to_string());
        }
        if self.ping_timeout.is_zero() {
            return Err("ping timeout must be > 0".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("connect timeout must be > 0".to_string());
        }
        if self.input_channel_capacity == 0 {
            return Err("input channel capacity must be > 0".to_string());
        }
        if self.transport_channel_capacity == 0 {
            return Err("transport channel capacity must be > 0".to_string());
        }
        Ok(())
    }
}
