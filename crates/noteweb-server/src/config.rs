//! Server configuration.

use std::time::Duration;

use noteweb_settings::ServerSettings;

/// Runtime configuration for [`NoteServer`](crate::server::NoteServer).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Upgrades beyond this many live sessions are refused with 503.
    pub max_connections: usize,
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// Silence after which a client is disconnected.
    pub heartbeat_timeout: Duration,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Capacity of each connection's outbound queue.
    pub send_queue: usize,
}

impl ServerConfig {
    /// Build from the `server` settings section.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_connections: settings.max_connections,
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs.max(1)),
            heartbeat_timeout: Duration::from_secs(settings.heartbeat_timeout_secs.max(1)),
            max_message_size: settings.max_message_size,
            send_queue: settings.send_queue.max(1),
        }
    }

    /// `host:port` string handed to the listener.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default())
    }
}
