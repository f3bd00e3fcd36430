//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may be partial: missing fields get their default value.

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 27125 },
///   "vault": { "root": "/home/me/notes" },
///   "notice": "noteweb: client connected"
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotewebSettings {
    /// Network settings for the WebSocket server.
    pub server: ServerSettings,
    /// Vault location and handler limits.
    pub vault: VaultSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Text shown when a client connects.
    pub notice: String,
}

impl Default for NotewebSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            vault: VaultSettings::default(),
            logging: LoggingSettings::default(),
            notice: "noteweb: client connected".to_string(),
        }
    }
}

/// Server network and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// WebSocket port.
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Interval between server pings, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Disconnect a client silent for this long, in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue capacity (frames).
    pub send_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 27125,
            max_connections: 64,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 16 * 1024 * 1024,
            send_queue: 256,
        }
    }
}

/// Vault location, watcher and handler limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VaultSettings {
    /// Root folder of the vault.
    pub root: String,
    /// Watch the vault for changes and push `graph.changed`.
    pub watch: bool,
    /// Window in which filesystem events are coalesced into one bump.
    pub debounce_ms: u64,
    /// Lines included in a `note.getPreview` excerpt.
    pub preview_lines: usize,
    /// `search.query` limit when the client gives none.
    pub search_default_limit: usize,
    /// Hard cap on `search.query` results.
    pub search_max_limit: usize,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            root: ".".to_string(),
            watch: true,
            debounce_ms: 200,
            preview_lines: 20,
            search_default_limit: 50,
            search_max_limit: 200,
        }
    }
}

/// Logging output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
