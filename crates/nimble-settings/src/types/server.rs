//! Listener, heartbeat, and session settings.

use serde::{Deserialize, Serialize};

/// Transport used by the listener front.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Raw TCP byte stream.
    #[default]
    Tcp,
    /// WebSocket upgrade over HTTP.
    WebSocket,
}

impl TransportKind {
    /// Parse the settings/env spelling (`tcp`, `websocket`, `ws`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "tcp" => Some(Self::Tcp),
            "websocket" | "ws" => Some(Self::WebSocket),
            _ => None,
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::WebSocket => "websocket",
        }
    }
}

/// Server network and runtime settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// Listener transport.
    pub transport: TransportKind,
    /// Upgrade path for the WebSocket transport.
    pub ws_path: String,
    /// Origins accepted on WebSocket upgrade; empty accepts any origin.
    pub allowed_origins: Vec<String>,
    /// Heartbeat period; a connection silent for twice this is dropped.
    pub heartbeat_interval_secs: u64,
    /// Idle time after which the sweeper kicks a session; `0` disables eviction.
    pub session_expire_secs: u64,
    /// Per-connection outbound queue capacity.
    pub send_backlog: usize,
    /// Upper bound on a single handler invocation.
    pub handler_timeout_secs: u64,
    /// Largest inbound packet body accepted.
    pub max_packet_size: usize,
    /// How long shutdown waits for background tasks.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3250,
            transport: TransportKind::Tcp,
            ws_path: "/nimble".to_string(),
            allowed_origins: Vec::new(),
            heartbeat_interval_secs: 30,
            session_expire_secs: 600,
            send_backlog: 16,
            handler_timeout_secs: 60,
            max_packet_size: 64 * 1024,
            shutdown_timeout_secs: 30,
        }
    }
}
