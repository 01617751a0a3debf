//! Server configuration.

use std::time::Duration;

use nimble_settings::{ServerSettings, TransportKind};

/// Runtime configuration for [`NimbleServer`](crate::server::NimbleServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Which listener front to run.
    pub transport: TransportKind,
    /// HTTP path of the WebSocket upgrade endpoint.
    pub ws_path: String,
    /// Allowed `Origin` values for WebSocket upgrades; empty allows all.
    pub allowed_origins: Vec<String>,
    /// Keep-alive interval. Connections silent for twice this long are dropped.
    pub heartbeat_interval: Duration,
    /// Idle session eviction threshold; `None` disables the sweeper.
    pub session_expire: Option<Duration>,
    /// Per-connection outbound queue capacity.
    pub send_backlog: usize,
    /// Upper bound on a single handler invocation.
    pub handler_timeout: Duration,
    /// Largest accepted inbound packet body.
    pub max_packet_size: usize,
    /// Time allowed for background tasks to drain on shutdown.
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            transport: s.transport,
            ws_path: s.ws_path.clone(),
            allowed_origins: s.allowed_origins.clone(),
            heartbeat_interval: Duration::from_secs(s.heartbeat_interval_secs),
            session_expire: (s.session_expire_secs > 0)
                .then(|| Duration::from_secs(s.session_expire_secs)),
            send_backlog: s.send_backlog,
            handler_timeout: Duration::from_secs(s.handler_timeout_secs),
            max_packet_size: s.max_packet_size,
            shutdown_timeout: Duration::from_secs(s.shutdown_timeout_secs),
        }
    }
}
