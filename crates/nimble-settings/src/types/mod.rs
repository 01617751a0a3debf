//! Settings types.

mod logging;
mod server;

pub use logging::LoggingSettings;
pub use server::{ServerSettings, TransportKind};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NimbleSettings {
    /// Listener, heartbeat, and session settings.
    pub server: ServerSettings,
    /// Log level and format.
    pub logging: LoggingSettings,
}

impl NimbleSettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if server.send_backlog == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendBacklog must be at least 1".into(),
            ));
        }
        if server.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalSecs must be at least 1".into(),
            ));
        }
        if !server.ws_path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.wsPath must start with '/': {}",
                server.ws_path
            )));
        }
        if server.max_packet_size == 0 || server.max_packet_size > 0x00FF_FFFF {
            return Err(SettingsError::InvalidValue(format!(
                "server.maxPacketSize out of range: {}",
                server.max_packet_size
            )));
        }
        Ok(())
    }
}
