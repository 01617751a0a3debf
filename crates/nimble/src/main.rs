//! # nimble
//!
//! Server binary: loads settings, installs logging and metrics, registers the
//! demo room handlers and serves until a shutdown signal arrives.

#![deny(unsafe_code)]

mod room;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use nimble_core::logging::init_subscriber;
use nimble_server::shutdown::wait_for_signal;
use nimble_server::{Group, HandlerRegistry, NimbleServer, Pipeline, ServerConfig};
use nimble_settings::{NimbleSettings, TransportKind};
use tracing::{info, warn};

/// nimble real-time message server.
#[derive(Parser, Debug)]
#[command(name = "nimble", about = "nimble real-time message server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Front to serve: `tcp` or `websocket` (overrides settings).
    #[arg(long, value_parser = parse_transport)]
    transport: Option<TransportKind>,

    /// Settings file. Defaults to `~/.nimble/settings.json`.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

fn parse_transport(value: &str) -> Result<TransportKind, String> {
    TransportKind::parse(value).ok_or_else(|| format!("unknown transport: {value}"))
}

impl Cli {
    fn load_settings(&self) -> Result<NimbleSettings> {
        let path = self.settings.clone().unwrap_or_else(nimble_settings::settings_path);
        let mut settings = nimble_settings::load_settings_from_path(&path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?;
        self.apply(&mut settings);
        Ok(settings)
    }

    fn apply(&self, settings: &mut NimbleSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(transport) = self.transport {
            settings.server.transport = transport;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;

    init_subscriber(&settings.logging.level, settings.logging.format);

    let config = ServerConfig::from(&settings.server);
    info!(
        host = %config.host,
        port = config.port,
        transport = config.transport.as_str(),
        heartbeat_secs = config.heartbeat_interval.as_secs(),
        "starting nimble"
    );

    let group = Arc::new(Group::new("room"));
    let mut handlers = HandlerRegistry::new();
    room::register(&mut handlers, &group);

    let mut server = NimbleServer::with_group(config, group, handlers, Pipeline::new())?;
    match nimble_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => warn!(error = %e, "metrics recorder not installed"),
    }

    let (addr, handle) = server.listen().await?;
    info!(%addr, "ready");

    let signal = wait_for_signal().await;
    info!(signal, "shutting down");
    server.stop(handle).await;
    Ok(())
}
