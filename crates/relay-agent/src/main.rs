//! # relay-agent
//!
//! Realtime relay binary: loads settings and the upstream credential,
//! starts the WebSocket listener, and shuts down on Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::config::RelayConfig;
use relay_server::server::RelayServer;
use relay_settings::RelaySettings;
use relay_telemetry::TelemetryConfig;
use relay_upstream::{RealtimeConfig, RealtimeFactory};

/// How long live sessions get to close after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Realtime relay server.
#[derive(Parser, Debug)]
#[command(name = "relay-agent", about = "Bidirectional realtime WebSocket relay")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings and `PORT`).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.realtime-relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (`trace`..`error`).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

/// Log uncaught panics and terminate the process.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "uncaught panic, exiting");
        std::process::exit(1);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args.config.clone().unwrap_or_else(relay_settings::settings_path);
    let mut settings =
        relay_settings::load_settings_from_path(&settings_path).context("Failed to load settings")?;
    args.apply(&mut settings);

    let telemetry = TelemetryConfig::from_level_str(&settings.logging.level, settings.logging.json)
        .context("Invalid logging level")?;
    relay_telemetry::init_telemetry(&telemetry).context("Failed to initialize logging")?;
    install_panic_hook();

    let api_key = match relay_settings::load_api_key() {
        Ok(key) => key,
        Err(e) => {
            tracing::error!("{e}; set it in the environment before starting the relay");
            return Err(e).context("Missing upstream credential");
        }
    };
    tracing::info!(
        credential = %api_key.log_prefix(),
        upstream = %settings.upstream.url,
        model = %settings.upstream.model,
        "upstream configured"
    );

    let factory = RealtimeFactory::new(RealtimeConfig::new(
        settings.upstream.url.clone(),
        settings.upstream.model.clone(),
        api_key,
    ));
    let server = RelayServer::new(RelayConfig::from(&settings), Arc::new(factory));

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Listening on ws://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let _ = server.shutdown().graceful_shutdown(Some(SHUTDOWN_GRACE)).await;
    let _ = handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}
