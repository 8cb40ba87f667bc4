//! # wahub
//!
//! WhatsApp broadcast hub binary. Loads settings, wires the sidecar
//! transport into the hub server and serves until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use wahub_core::logging::init_subscriber;
use wahub_core::transport::MessagingTransport;
use wahub_server::config::HubConfig;
use wahub_server::metrics::install_recorder;
use wahub_server::server::HubServer;
use wahub_settings::{HubSettings, TransportSettings};
use wahub_transport::{SidecarConfig, SidecarTransport};

/// How long background tasks get to finish after ctrl-c.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// WhatsApp broadcast hub.
#[derive(Parser, Debug)]
#[command(name = "wahub", about = "WhatsApp broadcast hub")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `$WAHUB_CONFIG` or `~/.wahub/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sidecar REST API base URL (overrides settings).
    #[arg(long)]
    sidecar_url: Option<String>,
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(wahub_settings::settings_path)
    }

    /// Command-line flags win over every settings layer.
    fn apply(&self, settings: &mut HubSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref url) = self.sidecar_url {
            settings.transport.sidecar_url.clone_from(url);
        }
    }
}

fn sidecar_config(settings: &TransportSettings) -> SidecarConfig {
    SidecarConfig {
        base_url: settings.sidecar_url.clone(),
        poll_interval: settings.status_poll_interval(),
        request_timeout: settings.request_timeout(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    wahub_settings::load_dotenv();
    let settings_path = cli.settings_path();
    let mut settings = wahub_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    cli.apply(&mut settings);

    init_subscriber(&settings.logging.level, settings.logging.format);
    tracing::info!(path = %settings_path.display(), "settings loaded");

    let metrics = install_recorder().context("Failed to install metrics recorder")?;

    let transport = Arc::new(
        SidecarTransport::new(sidecar_config(&settings.transport))
            .context("Failed to create sidecar transport")?,
    );
    let server = HubServer::new(
        HubConfig::from(&settings),
        Arc::clone(&transport) as Arc<dyn MessagingTransport>,
    )
    .with_metrics(metrics);

    let mut handles = server.spawn_background();
    let (addr, serve) = server.listen().await.context("Failed to bind server")?;
    handles.push(serve);

    tracing::info!(
        sidecar = %settings.transport.sidecar_url,
        "wahub listening on ws://{addr}/ws"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(handles, Some(SHUTDOWN_TIMEOUT))
        .await;
    transport.disconnect().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
