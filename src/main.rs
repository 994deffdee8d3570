//! host-forwarder gateway binary.
//!
//! ```text
//!     Client Request                ┌───────────────────────────────────────┐
//!     ─────────────────────────────▶│ http::server  (request id, tracing)   │
//!                                   │        │                              │
//!                                   │        ▼                              │
//!                                   │ proxy::translate → proxy::executor    │
//!                                   │        │                │             │
//!                                   │        ▼                ▼             │
//!     Client Response               │ proxy::body ◀──── pool (per route)   │──── Origin
//!     ◀─────────────────────────────│                                       │
//!                                   └───────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use host_forwarder::config::loader::load_config;
use host_forwarder::config::validation::validate_config;
use host_forwarder::config::watcher::{ConfigWatcher, Overrides};
use host_forwarder::config::GatewayConfig;
use host_forwarder::lifecycle::signals::spawn_signal_handler;
use host_forwarder::lifecycle::Shutdown;
use host_forwarder::observability::{logging, metrics};
use host_forwarder::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "host-forwarder", version, about = "Single-hop HTTP forwarding gateway")]
struct Args {
    /// TOML configuration file; watched for changes.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(long)]
    bind: Option<String>,

    /// Override `upstream.url`.
    #[arg(long)]
    upstream: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    let overrides = Overrides {
        bind_address: args.bind,
        upstream_url: args.upstream,
    };
    overrides.apply(&mut config);

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "host-forwarder starting");

    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            tracing::error!(error = %error, "Invalid configuration");
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.url,
        max_total_connections = config.host.max_total_connections,
        max_per_route_connections = config.host.max_per_route_connections,
        ssl_hostname_validation = config.host.ssl_hostname_validation_enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher must stay alive for the lifetime of the server.
    let (config_updates, _watcher) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path, overrides, &config);
            (updates, Some(watcher.run()?))
        }
        None => (mpsc::unbounded_channel().1, None),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    spawn_signal_handler(&shutdown);

    let server = HttpServer::new(config)?;
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
