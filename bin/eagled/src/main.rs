//! ---
//! eagle_section: "01-core-functionality"
//! eagle_subsection: "binary"
//! eagle_type: "source"
//! eagle_scope: "code"
//! eagle_description: "Binary entrypoint for the bridge daemon."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use eagle_common::config::{AppConfig, PollingConfig};
use eagle_common::logging::init_tracing;
use eagle_core::telemetry::typed_value;
use eagle_core::{
    BridgeEvent, BridgeSettings, ChannelObserver, ClientSettings, GatewayBridge, GatewayClient,
    GatewayEndpoint, MeterGateway, TracingObserver,
};
use eagle_metrics::{new_registry, spawn_http_server, BridgeMetrics};
use tokio::signal;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = "configs/eagled.toml";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Eagle-200 energy gateway bridge",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, env = "EAGLE_HOST", help = "Override the gateway host")]
    host: Option<String>,

    #[arg(long, env = "EAGLE_CLOUD_ID", help = "Override the gateway cloud id")]
    cloud_id: Option<String>,

    #[arg(
        long,
        env = "EAGLE_INSTALL_CODE",
        hide_env_values = true,
        help = "Override the gateway install code"
    )]
    install_code: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run discovery and telemetry polling until interrupted")]
    Run,
    #[command(about = "List the devices known to the gateway")]
    List,
    #[command(about = "Query the current telemetry of one meter")]
    Query {
        #[arg(value_name = "HARDWARE_ADDRESS")]
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(host) = cli.host {
        config.gateway.host = host;
    }
    if let Some(cloud_id) = cli.cloud_id {
        config.gateway.cloud_id = cloud_id;
    }
    if let Some(install_code) = cli.install_code {
        config.gateway.install_code = install_code;
    }

    init_tracing("eagled", &config.logging)?;
    info!(config_path = %loaded.source.display(), gateway = %config.gateway.host, "configuration loaded");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await?,
        Commands::List => list_devices(&config).await?,
        Commands::Query { address } => query_meter(&config, &address).await?,
    }

    Ok(())
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let registry = new_registry();
    let metrics = BridgeMetrics::new(registry.clone())?;
    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry, config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let client = GatewayClient::new(ClientSettings::from(&config.gateway))
        .context("failed to build gateway client")?
        .with_metrics(metrics.clone());
    let (observer, events) = ChannelObserver::new();
    let bridge = Arc::new(GatewayBridge::new(
        Arc::new(client),
        Arc::new(observer),
        BridgeSettings::from(&config),
        Some(metrics),
    ));

    bridge.configure(GatewayEndpoint::from(&config.gateway));

    for address in config.polling.meters.keys() {
        let interval = config.polling.interval_for(address);
        if let Err(err) = bridge.start_polling(address, interval).await {
            warn!(meter = %address, error = %err, "failed to start configured meter");
        }
    }

    if config.discovery.enabled {
        bridge.start_discovery().await;
    } else {
        info!("discovery disabled by configuration");
    }

    let auto_poll = config.discovery.enabled && config.discovery.auto_poll;
    let event_loop = tokio::spawn(handle_events(
        bridge.clone(),
        events,
        auto_poll,
        config.polling.clone(),
    ));

    info!("bridge running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    // Nothing may start a poller once the bridge has been drained.
    bridge.stop_discovery().await;
    event_loop.abort();
    let _ = event_loop.await;
    bridge.shutdown().await;

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

/// Log every bridge event and start polling newly discovered meters.
async fn handle_events(
    bridge: Arc<GatewayBridge>,
    mut events: UnboundedReceiver<BridgeEvent>,
    auto_poll: bool,
    polling: PollingConfig,
) {
    while let Some(event) = events.recv().await {
        event.dispatch(&TracingObserver);
        let BridgeEvent::DeviceDiscovered(discovery) = event else {
            continue;
        };
        if !auto_poll || polling.meters.contains_key(&discovery.address) {
            continue;
        }
        let interval = polling.interval_for(&discovery.address);
        if let Err(err) = bridge.start_polling(&discovery.address, interval).await {
            warn!(meter = %discovery.address, error = %err, "failed to start polling discovered meter");
        }
    }
}

fn one_shot_client(config: &AppConfig) -> Result<GatewayClient> {
    let endpoint = GatewayEndpoint::from(&config.gateway);
    if let Some(field) = endpoint.missing_field() {
        return Err(anyhow!("gateway configuration incomplete: missing {field}"));
    }
    let client = GatewayClient::new(ClientSettings::from(&config.gateway))
        .context("failed to build gateway client")?;
    client.configure(endpoint);
    Ok(client)
}

async fn list_devices(config: &AppConfig) -> Result<()> {
    let client = one_shot_client(config)?;
    let devices = client
        .list_devices()
        .await
        .context("device list request failed")?;
    info!(devices = devices.len(), "device list received");

    println!("{:<20} {:<16} {:<14} STATUS", "ADDRESS", "MODEL", "MANUFACTURER");
    for device in devices {
        println!(
            "{:<20} {:<16} {:<14} {}",
            device.hardware_address,
            device.model_id,
            device.manufacturer.as_deref().unwrap_or("-"),
            device.connection_status.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn query_meter(config: &AppConfig, address: &str) -> Result<()> {
    let client = one_shot_client(config)?;
    let snapshot = client
        .query_meter(address)
        .await
        .with_context(|| format!("telemetry query for {address} failed"))?;
    info!(meter = %address, fields = snapshot.len(), "telemetry received");

    for (name, raw) in snapshot.iter() {
        let value = typed_value(raw);
        println!("{:<36} {:<6} {}", name, format!("{:?}", value.kind()), value);
    }
    Ok(())
}
