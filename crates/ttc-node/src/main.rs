//! TTC node — entry point.
//!
//! Runs the networking side of a turnout-controller node: find (or become)
//! the layout's server, keep the connection alive, and log every payload
//! that arrives.
//!
//! # Usage
//!
//! ```text
//! ttc-node [OPTIONS]
//!
//! Options:
//!   --config <PATH>         Config file [default: platform config dir]
//!   --mode <MODE>           auto | client | server [default: auto]
//!   --port <PORT>           Server port (overrides the config file)
//!   --service-type <TYPE>   DNS-SD service type (overrides the config file)
//!   --peer <ADDR>           Static peer to try; may be repeated
//!   --no-mdns               Disable multicast DNS
//!   --demo-interval <SECS>  Send a random one-byte payload every SECS while connected
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable           | Flag             |
//! |--------------------|------------------|
//! | `TTC_CONFIG`       | `--config`       |
//! | `TTC_MODE`         | `--mode`         |
//! | `TTC_PORT`         | `--port`         |
//! | `TTC_SERVICE_TYPE` | `--service-type` |
//!
//! `RUST_LOG` overrides the config file's `log_level`.
//!
//! # Modes
//!
//! - `auto` runs the full network manager: client first, server after the
//!   discovery timeout.
//! - `client` and `server` run a single role and log its events, which is
//!   handy for checking two machines can see each other.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use mdns_sd::ServiceDaemon;
use rand::Rng;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use ttc_core::ManagerState;
use ttc_node::application::{FnEndpoint, NetworkManager, Role, RoleEvent, RoleKind, RoleListener};
use ttc_node::infrastructure::network::discovery::{
    local_hostname, CombinedBrowser, MdnsAdvertiser, MdnsBrowser, NullAdvertiser, ServiceAdvertiser,
    ServiceBrowser, StaticBrowser,
};
use ttc_node::infrastructure::network::{DiscoveryClient, DiscoveryServer};
use ttc_node::infrastructure::storage::config::{load_config, NodeConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Client first, server after the discovery timeout.
    Auto,
    /// Only ever act as a client.
    Client,
    /// Only ever act as the server.
    Server,
}

/// Turnout-controller node networking.
#[derive(Debug, Parser)]
#[command(name = "ttc-node", about = "Peer discovery and framed transport for TTC nodes", version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "TTC_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Mode::Auto, env = "TTC_MODE")]
    mode: Mode,

    /// Port the server role listens on.
    #[arg(long, env = "TTC_PORT")]
    port: Option<u16>,

    /// DNS-SD service type to browse for and advertise.
    #[arg(long, env = "TTC_SERVICE_TYPE")]
    service_type: Option<String>,

    /// Peer address to try without mDNS (repeatable).
    #[arg(long = "peer")]
    peers: Vec<SocketAddr>,

    /// Disable multicast DNS browsing and advertising.
    #[arg(long)]
    no_mdns: bool,

    /// Send a random one-byte payload every this many seconds while connected.
    #[arg(long)]
    demo_interval: Option<u64>,
}

impl Cli {
    /// Applies command-line overrides on top of the loaded config.
    fn apply(&self, config: &mut NodeConfig) {
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(service_type) = &self.service_type {
            config.network.service_type = service_type.clone();
        }
        config.discovery.static_peers.extend(self.peers.iter().copied());
        if self.no_mdns {
            config.discovery.mdns = false;
        }
        if self.mode == Mode::Client {
            config.discovery.server_enabled = false;
        }
    }
}

// ── Wiring ────────────────────────────────────────────────────────────────────

struct Discovery {
    browser: Arc<dyn ServiceBrowser>,
    advertiser: Arc<dyn ServiceAdvertiser>,
    daemon: Option<ServiceDaemon>,
}

fn build_discovery(config: &NodeConfig, runtime: &Handle, host: &str) -> anyhow::Result<Discovery> {
    let mut browsers: Vec<Arc<dyn ServiceBrowser>> = Vec::new();
    let mut advertiser: Arc<dyn ServiceAdvertiser> = Arc::new(NullAdvertiser);
    let mut daemon = None;

    if config.discovery.mdns {
        let mdns = ServiceDaemon::new().context("failed to start the mDNS daemon")?;
        browsers.push(Arc::new(MdnsBrowser::new(mdns.clone())));
        advertiser = Arc::new(MdnsAdvertiser::new(mdns.clone(), host));
        daemon = Some(mdns);
    }
    if !config.discovery.static_peers.is_empty() {
        browsers.push(Arc::new(StaticBrowser::new(
            runtime.clone(),
            config.discovery.static_peers.clone(),
            config.reannounce_interval(),
        )));
    }
    if browsers.is_empty() {
        warn!("mDNS is disabled and no static peers are configured; the client will never find a server");
    }

    Ok(Discovery {
        browser: Arc::new(CombinedBrowser::new(browsers)),
        advertiser,
        daemon,
    })
}

fn demo_payload() -> Vec<u8> {
    vec![rand::thread_rng().gen_range(0..=10u8)]
}

fn log_payload(payload: &[u8]) {
    info!("RX {} byte(s): {:?}", payload.len(), String::from_utf8_lossy(payload));
}

// ── Modes ─────────────────────────────────────────────────────────────────────

async fn run_auto(
    config: &NodeConfig,
    client: Arc<dyn Role>,
    server: Option<Arc<dyn Role>>,
    demo_interval: Option<Duration>,
) -> anyhow::Result<()> {
    let mut builder = NetworkManager::builder()
        .client(client)
        .endpoint(Arc::new(FnEndpoint(log_payload)))
        .discovery_timeout(config.discovery_timeout())
        .randomize_timeout(config.discovery.randomize_timeout);
    if let Some(server) = server {
        builder = builder.server(server);
    }
    let manager = builder
        .spawn(&Handle::current())
        .context("failed to build the network manager")?;

    manager.search().await.context("failed to start searching")?;
    info!(
        "searching for a server (becoming one after {:?})",
        manager.discovery_timeout()
    );

    let mut states = manager.subscribe();
    let mut ticker = demo_interval.map(tokio::time::interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                info!("network state: {state}");
            }
            _ = tick(&mut ticker) => {
                if manager.state() == ManagerState::Connected {
                    let payload = demo_payload();
                    debug!("TX {payload:?}");
                    if let Err(e) = manager.send(payload).await {
                        debug!("demo send skipped: {e}");
                    }
                }
            }
        }
    }

    manager.shutdown().await.context("failed to shut down")?;
    Ok(())
}

async fn run_single(role: Arc<dyn Role>, kind: RoleKind, demo_interval: Option<Duration>) -> anyhow::Result<()> {
    let (listener, mut events) = RoleListener::channel(kind);
    role.start(listener)
        .await
        .with_context(|| format!("failed to start the {kind} role"))?;

    let mut connected = false;
    let mut ticker = demo_interval.map(tokio::time::interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, stopping");
                break;
            }
            Some(event) = events.recv() => match event {
                RoleEvent::Connected(_) => {
                    info!("CONNECTED");
                    connected = true;
                }
                RoleEvent::Disconnected(_) => {
                    info!("DISCONNECTED");
                    connected = false;
                }
                RoleEvent::Data(payload) => log_payload(&payload),
            },
            _ = tick(&mut ticker) => {
                if connected {
                    let payload = demo_payload();
                    debug!("TX {payload:?}");
                    role.send(payload);
                }
            }
        }
    }

    role.stop().await;
    Ok(())
}

/// Waits for the next demo tick, or forever when the demo is off.
async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut config);

    // `RUST_LOG` wins; otherwise the config file's level applies.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.node.log_level)),
        )
        .init();

    let runtime = Handle::current();
    let host = local_hostname();
    let discovery = build_discovery(&config, &runtime, &host)?;
    let demo_interval = cli.demo_interval.map(Duration::from_secs);

    info!(
        "TTC node {} starting on {host} in {:?} mode, service {} port {}",
        env!("CARGO_PKG_VERSION"),
        cli.mode,
        config.network.service_type,
        config.network.port
    );

    let client: Arc<dyn Role> = Arc::new(DiscoveryClient::new(
        config.client_config(),
        Arc::clone(&discovery.browser),
        runtime.clone(),
    ));
    let server: Arc<dyn Role> = Arc::new(DiscoveryServer::new(
        config.server_config(&host),
        Arc::clone(&discovery.advertiser),
        runtime.clone(),
    ));

    match cli.mode {
        Mode::Auto => {
            let server = config.discovery.server_enabled.then_some(server);
            run_auto(&config, client, server, demo_interval).await?;
        }
        Mode::Client => run_single(client, RoleKind::Client, demo_interval).await?,
        Mode::Server => run_single(server, RoleKind::Server, demo_interval).await?,
    }

    if let Some(daemon) = discovery.daemon {
        if let Err(e) = daemon.shutdown() {
            warn!("mDNS daemon shutdown failed: {e}");
        }
    }
    info!("TTC node stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_auto_mode_with_no_overrides() {
        // Arrange / Act
        let cli = Cli::parse_from(["ttc-node"]);

        // Assert
        assert_eq!(cli.mode, Mode::Auto);
        assert!(cli.port.is_none());
        assert!(cli.peers.is_empty());
        assert!(!cli.no_mdns);
    }

    #[test]
    fn test_cli_overrides_are_applied_to_config() {
        // Arrange
        let cli = Cli::parse_from([
            "ttc-node",
            "--port",
            "12000",
            "--peer",
            "10.0.0.2:12000",
            "--peer",
            "10.0.0.3:12000",
            "--no-mdns",
        ]);
        let mut config = NodeConfig::default();

        // Act
        cli.apply(&mut config);

        // Assert
        assert_eq!(config.network.port, 12000);
        assert_eq!(config.discovery.static_peers.len(), 2);
        assert!(!config.discovery.mdns);
        assert!(config.discovery.server_enabled);
    }

    #[test]
    fn test_client_mode_disables_server_role() {
        let cli = Cli::parse_from(["ttc-node", "--mode", "client"]);
        let mut config = NodeConfig::default();
        cli.apply(&mut config);
        assert!(!config.discovery.server_enabled);
    }

    #[test]
    fn test_demo_payload_is_one_byte_in_range() {
        for _ in 0..100 {
            let payload = demo_payload();
            assert_eq!(payload.len(), 1);
            assert!(payload[0] <= 10);
        }
    }
}
