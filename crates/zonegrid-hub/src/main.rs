//! ZoneGrid hub daemon.
//!
//! Wires the registry, RPC correlator, and message router together behind a
//! TCP transport. The same binary serves both node roles: a hub listens for
//! proxies, and a proxy additionally dials its hub and registers with it.

mod config;
mod transport;

use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{info, warn};
use zonegrid_router::{Router, TransportSend};
use zonegrid_rpc::{method_fn, Registry, RpcCorrelator, ServiceObject};

use crate::transport::TcpTransport;

#[derive(Parser)]
#[command(name = "zonegrid-hub", about = "ZoneGrid hub daemon", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Override the configured listen address.
    #[arg(long)]
    listen: Option<String>,
    /// Override the configured zone address.
    #[arg(long)]
    address: Option<String>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

/// Built-in service reporting the node's address, session count, and uptime.
fn zone_info_service(router: Arc<Router>, started: Instant) -> ServiceObject {
    ServiceObject::new(
        "http://zonegrid.io/api/zoneinfo",
        "Zone info",
        "Node status and session information",
    )
    .method(
        "status",
        method_fn(move |_params, responder, _caller| {
            let router = router.clone();
            async move {
                responder
                    .result(json!({
                        "address": router.own_address(),
                        "sessions": router.session_count(),
                        "uptime_secs": started.elapsed().as_secs(),
                    }))
                    .await;
            }
        }),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = config::load_config(cli.config.as_deref());
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(address) = cli.address {
        config.address = address;
    }

    let registry = Arc::new(Registry::new());
    let correlator = RpcCorrelator::new(registry.clone());
    correlator.set_session_id(config.address.clone());
    let router = Router::new(correlator.clone());
    router.set_own_address(config.address.clone());
    router.set_separator(config.separator);

    let transport = TcpTransport::new(router.clone());
    router.set_send(transport.clone());

    let started = Instant::now();
    registry.register_object(zone_info_service(router.clone(), started))?;

    let listener = TcpListener::bind(&config.listen).await?;
    info!(
        listen = %listener.local_addr()?,
        address = %config.address,
        "ZoneGrid node listening"
    );
    let _accept = transport.start(listener);

    for peer in &config.peers {
        match transport.connect(&peer.endpoint).await {
            Ok(session) => {
                transport.alias(peer.address.clone(), session.clone());
                // the peer learns our route
                let register = router.create_register_message(&config.address, &peer.address)?;
                transport.send(register, &session).await?;
                // and we store the route back to the peer
                let local = router.create_register_message(&peer.address, &config.address)?;
                router.on_message_received(local, Some(&session)).await;
                info!(peer = %peer.address, "Registered with peer");
            }
            Err(error) => {
                warn!(peer = %peer.endpoint, error = %error, "Failed to connect to peer");
            }
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
