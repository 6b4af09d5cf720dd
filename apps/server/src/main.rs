//! Toolgate server binary
//!
//! Loads configuration from the environment, wires the built-in engine
//! factory into the gateway, and serves until interrupted. Embedders with
//! a real tool catalog depend on `toolgate-gateway` directly and supply
//! their own `EngineFactory`.

use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use toolgate_core::Config;
use toolgate_gateway::{GatewayConfig, GatewayServer, PingEngineFactory};

#[derive(Parser, Debug)]
#[command(name = "toolgate", version, about = "OAuth bridging gateway for MCP tool APIs")]
struct Args {
    /// Host to bind (overrides TOOLGATE_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides TOOLGATE_PORT)
    #[arg(long, short)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("[Gateway] Configuration error: {}", e);
            return Err(e.into());
        }
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    info!(
        "[Gateway] Starting toolgate v{} on {}:{}",
        env!("CARGO_PKG_VERSION"),
        config.server.host,
        config.server.port
    );

    let server = GatewayServer::new(GatewayConfig::new(config), Arc::new(PingEngineFactory));

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("[Gateway] Interrupt received");
            signal_token.cancel();
        }
    });

    server.run(shutdown).await
}
