//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p grid_server -- [--addr 0.0.0.0:8004] [--config grid.json]
//!                               [--idle-timeout-secs 60]
//!
//! The server accepts client connections, introduces every newcomer to the
//! players already present, and relays each position update to everyone
//! else.

use std::env;

use anyhow::Context;
use grid_server::server::GridServer;
use grid_shared::config::GridConfig;
use tracing::info;

fn parse_args() -> anyhow::Result<GridConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => GridConfig::from_json_file(&args[i + 1])?,
        _ => GridConfig {
            server_addr: "0.0.0.0:8004".to_string(),
            ..GridConfig::default()
        },
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--idle-timeout-secs" if i + 1 < args.len() => {
                cfg.idle_timeout_secs = args[i + 1].parse().ok();
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(
        addr = %cfg.server_addr,
        idle_timeout_secs = ?cfg.idle_timeout_secs,
        "Starting server"
    );

    let server = GridServer::bind(cfg).await.context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    server.run().await
}
