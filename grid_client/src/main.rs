//! Standalone headless client binary.
//!
//! Usage:
//!   cargo run -p grid_client -- [--addr 127.0.0.1:8004] [--config grid.json]
//!                               [--connect-timeout-ms 2000] [--tick-hz 30]
//!
//! Connects to the server (or plays offline if it cannot), applies remote
//! updates every tick and logs what a renderer would draw.
//!
//! Console commands:
//!   w/a/s/d, up/down/left/right - Turn, or step if already facing that way
//!   status                      - Show client status
//!   quit                        - Announce departure and exit

use std::env;
use std::io::{BufRead, Write};

use grid_client::client::GridClient;
use grid_client::input::{BoundedGrid, LocalPlayer};
use grid_shared::config::GridConfig;
use grid_shared::protocol::{ClientId, Direction};
use grid_shared::render::RenderSink;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::info;

fn parse_args() -> anyhow::Result<GridConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => GridConfig::from_json_file(&args[i + 1])?,
        _ => GridConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--connect-timeout-ms" if i + 1 < args.len() => {
                cfg.connect_timeout_ms = args[i + 1].parse().unwrap_or(cfg.connect_timeout_ms);
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(cfg.tick_hz);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

/// Stands in for a sprite layer.
struct LogRenderer;

impl RenderSink for LogRenderer {
    fn add_entity(&mut self, id: ClientId) {
        info!(client_id = %id, "Player joined");
    }

    fn remove_entity(&mut self, id: ClientId) {
        info!(client_id = %id, "Player left");
    }

    fn reposition_entity(&mut self, id: ClientId, screen_x: i32, screen_y: i32) {
        info!(client_id = %id, screen_x, screen_y, "Player moved");
    }
}

fn parse_key(line: &str) -> Option<Direction> {
    match line {
        "w" => Some(Direction::Up),
        "s" => Some(Direction::Down),
        "a" => Some(Direction::Left),
        "d" => Some(Direction::Right),
        other => Direction::parse(other),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(server = %cfg.server_addr, tick_hz = cfg.tick_hz, "Starting client");

    let grid = BoundedGrid::new(cfg.map_width, cfg.map_height);
    let mut renderer = LogRenderer;
    let mut client = GridClient::connect(&cfg, LocalPlayer::from_config(&cfg)).await;

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_lowercase();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!(
        "Client ready ({}). Move with w/a/s/d, 'status' for info, 'quit' to exit.",
        if client.is_online() { "online" } else { "offline" }
    );
    println!();

    let tick_interval = cfg.tick_interval();

    'main: loop {
        // Process console commands.
        loop {
            let line = match console_rx.try_recv() {
                Ok(line) => line,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'main,
            };
            match line.as_str() {
                "quit" | "exit" => break 'main,
                "status" => {
                    println!("Online: {}", client.is_online());
                    if let Some(server) = client.server_peer() {
                        println!("Server: {server}");
                    }
                    println!(
                        "Local: {} screen={:?}",
                        client.local().state(),
                        client.local().screen_position()
                    );
                    for remote in client.remotes().iter() {
                        println!(
                            "  {}: {} screen={:?}",
                            remote.client_id, remote.state, remote.screen
                        );
                    }
                }
                other => match parse_key(other) {
                    Some(key) => {
                        match client.submit_key(key, &grid, &mut renderer).await {
                            Some(outcome) => info!(state = %outcome.state, "Moved"),
                            None => println!("Blocked"),
                        }
                    }
                    None => println!("Unknown command: {other}"),
                },
            }
        }

        // Apply remote updates, keep the link alive.
        client.tick(&mut renderer).await;

        tokio::time::sleep(tick_interval).await;
    }

    client.shutdown().await;
    Ok(())
}
