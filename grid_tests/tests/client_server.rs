//! Full socket-based integration tests for client <-> server synchronization.

use std::time::{Duration, Instant};

use grid_client::input::{BoundedGrid, LocalPlayer};
use grid_client::GridClient;
use grid_server::server::{bind_ephemeral, bind_ephemeral_with};
use grid_shared::config::GridConfig;
use grid_shared::protocol::{ClientId, Direction, PlayerState};
use grid_tests::{eventually, init_tracing, pump_until, RecordingRenderer, RenderCall};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn remote_state(client: &GridClient, id: u32) -> Option<PlayerState> {
    client.remotes().get(ClientId(id)).map(|e| e.state)
}

/// Two real clients see each other's moves and departure.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_clients_mirror_each_other() -> anyhow::Result<()> {
    init_tracing();
    let (server, cfg) = bind_ephemeral().await?;
    let registry = server.registry();
    server.spawn();

    let grid = BoundedGrid::new(cfg.map_width, cfg.map_height);
    let mut render_a = RecordingRenderer::default();
    let mut render_b = RecordingRenderer::default();

    let mut a = GridClient::connect(&cfg, LocalPlayer::from_config(&cfg)).await;
    assert!(a.is_online());
    eventually(|| {
        let registry = registry.clone();
        async move {
            registry
                .snapshot()
                .await
                .first()
                .is_some_and(|s| s.state == PlayerState::new(5, 5, Direction::Down))
        }
    })
    .await?;

    let mut b = GridClient::connect(&cfg, LocalPlayer::from_config(&cfg)).await;
    assert!(b.is_online());

    let spawn = PlayerState::new(5, 5, Direction::Down);
    pump_until(&mut b, &mut render_b, |c, _| remote_state(c, 0) == Some(spawn)).await?;
    pump_until(&mut a, &mut render_a, |c, _| remote_state(c, 1) == Some(spawn)).await?;
    assert_eq!(render_a.calls.first(), Some(&RenderCall::Add(ClientId(1))));

    // Turn, then step.
    a.submit_key(Direction::Right, &grid, &mut render_a).await;
    a.submit_key(Direction::Right, &grid, &mut render_a).await;
    assert_eq!(a.local().state(), PlayerState::new(6, 5, Direction::Right));
    pump_until(&mut b, &mut render_b, |c, _| {
        remote_state(c, 0) == Some(PlayerState::new(6, 5, Direction::Right))
    })
    .await?;

    let expected_screen = b.local().camera().project(6, 5);
    assert_eq!(render_b.visible.get(&ClientId(0)), Some(&expected_screen));

    a.shutdown().await;
    pump_until(&mut b, &mut render_b, |c, r| {
        c.remotes().is_empty() && !r.visible.contains_key(&ClientId(0))
    })
    .await?;
    assert!(b.remotes().has_departed(ClientId(0)));
    assert_eq!(render_b.calls.last(), Some(&RenderCall::Remove(ClientId(0))));

    b.shutdown().await;
    eventually(|| {
        let registry = registry.clone();
        async move { registry.is_empty().await }
    })
    .await?;
    Ok(())
}

/// No server at startup: offline mode, and the loop never blocks on I/O.
#[tokio::test]
async fn offline_when_server_missing() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let cfg = GridConfig {
        server_addr: addr.to_string(),
        connect_timeout_ms: 500,
        ..GridConfig::default()
    };
    let mut client = GridClient::connect(&cfg, LocalPlayer::from_config(&cfg)).await;
    assert!(!client.is_online());

    let mut render = RecordingRenderer::default();
    let started = Instant::now();
    for _ in 0..1000 {
        assert!(client.pump(&mut render).is_empty());
    }
    assert!(started.elapsed() < Duration::from_millis(500));

    let grid = BoundedGrid::new(cfg.map_width, cfg.map_height);
    assert!(client
        .submit_key(Direction::Down, &grid, &mut render)
        .await
        .is_some());
    assert!(render.calls.is_empty());
    Ok(())
}

/// Losing the server mid-session turns into offline play, not an exit.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lost_server_means_offline() -> anyhow::Result<()> {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let cfg = GridConfig {
        server_addr: listener.local_addr()?.to_string(),
        ..GridConfig::default()
    };

    let fake_server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await?;
        let mut hello = [0u8; 13];
        stream.read_exact(&mut hello).await?;
        anyhow::ensure!(&hello == b"[5,5,\"down\"]|", "unexpected hello");
        stream.write_all(b"[]|[3,1,1,\"up\"]|").await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, anyhow::Error>(())
    });

    let mut client = GridClient::connect(&cfg, LocalPlayer::from_config(&cfg)).await;
    assert!(client.is_online());

    let mut render = RecordingRenderer::default();
    pump_until(&mut client, &mut render, |c, _| !c.is_online()).await?;
    fake_server.await??;

    assert!(client.remotes().is_empty());
    assert!(render.visible.is_empty());
    assert_eq!(render.calls.first(), Some(&RenderCall::Add(ClientId(3))));
    assert_eq!(render.calls.last(), Some(&RenderCall::Remove(ClientId(3))));

    // Local play continues.
    let grid = BoundedGrid::new(cfg.map_width, cfg.map_height);
    assert!(client
        .submit_key(Direction::Up, &grid, &mut render)
        .await
        .is_some());
    client.shutdown().await;
    Ok(())
}

/// A player standing still outlives the server's idle timeout.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_client_survives_idle_timeout() -> anyhow::Result<()> {
    init_tracing();
    let (server, cfg) = bind_ephemeral_with(GridConfig {
        idle_timeout_secs: Some(1),
        ..GridConfig::default()
    })
    .await?;
    let registry = server.registry();
    server.spawn();

    let mut client = GridClient::connect(&cfg, LocalPlayer::from_config(&cfg)).await;
    assert!(client.is_online());

    let mut render = RecordingRenderer::default();
    let started = Instant::now();
    while started.elapsed() < Duration::from_millis(2500) {
        client.tick(&mut render).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(client.is_online());
    assert_eq!(registry.len().await, 1);
    assert_eq!(
        registry.snapshot().await[0].state,
        PlayerState::new(5, 5, Direction::Down)
    );
    client.shutdown().await;
    Ok(())
}
