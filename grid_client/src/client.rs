//! Client implementation.
//!
//! The client maintains:
//! - A single bounded-time connect at startup; failure means offline play
//! - The local player, published to the server on every accepted move
//! - A background listener feeding remote updates over a channel
//! - A `[]` keepalive whenever nothing else was sent for `keepalive_ms`
//! - The remote entity registry, updated only from [`GridClient::pump`]
//!
//! Any failure after connecting (send or receive) drops the client into
//! offline mode. The process keeps running and local play continues.

use std::{net::SocketAddr, time::Duration};

use grid_shared::{
    config::GridConfig,
    error::SyncError,
    protocol::{keepalive_wire, ClientFrame, Direction, PlayerState},
    render::RenderSink,
};
use tokio::{
    io::AsyncWriteExt,
    net::{tcp::OwnedWriteHalf, TcpStream},
    sync::mpsc::{self, error::TryRecvError},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    input::{LocalPlayer, MoveOutcome, MoveValidator, MovementIntent},
    listener::{ListenerEvent, RemoteStateListener},
    remote::{RemoteEntities, RemoteEvent},
};

/// Live connection to the server.
struct OnlineLink {
    server: SocketAddr,
    writer: OwnedWriteHalf,
    events: mpsc::UnboundedReceiver<ListenerEvent>,
    listener: RemoteStateListener,
    keepalive: Duration,
    last_sent: Instant,
}

impl OnlineLink {
    async fn open(cfg: &GridConfig, initial: PlayerState) -> Result<Self, SyncError> {
        let timeout = cfg.connect_timeout();
        let connect = TcpStream::connect(cfg.server_addr.as_str());
        let stream = match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(SyncError::Connect {
                    addr: cfg.server_addr.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(SyncError::ConnectTimeout {
                    addr: cfg.server_addr.clone(),
                    timeout,
                })
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "set_nodelay failed");
        }
        let server = stream.peer_addr()?;
        let (read_half, mut writer) = stream.into_split();

        writer
            .write_all(&ClientFrame::Move(initial).to_wire()?)
            .await?;

        let (listener, events) = RemoteStateListener::spawn(read_half, cfg);
        Ok(Self {
            server,
            writer,
            events,
            listener,
            keepalive: cfg.keepalive_interval(),
            last_sent: Instant::now(),
        })
    }

    async fn send(&mut self, frame: ClientFrame) -> Result<(), SyncError> {
        self.writer.write_all(&frame.to_wire()?).await?;
        self.last_sent = Instant::now();
        Ok(())
    }

    /// Writes `[]` once a full keepalive interval passed without a send.
    async fn keep_alive(&mut self) -> Result<(), SyncError> {
        if self.last_sent.elapsed() < self.keepalive {
            return Ok(());
        }
        self.writer.write_all(&keepalive_wire()).await?;
        self.last_sent = Instant::now();
        Ok(())
    }
}

/// High-level game client.
pub struct GridClient {
    local: LocalPlayer,
    remotes: RemoteEntities,
    link: Option<OnlineLink>,
}

impl GridClient {
    /// Connects to the configured server, or falls back to offline play.
    pub async fn connect(cfg: &GridConfig, local: LocalPlayer) -> Self {
        info!(server = %cfg.server_addr, "Connecting to server");
        match OnlineLink::open(cfg, local.state()).await {
            Ok(link) => {
                info!(server = %link.server, "Connected to server");
                Self {
                    local,
                    remotes: RemoteEntities::new(),
                    link: Some(link),
                }
            }
            Err(e) => {
                warn!(error = %e, "Server unavailable, playing offline");
                Self::offline(local)
            }
        }
    }

    /// A client that never talks to a server.
    pub fn offline(local: LocalPlayer) -> Self {
        Self {
            local,
            remotes: RemoteEntities::new(),
            link: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.link.is_some()
    }

    pub fn server_peer(&self) -> Option<SocketAddr> {
        self.link.as_ref().map(|l| l.server)
    }

    pub fn local(&self) -> &LocalPlayer {
        &self.local
    }

    pub fn remotes(&self) -> &RemoteEntities {
        &self.remotes
    }

    /// Applies every update received since the last call. Never blocks.
    pub fn pump(&mut self, sink: &mut dyn RenderSink) -> Vec<RemoteEvent> {
        let mut applied = Vec::new();
        loop {
            let Some(link) = self.link.as_mut() else {
                return applied;
            };
            match link.events.try_recv() {
                Ok(ListenerEvent::Frame(frame)) => {
                    if let Some(event) = self.remotes.apply(frame, self.local.camera(), sink) {
                        debug!(?event, "Remote update");
                        applied.push(event);
                    }
                }
                Ok(ListenerEvent::Failed(e)) => {
                    self.go_offline(&e, sink);
                    return applied;
                }
                Err(TryRecvError::Empty) => return applied,
                Err(TryRecvError::Disconnected) => {
                    self.go_offline(&SyncError::Closed, sink);
                    return applied;
                }
            }
        }
    }

    /// One frame of the client loop: [`pump`](Self::pump), then a keepalive
    /// if the link has been quiet.
    pub async fn tick(&mut self, sink: &mut dyn RenderSink) -> Vec<RemoteEvent> {
        let applied = self.pump(sink);
        if let Some(link) = self.link.as_mut() {
            if let Err(e) = link.keep_alive().await {
                self.go_offline(&e, sink);
            }
        }
        applied
    }

    /// Applies a local movement intent and publishes the result.
    pub async fn submit_intent(
        &mut self,
        intent: MovementIntent,
        validator: &dyn MoveValidator,
        sink: &mut dyn RenderSink,
    ) -> Option<MoveOutcome> {
        let outcome = self.local.apply(intent, validator)?;
        if outcome.camera_moved {
            self.remotes.reproject_all(self.local.camera(), sink);
        }

        if let Some(link) = self.link.as_mut() {
            if let Err(e) = link.send(ClientFrame::Move(outcome.state)).await {
                self.go_offline(&e, sink);
            }
        }
        Some(outcome)
    }

    /// Turn-then-move handling for a direction key.
    pub async fn submit_key(
        &mut self,
        key: Direction,
        validator: &dyn MoveValidator,
        sink: &mut dyn RenderSink,
    ) -> Option<MoveOutcome> {
        let intent = self.local.intent_for_key(key);
        self.submit_intent(intent, validator, sink).await
    }

    /// Announces departure and closes the connection.
    pub async fn shutdown(mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        let leave = ClientFrame::Leave {
            direction: self.local.state().direction,
        };
        if let Err(e) = link.send(leave).await {
            warn!(error = %e, "Failed to announce departure");
        }
        if let Err(e) = link.writer.shutdown().await {
            debug!(error = %e, "Socket shutdown failed");
        }
        link.listener.stop().await;
        info!("Disconnected from server");
    }

    fn go_offline(&mut self, reason: &SyncError, sink: &mut dyn RenderSink) {
        let Some(link) = self.link.take() else {
            return;
        };
        warn!(server = %link.server, error = %reason, "Lost server connection, continuing offline");
        link.listener.signal_stop();
        self.remotes.clear(sink);
    }
}
