//! Server implementation.
//!
//! One accept loop plus, per connection, a relay task reading client frames
//! and a writer task draining that session's outbound queue. The session
//! registry is the only state the tasks share.
//!
//! Connection flow:
//! - accept, assign the next client id (never reused)
//! - register the session at `(0, 0, down)` and introduce it to every peer
//! - relay loop: probe, receive, store state, rebroadcast
//! - the sentinel tile `(99, 99)`, EOF, or any I/O failure ends the relay
//!   and removes the session; other relays are unaffected

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use bytes::Bytes;
use grid_shared::{
    config::GridConfig,
    error::SyncError,
    framing::FrameReader,
    protocol::{ClientFrame, ClientId, ServerFrame},
};
use tokio::{
    io::AsyncWriteExt,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener,
    },
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::registry::{Session, SessionRegistry};

/// Game server: accept loop and session bookkeeping.
pub struct GridServer {
    pub cfg: GridConfig,
    tcp: TcpListener,
    registry: SessionRegistry,
    next_client_id: u32,
}

impl GridServer {
    /// Binds the listening socket.
    pub async fn bind(cfg: GridConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let tcp = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self {
            cfg,
            tcp,
            registry: SessionRegistry::new(),
            next_client_id: 0,
        })
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.tcp.local_addr()?)
    }

    /// Handle to the session registry.
    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    fn allocate_client_id(&mut self) -> ClientId {
        let id = ClientId(self.next_client_id);
        self.next_client_id += 1;
        id
    }

    /// Accepts exactly one connection and starts its relay.
    pub async fn accept_one(&mut self) -> anyhow::Result<ClientId> {
        let (stream, peer) = self.tcp.accept().await.context("tcp accept")?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "set_nodelay failed");
        }

        let client_id = self.allocate_client_id();
        let (read_half, write_half) = stream.into_split();
        let outbound = spawn_writer(client_id, write_half);

        let introduced = self
            .registry
            .join(Session::new(client_id, peer, outbound))
            .await?;
        info!(client_id = %client_id, %peer, peers = introduced.len(), "Client connected");

        let relay = SessionRelay::new(client_id, peer, read_half, self.registry.clone(), &self.cfg);
        tokio::spawn(relay.run());
        Ok(client_id)
    }

    /// Accepts connections until the process exits.
    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            if let Err(e) = self.accept_one().await {
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }

    /// Runs the accept loop on a background task.
    pub fn spawn(self) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(self.run())
    }
}

/// Drains a session's outbound queue into its socket.
///
/// Ends on the first write error or when the session is dropped from the
/// registry. Either way the queue's receiver goes away, which later sends
/// observe as [`SyncError::OutboundClosed`].
fn spawn_writer(client_id: ClientId, mut writer: OwnedWriteHalf) -> mpsc::UnboundedSender<Bytes> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                debug!(client_id = %client_id, error = %e, "Write failed");
                return;
            }
        }
        let _ = writer.shutdown().await;
    });
    tx
}

/// Relay lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Active,
    Terminated,
}

/// Per-connection worker: reads client frames and rebroadcasts them.
pub struct SessionRelay {
    client_id: ClientId,
    peer: SocketAddr,
    reader: FrameReader<OwnedReadHalf>,
    registry: SessionRegistry,
    idle_timeout: Option<Duration>,
}

impl SessionRelay {
    pub fn new(
        client_id: ClientId,
        peer: SocketAddr,
        read_half: OwnedReadHalf,
        registry: SessionRegistry,
        cfg: &GridConfig,
    ) -> Self {
        Self {
            client_id,
            peer,
            reader: FrameReader::new(read_half, cfg.recv_buffer_size, cfg.max_frame_len),
            registry,
            idle_timeout: cfg.idle_timeout(),
        }
    }

    /// Runs until the session terminates, then removes it.
    pub async fn run(mut self) {
        let outcome = loop {
            match self.step().await {
                Ok(RelayState::Active) => continue,
                Ok(RelayState::Terminated) => break None,
                Err(e) => break Some(e),
            }
        };

        self.registry.unregister(self.client_id).await;
        let Some(reason) = outcome else {
            info!(client_id = %self.client_id, peer = %self.peer, "Client left");
            return;
        };
        match reason {
            SyncError::Closed => {
                info!(client_id = %self.client_id, peer = %self.peer, "Client disconnected")
            }
            e => {
                warn!(client_id = %self.client_id, peer = %self.peer, error = %e, "Session dropped")
            }
        }

        // Client vanished without the sentinel: announce the leave for it.
        let leave = ServerFrame::Leave {
            client_id: self.client_id,
        };
        if let Err(e) = self.registry.broadcast_except(self.client_id, &leave).await {
            warn!(client_id = %self.client_id, error = %e, "Leave broadcast failed");
        }
    }

    /// One loop iteration: liveness probe, then one receive.
    async fn step(&mut self) -> Result<RelayState, SyncError> {
        self.registry
            .send_to(self.client_id, &ServerFrame::Probe)
            .await?;

        for payload in self.receive().await? {
            if self.handle_payload(&payload).await? == RelayState::Terminated {
                return Ok(RelayState::Terminated);
            }
        }
        Ok(RelayState::Active)
    }

    async fn receive(&mut self) -> Result<Vec<Bytes>, SyncError> {
        match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, self.reader.read_frames())
                .await
                .map_err(|_| SyncError::IdleTimeout(limit))?,
            None => self.reader.read_frames().await,
        }
    }

    async fn handle_payload(&mut self, payload: &[u8]) -> Result<RelayState, SyncError> {
        let frame = match ClientFrame::decode(payload) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(RelayState::Active),
            Err(e) => {
                warn!(
                    client_id = %self.client_id,
                    error = %e,
                    payload = %String::from_utf8_lossy(payload),
                    "Dropping malformed frame"
                );
                return Ok(RelayState::Active);
            }
        };

        if !self.registry.update_state(self.client_id, frame.state()).await {
            return Err(SyncError::UnknownSession(self.client_id));
        }

        let out = ServerFrame::relay(self.client_id, frame);
        let delivered = self.registry.broadcast_except(self.client_id, &out).await?;

        match frame {
            ClientFrame::Leave { .. } => {
                debug!(client_id = %self.client_id, delivered, "Leave broadcast");
                Ok(RelayState::Terminated)
            }
            ClientFrame::Move(state) => {
                debug!(client_id = %self.client_id, %state, delivered, "Update relayed");
                Ok(RelayState::Active)
            }
        }
    }
}

/// Helper for tests: bind to an ephemeral localhost port.
pub async fn bind_ephemeral() -> anyhow::Result<(GridServer, GridConfig)> {
    bind_ephemeral_with(GridConfig::default()).await
}

/// Like [`bind_ephemeral`], keeping every other field of `cfg`.
pub async fn bind_ephemeral_with(cfg: GridConfig) -> anyhow::Result<(GridServer, GridConfig)> {
    let cfg = GridConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        ..cfg
    };
    let mut server = GridServer::bind(cfg).await?;
    let addr = server.local_addr()?;
    server.cfg.server_addr = addr.to_string();
    let cfg = server.cfg.clone();
    Ok((server, cfg))
}
