//! Session registry.
//!
//! The only shared mutable state on the server. Every operation takes the
//! same async mutex exactly once, so registration, removal, introductions and
//! broadcasts never observe a half-updated map.
//!
//! Sessions never touch sockets directly. Each one carries the sending side
//! of an unbounded queue drained by that connection's writer task, so a
//! broadcast only enqueues and a slow or dead peer cannot stall the others.

use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use grid_shared::{
    error::SyncError,
    protocol::{ClientId, Direction, PlayerState, ServerFrame},
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Server-side record for one open connection.
#[derive(Debug)]
pub struct Session {
    client_id: ClientId,
    peer: SocketAddr,
    state: PlayerState,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl Session {
    /// New session at the origin, facing down.
    pub fn new(
        client_id: ClientId,
        peer: SocketAddr,
        outbound: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        Self {
            client_id,
            peer,
            state: PlayerState::new(0, 0, Direction::Down),
            outbound,
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            client_id: self.client_id,
            peer: self.peer,
            state: self.state,
        }
    }

    fn enqueue(&self, frame: Bytes) -> Result<(), SyncError> {
        self.outbound
            .send(frame)
            .map_err(|_| SyncError::OutboundClosed(self.client_id))
    }

    fn state_frame(&self) -> ServerFrame {
        ServerFrame::Update {
            client_id: self.client_id,
            state: self.state,
        }
    }
}

/// Read-only copy of a session, as returned by [`SessionRegistry::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub client_id: ClientId,
    pub peer: SocketAddr,
    pub state: PlayerState,
}

/// Guarded map from client id to session. Cheap to clone.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<BTreeMap<ClientId, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session. Client ids must be unique.
    pub async fn register(&self, session: Session) -> anyhow::Result<()> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&session.client_id) {
            anyhow::bail!("client {} already registered", session.client_id);
        }
        sessions.insert(session.client_id, session);
        Ok(())
    }

    /// Registers a newcomer and introduces it to every existing session.
    ///
    /// In id order, each existing peer's state is queued to the newcomer and
    /// the newcomer's state is queued to that peer. A peer whose queue is
    /// closed is skipped. Returns the ids the newcomer was introduced to.
    pub async fn join(&self, session: Session) -> anyhow::Result<Vec<ClientId>> {
        let newcomer = session.state_frame().to_wire()?;
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&session.client_id) {
            anyhow::bail!("client {} already registered", session.client_id);
        }

        let mut introduced = Vec::with_capacity(sessions.len());
        for peer in sessions.values() {
            if let Err(e) = session.enqueue(peer.state_frame().to_wire()?) {
                warn!(
                    client_id = %session.client_id,
                    error = %e,
                    "Introduction to newcomer failed"
                );
            }
            if let Err(e) = peer.enqueue(newcomer.clone()) {
                warn!(client_id = %peer.client_id, error = %e, "Introduction to peer failed");
                continue;
            }
            introduced.push(peer.client_id);
        }
        sessions.insert(session.client_id, session);
        Ok(introduced)
    }

    /// Removes a session. Dropping it closes its outbound queue, which lets
    /// the writer task flush and shut the socket down.
    pub async fn unregister(&self, client_id: ClientId) -> Option<SessionInfo> {
        self.sessions
            .lock()
            .await
            .remove(&client_id)
            .map(|s| s.info())
    }

    /// Queues `frame` to every session except `sender`.
    ///
    /// Failures are isolated per peer. Returns how many peers accepted it.
    pub async fn broadcast_except(
        &self,
        sender: ClientId,
        frame: &ServerFrame,
    ) -> Result<usize, SyncError> {
        let bytes = frame.to_wire()?;
        let sessions = self.sessions.lock().await;
        let mut delivered = 0;
        for session in sessions.values().filter(|s| s.client_id != sender) {
            match session.enqueue(bytes.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(client_id = %session.client_id, error = %e, "Broadcast skipped peer")
                }
            }
        }
        Ok(delivered)
    }

    /// Queues `frame` to one session.
    pub async fn send_to(&self, client_id: ClientId, frame: &ServerFrame) -> Result<(), SyncError> {
        let bytes = frame.to_wire()?;
        let sessions = self.sessions.lock().await;
        sessions
            .get(&client_id)
            .ok_or(SyncError::UnknownSession(client_id))?
            .enqueue(bytes)
    }

    /// Stores a new state. Returns false if the session is gone.
    pub async fn update_state(&self, client_id: ClientId, state: PlayerState) -> bool {
        match self.sessions.lock().await.get_mut(&client_id) {
            Some(session) => {
                session.state = state;
                true
            }
            None => false,
        }
    }

    /// All sessions in id (= join) order.
    pub async fn snapshot(&self) -> Vec<SessionInfo> {
        self.sessions
            .lock()
            .await
            .values()
            .map(Session::info)
            .collect()
    }

    pub async fn contains(&self, client_id: ClientId) -> bool {
        self.sessions.lock().await.contains_key(&client_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn session(id: u32) -> (Session, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Session::new(ClientId(id), peer(40000 + id as u16), tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Vec<Bytes> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn register_rejects_duplicate_ids() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = session(0);
        let (a2, _rx_a2) = session(0);
        registry.register(a).await.unwrap();
        assert!(registry.register(a2).await.is_err());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn join_introduces_both_ways_in_id_order() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = session(0);
        let (b, mut rx_b) = session(1);
        let (c, mut rx_c) = session(2);

        assert!(registry.join(a).await.unwrap().is_empty());
        assert_eq!(registry.join(b).await.unwrap(), vec![ClientId(0)]);
        assert_eq!(
            registry.join(c).await.unwrap(),
            vec![ClientId(0), ClientId(1)]
        );

        assert_eq!(
            drain(&mut rx_a),
            vec![
                Bytes::from_static(b"[1,0,0,\"down\"]|"),
                Bytes::from_static(b"[2,0,0,\"down\"]|"),
            ]
        );
        assert_eq!(
            drain(&mut rx_b),
            vec![
                Bytes::from_static(b"[0,0,0,\"down\"]|"),
                Bytes::from_static(b"[2,0,0,\"down\"]|"),
            ]
        );
        assert_eq!(
            drain(&mut rx_c),
            vec![
                Bytes::from_static(b"[0,0,0,\"down\"]|"),
                Bytes::from_static(b"[1,0,0,\"down\"]|"),
            ]
        );
    }

    #[tokio::test]
    async fn broadcast_skips_sender_and_dead_peers() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = session(0);
        let (b, rx_b) = session(1);
        let (c, mut rx_c) = session(2);
        for s in [a, b, c] {
            registry.register(s).await.unwrap();
        }
        drop(rx_b);

        let frame = ServerFrame::Update {
            client_id: ClientId(0),
            state: PlayerState::new(5, 5, Direction::Up),
        };
        assert_eq!(registry.broadcast_except(ClientId(0), &frame).await.unwrap(), 1);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_c),
            vec![Bytes::from_static(b"[0,5,5,\"up\"]|")]
        );
    }

    #[tokio::test]
    async fn send_to_reports_missing_and_closed_sessions() {
        let registry = SessionRegistry::new();
        let (a, rx_a) = session(0);
        registry.register(a).await.unwrap();

        assert!(registry.send_to(ClientId(0), &ServerFrame::Probe).await.is_ok());
        drop(rx_a);
        assert!(matches!(
            registry.send_to(ClientId(0), &ServerFrame::Probe).await,
            Err(SyncError::OutboundClosed(ClientId(0)))
        ));
        assert!(matches!(
            registry.send_to(ClientId(9), &ServerFrame::Probe).await,
            Err(SyncError::UnknownSession(ClientId(9)))
        ));
    }

    #[tokio::test]
    async fn state_updates_and_removal() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = session(0);
        registry.register(a).await.unwrap();

        let moved = PlayerState::new(3, 4, Direction::Left);
        assert!(registry.update_state(ClientId(0), moved).await);
        assert_eq!(registry.snapshot().await[0].state, moved);

        let removed = registry.unregister(ClientId(0)).await.unwrap();
        assert_eq!(removed.state, moved);
        assert!(registry.is_empty().await);
        assert!(!registry.update_state(ClientId(0), moved).await);
        assert!(registry.unregister(ClientId(0)).await.is_none());
    }
}
