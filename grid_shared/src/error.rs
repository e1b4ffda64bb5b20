//! Error taxonomy for the sync layer.
//!
//! Connection errors push the client into offline mode. Session errors tear
//! down exactly one session (server) or the listener (client). Decode errors
//! drop a single frame and never end a connection.

use std::{io, time::Duration};

use crate::protocol::ClientId;

/// Errors raised by the framing codec, the relays and the client listener.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The initial connect was refused or failed.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The initial connect did not complete in time.
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// Send or receive failed mid-session.
    #[error("session i/o: {0}")]
    Io(#[from] io::Error),

    /// The peer closed its end of the stream.
    #[error("peer closed the connection")]
    Closed,

    /// No data arrived within the configured idle window.
    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),

    /// The per-session writer is gone, usually after a failed write.
    #[error("outbound queue for client {0} is closed")]
    OutboundClosed(ClientId),

    /// The session was already removed from the registry.
    #[error("client {0} is not registered")]
    UnknownSession(ClientId),

    /// A frame payload was not a valid message.
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
}

impl SyncError {
    /// Returns true for errors that only invalidate one frame.
    pub fn is_decode(&self) -> bool {
        matches!(self, SyncError::Decode(_))
    }

    /// Returns true for errors raised while establishing a connection.
    pub fn is_connect(&self) -> bool {
        matches!(
            self,
            SyncError::Connect { .. } | SyncError::ConnectTimeout { .. }
        )
    }
}
