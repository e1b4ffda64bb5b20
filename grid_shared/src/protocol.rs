//! Wire messages.
//!
//! Every message is a compact JSON array terminated by the framing
//! delimiter (see [`crate::framing`]):
//! - client -> server: `[x, y, "direction"]`
//! - server -> client: `[client_id, x, y, "direction"]`
//! - server -> client liveness probe: `[]`
//! - client -> server keepalive: `[]`
//!
//! Departure is signalled in-band with the reserved tile `(99, 99)`. On
//! decode that is lifted into an explicit `Leave` variant so nothing past this
//! module has to compare coordinates against the sentinel.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::SyncError, framing};

/// Reserved coordinate announcing a disconnect.
pub const SENTINEL_X: i32 = 99;
pub const SENTINEL_Y: i32 = 99;

/// Identifies a connected client. Assigned by the server, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Facing of a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Unit step on the grid. Screen rows grow downwards.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }

    /// Parses the lowercase wire name.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == s)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical grid position and facing of a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerState {
    pub x: i32,
    pub y: i32,
    pub direction: Direction,
}

impl PlayerState {
    pub fn new(x: i32, y: i32, direction: Direction) -> Self {
        Self { x, y, direction }
    }

    /// The sentinel state a departing client sends.
    pub fn sentinel(direction: Direction) -> Self {
        Self::new(SENTINEL_X, SENTINEL_Y, direction)
    }

    pub fn is_sentinel(&self) -> bool {
        is_sentinel_tile(self.x, self.y)
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}) {}", self.x, self.y, self.direction)
    }
}

pub fn is_sentinel_tile(x: i32, y: i32) -> bool {
    x == SENTINEL_X && y == SENTINEL_Y
}

/// Client -> server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFrame {
    /// New local state.
    Move(PlayerState),
    /// The client is leaving. Encoded as the sentinel tile.
    Leave { direction: Direction },
}

impl ClientFrame {
    /// The state a server should store for this frame.
    pub fn state(&self) -> PlayerState {
        match *self {
            ClientFrame::Move(state) => state,
            ClientFrame::Leave { direction } => PlayerState::sentinel(direction),
        }
    }

    /// JSON payload without delimiter.
    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        let s = self.state();
        Ok(serde_json::to_vec(&(s.x, s.y, s.direction))?)
    }

    /// Payload plus delimiter, ready to write.
    pub fn to_wire(&self) -> Result<Bytes, SyncError> {
        Ok(framing::frame(&self.encode()?))
    }

    /// Decodes one payload. An empty array yields `None`.
    pub fn decode(payload: &[u8]) -> Result<Option<Self>, SyncError> {
        let values: Vec<Value> = serde_json::from_slice(payload)?;
        if values.is_empty() {
            return Ok(None);
        }
        let (x, y, direction): (i32, i32, Direction) =
            serde_json::from_value(Value::Array(values))?;
        let state = PlayerState::new(x, y, direction);
        Ok(Some(if state.is_sentinel() {
            ClientFrame::Leave { direction }
        } else {
            ClientFrame::Move(state)
        }))
    }
}

/// Client keepalive, `[]` plus delimiter. Carries no state; it only shows
/// the server the connection is still in use.
pub fn keepalive_wire() -> Bytes {
    framing::frame(b"[]")
}

/// Server -> client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFrame {
    /// Liveness probe, `[]`.
    Probe,
    /// A participant's current state.
    Update { client_id: ClientId, state: PlayerState },
    /// A participant left. Always encoded facing `down`.
    Leave { client_id: ClientId },
}

impl ServerFrame {
    /// Relay a client frame on behalf of `client_id`.
    pub fn relay(client_id: ClientId, frame: ClientFrame) -> Self {
        match frame {
            ClientFrame::Move(state) => ServerFrame::Update { client_id, state },
            ClientFrame::Leave { .. } => ServerFrame::Leave { client_id },
        }
    }

    /// JSON payload without delimiter.
    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        let bytes = match *self {
            ServerFrame::Probe => serde_json::to_vec(&Vec::<Value>::new())?,
            ServerFrame::Update { client_id, state } => {
                serde_json::to_vec(&(client_id, state.x, state.y, state.direction))?
            }
            ServerFrame::Leave { client_id } => {
                serde_json::to_vec(&(client_id, SENTINEL_X, SENTINEL_Y, Direction::Down))?
            }
        };
        Ok(bytes)
    }

    /// Payload plus delimiter, ready to write.
    pub fn to_wire(&self) -> Result<Bytes, SyncError> {
        Ok(framing::frame(&self.encode()?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, SyncError> {
        let values: Vec<Value> = serde_json::from_slice(payload)?;
        if values.is_empty() {
            return Ok(ServerFrame::Probe);
        }
        let (client_id, x, y, direction): (ClientId, i32, i32, Direction) =
            serde_json::from_value(Value::Array(values))?;
        if is_sentinel_tile(x, y) {
            Ok(ServerFrame::Leave { client_id })
        } else {
            Ok(ServerFrame::Update {
                client_id,
                state: PlayerState::new(x, y, direction),
            })
        }
    }
}
