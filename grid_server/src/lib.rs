//! `grid_server`
//!
//! Server-side systems:
//! - Connection acceptor assigning monotonically increasing client ids
//! - Session registry guarded by a single mutex
//! - One relay task per connection rebroadcasting client updates
//!
//! Networking model:
//! - TCP only, `|`-delimited JSON array frames (see `grid_shared::framing`)

pub mod registry;
pub mod server;

pub use registry::{Session, SessionInfo, SessionRegistry};
pub use server::GridServer;
