//! `grid_shared`
//!
//! Libraries used by both client and server.
//!
//! Design goals:
//! - One wire format, owned here, so both ends agree byte for byte.
//! - Typed errors for the sync layer, `anyhow` at application seams.
//! - Traits at the rendering seam so the core stays headless.
//! - No `unsafe`.

pub mod config;
pub mod error;
pub mod framing;
pub mod protocol;
pub mod render;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::error::*;
    pub use crate::framing::{frame, FrameBuffer, FrameReader, DELIMITER};
    pub use crate::protocol::*;
    pub use crate::render::*;
}
