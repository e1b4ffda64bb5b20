//! Rendering abstraction.
//!
//! This crate intentionally does not depend on a graphics backend. The sync
//! layer only tells a renderer which remote characters exist and where they
//! sit on screen.

use crate::protocol::ClientId;

/// What the sync layer needs from a renderer.
///
/// Always called from the context that owns render state, never from the
/// network listener task.
pub trait RenderSink {
    fn add_entity(&mut self, id: ClientId);
    fn remove_entity(&mut self, id: ClientId);
    /// Camera-relative tile position.
    fn reposition_entity(&mut self, id: ClientId, screen_x: i32, screen_y: i32);
}

/// A no-op renderer useful for headless tests.
#[derive(Default)]
pub struct NullRenderer;

impl RenderSink for NullRenderer {
    fn add_entity(&mut self, _id: ClientId) {}
    fn remove_entity(&mut self, _id: ClientId) {}
    fn reposition_entity(&mut self, _id: ClientId, _screen_x: i32, _screen_y: i32) {}
}
