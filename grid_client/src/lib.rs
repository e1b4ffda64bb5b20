//! `grid_client`
//!
//! Client-side systems:
//! - Connection management with offline fallback
//! - Background listener for server broadcasts
//! - Remote entity registry driving a render sink
//! - Local input, move validation and camera follow

pub mod client;
pub mod input;
pub mod listener;
pub mod remote;

pub use client::GridClient;
