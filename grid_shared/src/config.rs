//! Configuration system.
//!
//! Loads sync configuration from JSON strings/files. Binaries layer
//! command-line overrides on top.

use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::framing::{DEFAULT_MAX_FRAME_LEN, DEFAULT_RECV_BUFFER};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Server listen address / client target, e.g. `127.0.0.1:8004`.
    pub server_addr: String,
    /// Upper bound on the client's single connect attempt.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Size of one receive.
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
    /// Longest undelimited tail kept while reassembling.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Server drops a session that sends nothing for this long. Off when unset.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    /// Client sends `[]` after this long without any other send. Keep it
    /// well under the server's idle timeout.
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,
    /// Client loop rate.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Local spawn tile (client only).
    #[serde(default = "default_spawn")]
    pub spawn_x: i32,
    #[serde(default = "default_spawn")]
    pub spawn_y: i32,
    /// Map extent in tiles (client only).
    #[serde(default = "default_map_width")]
    pub map_width: i32,
    #[serde(default = "default_map_height")]
    pub map_height: i32,
    /// Visible tiles around the camera (client only).
    #[serde(default = "default_view_width")]
    pub view_width: i32,
    #[serde(default = "default_view_height")]
    pub view_height: i32,
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_recv_buffer_size() -> usize {
    DEFAULT_RECV_BUFFER
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

fn default_keepalive_ms() -> u64 {
    500
}

fn default_tick_hz() -> u32 {
    30
}

fn default_spawn() -> i32 {
    5
}

fn default_map_width() -> i32 {
    50
}

fn default_map_height() -> i32 {
    50
}

fn default_view_width() -> i32 {
    20
}

fn default_view_height() -> i32 {
    12
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8004".to_string(),
            connect_timeout_ms: default_connect_timeout_ms(),
            recv_buffer_size: default_recv_buffer_size(),
            max_frame_len: default_max_frame_len(),
            idle_timeout_secs: None,
            keepalive_ms: default_keepalive_ms(),
            tick_hz: default_tick_hz(),
            spawn_x: default_spawn(),
            spawn_y: default_spawn(),
            map_width: default_map_width(),
            map_height: default_map_height(),
            view_width: default_view_width(),
            view_height: default_view_height(),
        }
    }
}

impl GridConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.tick_hz.max(1) as f32)
    }
}
