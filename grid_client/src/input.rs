//! Local player input.
//!
//! In a real client this would sit behind a keyboard handler and a tile map.
//! Here it turns direction keys into movement intents, checks them against a
//! [`MoveValidator`], and keeps the camera following the local player.

use grid_shared::{
    config::GridConfig,
    protocol::{is_sentinel_tile, Direction, PlayerState},
};

/// A requested step: `(dx, dy)` plus the facing afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovementIntent {
    pub dx: i32,
    pub dy: i32,
    pub direction: Direction,
}

impl MovementIntent {
    pub fn new(dx: i32, dy: i32, direction: Direction) -> Self {
        Self { dx, dy, direction }
    }

    /// Face `direction` without moving.
    pub fn turn(direction: Direction) -> Self {
        Self::new(0, 0, direction)
    }

    /// One tile towards `direction`.
    pub fn step(direction: Direction) -> Self {
        let (dx, dy) = direction.delta();
        Self::new(dx, dy, direction)
    }
}

/// Map/collision check consulted before a local move is accepted.
pub trait MoveValidator {
    fn is_valid_move(&self, x: i32, y: i32) -> bool;
}

impl<F> MoveValidator for F
where
    F: Fn(i32, i32) -> bool,
{
    fn is_valid_move(&self, x: i32, y: i32) -> bool {
        self(x, y)
    }
}

/// Rectangular map with no obstacles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedGrid {
    pub width: i32,
    pub height: i32,
}

impl BoundedGrid {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

impl MoveValidator for BoundedGrid {
    fn is_valid_move(&self, x: i32, y: i32) -> bool {
        // (99, 99) means "gone" on the wire, even on maps large enough to hold it.
        (0..self.width).contains(&x) && (0..self.height).contains(&y) && !is_sentinel_tile(x, y)
    }
}

/// Visible area and map extent, in tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub view_width: i32,
    pub view_height: i32,
    pub map_width: i32,
    pub map_height: i32,
}

impl Viewport {
    pub fn from_config(cfg: &GridConfig) -> Self {
        Self {
            view_width: cfg.view_width,
            view_height: cfg.view_height,
            map_width: cfg.map_width,
            map_height: cfg.map_height,
        }
    }
}

/// Top-left tile of the visible area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Camera {
    pub x: i32,
    pub y: i32,
}

impl Camera {
    /// Centres on `(x, y)` without showing past the map edges.
    /// Returns true if the camera moved.
    pub fn follow(&mut self, x: i32, y: i32, viewport: &Viewport) -> bool {
        let next = Camera {
            x: clamp_axis(
                x.saturating_sub(viewport.view_width / 2),
                viewport.view_width,
                viewport.map_width,
            ),
            y: clamp_axis(
                y.saturating_sub(viewport.view_height / 2),
                viewport.view_height,
                viewport.map_height,
            ),
        };
        let moved = next != *self;
        *self = next;
        moved
    }

    /// Grid position to camera-relative screen tile. Saturates for positions
    /// far off the map.
    pub fn project(&self, x: i32, y: i32) -> (i32, i32) {
        (x.saturating_sub(self.x), y.saturating_sub(self.y))
    }
}

fn clamp_axis(start: i32, view: i32, map: i32) -> i32 {
    start.clamp(0, (map - view).max(0))
}

/// Result of an accepted intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOutcome {
    pub state: PlayerState,
    pub camera_moved: bool,
}

/// The participant driven by this process.
#[derive(Debug, Clone)]
pub struct LocalPlayer {
    state: PlayerState,
    camera: Camera,
    viewport: Viewport,
}

impl LocalPlayer {
    pub fn new(state: PlayerState, viewport: Viewport) -> Self {
        let mut camera = Camera::default();
        camera.follow(state.x, state.y, &viewport);
        Self {
            state,
            camera,
            viewport,
        }
    }

    /// Spawns at the configured tile, facing down.
    pub fn from_config(cfg: &GridConfig) -> Self {
        Self::new(
            PlayerState::new(cfg.spawn_x, cfg.spawn_y, Direction::Down),
            Viewport::from_config(cfg),
        )
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn screen_position(&self) -> (i32, i32) {
        self.camera.project(self.state.x, self.state.y)
    }

    /// A key for a new direction only turns; repeating the current facing
    /// walks one tile.
    pub fn intent_for_key(&self, key: Direction) -> MovementIntent {
        if key == self.state.direction {
            MovementIntent::step(key)
        } else {
            MovementIntent::turn(key)
        }
    }

    /// Applies an intent if the target tile is valid and something changes.
    /// A target outside the `i32` range is rejected.
    pub fn apply(
        &mut self,
        intent: MovementIntent,
        validator: &dyn MoveValidator,
    ) -> Option<MoveOutcome> {
        let x = self.state.x.checked_add(intent.dx)?;
        let y = self.state.y.checked_add(intent.dy)?;
        if !validator.is_valid_move(x, y) {
            return None;
        }

        let next = PlayerState::new(x, y, intent.direction);
        if next == self.state {
            return None;
        }
        self.state = next;
        let camera_moved = self.camera.follow(x, y, &self.viewport);
        Some(MoveOutcome {
            state: next,
            camera_moved,
        })
    }
}
