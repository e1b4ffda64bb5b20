//! Remote participants.
//!
//! Frames received by the listener are applied here, on the context that
//! owns render state. The first update for an unseen id is an implicit join;
//! the leave frame removes the entity and tombstones its id so late frames
//! cannot bring it back.

use std::collections::{BTreeMap, HashSet};

use grid_shared::{
    protocol::{ClientId, PlayerState, ServerFrame},
    render::RenderSink,
};
use tracing::debug;

use crate::input::Camera;

/// Another participant as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteEntity {
    pub client_id: ClientId,
    pub state: PlayerState,
    /// Last position handed to the renderer.
    pub screen: (i32, i32),
}

/// What applying a frame did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteEvent {
    Joined(ClientId, PlayerState),
    Moved(ClientId, PlayerState),
    Left(ClientId),
}

/// Registry of remote entities.
#[derive(Debug, Default)]
pub struct RemoteEntities {
    entities: BTreeMap<ClientId, RemoteEntity>,
    /// Ids whose leave was seen. Never pruned: one entry per departed peer
    /// for the client's lifetime, accepted since ids are never reused.
    departed: HashSet<ClientId>,
}

impl RemoteEntities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one server frame. Returns `None` if it changed nothing.
    pub fn apply(
        &mut self,
        frame: ServerFrame,
        camera: &Camera,
        sink: &mut dyn RenderSink,
    ) -> Option<RemoteEvent> {
        match frame {
            ServerFrame::Probe => None,
            ServerFrame::Leave { client_id } => {
                let entity = self.entities.remove(&client_id)?;
                sink.remove_entity(entity.client_id);
                self.departed.insert(client_id);
                Some(RemoteEvent::Left(client_id))
            }
            ServerFrame::Update { client_id, state } => {
                if self.departed.contains(&client_id) {
                    debug!(client_id = %client_id, "Dropping update for departed client");
                    return None;
                }

                let screen = camera.project(state.x, state.y);
                let event = match self.entities.get_mut(&client_id) {
                    Some(entity) => {
                        entity.state = state;
                        entity.screen = screen;
                        RemoteEvent::Moved(client_id, state)
                    }
                    None => {
                        self.entities.insert(
                            client_id,
                            RemoteEntity {
                                client_id,
                                state,
                                screen,
                            },
                        );
                        sink.add_entity(client_id);
                        RemoteEvent::Joined(client_id, state)
                    }
                };
                sink.reposition_entity(client_id, screen.0, screen.1);
                Some(event)
            }
        }
    }

    /// Reprojects every entity after the camera moved.
    pub fn reproject_all(&mut self, camera: &Camera, sink: &mut dyn RenderSink) {
        for entity in self.entities.values_mut() {
            entity.screen = camera.project(entity.state.x, entity.state.y);
            sink.reposition_entity(entity.client_id, entity.screen.0, entity.screen.1);
        }
    }

    /// Removes every entity from the renderer, e.g. when going offline.
    pub fn clear(&mut self, sink: &mut dyn RenderSink) {
        for id in std::mem::take(&mut self.entities).into_keys() {
            sink.remove_entity(id);
        }
    }

    pub fn get(&self, client_id: ClientId) -> Option<&RemoteEntity> {
        self.entities.get(&client_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteEntity> {
        self.entities.values()
    }

    pub fn has_departed(&self, client_id: ClientId) -> bool {
        self.departed.contains(&client_id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_shared::protocol::Direction;

    #[derive(Default)]
    struct Calls(Vec<String>);

    impl RenderSink for Calls {
        fn add_entity(&mut self, id: ClientId) {
            self.0.push(format!("add {id}"));
        }
        fn remove_entity(&mut self, id: ClientId) {
            self.0.push(format!("remove {id}"));
        }
        fn reposition_entity(&mut self, id: ClientId, screen_x: i32, screen_y: i32) {
            self.0.push(format!("move {id} {screen_x} {screen_y}"));
        }
    }

    fn update(id: u32, x: i32, y: i32) -> ServerFrame {
        ServerFrame::Update {
            client_id: ClientId(id),
            state: PlayerState::new(x, y, Direction::Left),
        }
    }

    #[test]
    fn join_move_leave() {
        let camera = Camera { x: 1, y: 1 };
        let mut sink = Calls::default();
        let mut remotes = RemoteEntities::new();

        assert!(matches!(
            remotes.apply(update(3, 4, 4), &camera, &mut sink),
            Some(RemoteEvent::Joined(ClientId(3), _))
        ));
        assert!(matches!(
            remotes.apply(update(3, 5, 4), &camera, &mut sink),
            Some(RemoteEvent::Moved(ClientId(3), _))
        ));
        assert_eq!(remotes.get(ClientId(3)).unwrap().screen, (4, 3));
        assert_eq!(
            remotes.apply(ServerFrame::Leave { client_id: ClientId(3) }, &camera, &mut sink),
            Some(RemoteEvent::Left(ClientId(3)))
        );
        assert!(remotes.is_empty());
        assert_eq!(
            sink.0,
            vec!["add 3", "move 3 3 3", "move 3 4 3", "remove 3"]
        );
    }

    #[test]
    fn departed_ids_stay_gone() {
        let camera = Camera::default();
        let mut sink = Calls::default();
        let mut remotes = RemoteEntities::new();

        remotes.apply(update(1, 0, 0), &camera, &mut sink);
        remotes.apply(ServerFrame::Leave { client_id: ClientId(1) }, &camera, &mut sink);
        assert_eq!(remotes.apply(update(1, 2, 2), &camera, &mut sink), None);
        assert!(remotes.has_departed(ClientId(1)));
        assert!(remotes.is_empty());
    }

    #[test]
    fn leave_for_unknown_id_and_probe_are_ignored() {
        let camera = Camera::default();
        let mut sink = Calls::default();
        let mut remotes = RemoteEntities::new();

        assert_eq!(
            remotes.apply(ServerFrame::Leave { client_id: ClientId(8) }, &camera, &mut sink),
            None
        );
        assert_eq!(remotes.apply(ServerFrame::Probe, &camera, &mut sink), None);
        assert!(sink.0.is_empty());
    }

    #[test]
    fn reproject_and_clear() {
        let mut sink = Calls::default();
        let mut remotes = RemoteEntities::new();
        remotes.apply(update(0, 10, 10), &Camera::default(), &mut sink);
        remotes.apply(update(1, 12, 10), &Camera::default(), &mut sink);
        sink.0.clear();

        remotes.reproject_all(&Camera { x: 2, y: 0 }, &mut sink);
        assert_eq!(sink.0, vec!["move 0 8 10", "move 1 10 10"]);

        sink.0.clear();
        remotes.clear(&mut sink);
        assert_eq!(sink.0, vec!["remove 0", "remove 1"]);
        assert!(remotes.is_empty());
    }
}
