//! Room selection and join/leave lifecycle

use crate::socket::{ClientEvent, Transport};

/// Lifecycle of the active room subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Joined (or join deferred), history not yet seeded.
    Loading,
    Live,
    TornDown,
}

/// Tracks which room is selected, whether the backend knows we joined it,
/// and the generation counter that invalidates stale async results.
#[derive(Debug)]
pub struct RoomSession {
    viewer: String,
    selected: Option<String>,
    joined: Option<String>,
    peer: Option<String>,
    generation: u64,
    phase: Phase,
}

impl RoomSession {
    pub fn new(viewer: impl Into<String>) -> Self {
        Self {
            viewer: viewer.into(),
            selected: None,
            joined: None,
            peer: None,
            generation: 0,
            phase: Phase::Idle,
        }
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Whether an async result tagged with `generation` for `room_id` still
    /// applies.
    pub fn is_current(&self, generation: u64, room_id: &str) -> bool {
        self.phase != Phase::TornDown
            && self.generation == generation
            && self.selected.as_deref() == Some(room_id)
    }

    /// Switch to `room_id` (or deselect). Leaves the previous room before
    /// joining the new one. Returns the new generation.
    pub fn select(
        &mut self,
        transport: &dyn Transport,
        room_id: Option<&str>,
        peer: Option<String>,
    ) -> u64 {
        self.leave(transport);

        self.generation += 1;
        self.selected = room_id.map(String::from);
        self.peer = peer;
        self.phase = match self.selected {
            Some(_) => Phase::Loading,
            None => Phase::Idle,
        };

        if let Some(room) = room_id {
            if transport.is_connected() {
                self.join(transport, room);
            } else {
                tracing::debug!("Transport down, deferring join of {}", room);
            }
        }
        self.generation
    }

    /// Re-announce presence and rejoin after a (re)connect.
    pub fn on_connected(&mut self, transport: &dyn Transport) {
        if let Err(e) = transport.emit(ClientEvent::UserJoin {
            username: self.viewer.clone(),
        }) {
            tracing::warn!("Failed to announce presence: {}", e);
        }
        if self.phase == Phase::TornDown {
            return;
        }
        if let Some(room) = self.selected.clone() {
            self.join(transport, &room);
        }
    }

    /// The backend forgets room membership with the socket.
    pub fn on_disconnected(&mut self) {
        self.joined = None;
    }

    pub fn teardown(&mut self, transport: &dyn Transport) {
        self.leave(transport);
        self.generation += 1;
        self.phase = Phase::TornDown;
    }

    fn join(&mut self, transport: &dyn Transport, room: &str) {
        match transport.emit(ClientEvent::JoinRoom(room.to_string())) {
            Ok(()) => {
                tracing::debug!("Joined room {}", room);
                self.joined = Some(room.to_string());
            }
            Err(e) => tracing::warn!("Failed to join room {}: {}", room, e),
        }
    }

    // Best effort, never retried.
    fn leave(&mut self, transport: &dyn Transport) {
        if let Some(room) = self.joined.take() {
            if let Err(e) = transport.emit(ClientEvent::LeaveRoom(room.clone())) {
                tracing::debug!("Leave of {} not sent: {}", room, e);
            }
        }
    }
}
