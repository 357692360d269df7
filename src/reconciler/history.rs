//! History load bookkeeping
//!
//! The loader does no I/O. It hands out [`HistoryRequest`]s for the owner to
//! execute and decides whether a returned result still applies.

/// A history fetch the owner should perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub room_id: String,
    pub viewer: String,
    /// Selection generation the result must be tagged with.
    pub generation: u64,
}

/// Fire-and-forget read receipt for a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkReadRequest {
    pub room_id: String,
    pub viewer: String,
}

/// In-flight guard keyed by (room, generation).
#[derive(Debug, Default)]
pub struct HistoryLoader {
    in_flight: Option<(String, u64)>,
}

impl HistoryLoader {
    /// Start a load, unless the same one is already running.
    pub fn begin(&mut self, room_id: &str, viewer: &str, generation: u64) -> Option<HistoryRequest> {
        if self.is_in_flight(room_id, generation) {
            tracing::debug!("History load for {} already in flight", room_id);
            return None;
        }
        self.in_flight = Some((room_id.to_string(), generation));
        Some(HistoryRequest {
            room_id: room_id.to_string(),
            viewer: viewer.to_string(),
            generation,
        })
    }

    /// Settle a load. Returns false if the result belongs to a load that is
    /// no longer tracked (superseded or cancelled).
    pub fn finish(&mut self, room_id: &str, generation: u64) -> bool {
        if !self.is_in_flight(room_id, generation) {
            return false;
        }
        self.in_flight = None;
        true
    }

    pub fn cancel(&mut self) {
        self.in_flight = None;
    }

    fn is_in_flight(&self, room_id: &str, generation: u64) -> bool {
        matches!(self.in_flight, Some((ref r, g)) if r == room_id && g == generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_load_is_noop_while_in_flight() {
        let mut loader = HistoryLoader::default();
        let req = loader.begin("r1", "alice", 1).unwrap();
        assert_eq!(req.generation, 1);
        assert!(loader.begin("r1", "alice", 1).is_none());

        assert!(loader.finish("r1", 1));
        assert!(loader.begin("r1", "alice", 1).is_some());
    }

    #[test]
    fn test_new_generation_supersedes() {
        let mut loader = HistoryLoader::default();
        loader.begin("r1", "alice", 1);
        assert!(loader.begin("r2", "alice", 2).is_some());

        assert!(!loader.finish("r1", 1));
        assert!(loader.finish("r2", 2));
    }

    #[test]
    fn test_cancel_drops_result() {
        let mut loader = HistoryLoader::default();
        loader.begin("r1", "alice", 3);
        loader.cancel();
        assert!(!loader.finish("r1", 3));
    }
}
