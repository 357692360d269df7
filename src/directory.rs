//! Room list with previews, unread counts and presence

use std::collections::HashSet;

use crate::models::Room;
use crate::socket::{RoomPreview, ServerEvent};

/// What a directory event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryChange {
    Unchanged,
    Updated,
    /// The list is stale; fetch it again.
    RefreshNeeded,
}

#[derive(Debug, Default)]
pub struct RoomDirectory {
    viewer: String,
    rooms: Vec<Room>,
    online: HashSet<String>,
    selected: Option<String>,
}

impl RoomDirectory {
    pub fn new(viewer: impl Into<String>) -> Self {
        Self {
            viewer: viewer.into(),
            ..Default::default()
        }
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn find(&self, room_id: &str) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id == room_id)
    }

    /// Replace the list after a fetch.
    pub fn replace(&mut self, rooms: Vec<Room>) {
        self.rooms = rooms;
        self.sort();
    }

    /// Track the open room. Its unread counter is cleared locally.
    pub fn select(&mut self, room_id: Option<&str>) {
        self.selected = room_id.map(String::from);
        if let Some(room) = room_id.and_then(|id| self.rooms.iter_mut().find(|r| r.id == id)) {
            room.unread_count = 0;
        }
    }

    pub fn is_online(&self, username: &str) -> bool {
        self.online.contains(username)
    }

    pub fn apply(&mut self, event: &ServerEvent) -> DirectoryChange {
        match event {
            ServerEvent::RoomUpdated(preview) => self.preview(preview),
            ServerEvent::UserOnline { username } => {
                if self.online.insert(username.clone()) {
                    DirectoryChange::Updated
                } else {
                    DirectoryChange::Unchanged
                }
            }
            ServerEvent::UserOffline { username } => {
                if self.online.remove(username) {
                    DirectoryChange::Updated
                } else {
                    DirectoryChange::Unchanged
                }
            }
            ServerEvent::Group { change, group_id } => {
                tracing::debug!("Group event {:?} for {:?}, refreshing rooms", change, group_id);
                DirectoryChange::RefreshNeeded
            }
            _ => DirectoryChange::Unchanged,
        }
    }

    fn preview(&mut self, preview: &RoomPreview) -> DirectoryChange {
        let from_other = preview.sender.as_deref() != Some(self.viewer.as_str());
        let is_open = self.selected.as_deref() == Some(preview.room_id.as_str());

        let Some(room) = self.rooms.iter_mut().find(|r| r.id == preview.room_id) else {
            // A room we have not listed yet, e.g. someone just started a chat.
            return DirectoryChange::RefreshNeeded;
        };

        room.last_message = preview.last_message.clone();
        room.last_message_sender = preview.sender.clone();
        if preview.timestamp.is_some() {
            room.last_message_time = preview.timestamp;
        }
        if from_other && !is_open {
            room.unread_count += 1;
        }
        self.sort();
        DirectoryChange::Updated
    }

    // Most recent activity first; rooms with no messages sink.
    fn sort(&mut self) {
        self.rooms
            .sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::GroupChange;
    use chrono::{TimeZone, Utc};

    fn room(id: &str, minute: Option<u32>) -> Room {
        Room {
            id: id.to_string(),
            last_message_time: minute.map(|m| Utc.with_ymd_and_hms(2024, 5, 1, 9, m, 0).unwrap()),
            ..Default::default()
        }
    }

    fn updated(room_id: &str, sender: &str, minute: u32) -> ServerEvent {
        ServerEvent::RoomUpdated(RoomPreview {
            room_id: room_id.to_string(),
            last_message: Some("hey".into()),
            sender: Some(sender.to_string()),
            timestamp: Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap()),
        })
    }

    fn ids(dir: &RoomDirectory) -> Vec<&str> {
        dir.rooms().iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_replace_sorts_by_recency() {
        let mut dir = RoomDirectory::new("alice");
        dir.replace(vec![room("a", Some(1)), room("b", None), room("c", Some(5))]);
        assert_eq!(ids(&dir), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_room_updated_bumps_unread_and_moves_to_top() {
        let mut dir = RoomDirectory::new("alice");
        dir.replace(vec![room("a", Some(5)), room("b", Some(1))]);

        assert_eq!(dir.apply(&updated("b", "bob", 0)), DirectoryChange::Updated);
        assert_eq!(ids(&dir), vec!["b", "a"]);
        let b = dir.find("b").unwrap();
        assert_eq!(b.unread_count, 1);
        assert_eq!(b.last_message.as_deref(), Some("hey"));
        assert_eq!(b.last_message_sender.as_deref(), Some("bob"));
    }

    #[test]
    fn test_no_unread_for_own_or_open_room() {
        let mut dir = RoomDirectory::new("alice");
        dir.replace(vec![room("a", None), room("b", None)]);
        dir.select(Some("b"));

        dir.apply(&updated("a", "alice", 1));
        dir.apply(&updated("b", "bob", 2));
        assert_eq!(dir.find("a").unwrap().unread_count, 0);
        assert_eq!(dir.find("b").unwrap().unread_count, 0);
    }

    #[test]
    fn test_select_clears_unread() {
        let mut dir = RoomDirectory::new("alice");
        dir.replace(vec![room("a", None)]);
        dir.apply(&updated("a", "bob", 1));
        dir.apply(&updated("a", "bob", 2));
        assert_eq!(dir.find("a").unwrap().unread_count, 2);

        dir.select(Some("a"));
        assert_eq!(dir.find("a").unwrap().unread_count, 0);
    }

    #[test]
    fn test_unknown_room_needs_refresh() {
        let mut dir = RoomDirectory::new("alice");
        assert_eq!(dir.apply(&updated("zz", "bob", 1)), DirectoryChange::RefreshNeeded);
    }

    #[test]
    fn test_presence() {
        let mut dir = RoomDirectory::new("alice");
        let online = ServerEvent::UserOnline { username: "bob".into() };
        assert_eq!(dir.apply(&online), DirectoryChange::Updated);
        assert_eq!(dir.apply(&online), DirectoryChange::Unchanged);
        assert!(dir.is_online("bob"));

        dir.apply(&ServerEvent::UserOffline { username: "bob".into() });
        assert!(!dir.is_online("bob"));
    }

    #[test]
    fn test_group_events_request_refresh() {
        let mut dir = RoomDirectory::new("alice");
        let ev = ServerEvent::Group {
            change: GroupChange::MemberLeft,
            group_id: Some("g1".into()),
        };
        assert_eq!(dir.apply(&ev), DirectoryChange::RefreshNeeded);
    }
}
