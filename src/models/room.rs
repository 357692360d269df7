//! Room-related models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator between the two participants of a 1:1 room id.
const DIRECT_ROOM_SEPARATOR: &str = "__";

/// Room entity as listed by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    #[serde(default)]
    pub participant_1: Option<String>,
    /// Second participant, or comma-separated member list for groups.
    #[serde(default)]
    pub participant_2: Option<String>,
    #[serde(default)]
    pub other_user: Option<String>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_message_sender: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub group_icon: Option<String>,
    #[serde(default)]
    pub member_count: Option<u32>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl Room {
    /// Name to show in lists.
    pub fn display_name(&self) -> String {
        if self.is_group {
            if let Some(name) = self.group_name.as_deref().filter(|n| !n.is_empty()) {
                return name.to_string();
            }
        }
        if let Some(other) = self.other_user.as_deref().filter(|n| !n.is_empty()) {
            return other.to_string();
        }
        self.id.clone()
    }

    /// All members: creator / first participant plus the comma list.
    pub fn members(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let all = self
            .participant_1
            .iter()
            .map(String::as_str)
            .chain(self.participant_2.iter().flat_map(|p| p.split(',')));
        for name in all {
            let name = name.trim();
            if !name.is_empty() && !out.iter().any(|m| m == name) {
                out.push(name.to_string());
            }
        }
        out
    }
}

/// Deterministic 1:1 room id: both usernames sorted, joined by `__`.
pub fn direct_room_id(a: &str, b: &str) -> String {
    let mut pair = [a, b];
    pair.sort();
    pair.join(DIRECT_ROOM_SEPARATOR)
}

/// Work out who the viewer is talking to in a room.
///
/// Order: the directory's `other_user`, the non-viewer participant of a 1:1
/// room, the locally cached receiver, and finally the participant encoded in
/// a direct room id (a group id resolves to itself).
pub fn resolve_peer(
    room_id: &str,
    room: Option<&Room>,
    viewer: &str,
    cached: Option<&str>,
) -> Option<String> {
    if let Some(room) = room {
        if let Some(other) = room.other_user.as_deref().filter(|o| !o.is_empty()) {
            return Some(other.to_string());
        }
        if !room.is_group {
            let other = [room.participant_1.as_deref(), room.participant_2.as_deref()]
                .into_iter()
                .flatten()
                .find(|p| !p.is_empty() && *p != viewer);
            if let Some(other) = other {
                return Some(other.to_string());
            }
        }
    }

    if let Some(cached) = cached.filter(|c| !c.is_empty()) {
        return Some(cached.to_string());
    }

    // For a group id there is no separator, so the id itself is the receiver.
    room_id
        .split(DIRECT_ROOM_SEPARATOR)
        .find(|p| !p.is_empty() && *p != viewer)
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: &str) -> Room {
        Room {
            id: id.to_string(),
            participant_1: None,
            participant_2: None,
            other_user: None,
            last_message: None,
            last_message_time: None,
            last_message_sender: None,
            unread_count: 0,
            is_pinned: false,
            is_archived: false,
            is_muted: false,
            is_group: false,
            group_name: None,
            group_icon: None,
            member_count: None,
            created_by: None,
        }
    }

    #[test]
    fn test_direct_room_id_sorted() {
        assert_eq!(direct_room_id("zoe", "adam"), "adam__zoe");
        assert_eq!(direct_room_id("adam", "zoe"), "adam__zoe");
    }

    #[test]
    fn test_resolve_peer_prefers_directory() {
        let mut r = room("alice__bob");
        r.other_user = Some("bobby".into());
        assert_eq!(
            resolve_peer("alice__bob", Some(&r), "alice", Some("cached")).as_deref(),
            Some("bobby")
        );
    }

    #[test]
    fn test_resolve_peer_from_participants() {
        let mut r = room("x");
        r.participant_1 = Some("alice".into());
        r.participant_2 = Some("carol".into());
        assert_eq!(
            resolve_peer("x", Some(&r), "alice", None).as_deref(),
            Some("carol")
        );
    }

    #[test]
    fn test_resolve_peer_falls_back_to_cache_then_id() {
        assert_eq!(
            resolve_peer("alice__bob", None, "alice", Some("bob2")).as_deref(),
            Some("bob2")
        );
        assert_eq!(
            resolve_peer("alice__bob", None, "alice", None).as_deref(),
            Some("bob")
        );
        assert_eq!(
            resolve_peer("group_x_1", None, "alice", None).as_deref(),
            Some("group_x_1")
        );
        assert_eq!(resolve_peer("alice", None, "alice", None), None);
    }

    #[test]
    fn test_members_dedup() {
        let mut r = room("g");
        r.is_group = true;
        r.participant_1 = Some("alice".into());
        r.participant_2 = Some("alice, bob,carol,".into());
        assert_eq!(r.members(), vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_display_name() {
        let mut r = room("g1");
        r.is_group = true;
        r.group_name = Some("Climbing".into());
        assert_eq!(r.display_name(), "Climbing");
        r.is_group = false;
        assert_eq!(r.display_name(), "g1");
    }
}
