//! Named events carried over the real-time channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{DeletedFor, Message, MessageType, UploadedFile};

/// Outgoing text message payload (`send_message`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingText {
    #[serde(rename = "roomId")]
    pub room_id: String,
    pub sender: String,
    pub receiver: String,
    pub message: String,
    pub reply_to_id: Option<String>,
}

/// Outgoing file message payload (`send_file`), sent after a successful upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingFile {
    #[serde(rename = "roomId")]
    pub room_id: String,
    pub sender: String,
    pub receiver: String,
    pub message_type: MessageType,
    pub file_url: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

impl OutgoingFile {
    pub fn new(room_id: &str, sender: &str, receiver: &str, file: &UploadedFile) -> Self {
        Self {
            room_id: room_id.to_string(),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            message_type: file.message_type,
            file_url: file.file_url.clone(),
            file_name: file.file_name.clone(),
            file_size: file.file_size,
        }
    }
}

/// One destination of a forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardTarget {
    pub room_id: String,
    pub receiver: String,
}

/// Events this client emits.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    JoinRoom(String),
    LeaveRoom(String),
    /// Presence announcement.
    UserJoin { username: String },
    SendMessage(OutgoingText),
    SendFile(OutgoingFile),
    Typing { room_id: String, sender: String },
    StopTyping { room_id: String, sender: String },
    MessageSeen {
        room_id: String,
        viewer: String,
        message_ids: Vec<String>,
    },
    ForwardMessage {
        messages: Vec<Message>,
        to_rooms: Vec<ForwardTarget>,
    },
    NewGroupCreated {
        group_id: String,
        group_name: String,
        members: Vec<String>,
        creator: String,
    },
    MembersAdded {
        group_id: String,
        group_name: Option<String>,
        new_members: Vec<String>,
        added_by: String,
    },
    MemberRemoved {
        group_id: String,
        removed_user: String,
        group_name: Option<String>,
    },
    MemberLeft {
        group_id: String,
        username: String,
        group_name: Option<String>,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join_room",
            ClientEvent::LeaveRoom(_) => "leave_room",
            ClientEvent::UserJoin { .. } => "user_join",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::SendFile(_) => "send_file",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::StopTyping { .. } => "stop_typing",
            ClientEvent::MessageSeen { .. } => "message_seen",
            ClientEvent::ForwardMessage { .. } => "forward_message",
            ClientEvent::NewGroupCreated { .. } => "new_group_created",
            ClientEvent::MembersAdded { .. } => "members_added",
            ClientEvent::MemberRemoved { .. } => "member_removed",
            ClientEvent::MemberLeft { .. } => "member_left",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            ClientEvent::JoinRoom(room) | ClientEvent::LeaveRoom(room) => json!(room),
            ClientEvent::UserJoin { username } => json!({ "username": username }),
            ClientEvent::SendMessage(text) => json!(text),
            ClientEvent::SendFile(file) => json!(file),
            ClientEvent::Typing { room_id, sender } | ClientEvent::StopTyping { room_id, sender } => {
                json!({ "roomId": room_id, "sender": sender })
            }
            ClientEvent::MessageSeen {
                room_id,
                viewer,
                message_ids,
            } => json!({ "roomId": room_id, "viewer": viewer, "messageIds": message_ids }),
            ClientEvent::ForwardMessage { messages, to_rooms } => {
                json!({ "messages": messages, "toRooms": to_rooms })
            }
            ClientEvent::NewGroupCreated {
                group_id,
                group_name,
                members,
                creator,
            } => json!({
                "groupId": group_id,
                "groupName": group_name,
                "members": members,
                "creator": creator,
            }),
            ClientEvent::MembersAdded {
                group_id,
                group_name,
                new_members,
                added_by,
            } => json!({
                "groupId": group_id,
                "groupName": group_name,
                "newMembers": new_members,
                "addedBy": added_by,
            }),
            ClientEvent::MemberRemoved {
                group_id,
                removed_user,
                group_name,
            } => json!({
                "groupId": group_id,
                "removedUser": removed_user,
                "groupName": group_name,
            }),
            ClientEvent::MemberLeft {
                group_id,
                username,
                group_name,
            } => json!({
                "groupId": group_id,
                "username": username,
                "groupName": group_name,
            }),
        }
    }
}

/// Last-message preview pushed when any room the viewer belongs to changes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPreview {
    pub room_id: String,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Which group lifecycle event arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupChange {
    Created,
    Updated,
    MembersAdded,
    MemberRemoved,
    MemberLeft,
}

/// Whether an event belongs to the active room or the room directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Room,
    Directory,
}

/// Events received from the backend, already decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    NewMessage(Message),
    Delivered {
        message_id: String,
    },
    Seen {
        message_ids: Vec<String>,
    },
    Typing {
        room_id: Option<String>,
        sender: String,
    },
    StopTyping {
        room_id: Option<String>,
        sender: Option<String>,
    },
    Deleted {
        room_id: Option<String>,
        message_id: String,
        deleted_for: DeletedFor,
    },
    UserOnline {
        username: String,
    },
    UserOffline {
        username: String,
    },
    RoomUpdated(RoomPreview),
    Group {
        change: GroupChange,
        group_id: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeliveredPayload {
    message_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeenPayload {
    message_ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    #[serde(default)]
    room_id: Option<String>,
    #[serde(default)]
    sender: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeletedPayload {
    #[serde(default)]
    room_id: Option<String>,
    message_id: String,
    #[serde(default)]
    deleted_for: Option<DeletedFor>,
}

#[derive(Deserialize)]
struct PresencePayload {
    username: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupPayload {
    #[serde(default)]
    group_id: Option<String>,
}

impl ServerEvent {
    /// Decode a named event. Unknown names and malformed payloads yield
    /// `None` and are dropped by the caller.
    pub fn decode(name: &str, payload: Value) -> Option<Self> {
        let event = match name {
            "receive_message" => ServerEvent::NewMessage(serde_json::from_value(payload).ok()?),
            "message_delivered" => {
                let p: DeliveredPayload = serde_json::from_value(payload).ok()?;
                ServerEvent::Delivered {
                    message_id: p.message_id,
                }
            }
            "message_seen" => {
                let p: SeenPayload = serde_json::from_value(payload).ok()?;
                ServerEvent::Seen {
                    message_ids: p.message_ids,
                }
            }
            "typing" => {
                let p: TypingPayload = serde_json::from_value(payload).ok()?;
                ServerEvent::Typing {
                    room_id: p.room_id,
                    sender: p.sender.filter(|s| !s.is_empty())?,
                }
            }
            "stop_typing" => {
                // Some servers emit stop_typing with no payload at all.
                let p: TypingPayload = serde_json::from_value(payload).unwrap_or(TypingPayload {
                    room_id: None,
                    sender: None,
                });
                ServerEvent::StopTyping {
                    room_id: p.room_id,
                    sender: p.sender,
                }
            }
            "message_deleted" => {
                let p: DeletedPayload = serde_json::from_value(payload).ok()?;
                ServerEvent::Deleted {
                    room_id: p.room_id,
                    message_id: p.message_id,
                    deleted_for: p.deleted_for.unwrap_or(DeletedFor::Me),
                }
            }
            "user_online" => {
                let p: PresencePayload = serde_json::from_value(payload).ok()?;
                ServerEvent::UserOnline {
                    username: p.username,
                }
            }
            "user_offline" => {
                let p: PresencePayload = serde_json::from_value(payload).ok()?;
                ServerEvent::UserOffline {
                    username: p.username,
                }
            }
            "room_updated" => ServerEvent::RoomUpdated(serde_json::from_value(payload).ok()?),
            "new_group_created" | "group_updated" | "members_added" | "member_removed"
            | "member_left" => {
                let change = match name {
                    "new_group_created" => GroupChange::Created,
                    "group_updated" => GroupChange::Updated,
                    "members_added" => GroupChange::MembersAdded,
                    "member_removed" => GroupChange::MemberRemoved,
                    _ => GroupChange::MemberLeft,
                };
                let group_id = serde_json::from_value::<GroupPayload>(payload)
                    .ok()
                    .and_then(|p| p.group_id);
                ServerEvent::Group { change, group_id }
            }
            _ => return None,
        };
        Some(event)
    }

    pub fn scope(&self) -> Scope {
        match self {
            ServerEvent::NewMessage(_)
            | ServerEvent::Delivered { .. }
            | ServerEvent::Seen { .. }
            | ServerEvent::Typing { .. }
            | ServerEvent::StopTyping { .. }
            | ServerEvent::Deleted { .. } => Scope::Room,
            ServerEvent::UserOnline { .. }
            | ServerEvent::UserOffline { .. }
            | ServerEvent::RoomUpdated(_)
            | ServerEvent::Group { .. } => Scope::Directory,
        }
    }

    /// Room this event is explicitly tagged with, if the payload carries one.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            ServerEvent::NewMessage(m) => m.room_id.as_deref(),
            ServerEvent::Typing { room_id, .. }
            | ServerEvent::StopTyping { room_id, .. }
            | ServerEvent::Deleted { room_id, .. } => room_id.as_deref(),
            ServerEvent::RoomUpdated(p) => Some(&p.room_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_delivered_and_seen() {
        assert_eq!(
            ServerEvent::decode("message_delivered", json!({ "messageId": "m1" })),
            Some(ServerEvent::Delivered {
                message_id: "m1".into()
            })
        );
        assert_eq!(
            ServerEvent::decode("message_seen", json!({ "messageIds": ["m1", "m2"] })),
            Some(ServerEvent::Seen {
                message_ids: vec!["m1".into(), "m2".into()]
            })
        );
    }

    #[test]
    fn test_decode_malformed_is_dropped() {
        assert_eq!(ServerEvent::decode("message_delivered", json!({})), None);
        assert_eq!(ServerEvent::decode("receive_message", json!("oops")), None);
        assert_eq!(ServerEvent::decode("typing", json!({ "sender": "" })), None);
        assert_eq!(ServerEvent::decode("no_such_event", json!({})), None);
    }

    #[test]
    fn test_decode_stop_typing_without_payload() {
        assert_eq!(
            ServerEvent::decode("stop_typing", Value::Null),
            Some(ServerEvent::StopTyping {
                room_id: None,
                sender: None
            })
        );
    }

    #[test]
    fn test_decode_deleted_defaults_to_me() {
        let ev = ServerEvent::decode("message_deleted", json!({ "messageId": "m9" })).unwrap();
        assert_eq!(
            ev,
            ServerEvent::Deleted {
                room_id: None,
                message_id: "m9".into(),
                deleted_for: DeletedFor::Me
            }
        );
        assert_eq!(ev.scope(), Scope::Room);
    }

    #[test]
    fn test_decode_group_events_are_directory_scoped() {
        let ev = ServerEvent::decode("members_added", json!({ "groupId": "g1" })).unwrap();
        assert_eq!(
            ev,
            ServerEvent::Group {
                change: GroupChange::MembersAdded,
                group_id: Some("g1".into())
            }
        );
        assert_eq!(ev.scope(), Scope::Directory);
    }

    #[test]
    fn test_send_message_payload_shape() {
        let ev = ClientEvent::SendMessage(OutgoingText {
            room_id: "alice__bob".into(),
            sender: "alice".into(),
            receiver: "bob".into(),
            message: "hi".into(),
            reply_to_id: None,
        });
        assert_eq!(ev.name(), "send_message");
        assert_eq!(
            ev.payload(),
            json!({
                "roomId": "alice__bob",
                "sender": "alice",
                "receiver": "bob",
                "message": "hi",
                "reply_to_id": null
            })
        );
    }

    #[test]
    fn test_join_room_payload_is_bare_string() {
        assert_eq!(ClientEvent::JoinRoom("r1".into()).payload(), json!("r1"));
    }
}
