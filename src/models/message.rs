//! Message-related models

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Which kind of body a message carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
        }
    }
}

/// Scope of a deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletedFor {
    /// Removed from the requesting viewer's projection only.
    Me,
    /// Tombstoned for every participant.
    Everyone,
}

impl DeletedFor {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletedFor::Me => "me",
            DeletedFor::Everyone => "everyone",
        }
    }

    /// Anything other than `everyone` is treated as a per-viewer delete.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("everyone") {
            DeletedFor::Everyone
        } else {
            DeletedFor::Me
        }
    }
}

impl Serialize for DeletedFor {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DeletedFor {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct Visitor;
        impl<'de> de::Visitor<'de> for Visitor {
            type Value = DeletedFor;
            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("\"me\" or \"everyone\"")
            }
            fn visit_str<E: de::Error>(self, v: &str) -> Result<DeletedFor, E> {
                Ok(DeletedFor::parse(v))
            }
        }
        d.deserialize_str(Visitor)
    }
}

/// Delivery lattice. Status only ever moves rightwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeliveryStatus {
    Unsent,
    Sent,
    Delivered,
    Seen,
}

/// Borrowed view of a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageBody<'a> {
    Text(&'a str),
    Image { url: &'a str, name: Option<&'a str> },
    File {
        url: &'a str,
        name: Option<&'a str>,
        size: Option<u64>,
    },
    /// Deleted for everyone, or a file message whose reference is missing.
    Withheld,
}

/// Chat message as returned by the history endpoint and pushed over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub receiver_name: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub is_delivered: bool,
    #[serde(default)]
    pub is_seen: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_for: Option<DeletedFor>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reply_to_id: Option<String>,
    /// Locally resolved snapshot of the message replied to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Box<Message>>,
    #[serde(default)]
    pub is_forwarded: bool,
    #[serde(default)]
    pub forwarded_from: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn status(&self) -> DeliveryStatus {
        if self.is_seen {
            DeliveryStatus::Seen
        } else if self.is_delivered {
            DeliveryStatus::Delivered
        } else if self.id.is_empty() {
            DeliveryStatus::Unsent
        } else {
            DeliveryStatus::Sent
        }
    }

    /// Raise the status to at least `to`. Returns true if anything changed.
    pub fn raise_status(&mut self, to: DeliveryStatus) -> bool {
        if to <= self.status() {
            return false;
        }
        if to >= DeliveryStatus::Delivered {
            self.is_delivered = true;
        }
        if to >= DeliveryStatus::Seen {
            self.is_seen = true;
        }
        true
    }

    pub fn body(&self) -> MessageBody<'_> {
        if self.is_deleted && self.deleted_for == Some(DeletedFor::Everyone) {
            return MessageBody::Withheld;
        }
        match self.message_type {
            MessageType::Text => MessageBody::Text(self.message.as_deref().unwrap_or("")),
            MessageType::Image => match self.file_url.as_deref() {
                Some(url) => MessageBody::Image {
                    url,
                    name: self.file_name.as_deref(),
                },
                None => MessageBody::Withheld,
            },
            MessageType::File => match self.file_url.as_deref() {
                Some(url) => MessageBody::File {
                    url,
                    name: self.file_name.as_deref(),
                    size: self.file_size,
                },
                None => MessageBody::Withheld,
            },
        }
    }

    /// Turn this message into a tombstone: keeps id, position and
    /// participants, drops the content.
    pub fn tombstone(&mut self) {
        self.is_deleted = true;
        self.deleted_for = Some(DeletedFor::Everyone);
        self.message = None;
        self.file_url = None;
        self.file_name = None;
        self.file_size = None;
        self.reply_to = None;
    }

    /// Copy suitable for embedding as a reply target (no nested reply chain).
    pub fn reply_snapshot(&self) -> Box<Message> {
        let mut snap = self.clone();
        snap.reply_to = None;
        Box::new(snap)
    }

    /// One-line preview, used for reply bars and plain-text output.
    pub fn preview(&self) -> String {
        match self.body() {
            MessageBody::Text(t) => t.to_string(),
            MessageBody::Image { name, .. } => format!("[image] {}", name.unwrap_or("")).trim_end().to_string(),
            MessageBody::File { name, .. } => format!("[file] {}", name.unwrap_or("")).trim_end().to_string(),
            MessageBody::Withheld if self.is_deleted => "This message was deleted".to_string(),
            MessageBody::Withheld => "Attachment".to_string(),
        }
    }
}

/// File reference returned by the upload endpoint, ready to announce over
/// the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    #[serde(default = "default_file_type")]
    pub message_type: MessageType,
    pub file_url: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

fn default_file_type() -> MessageType {
    MessageType::File
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    /// Text message in `room` at 10:`minute` UTC.
    pub fn msg(id: &str, room: &str, sender: &str, minute: u32) -> Message {
        Message {
            id: id.to_string(),
            room_id: Some(room.to_string()),
            sender_name: sender.to_string(),
            receiver_name: String::new(),
            message: Some(format!("body of {}", id)),
            message_type: MessageType::Text,
            file_url: None,
            file_name: None,
            file_size: None,
            is_delivered: false,
            is_seen: false,
            is_deleted: false,
            deleted_for: None,
            deleted_at: None,
            reply_to_id: None,
            reply_to: None,
            is_forwarded: false,
            forwarded_from: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap(),
        }
    }

    pub fn reply(id: &str, room: &str, sender: &str, minute: u32, to: &str) -> Message {
        let mut m = msg(id, room, sender, minute);
        m.reply_to_id = Some(to.to_string());
        m
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::msg;
    use super::*;

    #[test]
    fn test_status_never_lowers() {
        let mut m = msg("m1", "r1", "alice", 0);
        assert_eq!(m.status(), DeliveryStatus::Sent);

        assert!(m.raise_status(DeliveryStatus::Seen));
        assert!(m.is_seen && m.is_delivered);

        assert!(!m.raise_status(DeliveryStatus::Delivered));
        assert_eq!(m.status(), DeliveryStatus::Seen);
    }

    #[test]
    fn test_parse_backend_row() {
        let json = r#"{
            "id": "42",
            "room_id": "alice__bob",
            "sender_name": "alice",
            "receiver_name": "bob",
            "message": "hi",
            "message_type": "text",
            "is_delivered": true,
            "is_seen": false,
            "deleted_for": "EVERYONE",
            "reply_to_id": null,
            "created_at": "2024-05-01T10:00:00.000Z"
        }"#;
        let m: Message = serde_json::from_str(json).unwrap();
        assert_eq!(m.id, "42");
        assert_eq!(m.status(), DeliveryStatus::Delivered);
        assert_eq!(m.deleted_for, Some(DeletedFor::Everyone));
        assert!(m.reply_to.is_none());
    }

    #[test]
    fn test_tombstone_withholds_content() {
        let mut m = msg("m1", "r1", "alice", 0);
        m.tombstone();
        assert_eq!(m.body(), MessageBody::Withheld);
        assert_eq!(m.preview(), "This message was deleted");
        assert_eq!(m.id, "m1");
    }

    #[test]
    fn test_file_without_url_is_attachment_placeholder() {
        let mut m = msg("m1", "r1", "alice", 0);
        m.message_type = MessageType::Image;
        m.message = None;
        assert_eq!(m.preview(), "Attachment");

        m.file_url = Some("https://cdn/x.png".into());
        m.file_name = Some("x.png".into());
        assert_eq!(m.preview(), "[image] x.png");
    }

    #[test]
    fn test_deleted_for_lenient() {
        assert_eq!(DeletedFor::parse("everyone"), DeletedFor::Everyone);
        assert_eq!(DeletedFor::parse("me"), DeletedFor::Me);
        assert_eq!(DeletedFor::parse("self"), DeletedFor::Me);
    }
}
