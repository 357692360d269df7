//! Turn message-set changes into printable lines

use std::collections::HashMap;

use crate::api::chat::format_line;
use crate::models::{DeliveryStatus, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Shown {
    status: DeliveryStatus,
    deleted: bool,
}

/// Remembers what was printed for the current room and reports only changes.
#[derive(Debug, Default)]
pub struct Renderer {
    room: Option<String>,
    shown: HashMap<String, Shown>,
}

impl Renderer {
    pub fn diff(&mut self, room_id: &str, messages: &[Message], viewer: &str) -> Vec<String> {
        let mut lines = Vec::new();
        if self.room.as_deref() != Some(room_id) {
            self.room = Some(room_id.to_string());
            self.shown.clear();
            lines.push(format!("--- {} ---", room_id));
        }

        for msg in messages {
            let now = Shown {
                status: msg.status(),
                deleted: msg.is_deleted,
            };
            match self.shown.insert(msg.id.clone(), now) {
                None => {
                    let mut line = format!("{}  #{}", format_line(msg), msg.id);
                    if msg.sender_name == viewer {
                        line.push_str(tick(now.status));
                    }
                    lines.push(line);
                }
                Some(before) if before == now => {}
                Some(before) => {
                    if now.deleted && !before.deleted {
                        lines.push(format!("  #{} was deleted", msg.id));
                    } else if msg.sender_name == viewer && now.status > before.status {
                        lines.push(format!("  #{}{}", msg.id, tick(now.status)));
                    }
                }
            }
        }

        // Deleted for me: forget it quietly.
        self.shown
            .retain(|id, _| messages.iter().any(|m| &m.id == id));
        lines
    }
}

fn tick(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Unsent => " (sending)",
        DeliveryStatus::Sent => " ✓",
        DeliveryStatus::Delivered => " ✓✓",
        DeliveryStatus::Seen => " ✓✓ seen",
    }
}
