//! Room directory endpoints: listing, 1:1 rooms and groups

use anyhow::{bail, ensure, Context, Result};
use serde::Serialize;
use serde_json::json;

use super::client::ChatClient;
use super::users;
use crate::config::Config;
use crate::models::{direct_room_id, Room};

const GROUP_ICONS: [&str; 8] = ["👥", "🎉", "💼", "🎓", "🏆", "🌟", "🚀", "💡"];

/// Body of `POST /chats/create-room` for a group.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGroup {
    pub room_id: String,
    pub participant1: String,
    /// Every member including the creator, comma separated.
    pub participant2: String,
    pub is_group: bool,
    pub group_name: String,
    pub group_icon: String,
    pub member_count: usize,
    pub created_by: String,
}

impl NewGroup {
    /// Plan a group created by `creator` at `timestamp_ms`.
    pub fn new(creator: &str, name: &str, members: &[String], timestamp_ms: i64) -> Result<Self> {
        let name = name.trim();
        ensure!(!name.is_empty(), "Please enter a group name");

        let invited = merge_members(&[], members);
        let invited: Vec<String> = invited.into_iter().filter(|m| m != creator).collect();
        ensure!(invited.len() >= 2, "Please select at least 2 members");

        let all = merge_members(&[creator.to_string()], &invited);
        Ok(Self {
            room_id: format!("group_{}_{}", creator, timestamp_ms),
            participant1: creator.to_string(),
            participant2: all.join(","),
            is_group: true,
            group_name: name.to_string(),
            group_icon: group_icon(name).to_string(),
            member_count: all.len(),
            created_by: creator.to_string(),
        })
    }

    pub fn members(&self) -> Vec<String> {
        self.participant2.split(',').map(String::from).collect()
    }
}

pub fn group_icon(name: &str) -> &'static str {
    GROUP_ICONS[name.chars().count() % GROUP_ICONS.len()]
}

/// `current` followed by any names from `added` not already present.
pub fn merge_members(current: &[String], added: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in current.iter().chain(added) {
        let name = name.trim();
        if !name.is_empty() && !out.iter().any(|m| m == name) {
            out.push(name.to_string());
        }
    }
    out
}

pub async fn list_rooms_data(client: &ChatClient, username: &str) -> Result<Vec<Room>> {
    let resp = client.get(&format!("/api/v1/chats/rooms/{}", username)).await?;
    resp.json().await.context("Failed to parse rooms response")
}

/// Create (or confirm) the 1:1 room between two users. Returns its id.
pub async fn create_direct_room(client: &ChatClient, a: &str, b: &str) -> Result<String> {
    let room_id = direct_room_id(a, b);
    let mut pair = [a, b];
    pair.sort();
    let body = json!({
        "roomId": room_id,
        "participant1": pair[0],
        "participant2": pair[1],
    });
    client.post("/api/v1/chats/create-room", &body).await?;
    Ok(room_id)
}

pub async fn create_group(client: &ChatClient, group: &NewGroup) -> Result<()> {
    client.post("/api/v1/chats/create-room", group).await?;
    Ok(())
}

pub async fn rename_group(client: &ChatClient, group_id: &str, name: &str) -> Result<()> {
    let body = json!({ "groupId": group_id, "groupName": name.trim() });
    client.put("/api/v1/chats/update-group", &body).await?;
    Ok(())
}

/// Replace the member list of a group.
pub async fn set_group_members(client: &ChatClient, group_id: &str, members: &[String]) -> Result<()> {
    let body = json!({
        "groupId": group_id,
        "participants": members.join(","),
        "memberCount": members.len(),
    });
    client.put("/api/v1/chats/update-group", &body).await?;
    Ok(())
}

/// Look up a group the viewer belongs to.
pub async fn find_group(client: &ChatClient, viewer: &str, group_id: &str) -> Result<Room> {
    let rooms = list_rooms_data(client, viewer).await?;
    match rooms.into_iter().find(|r| r.id == group_id) {
        Some(room) if room.is_group => Ok(room),
        Some(_) => bail!("{} is not a group", group_id),
        None => bail!("Group {} not found", group_id),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

/// Print the viewer's rooms, most recent first.
pub async fn list_rooms() -> Result<()> {
    let config = Config::load()?;
    let viewer = config.require_username()?;
    let client = ChatClient::from_config(&config);

    let mut directory = crate::directory::RoomDirectory::new(viewer);
    directory.replace(list_rooms_data(&client, viewer).await?);

    println!("\nRooms:");
    println!("{:-<60}", "");

    if directory.rooms().is_empty() {
        println!("  (no rooms yet, start one with 'new-chat <user>')");
        return Ok(());
    }

    for room in directory.rooms() {
        let unread = if room.unread_count > 0 {
            format!(" ({} unread)", room.unread_count)
        } else {
            String::new()
        };
        let icon = if room.is_group {
            room.group_icon.as_deref().unwrap_or("👥")
        } else {
            ""
        };
        let title = format!("{} {}{}", icon, room.display_name(), unread);
        println!("{}", title.trim_start());
        println!("  ID: {}", room.id);
        if room.is_group {
            println!("  Members: {}", room.members().join(", "));
        }
        if let Some(ref last) = room.last_message {
            let sender = room.last_message_sender.as_deref().unwrap_or("?");
            let when = room
                .last_message_time
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            println!("  [{}] {}: {}", when, sender, super::chat::truncate(last.trim(), 77));
        }
        println!();
    }
    Ok(())
}

/// Start (or reopen) a 1:1 chat with `user`.
pub async fn new_chat(user: &str) -> Result<()> {
    let mut config = Config::load()?;
    let viewer = config.require_username()?.to_string();
    let client = ChatClient::from_config(&config);

    let user = user.trim();
    if user == viewer {
        bail!("You cannot chat with yourself");
    }
    if users::get_user(&client, user).await?.is_none() {
        bail!("User \"{}\" not found. They need to login first.", user);
    }

    let room_id = create_direct_room(&client, &viewer, user).await?;
    config.set_cached_receiver(&room_id, user);
    config.selected_room = Some(room_id.clone());
    config.save()?;

    println!("Chat with {} ready: {}", user, room_id);
    println!("Open it with: zatchat-cli chat {}", room_id);
    Ok(())
}
