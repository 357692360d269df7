//! One-shot commands that need the real-time channel
//!
//! Each opens a socket, emits what the backend expects after the REST call
//! and closes again once the frames are out.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, ensure, Context, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{self, Duration};

use crate::api::chat::{forward_messages, upload_file};
use crate::api::rooms::{self, create_direct_room, find_group, list_rooms_data, merge_members, NewGroup};
use crate::api::ChatClient;
use crate::config::Config;
use crate::error::ChatError;
use crate::models::{resolve_peer, Room};
use crate::reconciler::{Reconciler, ReconcilerOptions};
use crate::socket::{ClientEvent, ForwardTarget, SocketEvent, SocketOptions, SocketTransport, Transport};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// A short-lived socket connection.
struct Link {
    transport: Arc<SocketTransport>,
    events: mpsc::UnboundedReceiver<SocketEvent>,
}

impl Link {
    /// Connect and announce `viewer`.
    async fn open(config: &Config, viewer: &str) -> Result<Self> {
        let mut options = SocketOptions::new(config.socket_url());
        options.api_key = config.api_key.clone();
        options.username = Some(viewer.to_string());
        options.max_attempts = 3;
        let (transport, mut events) = SocketTransport::spawn(options);

        let wait = async {
            while let Some(event) = events.recv().await {
                match event {
                    SocketEvent::Connected { .. } => return Ok(()),
                    SocketEvent::GaveUp => bail!("Could not connect to the chat server"),
                    other => tracing::debug!("Waiting for connect: {:?}", other),
                }
            }
            bail!("Socket task stopped before connecting")
        };
        time::timeout(CONNECT_TIMEOUT, wait)
            .await
            .context("Timed out connecting to the chat server")??;

        let link = Self {
            transport: Arc::new(transport),
            events,
        };
        link.emit(ClientEvent::UserJoin {
            username: viewer.to_string(),
        })?;
        Ok(link)
    }

    fn emit(&self, event: ClientEvent) -> Result<()> {
        self.transport.emit(event)?;
        Ok(())
    }

    fn reconciler(&self, viewer: &str) -> Reconciler {
        Reconciler::new(viewer, self.transport.clone(), ReconcilerOptions::default())
    }

    /// Drop the transport and wait for the socket task to finish sending.
    async fn close(self) {
        let Self { transport, mut events } = self;
        drop(transport);
        let drained = time::timeout(FLUSH_TIMEOUT, async {
            while let Some(event) = events.recv().await {
                tracing::debug!("Closing, ignoring {:?}", event);
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!("Socket did not close in time; some events may not have been sent");
        }
    }
}

/// Whether `to` names a room rather than a user.
fn is_room_id(to: &str, rooms: &[Room]) -> bool {
    rooms.iter().any(|r| r.id == to) || to.contains("__") || to.starts_with("group_")
}

/// Room id and peer for a `--to` argument that is either a room id or a
/// username. A 1:1 room is created on demand for a username.
async fn resolve_target(
    client: &ChatClient,
    config: &Config,
    viewer: &str,
    to: &str,
) -> Result<(String, Option<String>)> {
    let to = to.trim();
    let rooms = list_rooms_data(client, viewer).await?;
    let room_id = if is_room_id(to, &rooms) {
        to.to_string()
    } else {
        ensure!(to != viewer, "You cannot chat with yourself");
        create_direct_room(client, viewer, to).await?
    };
    let room = rooms.iter().find(|r| r.id == room_id);
    let peer = resolve_peer(&room_id, room, viewer, config.cached_receiver(&room_id));
    Ok((room_id, peer))
}

fn remember(config: &mut Config, room_id: &str, peer: Option<&str>) -> Result<()> {
    if let Some(peer) = peer {
        config.set_cached_receiver(room_id, peer);
    }
    config.selected_room = Some(room_id.to_string());
    config.save()
}

/// Send a text message, optionally as a reply.
pub async fn send(to: &str, message: &str, reply_to: Option<&str>) -> Result<()> {
    let mut config = Config::load()?;
    let viewer = config.require_username()?.to_string();
    let client = ChatClient::from_config(&config);
    ensure!(!message.trim().is_empty(), "Message is empty");

    let (room_id, peer) = resolve_target(&client, &config, &viewer, to).await?;
    let link = Link::open(&config, &viewer).await?;
    let mut rec = link.reconciler(&viewer);
    rec.select_room(Some(&room_id), peer.clone());
    rec.send_text(message, reply_to)?;
    rec.teardown();
    drop(rec);
    link.close().await;

    remember(&mut config, &room_id, peer.as_deref())?;
    println!("Message sent to {}.", room_id);
    Ok(())
}

/// Upload a file over REST, then announce it in the room.
pub async fn upload(to: &str, path: &Path) -> Result<()> {
    let mut config = Config::load()?;
    let viewer = config.require_username()?.to_string();
    let client = ChatClient::from_config(&config);

    let (room_id, peer) = resolve_target(&client, &config, &viewer, to).await?;
    let receiver = peer
        .clone()
        .ok_or_else(|| ChatError::NoRecipient(room_id.clone()))?;

    println!("Uploading {}...", path.display());
    let file = upload_file(&client, path, &room_id, &viewer, &receiver).await?;

    let link = Link::open(&config, &viewer).await?;
    let mut rec = link.reconciler(&viewer);
    rec.select_room(Some(&room_id), peer.clone());
    rec.send_file(&file)?;
    rec.teardown();
    drop(rec);
    link.close().await;

    remember(&mut config, &room_id, peer.as_deref())?;
    println!("Sent {} to {}.", file.file_name.as_deref().unwrap_or("file"), room_id);
    Ok(())
}

/// Forward messages to one or more rooms.
pub async fn forward(to: &[String], message_ids: &[String]) -> Result<()> {
    let config = Config::load()?;
    let viewer = config.require_username()?.to_string();
    let client = ChatClient::from_config(&config);
    ensure!(!message_ids.is_empty(), "No messages to forward");
    ensure!(!to.is_empty(), "No rooms to forward to");

    let rooms = list_rooms_data(&client, &viewer).await?;
    let targets = to
        .iter()
        .map(|room_id| {
            let room = rooms.iter().find(|r| &r.id == room_id);
            let receiver = resolve_peer(room_id, room, &viewer, config.cached_receiver(room_id))
                .with_context(|| format!("No recipient known for {}", room_id))?;
            Ok(ForwardTarget {
                room_id: room_id.clone(),
                receiver,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let messages = forward_messages(&client, message_ids, &targets, &viewer).await?;
    let count = messages.len();

    let link = Link::open(&config, &viewer).await?;
    link.emit(ClientEvent::ForwardMessage {
        messages,
        to_rooms: targets,
    })?;
    link.close().await;

    println!("Forwarded {} message(s) to {} room(s).", count, to.len());
    Ok(())
}

pub async fn create_group(name: &str, members: &[String]) -> Result<()> {
    let config = Config::load()?;
    let viewer = config.require_username()?.to_string();
    let client = ChatClient::from_config(&config);

    let group = NewGroup::new(&viewer, name, members, Utc::now().timestamp_millis())?;
    rooms::create_group(&client, &group).await?;

    let link = Link::open(&config, &viewer).await?;
    link.emit(ClientEvent::NewGroupCreated {
        group_id: group.room_id.clone(),
        group_name: group.group_name.clone(),
        members: group.members(),
        creator: viewer.clone(),
    })?;
    link.close().await;

    println!("{} Created group {} ({})", group.group_icon, group.group_name, group.room_id);
    Ok(())
}

pub async fn add_members(group_id: &str, members: &[String]) -> Result<()> {
    let config = Config::load()?;
    let viewer = config.require_username()?.to_string();
    let client = ChatClient::from_config(&config);

    let group = find_group(&client, &viewer, group_id).await?;
    let current = group.members();
    let added = newcomers(&current, members);
    ensure!(!added.is_empty(), "Everyone listed is already in the group");

    let all = merge_members(&current, &added);
    rooms::set_group_members(&client, group_id, &all).await?;

    let link = Link::open(&config, &viewer).await?;
    link.emit(ClientEvent::MembersAdded {
        group_id: group_id.to_string(),
        group_name: group.group_name.clone(),
        new_members: added.clone(),
        added_by: viewer.clone(),
    })?;
    link.close().await;

    println!("Added {} to {}.", added.join(", "), group.display_name());
    Ok(())
}

/// Remove someone from a group. Only its creator may do this.
pub async fn remove_member(group_id: &str, user: &str) -> Result<()> {
    let config = Config::load()?;
    let viewer = config.require_username()?.to_string();
    let client = ChatClient::from_config(&config);

    let group = find_group(&client, &viewer, group_id).await?;
    ensure!(
        group.created_by.as_deref() == Some(viewer.as_str()),
        "Only the group creator can remove members"
    );
    if user == viewer {
        bail!("Use leave-group to leave a group");
    }
    let members = group.members();
    ensure!(members.iter().any(|m| m == user), "{} is not in this group", user);

    rooms::set_group_members(&client, group_id, &without(&members, user)).await?;

    let link = Link::open(&config, &viewer).await?;
    link.emit(ClientEvent::MemberRemoved {
        group_id: group_id.to_string(),
        removed_user: user.to_string(),
        group_name: group.group_name.clone(),
    })?;
    link.close().await;

    println!("Removed {} from {}.", user, group.display_name());
    Ok(())
}

pub async fn leave_group(group_id: &str) -> Result<()> {
    let mut config = Config::load()?;
    let viewer = config.require_username()?.to_string();
    let client = ChatClient::from_config(&config);

    let group = find_group(&client, &viewer, group_id).await?;
    let remaining = without(&group.members(), &viewer);
    ensure!(
        !remaining.is_empty(),
        "You are the last member of {}; a group cannot be left empty",
        group.display_name()
    );

    rooms::set_group_members(&client, group_id, &remaining).await?;

    let link = Link::open(&config, &viewer).await?;
    link.emit(ClientEvent::MemberLeft {
        group_id: group_id.to_string(),
        username: viewer.clone(),
        group_name: group.group_name.clone(),
    })?;
    link.close().await;

    if config.selected_room.as_deref() == Some(group_id) {
        config.selected_room = None;
        config.save()?;
    }
    println!("Left {}.", group.display_name());
    Ok(())
}

pub async fn rename_group(group_id: &str, name: &str) -> Result<()> {
    let config = Config::load()?;
    let viewer = config.require_username()?;
    let client = ChatClient::from_config(&config);
    ensure!(!name.trim().is_empty(), "Please enter a group name");

    let group = find_group(&client, viewer, group_id).await?;
    rooms::rename_group(&client, group_id, name).await?;
    println!("Renamed {} to {}.", group.display_name(), name.trim());
    Ok(())
}

/// Requested names that are not members yet, deduplicated.
fn newcomers(current: &[String], requested: &[String]) -> Vec<String> {
    merge_members(current, requested)
        .into_iter()
        .skip(current.len())
        .collect()
}

fn without(members: &[String], user: &str) -> Vec<String> {
    members.iter().filter(|m| *m != user).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_is_room_id() {
        let rooms = vec![Room {
            id: "lobby".into(),
            ..Default::default()
        }];
        assert!(is_room_id("lobby", &rooms));
        assert!(is_room_id("alice__bob", &rooms));
        assert!(is_room_id("group_alice_17", &rooms));
        assert!(!is_room_id("carol", &rooms));
    }

    #[test]
    fn test_newcomers_skips_existing_and_duplicates() {
        let current = names(&["alice", "bob"]);
        assert_eq!(
            newcomers(&current, &names(&["bob", "carol", "carol", " dave "])),
            names(&["carol", "dave"])
        );
        assert!(newcomers(&current, &names(&["alice"])).is_empty());
    }

    #[test]
    fn test_without() {
        let members = names(&["alice", "bob", "carol"]);
        assert_eq!(without(&members, "bob"), names(&["alice", "carol"]));
        assert!(without(&names(&["alice"]), "alice").is_empty());
    }
}
