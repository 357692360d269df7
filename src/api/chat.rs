//! Message endpoints: history, read receipts, uploads, delete and forward

use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;
use serde_json::json;

use super::client::ChatClient;
use crate::config::Config;
use crate::models::{DeletedFor, Message, MessageBody, UploadedFile};
use crate::socket::ForwardTarget;

/// Largest file the backend accepts.
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct ForwardResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    error: Option<String>,
}

/// Full history of a room as seen by `viewer`, in backend order.
pub async fn fetch_history(client: &ChatClient, room_id: &str, viewer: &str) -> Result<Vec<Message>> {
    let path = format!("/api/v1/chats/history/{}?username={}", room_id, viewer);
    let resp = client.get(&path).await?;
    resp.json()
        .await
        .with_context(|| format!("Failed to parse history for {}", room_id))
}

pub async fn mark_read(client: &ChatClient, room_id: &str, viewer: &str) -> Result<()> {
    client
        .post_empty(&format!("/api/v1/chats/mark-read/{}/{}", room_id, viewer))
        .await?;
    Ok(())
}

/// Upload a file for `room_id`. Nothing is sent over the socket here; the
/// caller announces the returned reference.
pub async fn upload_file(
    client: &ChatClient,
    path: &Path,
    room_id: &str,
    sender: &str,
    receiver: &str,
) -> Result<UploadedFile> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Cannot read {}", path.display()))?;
    ensure!(meta.is_file(), "{} is not a file", path.display());
    ensure!(
        meta.len() <= MAX_UPLOAD_BYTES,
        "File size must be less than 10MB ({} is {} bytes)",
        path.display(),
        meta.len()
    );

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let part = reqwest::multipart::Part::bytes(bytes)
        .file_name(file_name.clone())
        .mime_str(guess_mime(&file_name))
        .context("Invalid MIME type")?;
    let form = reqwest::multipart::Form::new()
        .part("file", part)
        .text("roomId", room_id.to_string())
        .text("sender", sender.to_string())
        .text("receiver", receiver.to_string());

    tracing::info!("Uploading {} ({} bytes) to {}", file_name, meta.len(), room_id);
    let resp = client.multipart("/api/v1/chats/upload", form).await?;
    let uploaded: UploadedFile = resp
        .json()
        .await
        .context("Upload response had no file URL")?;
    ensure!(!uploaded.file_url.is_empty(), "Upload response had no file URL");
    Ok(uploaded)
}

pub async fn delete_message(
    client: &ChatClient,
    message_id: &str,
    viewer: &str,
    scope: DeletedFor,
) -> Result<()> {
    let body = json!({ "username": viewer, "deleteFor": scope.as_str() });
    client
        .delete(&format!("/api/v1/messages/{}", message_id), &body)
        .await?;
    Ok(())
}

/// Copy messages into other rooms. Returns the new messages, which the
/// caller relays with `forward_message`.
pub async fn forward_messages(
    client: &ChatClient,
    message_ids: &[String],
    targets: &[ForwardTarget],
    sender: &str,
) -> Result<Vec<Message>> {
    let body = json!({
        "messageIds": message_ids,
        "toRooms": targets,
        "sender": sender,
    });
    let resp = client.post("/api/v1/messages/forward", &body).await?;
    let data: ForwardResponse = resp
        .json()
        .await
        .context("Failed to parse forward response")?;
    if !data.success {
        bail!(
            "Forward rejected: {}",
            data.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(data.messages)
}

/// Image and file messages that still carry a reference.
pub fn media_of(messages: &[Message]) -> Vec<&Message> {
    messages
        .iter()
        .filter(|m| m.file_url.is_some() && !m.is_deleted)
        .collect()
}

fn guess_mime(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "zip" => "application/zip",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

/// Sort a fetched batch for display the same way the live view does.
fn chronological(mut messages: Vec<Message>) -> Vec<Message> {
    messages.sort_by_key(|m| m.created_at);
    messages
}

/// Format one message as a single output line.
pub fn format_line(msg: &Message) -> String {
    let time = msg.created_at.format("%Y-%m-%d %H:%M");
    let mut line = format!("[{}] {}: {}", time, msg.sender_name, msg.preview());
    if let MessageBody::Image { url, .. } | MessageBody::File { url, .. } = msg.body() {
        line.push_str(&format!(" <{}>", url));
    }
    if let Some(ref target) = msg.reply_to {
        line.push_str(&format!("  (re {}: {})", target.sender_name, truncate(&target.preview(), 40)));
    }
    if msg.is_forwarded {
        line.push_str("  (forwarded)");
    }
    line
}

/// Cut `text` to at most `max` characters, marking the cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

/// Print the last `limit` messages of a room.
pub async fn show_history(room_id: &str, limit: usize) -> Result<()> {
    let config = Config::load()?;
    let viewer = config.require_username()?;
    let client = ChatClient::from_config(&config);

    let messages = chronological(fetch_history(&client, room_id, viewer).await?);
    if messages.is_empty() {
        println!("(no messages)");
        return Ok(());
    }

    let skip = messages.len().saturating_sub(limit);
    for msg in &messages[skip..] {
        println!("{}  #{}", format_line(msg), msg.id);
    }
    Ok(())
}

/// List shared images and files in a room.
pub async fn list_media(room_id: &str) -> Result<()> {
    let config = Config::load()?;
    let viewer = config.require_username()?;
    let client = ChatClient::from_config(&config);

    let messages = chronological(fetch_history(&client, room_id, viewer).await?);
    let media = media_of(&messages);
    if media.is_empty() {
        println!("(no media)");
        return Ok(());
    }

    println!("\nMedia in {}:", room_id);
    println!("{:-<60}", "");
    for msg in media {
        let name = msg.file_name.as_deref().unwrap_or("Unknown");
        let size = msg.file_size.map(format_size).unwrap_or_default();
        println!("{} [{}] {} {}", msg.message_type.as_str(), msg.sender_name, name, size);
        if let Some(ref url) = msg.file_url {
            println!("  {}", url);
        }
    }
    Ok(())
}

/// Delete a message via REST. The backend broadcasts `message_deleted`.
pub async fn delete(message_id: &str, everyone: bool) -> Result<()> {
    let config = Config::load()?;
    let viewer = config.require_username()?;
    let client = ChatClient::from_config(&config);
    let scope = if everyone {
        DeletedFor::Everyone
    } else {
        DeletedFor::Me
    };

    delete_message(&client, message_id, viewer, scope).await?;
    println!("Message deleted for {}.", scope.as_str());
    Ok(())
}

pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / (KB * KB))
    }
}
