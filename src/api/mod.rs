//! REST client module for the chat backend

pub mod chat;
pub mod client;
pub mod rooms;
pub mod users;

pub use client::ChatClient;

use anyhow::Result;

use crate::models::UserSettings;

/// List the user's rooms
pub async fn list_rooms() -> Result<()> {
    rooms::list_rooms().await
}

/// Print recent messages of a room
pub async fn show_history(room_id: &str, limit: usize) -> Result<()> {
    chat::show_history(room_id, limit).await
}

/// List images and files shared in a room
pub async fn list_media(room_id: &str) -> Result<()> {
    chat::list_media(room_id).await
}

/// Delete a message for the user or for everyone
pub async fn delete_message(message_id: &str, everyone: bool) -> Result<()> {
    chat::delete(message_id, everyone).await
}

/// Start a 1:1 chat
pub async fn new_chat(user: &str) -> Result<()> {
    rooms::new_chat(user).await
}

pub async fn login(username: &str) -> Result<()> {
    users::login(username).await
}

pub async fn logout() -> Result<()> {
    users::logout().await
}

pub async fn status() -> Result<()> {
    users::status().await
}

/// Show the current user's profile
pub async fn whoami() -> Result<()> {
    users::whoami().await
}

/// Show or change settings and profile
pub async fn settings(settings: UserSettings, display_name: Option<String>, bio: Option<String>) -> Result<()> {
    users::settings(settings, display_name, bio).await
}
