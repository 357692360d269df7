//! User profile endpoints and the login/logout/status commands

use anyhow::{anyhow, Context, Result};
use serde_json::json;

use super::client::ChatClient;
use crate::config::Config;
use crate::models::{validate_username, User, UserSettings};

/// Backend liveness check.
pub async fn health(client: &ChatClient) -> Result<()> {
    client
        .get("/health")
        .await
        .context("Backend not responding")?;
    Ok(())
}

/// Profile of `username`, or `None` if the backend does not know them.
pub async fn get_user(client: &ChatClient, username: &str) -> Result<Option<User>> {
    match client
        .get_optional(&format!("/api/v1/users/{}", username))
        .await?
    {
        Some(resp) => Ok(Some(
            resp.json()
                .await
                .with_context(|| format!("Failed to parse profile of {}", username))?,
        )),
        None => Ok(None),
    }
}

/// Create a profile with defaults. The endpoint upserts.
pub async fn create_user(client: &ChatClient, username: &str) -> Result<User> {
    let body = json!({
        "username": username,
        "display_name": username,
        "theme": "light",
        "wallpaper": "default",
    });
    let resp = client
        .post("/api/v1/users", &body)
        .await
        .context("Failed to create user")?;
    resp.json().await.context("Failed to parse created user")
}

/// Update display name, bio or picture.
pub async fn save_profile(
    client: &ChatClient,
    username: &str,
    display_name: Option<&str>,
    bio: Option<&str>,
    profile_picture: Option<&str>,
) -> Result<User> {
    let body = json!({
        "username": username,
        "display_name": display_name,
        "bio": bio,
        "profile_picture": profile_picture,
    });
    let resp = client.post("/api/v1/users", &body).await?;
    resp.json().await.context("Failed to parse updated profile")
}

pub async fn update_settings(client: &ChatClient, username: &str, settings: &UserSettings) -> Result<()> {
    client
        .put(&format!("/api/v1/users/{}/settings", username), settings)
        .await?;
    Ok(())
}

/// Fetch an existing profile or create one.
pub async fn fetch_or_create(client: &ChatClient, username: &str) -> Result<User> {
    match get_user(client, username).await? {
        Some(user) => Ok(user),
        None => {
            tracing::info!("No profile for {}, creating one", username);
            create_user(client, username).await
        }
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

pub async fn login(username: &str) -> Result<()> {
    let username = username.trim();
    validate_username(username).map_err(|e| anyhow!(e))?;

    let mut config = Config::load()?;
    let client = ChatClient::from_config(&config);

    health(&client).await?;
    let user = fetch_or_create(&client, username).await?;

    if config.username.as_deref() != Some(user.username.as_str()) {
        config.clear_session();
    }
    config.username = Some(user.username.clone());
    config.display_name = Some(user.display_name().to_string());
    if let Some(ref theme) = user.theme {
        config.theme = theme.clone();
    }
    if let Some(ref wallpaper) = user.wallpaper {
        config.wallpaper = wallpaper.clone();
    }
    config.save()?;

    println!("Logged in as {} ({}).", user.display_name(), user.username);
    Ok(())
}

pub async fn logout() -> Result<()> {
    let mut config = Config::load()?;
    config.clear_session();
    config.save()?;
    println!("Logged out.");
    Ok(())
}

/// Show local session state and whether the backend answers.
pub async fn status() -> Result<()> {
    let config = Config::load()?;

    match config.username.as_deref() {
        Some(name) => println!("User:        {}", name),
        None => println!("User:        (not logged in)"),
    }
    println!("API:         {}", config.api_url);
    println!("Socket:      {}", config.socket_url());
    println!(
        "API key:     {}",
        if config.api_key.is_some() { "set" } else { "none" }
    );
    if let Some(ref room) = config.selected_room {
        println!("Last room:   {}", room);
    }

    let client = ChatClient::from_config(&config);
    match health(&client).await {
        Ok(()) => println!("Backend:     reachable"),
        Err(e) => println!("Backend:     unreachable ({:#})", e),
    }
    Ok(())
}

pub async fn whoami() -> Result<()> {
    let config = Config::load()?;
    let username = config.require_username()?;
    let client = ChatClient::from_config(&config);

    let user = get_user(&client, username)
        .await?
        .with_context(|| format!("Profile of {} not found; run 'login' again", username))?;

    println!();
    println!("Username:      {}", user.username);
    println!("Display Name:  {}", user.display_name());
    println!("Bio:           {}", user.bio.as_deref().unwrap_or("(none)"));
    println!("Theme:         {}", user.theme.as_deref().unwrap_or("light"));
    println!("Wallpaper:     {}", user.wallpaper.as_deref().unwrap_or("solid-white"));
    println!(
        "Notifications: {}",
        if user.notification_enabled.unwrap_or(true) { "on" } else { "off" }
    );
    if let Some(seen) = user.last_seen {
        println!("Last seen:     {}", seen.format("%Y-%m-%d %H:%M"));
    }
    Ok(())
}

/// Update settings and/or profile fields, mirroring theme and wallpaper locally.
pub async fn settings(settings: UserSettings, display_name: Option<String>, bio: Option<String>) -> Result<()> {
    let mut config = Config::load()?;
    let username = config.require_username()?.to_string();
    let client = ChatClient::from_config(&config);

    if settings.is_empty() && display_name.is_none() && bio.is_none() {
        println!("Theme:     {}", config.theme);
        println!("Wallpaper: {}", config.wallpaper);
        return Ok(());
    }

    if !settings.is_empty() {
        update_settings(&client, &username, &settings).await?;
        if let Some(ref theme) = settings.theme {
            config.theme = theme.clone();
        }
        if let Some(ref wallpaper) = settings.wallpaper {
            config.wallpaper = wallpaper.clone();
        }
    }
    if display_name.is_some() || bio.is_some() {
        // The endpoint overwrites every field, so carry the current ones over.
        let current = get_user(&client, &username).await?;
        let current = current.as_ref();
        let display_name = display_name.or_else(|| current.and_then(|u| u.display_name.clone()));
        let bio = bio.or_else(|| current.and_then(|u| u.bio.clone()));
        let picture = current.and_then(|u| u.profile_picture.as_deref());

        let user = save_profile(&client, &username, display_name.as_deref(), bio.as_deref(), picture).await?;
        config.display_name = Some(user.display_name().to_string());
    }

    config.save()?;
    println!("Settings updated.");
    Ok(())
}
