//! Configuration and local preference storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:4000";
const DEFAULT_SEEN_DEBOUNCE_MS: u64 = 500;
const DEFAULT_TYPING_EXPIRY_SECS: u64 = 6;

/// Application configuration
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// REST base URL
    pub api_url: String,
    /// Socket.IO base URL (falls back to `api_url`)
    pub socket_url: Option<String>,
    /// API key sent in the Socket.IO connect packet
    pub api_key: Option<String>,
    /// Logged-in username
    pub username: Option<String>,
    /// Display name cached from the last profile fetch
    pub display_name: Option<String>,
    /// Last selected room, restored on the next `chat` session
    pub selected_room: Option<String>,
    pub theme: String,
    pub wallpaper: String,
    /// Window for batching `message_seen` acknowledgments
    pub seen_debounce_ms: u64,
    /// Local expiry of a typing indicator without a `stop_typing`
    pub typing_expiry_secs: u64,
    /// Cached other participant per room id
    pub room_receivers: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            socket_url: None,
            api_key: None,
            username: None,
            display_name: None,
            selected_room: None,
            theme: "light".to_string(),
            wallpaper: "solid-white".to_string(),
            seen_debounce_ms: DEFAULT_SEEN_DEBOUNCE_MS,
            typing_expiry_secs: DEFAULT_TYPING_EXPIRY_SECS,
            room_receivers: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "zatchat", "zatchat-cli")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // API key lives in here
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(url) = get("ZATCHAT_API_URL").filter(|v| !v.is_empty()) {
            self.api_url = url;
        }
        if let Some(url) = get("ZATCHAT_SOCKET_URL").filter(|v| !v.is_empty()) {
            self.socket_url = Some(url);
        }
        if let Some(key) = get("ZATCHAT_API_KEY").filter(|v| !v.is_empty()) {
            self.api_key = Some(key);
        }
    }

    pub fn socket_url(&self) -> &str {
        self.socket_url.as_deref().unwrap_or(&self.api_url)
    }

    /// Username of the logged-in user, or an error pointing at `login`.
    pub fn require_username(&self) -> Result<&str> {
        self.username
            .as_deref()
            .context("Not logged in. Run 'zatchat-cli login <username>' first.")
    }

    pub fn cached_receiver(&self, room_id: &str) -> Option<&str> {
        self.room_receivers.get(room_id).map(String::as_str)
    }

    pub fn set_cached_receiver(&mut self, room_id: &str, receiver: &str) {
        self.room_receivers
            .insert(room_id.to_string(), receiver.to_string());
    }

    pub fn seen_debounce(&self) -> Duration {
        Duration::from_millis(self.seen_debounce_ms)
    }

    pub fn typing_expiry(&self) -> Duration {
        Duration::from_secs(self.typing_expiry_secs)
    }

    /// Forget the user and everything tied to them.
    pub fn clear_session(&mut self) {
        self.username = None;
        self.display_name = None;
        self.selected_room = None;
        self.room_receivers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_fields_missing() {
        let config: Config = toml::from_str("username = \"bob\"\n").unwrap();
        assert_eq!(config.username.as_deref(), Some("bob"));
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.seen_debounce(), Duration::from_millis(500));
        assert_eq!(config.socket_url(), DEFAULT_API_URL);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "ZATCHAT_API_URL" => Some("https://chat.example".into()),
            "ZATCHAT_SOCKET_URL" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.api_url, "https://chat.example");
        assert_eq!(config.socket_url, None);
        assert_eq!(config.socket_url(), "https://chat.example");
    }

    #[test]
    fn test_receiver_cache_roundtrips_through_toml() {
        let mut config = Config::default();
        config.username = Some("alice".into());
        config.set_cached_receiver("alice__bob", "bob");

        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.cached_receiver("alice__bob"), Some("bob"));

        let mut back = back;
        back.clear_session();
        assert!(back.require_username().is_err());
        assert_eq!(back.cached_receiver("alice__bob"), None);
    }
}
