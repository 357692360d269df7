//! User-related models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<String>,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub wallpaper: Option<String>,
    #[serde(default)]
    pub notification_enabled: Option<bool>,
    #[serde(default)]
    pub sound_enabled: Option<bool>,
    #[serde(default)]
    pub is_online: Option<bool>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.username)
    }
}

/// Partial settings update (`PUT /users/{name}/settings`).
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallpaper: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound_enabled: Option<bool>,
}

impl UserSettings {
    pub fn is_empty(&self) -> bool {
        self.theme.is_none()
            && self.wallpaper.is_none()
            && self.notification_enabled.is_none()
            && self.sound_enabled.is_none()
    }
}

/// Validate a login name: 3-20 chars of letters, digits or underscore.
pub fn validate_username(name: &str) -> Result<(), &'static str> {
    if name.len() < 3 {
        return Err("Username must be at least 3 characters");
    }
    if name.len() > 20 {
        return Err("Username must be less than 20 characters");
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err("Only letters, numbers, and underscores allowed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username() {
        assert!(validate_username("bob_42").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("a".repeat(21).as_str()).is_err());
        assert!(validate_username("bob smith").is_err());
    }

    #[test]
    fn test_settings_skip_unset() {
        let s = UserSettings {
            theme: Some("dark".into()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&s).unwrap(), r#"{"theme":"dark"}"#);
        assert!(UserSettings::default().is_empty());
    }

    #[test]
    fn test_display_name_fallback() {
        let u: User = serde_json::from_str(r#"{"username":"bob","display_name":""}"#).unwrap();
        assert_eq!(u.display_name(), "bob");
    }
}
