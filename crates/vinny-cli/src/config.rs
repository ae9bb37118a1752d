//! Configuration file management for vinny.
//!
//! Provides a TOML-based config file at `~/.config/vinny/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use vinny_core::chat::BackendConfig;
use vinny_core::notify::SmsConfig;
use vinny_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    pub backend: BackendSection,
    #[serde(default)]
    pub sms: Option<SmsSection>,
    #[serde(default)]
    pub maps: Option<MapsSection>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: DbConfig::DEFAULT_URL.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackendSection {
    pub base_url: String,
    pub ws_url: String,
    pub username: String,
    pub secret: String,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            base_url: "https://assistant.example.com".to_string(),
            ws_url: "wss://assistant.example.com".to_string(),
            username: String::new(),
            secret: String::new(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SmsSection {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub jwt: String,
    pub from_number: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MapsSection {
    pub api_key: String,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the vinny config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/vinny` or `~/.config/vinny`.
/// We intentionally ignore the platform-specific `dirs::config_dir()`
/// (which returns `~/Library/Application Support` on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("vinny");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("vinny")
}

/// Return the path to the vinny config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    // Set permissions to 0600 (owner read/write only) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct VinnyConfig {
    pub db_config: DbConfig,
    pub backend: BackendConfig,
    pub backend_username: String,
    pub backend_secret: String,
    pub sms: Option<SmsConfig>,
    pub maps_api_key: Option<String>,
}

impl VinnyConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default. A missing config file is fine; env vars and defaults
    /// cover every field.
    pub fn resolve(database_url_flag: Option<&str>) -> Result<Self> {
        let file = load_config().unwrap_or_default();

        let database_url = database_url_flag
            .map(str::to_owned)
            .or_else(|| std::env::var("VINNY_DATABASE_URL").ok())
            .unwrap_or(file.database.url);

        let backend = BackendConfig {
            base_url: std::env::var("VINNY_BACKEND_URL")
                .unwrap_or(file.backend.base_url),
            ws_url: std::env::var("VINNY_BACKEND_WS_URL").unwrap_or(file.backend.ws_url),
        };
        let backend_username = std::env::var("VINNY_BACKEND_USER")
            .unwrap_or(file.backend.username);
        let backend_secret = std::env::var("VINNY_BACKEND_SECRET")
            .unwrap_or(file.backend.secret);

        let sms = file.sms.map(|section| SmsConfig {
            base_url: section.base_url,
            client_id: section.client_id,
            client_secret: section.client_secret,
            jwt: section.jwt,
            from_number: section.from_number,
        });

        let maps_api_key = std::env::var("VINNY_MAPS_API_KEY")
            .ok()
            .or(file.maps.map(|m| m.api_key))
            .filter(|key| !key.is_empty());

        Ok(Self {
            db_config: DbConfig::new(database_url),
            backend,
            backend_username,
            backend_secret,
            sms,
            maps_api_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_roundtrip() {
        let config = ConfigFile {
            database: DatabaseSection {
                url: "postgresql://localhost:5432/test".to_string(),
            },
            backend: BackendSection {
                base_url: "https://b".to_string(),
                ws_url: "wss://b".to_string(),
                username: "u".to_string(),
                secret: "s".to_string(),
            },
            sms: None,
            maps: Some(MapsSection {
                api_key: "key".to_string(),
            }),
        };
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: ConfigFile = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.database.url, "postgresql://localhost:5432/test");
        assert_eq!(parsed.backend.username, "u");
        assert!(parsed.sms.is_none());
        assert_eq!(parsed.maps.unwrap().api_key, "key");
    }

    #[test]
    fn minimal_file_fills_defaults() {
        let parsed: ConfigFile = toml::from_str(
            "[database]\nurl = \"postgresql://h/db\"\n\n\
             [backend]\nbase_url = \"https://b\"\nws_url = \"wss://b\"\n\
             username = \"u\"\nsecret = \"s\"\n",
        )
        .unwrap();
        assert!(parsed.sms.is_none());
        assert!(parsed.maps.is_none());
    }

    #[test]
    fn flag_beats_file() {
        let config = VinnyConfig::resolve(Some("postgresql://flag-host/db")).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://flag-host/db");
    }
}
