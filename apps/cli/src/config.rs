//! CLI preferences.
//!
//! Stored as TOML:
//! - Linux/macOS: `~/.config/phototransfer/config.toml`
//! - Windows: `%APPDATA%/phototransfer/config.toml`

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Saved user preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Destination folder for transferred media.
    #[serde(default = "default_destination")]
    pub destination: String,

    /// Device backend: `android`, `ios` or `auto`.
    #[serde(default = "default_device_type")]
    pub device_type: String,

    /// `new_only` or `all`.
    #[serde(default = "default_transfer_mode")]
    pub transfer_mode: String,
}

fn default_destination() -> String {
    "~/Pictures/PhonePhotos".into()
}

fn default_device_type() -> String {
    "auto".into()
}

fn default_transfer_mode() -> String {
    "new_only".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            device_type: default_device_type(),
            transfer_mode: default_transfer_mode(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, writing a default file on first run.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Saves the current configuration to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(windows)]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("phototransfer").join("config.toml")
    }

    #[cfg(not(windows))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("phototransfer")
            .join("config.toml")
    }
}
