// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving application settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::permissions::{Capability, GrantedCapabilities};

const APP_DIR: &str = "bluetooth-chat";

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Connection and event settings.
    pub chat: ChatConfig,

    /// Capabilities granted to the chat core.
    pub permissions: PermissionsConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Alias advertised by the adapter. Left unchanged when unset.
    pub device_name: Option<String>,

    /// Make the adapter discoverable while listening.
    pub discoverable: bool,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            discoverable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Capacity of each connection attempt's event channel.
    pub event_buffer: usize,

    /// Capacity of the error broadcast.
    pub error_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            event_buffer: 32,
            error_buffer: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    pub granted: Vec<Capability>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            granted: vec![Capability::Scan, Capability::Connect],
        }
    }
}

impl PermissionsConfig {
    pub fn to_capabilities(&self) -> GrantedCapabilities {
        GrantedCapabilities::new(self.granted.iter().copied())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` directive, overridden by `RUST_LOG`.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "bluetooth_chat=info".to_string(),
        }
    }
}

impl Config {
    fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load from `path`, writing the defaults there if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml_str(&content)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::PermissionChecker;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = Config::from_toml_str(
            r#"
            [bluetooth]
            device_name = "Kitchen PC"

            [permissions]
            granted = ["admin"]
            "#,
        )
        .unwrap();

        assert_eq!(config.bluetooth.device_name.as_deref(), Some("Kitchen PC"));
        assert!(config.bluetooth.discoverable);
        assert_eq!(config.chat, ChatConfig::default());

        let perms = config.permissions.to_capabilities();
        assert!(perms.can_connect());
        assert!(!perms.can_scan());
    }

    #[test]
    fn test_unknown_capability_rejected() {
        let result = Config::from_toml_str("[permissions]\ngranted = [\"teleport\"]\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let mut changed = config.clone();
        changed.chat.event_buffer = 8;
        changed.bluetooth.device_name = Some("Desk".to_string());
        changed.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), changed);
    }
}
