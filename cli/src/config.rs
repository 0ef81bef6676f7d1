// Configuration management for the ttble CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/ttble/config.json
// - Linux: ~/.config/ttble/config.json
// - Windows: %APPDATA%\ttble\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use ttble_core::BluetoothConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Navtree file used when `index` commands get no path
    pub index_path: Option<String>,

    /// Link settings used by `simulate`
    pub bluetooth: BluetoothConfig,
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("ttble");

        // Create directory if it doesn't exist
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .bluetooth
                .validate()
                .context("Invalid bluetooth settings in config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value in memory; the result must still validate
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let mut bluetooth = self.bluetooth.clone();
        match key {
            "index_path" => {
                self.index_path = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
                return Ok(());
            }
            "device_label" => {
                bluetooth.device_label = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "device_address" => {
                bluetooth.device_address = value.parse().context("Invalid number")?;
            }
            "central_enabled" => {
                bluetooth.central_enabled = value.parse().context("Invalid boolean value")?;
            }
            "bonding" => {
                bluetooth.bonding = value.parse().context("Invalid boolean value")?;
            }
            "optimize_power" => {
                bluetooth.optimize_power = value.parse().context("Invalid boolean value")?;
            }
            "max_mtu" => {
                bluetooth.max_mtu = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        bluetooth.validate().context("Rejected value")?;
        self.bluetooth = bluetooth;
        Ok(())
    }

    /// Set a config value and save
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.apply(key, value)?;
        self.save()?;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "index_path" => self.index_path.clone(),
            "device_label" => self.bluetooth.device_label.clone(),
            "device_address" => Some(self.bluetooth.device_address.to_string()),
            "device_name" => Some(self.bluetooth.device_name()),
            "central_enabled" => Some(self.bluetooth.central_enabled.to_string()),
            "bonding" => Some(self.bluetooth.bonding.to_string()),
            "optimize_power" => Some(self.bluetooth.optimize_power.to_string()),
            "max_mtu" => Some(self.bluetooth.max_mtu.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let bt = &self.bluetooth;
        vec![
            (
                "index_path".to_string(),
                self.index_path.clone().unwrap_or_else(|| "(none)".to_string()),
            ),
            ("device_name".to_string(), bt.device_name()),
            ("device_address".to_string(), bt.device_address.to_string()),
            ("central_enabled".to_string(), bt.central_enabled.to_string()),
            ("bonding".to_string(), bt.bonding.to_string()),
            ("optimize_power".to_string(), bt.optimize_power.to_string()),
            ("max_mtu".to_string(), bt.max_mtu.to_string()),
        ]
    }
}
