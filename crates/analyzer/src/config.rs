//! Analyzer configuration management

use crate::error::Error;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// USB bulk packet size; transfer buffers must be a whole number of packets
pub const BULK_PACKET_SIZE: usize = 512;

/// Most channels the firmware can sample
pub const MAX_CHANNELS: u8 = 16;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

/// Which USB device to open
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default = "DeviceSettings::default_vendor_id")]
    pub vendor_id: u16,
    #[serde(default = "DeviceSettings::default_product_id")]
    pub product_id: u16,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            product_id: Self::default_product_id(),
        }
    }
}

impl DeviceSettings {
    fn default_vendor_id() -> u16 {
        0x1d50
    }

    fn default_product_id() -> u16 {
        0x60e6
    }
}

/// Acquisition parameters and streaming resources
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Requested sample rate in Hz
    pub sample_rate_hz: u64,
    /// Channels to capture (1-16)
    pub num_channels: u8,
    /// Bulk transfers kept in flight while streaming
    pub transfer_pool_size: usize,
    /// Bytes per bulk transfer; a positive multiple of 512
    pub transfer_buffer_size: usize,
    /// Timeout for ordinary commands
    pub command_timeout_ms: u64,
    /// Timeout for the stop command, which may wait for the firmware to
    /// drain its buffers
    pub stop_timeout_ms: u64,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            sample_rate_hz: 1_000_000,
            num_channels: 8,
            transfer_pool_size: 16,
            transfer_buffer_size: 256 * 1024,
            command_timeout_ms: 1000,
            stop_timeout_ms: 10_000,
        }
    }
}

impl AcquisitionSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Check ranges and cross-field constraints
    pub fn validate(&self) -> crate::Result<()> {
        if self.sample_rate_hz == 0 || u32::try_from(self.sample_rate_hz).is_err() {
            return Err(Error::InvalidSettings(format!(
                "sample_rate_hz {} must be between 1 and {}",
                self.sample_rate_hz,
                u32::MAX
            )));
        }
        if self.num_channels == 0 || self.num_channels > MAX_CHANNELS {
            return Err(Error::InvalidSettings(format!(
                "num_channels {} must be between 1 and {}",
                self.num_channels, MAX_CHANNELS
            )));
        }
        if self.transfer_pool_size == 0 {
            return Err(Error::InvalidSettings(
                "transfer_pool_size must be at least 1".to_string(),
            ));
        }
        if self.transfer_buffer_size == 0
            || !self.transfer_buffer_size.is_multiple_of(BULK_PACKET_SIZE)
        {
            return Err(Error::InvalidSettings(format!(
                "transfer_buffer_size {} must be a positive multiple of {}",
                self.transfer_buffer_size, BULK_PACKET_SIZE
            )));
        }
        if self.command_timeout_ms == 0 {
            return Err(Error::InvalidSettings(
                "command_timeout_ms must be positive".to_string(),
            ));
        }
        if self.stop_timeout_ms < self.command_timeout_ms {
            return Err(Error::InvalidSettings(format!(
                "stop_timeout_ms {} must not be shorter than command_timeout_ms {}",
                self.stop_timeout_ms, self.command_timeout_ms
            )));
        }
        Ok(())
    }
}

impl AnalyzerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = [
                Self::default_path(),
                PathBuf::from("/etc/greatfet-logic/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: AnalyzerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("greatfet-logic").join("config.toml")
        } else {
            PathBuf::from(".config/greatfet-logic/config.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        if self.device.vendor_id == 0 {
            return Err(anyhow!("Invalid vendor_id 0x0000"));
        }

        self.acquisition
            .validate()
            .context("Invalid [acquisition] settings")?;
        Ok(())
    }
}

/// Load configuration from a path that may start with `~`
pub fn load_config(path: &str) -> Result<AnalyzerConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    AnalyzerConfig::load(Some(path_buf))
}
