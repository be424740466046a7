//! RoomSync CLI Configuration Management
//!
//! Configuration is read from a TOML file when `--config` is given, otherwise
//! defaults are used. Command line flags override individual fields.

use std::path::{Path, PathBuf};
use std::time::Duration;

use roomsync_core::SyncConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the RoomSync CLI application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Engine configuration: endpoints, reconnection, heartbeat, buffers
    pub sync: SyncConfig,

    /// Device identity configuration
    pub identity: IdentityConfig,

    /// CLI-specific configuration
    pub cli: CliConfig,
}

/// Device identity configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Fixed device id; when unset the persisted id is used
    pub device_id: Option<String>,

    /// Directory holding the persisted device id
    /// (defaults to the platform data directory)
    pub data_dir: Option<PathBuf>,
}

/// CLI-specific configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Room joined when `--room` is not given
    pub room: String,

    /// Prompt shown in interactive chat mode
    pub prompt: String,

    /// How long one-shot commands wait for history or confirmation
    pub wait_timeout_secs: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            room: "lobby".to_string(),
            prompt: "roomsync> ".to_string(),
            wait_timeout_secs: 15,
        }
    }
}

impl CliConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CliError::Config(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), toml_string)?;
        Ok(())
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        self.sync.validate()?;

        if self.cli.room.trim().is_empty() {
            return Err(CliError::Config("Room must not be empty".to_string()));
        }
        if self.cli.wait_timeout_secs == 0 {
            return Err(CliError::Config(
                "Wait timeout must be greater than 0".to_string(),
            ));
        }
        if let Some(device_id) = &self.identity.device_id {
            if device_id.trim().is_empty() {
                return Err(CliError::Config("Device id must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Directory for the persisted device identity
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.identity.data_dir {
            return dir.clone();
        }
        dirs::data_dir()
            .map(|dir| dir.join("roomsync"))
            .unwrap_or_else(|| PathBuf::from(".roomsync"))
    }
}
