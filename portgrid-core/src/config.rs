//! Configuration management.

use crate::adapters::AllocatorConfig;
use crate::error::{PortgridError, Result};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Persistent configuration for portgrid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: String,
    pub log_level: String,
    pub port_range_start: u16,
    pub port_range_end: u16,
    pub max_allocation_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "portgrid.db".to_string(),
            log_level: "info".to_string(),
            port_range_start: 20000,
            port_range_end: 32767,
            max_allocation_attempts: 10,
        }
    }
}

impl Config {
    /// Load configuration from disk, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| PortgridError::InvalidConfig {
            reason: format!("Failed to read config: {}", e),
        })?;
        serde_json::from_str(&content).map_err(|e| PortgridError::InvalidConfig {
            reason: format!("Failed to parse config: {}", e),
        })
    }

    /// Save configuration to disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PortgridError::InvalidConfig {
                reason: format!("Failed to create {}: {}", parent.display(), e),
            })?;
        }
        let content =
            serde_json::to_string_pretty(self).map_err(|e| PortgridError::InvalidConfig {
                reason: format!("Failed to serialize config: {}", e),
            })?;
        std::fs::write(path, content).map_err(|e| PortgridError::InvalidConfig {
            reason: format!("Failed to write config: {}", e),
        })
    }

    /// Allocator parameters derived from this configuration.
    pub fn allocator(&self) -> AllocatorConfig {
        AllocatorConfig {
            range_start: self.port_range_start,
            range_end: self.port_range_end,
            max_attempts: self.max_allocation_attempts,
        }
    }
}
