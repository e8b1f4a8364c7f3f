//! Configuration Module
//!
//! This module provides constants and default configurations for dispsnap,
//! plus the optional `dispsnap.toml` settings file that overrides them.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::utils::error::Result;

/// Constants for default settings
pub const DEFAULT_CONFIG_PATH: &str = "dispsnap.toml";
pub const DEFAULT_LOG_PATH: &str = "logs/dispsnap.log";
pub const DEFAULT_PROFILE_DIR: &str = "profiles";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Wait after a mosaic topology change before the next native call
pub const DEFAULT_TOPOLOGY_SETTLE_MS: u64 = 500;
/// Wait after paths/modes have been applied
pub const DEFAULT_PATHS_SETTLE_MS: u64 = 200;

/// Timing knobs for the apply workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplySettings {
    pub topology_settle_ms: u64,
    pub paths_settle_ms: u64,
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self {
            topology_settle_ms: DEFAULT_TOPOLOGY_SETTLE_MS,
            paths_settle_ms: DEFAULT_PATHS_SETTLE_MS,
        }
    }
}

impl ApplySettings {
    pub fn topology_settle(&self) -> Duration {
        Duration::from_millis(self.topology_settle_ms)
    }

    pub fn paths_settle(&self) -> Duration {
        Duration::from_millis(self.paths_settle_ms)
    }
}

/// Settings loaded from `dispsnap.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_path: PathBuf,
    pub log_level: String,
    pub profile_dir: PathBuf,
    pub apply: ApplySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            profile_dir: PathBuf::from(DEFAULT_PROFILE_DIR),
            apply: ApplySettings::default(),
        }
    }
}

impl Settings {
    /// Loads settings from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Settings file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&contents)?;
        info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}
