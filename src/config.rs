//! Configuration persistence for monitoring settings
//!
//! Monitor settings live in a versioned `inboxwatch.toml` so they persist
//! across sessions. Missing files fall back to defaults; a newer config
//! version is loaded with a warning rather than rejected.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings for the property-change monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Polling interval in seconds.
    pub poll_interval_secs: u64,
    /// Timeout for a single property read in milliseconds.
    pub read_timeout_ms: u64,
    /// Concurrency of one capture round. 1 keeps a round's reads strictly
    /// sequenced; raise it only if the host tolerates interleaved reads.
    pub capture_concurrency: usize,
    /// Minimum spacing between two category reads in seconds.
    pub category_throttle_secs: u64,
    /// Cooldown after a torn category read in seconds.
    pub inconsistency_cooldown_secs: u64,
    /// Item-class substrings that suggest junk filing / rule processing.
    pub junk_class_markers: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            read_timeout_ms: 2000,
            capture_concurrency: 1,
            category_throttle_secs: 10,
            inconsistency_cooldown_secs: 30,
            junk_class_markers: vec![
                "Junk".to_string(),
                "Rules".to_string(),
                "Spam".to_string(),
            ],
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_secs == 0 {
            return Err("poll_interval_secs must be greater than zero".to_string());
        }
        if self.read_timeout_ms == 0 {
            return Err("read_timeout_ms must be greater than zero".to_string());
        }
        if self.capture_concurrency == 0 {
            return Err("capture_concurrency must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// On-disk config file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: u32,
    pub monitor: MonitorConfig,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            monitor: MonitorConfig::default(),
            last_updated: chrono::Utc::now(),
        }
    }
}

/// Loads and persists the config file.
pub struct ConfigManager {
    config_path: PathBuf,
    config: ConfigFile,
}

impl ConfigManager {
    pub fn new<P: AsRef<Path>>(config_dir: P) -> ConfigResult<Self> {
        let config_path = config_dir.as_ref().join("inboxwatch.toml");

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config = if config_path.exists() {
            Self::load(&config_path)?
        } else {
            info!("no existing config found, using defaults");
            ConfigFile::default()
        };

        Ok(Self {
            config_path,
            config,
        })
    }

    fn load(path: &Path) -> ConfigResult<ConfigFile> {
        let content = fs::read_to_string(path)?;
        let config: ConfigFile = toml::from_str(&content)?;

        if config.version > CONFIG_VERSION {
            warn!(
                version = config.version,
                supported = CONFIG_VERSION,
                "config file is newer than this build supports"
            );
        }

        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Write the current configuration back to disk.
    pub fn save(&mut self) -> ConfigResult<()> {
        self.config.last_updated = chrono::Utc::now();
        let content = toml::to_string_pretty(&self.config)?;
        fs::write(&self.config_path, content)?;
        debug!(path = %self.config_path.display(), "saved configuration");
        Ok(())
    }

    pub fn monitor_config(&self) -> &MonitorConfig {
        &self.config.monitor
    }

    pub fn update_monitor_config(&mut self, monitor: MonitorConfig) -> ConfigResult<()> {
        self.config.monitor = monitor;
        self.save()
    }
}
