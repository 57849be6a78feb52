//! # Agent Configuration
//!
//! Process-level configuration for the sync engine. Device settings (content
//! URL, timers, volume...) live in the settings store, not here.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SIGNAGE_AUTH_URL=https://auth.example.com/v1                       │
//! │     SIGNAGE_LOG_LEVEL=debug                                            │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/player/agent.toml (Linux)                                │
//! │     ~/Library/Application Support/com.signage.player/agent.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # agent.toml
//! [cloud]
//! auth_url = "https://auth.example.com/v1"
//!
//! [network]
//! probe_url = "http://connectivitycheck.gstatic.com/generate_204"
//! probe_interval_secs = 60
//! recheck_interval_secs = 10
//!
//! [scheduler]
//! tick_interval_ms = 1000
//!
//! [logging]
//! level = "info"
//! buffer_capacity = 500
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use signage_core::{validation, LogLevel};

use crate::auth::AuthConfig;
use crate::error::{SyncError, SyncResult};
use crate::logs::DEFAULT_LOG_CAPACITY;
use crate::network::NetworkMonitorConfig;

// =============================================================================
// Sections
// =============================================================================

/// Cloud service endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudSettings {
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
}

fn default_auth_url() -> String {
    "https://auth.signage.example/v1".to_string()
}

impl Default for CloudSettings {
    fn default() -> Self {
        CloudSettings {
            auth_url: default_auth_url(),
        }
    }
}

/// Connectivity probing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Endpoint that answers 2xx when the internet is reachable.
    #[serde(default = "default_probe_url")]
    pub probe_url: String,

    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Probe interval while the link is up but the probe fails.
    #[serde(default = "default_recheck_interval")]
    pub recheck_interval_secs: u64,
}

fn default_probe_url() -> String {
    "http://connectivitycheck.gstatic.com/generate_204".to_string()
}

fn default_probe_interval() -> u64 {
    60
}

fn default_recheck_interval() -> u64 {
    10
}

impl Default for NetworkSettings {
    fn default() -> Self {
        NetworkSettings {
            probe_url: default_probe_url(),
            probe_interval_secs: default_probe_interval(),
            recheck_interval_secs: default_recheck_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval() -> u64 {
    1000
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            tick_interval_ms: default_tick_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Level used until the cloud sends `logLevel`.
    #[serde(default)]
    pub level: LogLevel,

    /// Entries kept for upload.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

fn default_buffer_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            level: LogLevel::default(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

// =============================================================================
// Agent Config
// =============================================================================

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub cloud: CloudSettings,

    #[serde(default)]
    pub network: NetworkSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl AgentConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (agent.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading agent config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Agent config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        validation::validate_http_url("cloud.auth_url", &self.cloud.auth_url)
            .map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
        validation::validate_http_url("network.probe_url", &self.network.probe_url)
            .map_err(|e| SyncError::InvalidUrl(e.to_string()))?;

        if self.network.probe_interval_secs == 0 || self.network.recheck_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "probe intervals must be greater than 0".into(),
            ));
        }

        if self.scheduler.tick_interval_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "tick_interval_ms must be greater than 0".into(),
            ));
        }

        if self.logging.buffer_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "buffer_capacity must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `SIGNAGE_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("SIGNAGE_AUTH_URL") {
            debug!(url = %url, "Overriding auth URL from environment");
            self.cloud.auth_url = url;
        }

        if let Some(url) = lookup("SIGNAGE_PROBE_URL") {
            debug!(url = %url, "Overriding probe URL from environment");
            self.network.probe_url = url;
        }

        if let Some(secs) = lookup("SIGNAGE_PROBE_INTERVAL_SECS") {
            match secs.parse() {
                Ok(secs) => self.network.probe_interval_secs = secs,
                Err(_) => warn!(value = %secs, "Invalid SIGNAGE_PROBE_INTERVAL_SECS"),
            }
        }

        if let Some(ms) = lookup("SIGNAGE_TICK_INTERVAL_MS") {
            match ms.parse() {
                Ok(ms) => self.scheduler.tick_interval_ms = ms,
                Err(_) => warn!(value = %ms, "Invalid SIGNAGE_TICK_INTERVAL_MS"),
            }
        }

        if let Some(level) = lookup("SIGNAGE_LOG_LEVEL") {
            match level.parse() {
                Ok(parsed) => {
                    debug!(level = %level, "Overriding log level from environment");
                    self.logging.level = parsed;
                }
                Err(_) => warn!(level = %level, "Unknown log level in environment"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "signage", "player")
            .map(|dirs| dirs.config_dir().join("agent.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            auth_url: self.cloud.auth_url.clone(),
        }
    }

    pub fn network_monitor_config(&self) -> NetworkMonitorConfig {
        NetworkMonitorConfig {
            probe_url: self.network.probe_url.clone(),
            probe_interval: Duration::from_secs(self.network.probe_interval_secs),
            recheck_interval: Duration::from_secs(self.network.recheck_interval_secs),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.tick_interval_ms)
    }
}
