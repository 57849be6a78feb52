//! # Host Ports
//!
//! Traits through which the engine reaches everything it does not own.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                             Port Map                                    │
//! │                                                                         │
//! │  SettingsStore             DeviceCapabilityProvider   PubSubConnector   │
//! │  ─────────────             ────────────────────────   ───────────────   │
//! │  snapshot()                capabilities()             connect()         │
//! │  apply(Setting)            reboot() / set_volume()    subscribe()       │
//! │  subscribe()               display_size()             publish()         │
//! │                            get/set_setting()          disconnect()      │
//! │                            precache()                                   │
//! │                                                                         │
//! │  The engine never reaches a global: every component receives the       │
//! │  ports it needs when it is constructed.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::debug;

use signage_core::{CapabilityFlags, DeviceConfig, DisplaySize, Resolution, Setting, UpdateKind};

use crate::error::{SyncError, SyncResult};
use crate::protocol::InboundMessage;

// =============================================================================
// Settings Store
// =============================================================================

/// Typed access to the player's device configuration.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Current configuration.
    async fn snapshot(&self) -> DeviceConfig;

    /// Durably applies a single setting.
    ///
    /// Only after this returns `Ok` may the value be reported to the cloud.
    async fn apply(&self, setting: Setting) -> SyncResult<()>;

    /// Stream of applied settings, whatever their origin.
    fn subscribe(&self) -> broadcast::Receiver<Setting>;

    async fn device_id(&self) -> Option<String> {
        self.snapshot().await.device_id
    }

    async fn company_id(&self) -> Option<String> {
        self.snapshot().await.company_id
    }

    async fn current_url(&self) -> Option<String> {
        self.snapshot().await.current_url
    }

    async fn cached_url(&self) -> Option<String> {
        self.snapshot().await.cached_url
    }

    async fn access_code(&self) -> Option<String> {
        self.snapshot().await.access_code
    }
}

/// Settings store kept in memory; used by hosts without their own store and in tests.
pub struct InMemorySettingsStore {
    config: RwLock<DeviceConfig>,
    changes: broadcast::Sender<Setting>,
}

impl InMemorySettingsStore {
    pub fn new(config: DeviceConfig) -> Self {
        let (changes, _) = broadcast::channel(64);
        InMemorySettingsStore {
            config: RwLock::new(config),
            changes,
        }
    }
}

impl Default for InMemorySettingsStore {
    fn default() -> Self {
        Self::new(DeviceConfig::default())
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn snapshot(&self) -> DeviceConfig {
        self.config.read().await.clone()
    }

    async fn apply(&self, setting: Setting) -> SyncResult<()> {
        setting
            .validate()
            .map_err(|e| SyncError::SettingRejected(e.to_string()))?;

        setting.clone().apply_to(&mut *self.config.write().await);
        debug!(key = setting.key_name(), "Setting applied");

        // No receivers is fine.
        let _ = self.changes.send(setting);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Setting> {
        self.changes.subscribe()
    }
}

// =============================================================================
// Device Capability Provider
// =============================================================================

/// A network interface as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub link_up: bool,
    pub address: Option<String>,
}

/// Platform and hardware operations.
#[async_trait]
pub trait DeviceCapabilityProvider: Send + Sync {
    async fn manufacturer(&self) -> String;

    /// Captured once at startup; consulted by value afterwards.
    async fn capabilities(&self) -> CapabilityFlags;

    async fn reboot(&self) -> SyncResult<()>;

    async fn resolutions(&self) -> SyncResult<Vec<Resolution>>;

    async fn set_resolution(&self, width: u32, height: u32, refresh_rate: u32) -> SyncResult<()>;

    /// Current viewport size in pixels.
    async fn display_size(&self) -> SyncResult<DisplaySize>;

    async fn set_volume(&self, volume: u8) -> SyncResult<()>;

    async fn set_display_power(&self, on: bool) -> SyncResult<()>;

    /// Persistent key/value storage owned by the platform.
    async fn get_setting(&self, key: &str) -> SyncResult<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> SyncResult<()>;

    async fn network_interfaces(&self) -> SyncResult<Vec<NetworkInterface>>;

    /// Warms the platform content cache for `url`.
    async fn precache(&self, url: &str) -> SyncResult<()>;

    async fn install_update(&self, kind: UpdateKind, url: &str) -> SyncResult<()>;
}

// =============================================================================
// Pub/Sub Connector
// =============================================================================

/// Cloud messaging channel.
///
/// Messages arriving on subscribed topics are forwarded to the sender passed
/// to [`PubSubConnector::connect`].
#[async_trait]
pub trait PubSubConnector: Send + Sync {
    async fn connect(&self, device_id: &str, inbound: mpsc::Sender<InboundMessage>) -> SyncResult<()>;

    async fn disconnect(&self) -> SyncResult<()>;

    async fn subscribe(&self, topic: &str) -> SyncResult<()>;

    /// Publishes an already-serialized JSON payload.
    async fn publish(&self, topic: &str, payload: String) -> SyncResult<()>;
}
