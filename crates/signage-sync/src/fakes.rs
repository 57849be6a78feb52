//! Fake port implementations for testing

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use signage_core::{CapabilityFlags, DisplaySize, Resolution, UpdateKind};

use crate::error::{SyncError, SyncResult};
use crate::ports::{DeviceCapabilityProvider, NetworkInterface, PubSubConnector};
use crate::protocol::InboundMessage;

// =============================================================================
// Fake Device
// =============================================================================

/// Recorded call to the device provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Reboot,
    SetResolution { width: u32, height: u32, refresh_rate: u32 },
    SetVolume(u8),
    SetDisplayPower(bool),
    Precache(String),
    InstallUpdate { kind: UpdateKind, url: String },
}

#[derive(Default)]
struct DeviceState {
    calls: Vec<DeviceCall>,
    settings: HashMap<String, String>,
    display: Option<DisplaySize>,
    link_up: Option<bool>,
    capabilities: Option<CapabilityFlags>,
}

/// Device provider backed by memory; records every side effect.
#[derive(Clone, Default)]
pub struct FakeDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl FakeDevice {
    fn lock(&self) -> std::sync::MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_display(self, width: u32, height: u32) -> Self {
        self.lock().display = Some(DisplaySize { width, height });
        self
    }

    pub fn with_capabilities(self, capabilities: CapabilityFlags) -> Self {
        self.lock().capabilities = Some(capabilities);
        self
    }

    pub fn set_link_up(&self, up: bool) {
        self.lock().link_up = Some(up);
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.lock().calls.clone()
    }

    pub fn store_setting(&self, key: &str, value: &str) {
        self.lock().settings.insert(key.to_string(), value.to_string());
    }

    pub fn stored_setting(&self, key: &str) -> Option<String> {
        self.lock().settings.get(key).cloned()
    }

    fn record(&self, call: DeviceCall) {
        self.lock().calls.push(call);
    }
}

#[async_trait]
impl DeviceCapabilityProvider for FakeDevice {
    async fn manufacturer(&self) -> String {
        self.capabilities().await.manufacturer
    }

    async fn capabilities(&self) -> CapabilityFlags {
        self.lock().capabilities.clone().unwrap_or(CapabilityFlags {
            manufacturer: "fake".to_string(),
            resolution_change: true,
            volume_control: true,
            cec: false,
            firmware_update: true,
            display_power: true,
        })
    }

    async fn reboot(&self) -> SyncResult<()> {
        self.record(DeviceCall::Reboot);
        Ok(())
    }

    async fn resolutions(&self) -> SyncResult<Vec<Resolution>> {
        Ok(vec![Resolution {
            width: 1920,
            height: 1080,
            refresh_rate: 60,
        }])
    }

    async fn set_resolution(&self, width: u32, height: u32, refresh_rate: u32) -> SyncResult<()> {
        self.record(DeviceCall::SetResolution {
            width,
            height,
            refresh_rate,
        });
        Ok(())
    }

    async fn display_size(&self) -> SyncResult<DisplaySize> {
        Ok(self.lock().display.unwrap_or(DisplaySize {
            width: 1920,
            height: 1080,
        }))
    }

    async fn set_volume(&self, volume: u8) -> SyncResult<()> {
        self.record(DeviceCall::SetVolume(volume));
        Ok(())
    }

    async fn set_display_power(&self, on: bool) -> SyncResult<()> {
        self.record(DeviceCall::SetDisplayPower(on));
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self.stored_setting(key))
    }

    async fn set_setting(&self, key: &str, value: &str) -> SyncResult<()> {
        self.store_setting(key, value);
        Ok(())
    }

    async fn network_interfaces(&self) -> SyncResult<Vec<NetworkInterface>> {
        let link_up = self.lock().link_up.unwrap_or(true);
        Ok(vec![NetworkInterface {
            name: "eth0".to_string(),
            link_up,
            address: link_up.then(|| "10.0.0.20".to_string()),
        }])
    }

    async fn precache(&self, url: &str) -> SyncResult<()> {
        self.record(DeviceCall::Precache(url.to_string()));
        Ok(())
    }

    async fn install_update(&self, kind: UpdateKind, url: &str) -> SyncResult<()> {
        self.record(DeviceCall::InstallUpdate {
            kind,
            url: url.to_string(),
        });
        Ok(())
    }
}

// =============================================================================
// Fake Pub/Sub
// =============================================================================

/// Recorded call to the pub/sub connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubSubCall {
    Connect { device_id: String },
    Disconnect,
    Subscribe { topic: String },
    Publish { topic: String, payload: String },
}

#[derive(Default)]
struct PubSubState {
    calls: Vec<PubSubCall>,
    inbound: Option<mpsc::Sender<InboundMessage>>,
    connected: bool,
    publish_error: Option<fn() -> SyncError>,
}

/// Pub/sub connector that records calls and lets tests inject messages.
#[derive(Clone, Default)]
pub struct FakePubSub {
    state: Arc<Mutex<PubSubState>>,
}

impl FakePubSub {
    fn lock(&self) -> std::sync::MutexGuard<'_, PubSubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<PubSubCall> {
        self.lock().calls.clone()
    }

    /// Payloads published on `topic`, in order.
    pub fn published(&self, topic: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                PubSubCall::Publish { topic: t, payload } if t == topic => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Makes every later publish fail with `error()`; `None` restores it.
    pub fn fail_publishes(&self, error: Option<fn() -> SyncError>) {
        self.lock().publish_error = error;
    }

    /// Delivers a message as if it arrived from the cloud.
    pub async fn inject(&self, topic: &str, payload: &str) {
        let sender = self.lock().inbound.clone();
        if let Some(sender) = sender {
            let _ = sender
                .send(InboundMessage {
                    topic: topic.to_string(),
                    payload: payload.to_string(),
                })
                .await;
        }
    }
}

#[async_trait]
impl PubSubConnector for FakePubSub {
    async fn connect(&self, device_id: &str, inbound: mpsc::Sender<InboundMessage>) -> SyncResult<()> {
        let mut state = self.lock();
        state.calls.push(PubSubCall::Connect {
            device_id: device_id.to_string(),
        });
        state.inbound = Some(inbound);
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> SyncResult<()> {
        let mut state = self.lock();
        state.calls.push(PubSubCall::Disconnect);
        state.inbound = None;
        state.connected = false;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> SyncResult<()> {
        self.lock().calls.push(PubSubCall::Subscribe {
            topic: topic.to_string(),
        });
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: String) -> SyncResult<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(SyncError::NotConnected);
        }
        if let Some(error) = state.publish_error {
            return Err(error());
        }
        state.calls.push(PubSubCall::Publish {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}
