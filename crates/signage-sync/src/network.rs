//! # Network Monitor
//!
//! Probes connectivity and emits an event only when the state flips.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Probe Cycle                                      │
//! │                                                                         │
//! │  network_interfaces()                                                   │
//! │     │                                                                   │
//! │     ├── no link ─────────────────────────► offline, next in 60s        │
//! │     │                                                                   │
//! │     └── link up ──► GET probe_url                                      │
//! │                        ├── 2xx ──────────► online,  next in 60s        │
//! │                        └── failure ──────► offline, next in 10s        │
//! │                                                                         │
//! │  Events are edge-triggered: online → online emits nothing.             │
//! │  The monitor starts offline, so a first failed probe is silent.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ports::DeviceCapabilityProvider;

/// Default interval between probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(60);

/// Interval while the link is up but the probe fails.
pub const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub link_up: bool,
    pub reachable: bool,
}

impl ProbeResult {
    pub fn is_online(&self) -> bool {
        self.link_up && self.reachable
    }
}

/// Probe settings.
#[derive(Debug, Clone)]
pub struct NetworkMonitorConfig {
    pub probe_url: String,
    pub probe_interval: Duration,
    pub recheck_interval: Duration,
}

/// Periodic connectivity prober.
pub struct NetworkMonitor {
    config: NetworkMonitorConfig,
    http: reqwest::Client,
    device: Arc<dyn DeviceCapabilityProvider>,
    events_tx: mpsc::Sender<ConnectivityEvent>,
    last_online: bool,
}

impl NetworkMonitor {
    pub fn new(
        config: NetworkMonitorConfig,
        http: reqwest::Client,
        device: Arc<dyn DeviceCapabilityProvider>,
        events_tx: mpsc::Sender<ConnectivityEvent>,
    ) -> Self {
        NetworkMonitor {
            config,
            http,
            device,
            events_tx,
            last_online: false,
        }
    }

    /// Last observed state. Offline until a probe succeeds, matching the
    /// bridge, which also starts offline.
    pub fn last_online(&self) -> bool {
        self.last_online
    }

    /// Checks link state, then reachability of the probe endpoint.
    pub async fn probe(&self) -> ProbeResult {
        let link_up = match self.device.network_interfaces().await {
            Ok(interfaces) => interfaces.iter().any(|i| i.link_up),
            Err(e) => {
                // Let the HTTP probe decide.
                debug!(error = %e, "Could not list network interfaces");
                true
            }
        };

        if !link_up {
            return ProbeResult {
                link_up,
                reachable: false,
            };
        }

        let reachable = match self.http.get(&self.config.probe_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %self.config.probe_url, error = %e, "Connectivity probe failed");
                false
            }
        };

        ProbeResult { link_up, reachable }
    }

    /// Records a state and returns the event if it changed.
    pub fn observe(&mut self, online: bool) -> Option<ConnectivityEvent> {
        if self.last_online == online {
            return None;
        }
        self.last_online = online;
        Some(if online {
            ConnectivityEvent::Online
        } else {
            ConnectivityEvent::Offline
        })
    }

    /// Delay until the next probe.
    pub fn next_delay(&self, probe: &ProbeResult) -> Duration {
        if probe.link_up && !probe.reachable {
            self.config.recheck_interval
        } else {
            self.config.probe_interval
        }
    }

    /// One probe cycle: probe, emit on change, return the next delay.
    pub async fn check(&mut self) -> Duration {
        let probe = self.probe().await;
        if let Some(event) = self.observe(probe.is_online()) {
            info!(?event, "Connectivity changed");
            if self.events_tx.send(event).await.is_err() {
                warn!("Connectivity listener dropped");
            }
        }
        self.next_delay(&probe)
    }

    /// Probe loop. Spawn as a background task.
    pub async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(url = %self.config.probe_url, "Network monitor starting");

        loop {
            let delay = self.check().await;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => {
                    info!("Network monitor shutting down");
                    break;
                }
            }
        }
    }
}
