//! # Player Agent
//!
//! Main orchestrator for the sync engine. Builds every component from the
//! host's ports, spawns their loops and routes events between them.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        PlayerAgent Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         PlayerAgent                              │  │
//! │  │                                                                  │  │
//! │  │  • Spawns scheduler, bridge, network monitor and router          │  │
//! │  │  • Routes connectivity events and verified URLs to the bridge    │  │
//! │  │  • Applies the cloud logLevel to the tracing filter              │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ NetworkMonitor │  │ShadowSyncBridge│  │   TaskScheduler        │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Online/Offline │─►│ Shadow, auth,  │─►│ Timers, maintenance,   │    │
//! │  │ edges          │  │ logs, settings │  │ deployment retries     │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                               ▲                     │                   │
//! │                               │  verified URL       │                   │
//! │                      ┌────────┴────────┐            │                   │
//! │                      │ Deployment      │◄───────────┘                   │
//! │                      │ Verifier        │  scheduled retries             │
//! │                      └─────────────────┘                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use signage_core::Setting;

use crate::auth::AuthManager;
use crate::bridge::{BridgeDeps, BridgeHandle, BridgeStatus, ShadowSyncBridge};
use crate::clock::{Clock, SystemClock};
use crate::config::AgentConfig;
use crate::deployment::DeploymentVerifier;
use crate::error::SyncResult;
use crate::logging::LogLevelHandle;
use crate::network::{ConnectivityEvent, NetworkMonitor};
use crate::ports::{DeviceCapabilityProvider, PubSubConnector, SettingsStore};
use crate::scheduler::TaskScheduler;

const EVENT_CHANNEL_SIZE: usize = 16;

// =============================================================================
// Agent Status
// =============================================================================

/// Current agent status for external queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentStatus {
    /// Whether `start` has run and `shutdown` has not.
    pub running: bool,

    /// Last connectivity state seen by the bridge.
    pub online: bool,

    /// Whether the cloud channel is connected.
    pub connected: bool,

    pub current_url: Option<String>,

    /// Tasks waiting on the scheduler timeline.
    pub pending_tasks: usize,

    /// Log entries waiting for upload.
    pub pending_logs: usize,
}

impl From<BridgeStatus> for AgentStatus {
    fn from(status: BridgeStatus) -> Self {
        AgentStatus {
            running: true,
            online: status.online,
            connected: status.connected,
            current_url: status.current_url,
            pending_tasks: status.pending_tasks,
            pending_logs: status.pending_logs,
        }
    }
}

// =============================================================================
// Ports
// =============================================================================

/// Host-provided collaborators.
#[derive(Clone)]
pub struct PlayerPorts {
    pub settings: Arc<dyn SettingsStore>,
    pub device: Arc<dyn DeviceCapabilityProvider>,
    pub pubsub: Arc<dyn PubSubConnector>,
}

// =============================================================================
// Player Agent
// =============================================================================

/// Main agent that owns every sync component.
pub struct PlayerAgent {
    config: Arc<AgentConfig>,
    ports: PlayerPorts,
    clock: Arc<dyn Clock>,
    http: reqwest::Client,

    /// Applied when the cloud changes `logLevel`.
    log_level: Option<LogLevelHandle>,

    /// Set after start.
    bridge: Option<BridgeHandle>,
    scheduler: Option<Arc<TaskScheduler>>,
    shutdown_txs: Vec<mpsc::Sender<()>>,
}

impl PlayerAgent {
    /// Creates a new agent on the system clock.
    pub fn new(config: AgentConfig, ports: PlayerPorts) -> Self {
        Self::with_clock(config, ports, Arc::new(SystemClock))
    }

    /// Creates a new agent with a custom clock.
    pub fn with_clock(config: AgentConfig, ports: PlayerPorts, clock: Arc<dyn Clock>) -> Self {
        PlayerAgent {
            config: Arc::new(config),
            ports,
            clock,
            http: reqwest::Client::new(),
            log_level: None,
            bridge: None,
            scheduler: None,
            shutdown_txs: Vec::new(),
        }
    }

    /// Lets the cloud `logLevel` setting drive the tracing filter.
    pub fn with_log_level_handle(mut self, handle: LogLevelHandle) -> Self {
        self.log_level = Some(handle);
        self
    }

    pub fn is_running(&self) -> bool {
        self.bridge.is_some()
    }

    /// Handle to the bridge, for hosts that push local settings or logs.
    pub fn bridge(&self) -> Option<BridgeHandle> {
        self.bridge.clone()
    }

    /// Returns the current agent status.
    pub async fn status(&self) -> AgentStatus {
        let Some(bridge) = &self.bridge else {
            return AgentStatus::default();
        };

        match bridge.status().await {
            Ok(status) => status.into(),
            Err(e) => {
                warn!(error = %e, "Bridge status unavailable");
                AgentStatus {
                    running: true,
                    pending_tasks: self.scheduler.as_ref().map_or(0, |s| s.len()),
                    ..AgentStatus::default()
                }
            }
        }
    }

    /// Starts the agent.
    ///
    /// Spawns the scheduler loop, the bridge actor, the network monitor and
    /// the event router. They run until `shutdown` is called.
    pub async fn start(&mut self) -> SyncResult<()> {
        if self.is_running() {
            debug!("Player agent already running");
            return Ok(());
        }

        self.config.validate()?;

        info!(
            auth_url = %self.config.cloud.auth_url,
            probe_url = %self.config.network.probe_url,
            "Starting player agent"
        );

        let scheduler = Arc::new(TaskScheduler::with_tick_interval(
            self.clock.clone(),
            self.config.tick_interval(),
        ));
        let auth = Arc::new(AuthManager::new(
            self.config.auth_config(),
            self.http.clone(),
            self.clock.clone(),
        ));

        let (verified_tx, verified_rx) = mpsc::unbounded_channel();
        let verifier = Arc::new(
            DeploymentVerifier::new(
                self.http.clone(),
                scheduler.clone(),
                self.ports.settings.clone(),
                self.ports.device.clone(),
                auth.clone(),
            )
            .with_listener(verified_tx),
        );

        let (bridge, bridge_handle) = ShadowSyncBridge::new(
            BridgeDeps {
                settings: self.ports.settings.clone(),
                device: self.ports.device.clone(),
                pubsub: self.ports.pubsub.clone(),
                scheduler: scheduler.clone(),
                verifier,
                auth,
            },
            self.config.logging.buffer_capacity,
        );

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let monitor = NetworkMonitor::new(
            self.config.network_monitor_config(),
            self.http.clone(),
            self.ports.device.clone(),
            events_tx,
        );

        let (scheduler_shutdown_tx, scheduler_shutdown_rx) = mpsc::channel(1);
        let (monitor_shutdown_tx, monitor_shutdown_rx) = mpsc::channel(1);
        let (router_shutdown_tx, router_shutdown_rx) = mpsc::channel(1);

        tokio::spawn(scheduler.clone().run(scheduler_shutdown_rx));
        tokio::spawn(bridge.run());
        tokio::spawn(monitor.run(monitor_shutdown_rx));
        tokio::spawn(Self::event_router(
            bridge_handle.clone(),
            events_rx,
            verified_rx,
            self.ports.settings.subscribe(),
            self.log_level.clone(),
            router_shutdown_rx,
        ));

        self.shutdown_txs = vec![router_shutdown_tx, monitor_shutdown_tx, scheduler_shutdown_tx];
        self.scheduler = Some(scheduler);
        self.bridge = Some(bridge_handle);

        info!("Player agent started");
        Ok(())
    }

    /// Stops the agent gracefully.
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        info!("Shutting down player agent");

        for tx in self.shutdown_txs.drain(..) {
            let _ = tx.send(()).await;
        }

        if let Some(bridge) = self.bridge.take() {
            let _ = bridge.shutdown().await;
        }
        self.scheduler = None;

        info!("Player agent stopped");
        Ok(())
    }

    /// Forwards events from the monitor, the verifier and the settings store.
    async fn event_router(
        bridge: BridgeHandle,
        mut events_rx: mpsc::Receiver<ConnectivityEvent>,
        mut verified_rx: mpsc::UnboundedReceiver<String>,
        mut settings_rx: broadcast::Receiver<Setting>,
        log_level: Option<LogLevelHandle>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut settings_open = true;

        loop {
            tokio::select! {
                Some(event) = events_rx.recv() => {
                    let result = match event {
                        ConnectivityEvent::Online => bridge.online().await,
                        ConnectivityEvent::Offline => bridge.offline().await,
                    };
                    if let Err(e) = result {
                        error!(?event, error = %e, "Failed to route connectivity event");
                    }
                }

                Some(url) = verified_rx.recv() => {
                    if let Err(e) = bridge.deployment_verified(url).await {
                        error!(error = %e, "Failed to route verified URL");
                    }
                }

                setting = settings_rx.recv(), if settings_open => match setting {
                    Ok(Setting::LogLevel(level)) => {
                        if let Some(handle) = &log_level {
                            match handle.set_level(level) {
                                Ok(()) => info!(%level, "Log level changed"),
                                Err(e) => warn!(error = %e, "Could not change log level"),
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Settings listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Settings store closed its change stream");
                        settings_open = false;
                    }
                },

                _ = shutdown_rx.recv() => {
                    info!("Event router received shutdown");
                    break;
                }
            }
        }

        info!("Event router stopped");
    }
}
