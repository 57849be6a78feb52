//! # signage-sync: Sync Engine for the Signage Player
//!
//! This crate keeps the player's settings aligned with the cloud shadow,
//! verifies the deployed content URL and runs every time-scheduled
//! operation on a single timeline.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Player Agent Architecture                        │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                   PlayerAgent (Main Orchestrator)                │  │
//! │  │                                                                  │  │
//! │  │  Spawned as Tokio tasks by the host process                      │  │
//! │  │  Routes connectivity, verified URLs and log level changes        │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ NetworkMonitor │  │ShadowSyncBridge│  │  TaskScheduler         │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Link + HTTP    │  │ Reports local  │  │ One-shot named tasks   │    │
//! │  │ probe, edge    │  │ settings,      │  │ on an injectable       │    │
//! │  │ events only    │  │ applies deltas │  │ clock                  │    │
//! │  └────────────────┘  └───────┬────────┘  └───────────▲────────────┘    │
//! │                              │                       │                  │
//! │         ┌────────────────────┼───────────────────────┤                  │
//! │         ▼                    ▼                       │                  │
//! │  ┌────────────────┐  ┌────────────────┐  ┌───────────┴────────────┐    │
//! │  │ Deployment     │  │ AuthManager    │  │ OnOffTimerEngine       │    │
//! │  │ Verifier       │  │                │  │ MaintenancePlanner     │    │
//! │  │ about + HEAD,  │  │ Token exchange │  │                        │    │
//! │  │ auth, backoff  │  │ and refresh    │  │ Recurring schedules    │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  HOST PORTS (traits in `ports`):                                       │
//! │  • SettingsStore - durable device configuration                        │
//! │  • DeviceCapabilityProvider - reboot, display, volume, storage         │
//! │  • PubSubConnector - cloud messaging transport                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Engine
//! - [`agent`] - Main `PlayerAgent` orchestrator
//! - [`bridge`] - Shadow sync actor
//! - [`scheduler`] - One-shot task timeline
//! - [`network`] - Connectivity probing
//!
//! ### Features
//! - [`deployment`] - Content URL verification with retry
//! - [`auth`] - Cloud session tokens
//! - [`timers`] - Weekly display on/off timers
//! - [`maintenance`] - Reboot, update and log upload schedules
//! - [`logs`] - Upload buffer with offline persistence
//!
//! ### Plumbing
//! - [`config`] - Agent configuration (TOML + env)
//! - [`logging`] - Tracing subscriber with runtime level changes
//! - [`ports`] - Traits implemented by the host
//! - [`protocol`] - Shadow topics and documents
//! - [`clock`] - System and fake clocks
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use signage_sync::{init_tracing, AgentConfig, PlayerAgent, PlayerPorts};
//!
//! let config = AgentConfig::load(None)?;
//! let log_level = init_tracing(config.logging.level)?;
//!
//! let mut agent = PlayerAgent::new(config, ports).with_log_level_handle(log_level);
//! agent.start().await?;
//!
//! let status = agent.status().await;
//! println!("Online: {}", status.online);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod bridge;
pub mod network;
pub mod scheduler;

pub mod auth;
pub mod deployment;
pub mod logs;
pub mod maintenance;
pub mod timers;

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod ports;
pub mod protocol;

#[cfg(test)]
pub(crate) mod fakes;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{AgentStatus, PlayerAgent, PlayerPorts};
pub use auth::{AuthConfig, AuthManager, AuthSession};
pub use bridge::{BridgeHandle, BridgeStatus, ShadowSyncBridge};
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::AgentConfig;
pub use deployment::DeploymentVerifier;
pub use error::{DeploymentError, SyncError, SyncResult, TaskError};
pub use logging::{init_tracing, LogLevelHandle};
pub use logs::{LogBuffer, LogEntry};
pub use maintenance::MaintenancePlanner;
pub use network::{ConnectivityEvent, NetworkMonitor, NetworkMonitorConfig};
pub use ports::{
    DeviceCapabilityProvider, InMemorySettingsStore, NetworkInterface, PubSubConnector,
    SettingsStore,
};
pub use protocol::{InboundMessage, ShadowTopics};
pub use scheduler::{TaskOutcome, TaskScheduler};
pub use timers::{OnOffTimerEngine, PowerEvent};
