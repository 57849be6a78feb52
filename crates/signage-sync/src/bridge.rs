//! # Shadow Sync Bridge
//!
//! Keeps local settings and the cloud shadow aligned. A single actor owns all
//! mutation: every change, whatever its origin, is a [`BridgeCommand`]
//! processed one at a time.
//!
//! ## Data Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Shadow Sync Bridge                                 │
//! │                                                                         │
//! │  LOCAL → CLOUD                                                         │
//! │  ─────────────                                                         │
//! │  Apply(setting) ──► SettingsStore.apply ──► publish reported          │
//! │                     (must succeed first)     (unless ignore flag or    │
//! │                                               device-local key)        │
//! │                                         └──► side effects: timers,     │
//! │                                              maintenance, volume, ...  │
//! │                                                                         │
//! │  CLOUD → LOCAL                                                         │
//! │  ─────────────                                                         │
//! │  shadow/update/delta ───► each key ──► Apply(setting) + report        │
//! │                           currentURL ─► DeploymentVerifier (spawned)   │
//! │                                          └─► DeploymentVerified(url)   │
//! │  shadow/get/accepted ───► desired as delta, stale reported re-sent     │
//! │                                                                         │
//! │  CONNECTIVITY                                                          │
//! │  ────────────                                                          │
//! │  Online  ─► connect, subscribe, request snapshot, session, bust cache, │
//! │             merge offline logs, upload logs                            │
//! │  Offline ─► disconnect, currentURL → cachedURL, drop in-memory logs    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reports made while disconnected are dropped, not queued. The snapshot
//! requested on the next connect re-sends every reported key the cloud has
//! stale or missing.
//!
//! Each verification the bridge starts gets a generation number. A result
//! is applied only if no newer verification started since, so a slow check
//! of an old URL never replaces a newer one. Results of scheduled retries
//! carry no generation and must name the same resource as the latest
//! verification.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use url::Url;

use signage_core::{CapabilityFlags, CloudKey, CoreError, Setting};

use crate::auth::{AuthManager, AuthSession};
use crate::deployment::DeploymentVerifier;
use crate::error::{DeploymentError, SyncError, SyncResult, TaskError};
use crate::logs::{LogBuffer, LogEntry};
use crate::maintenance::MaintenancePlanner;
use crate::ports::{DeviceCapabilityProvider, PubSubConnector, SettingsStore};
use crate::protocol::{
    InboundKind, InboundMessage, LogBatch, ReportedUpdate, ShadowDelta, ShadowSnapshot, ShadowTopics,
};
use crate::scheduler::TaskScheduler;
use crate::timers::OnOffTimerEngine;

// =============================================================================
// Constants
// =============================================================================

/// Task name of the token refresh.
pub const REFRESH_TOKENS_TASK: &str = "Refresh tokens";

const COMMAND_CHANNEL_SIZE: usize = 100;
const INBOUND_CHANNEL_SIZE: usize = 100;

// =============================================================================
// Commands
// =============================================================================

/// Work item for the bridge actor.
#[derive(Debug)]
pub enum BridgeCommand {
    /// Write a setting; publish it unless `ignore_update_to_cloud`.
    Apply {
        setting: Setting,
        ignore_update_to_cloud: bool,
    },
    /// Raw `shadow/update/delta` payload.
    ShadowDelta(String),
    /// Raw `shadow/get/accepted` payload.
    ShadowSnapshot(String),
    Online,
    Offline,
    RefreshTokens,
    /// A verification finished with this final URL. `generation` is set for
    /// verifications the bridge started itself.
    DeploymentVerified {
        url: String,
        generation: Option<u64>,
    },
    /// The player moved to a new base URL.
    RebaseOrigin(String),
    UploadLogs,
    Log(LogEntry),
    Status(oneshot::Sender<BridgeStatus>),
    Shutdown,
}

/// Snapshot of bridge state for external queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeStatus {
    pub online: bool,
    pub connected: bool,
    pub device_id: Option<String>,
    pub current_url: Option<String>,
    pub pending_logs: usize,
    pub pending_tasks: usize,
}

// =============================================================================
// Handle
// =============================================================================

/// Handle for sending commands to the bridge.
#[derive(Clone)]
pub struct BridgeHandle {
    command_tx: mpsc::Sender<BridgeCommand>,
}

impl BridgeHandle {
    async fn send(&self, command: BridgeCommand) -> SyncResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SyncError::ChannelError("Bridge command channel closed".into()))
    }

    /// Applies a local change and reports it to the cloud.
    pub async fn apply(&self, setting: Setting) -> SyncResult<()> {
        self.send(BridgeCommand::Apply {
            setting,
            ignore_update_to_cloud: false,
        })
        .await
    }

    /// Applies a change without reporting it.
    pub async fn apply_local(&self, setting: Setting) -> SyncResult<()> {
        self.send(BridgeCommand::Apply {
            setting,
            ignore_update_to_cloud: true,
        })
        .await
    }

    pub async fn shadow_delta(&self, payload: String) -> SyncResult<()> {
        self.send(BridgeCommand::ShadowDelta(payload)).await
    }

    pub async fn shadow_snapshot(&self, payload: String) -> SyncResult<()> {
        self.send(BridgeCommand::ShadowSnapshot(payload)).await
    }

    pub async fn online(&self) -> SyncResult<()> {
        self.send(BridgeCommand::Online).await
    }

    pub async fn offline(&self) -> SyncResult<()> {
        self.send(BridgeCommand::Offline).await
    }

    pub async fn refresh_tokens(&self) -> SyncResult<()> {
        self.send(BridgeCommand::RefreshTokens).await
    }

    /// Delivers the result of a scheduled verification retry.
    pub async fn deployment_verified(&self, url: String) -> SyncResult<()> {
        self.send(BridgeCommand::DeploymentVerified {
            url,
            generation: None,
        })
        .await
    }

    pub async fn rebase_origin(&self, new_base: String) -> SyncResult<()> {
        self.send(BridgeCommand::RebaseOrigin(new_base)).await
    }

    pub async fn upload_logs(&self) -> SyncResult<()> {
        self.send(BridgeCommand::UploadLogs).await
    }

    pub async fn log(&self, entry: LogEntry) -> SyncResult<()> {
        self.send(BridgeCommand::Log(entry)).await
    }

    /// Current state; also waits for every earlier command to be processed.
    pub async fn status(&self) -> SyncResult<BridgeStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(BridgeCommand::Status(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| SyncError::ChannelError("Bridge dropped status reply".into()))
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.send(BridgeCommand::Shutdown).await
    }

    /// Handle wired to a bare receiver instead of a running bridge.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::Receiver<BridgeCommand>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        (BridgeHandle { command_tx }, command_rx)
    }
}

// =============================================================================
// Bridge
// =============================================================================

/// Collaborators the bridge is built from.
pub struct BridgeDeps {
    pub settings: Arc<dyn SettingsStore>,
    pub device: Arc<dyn DeviceCapabilityProvider>,
    pub pubsub: Arc<dyn PubSubConnector>,
    pub scheduler: Arc<TaskScheduler>,
    pub verifier: Arc<DeploymentVerifier>,
    pub auth: Arc<AuthManager>,
}

/// The shadow sync actor.
pub struct ShadowSyncBridge {
    settings: Arc<dyn SettingsStore>,
    device: Arc<dyn DeviceCapabilityProvider>,
    pubsub: Arc<dyn PubSubConnector>,
    scheduler: Arc<TaskScheduler>,
    verifier: Arc<DeploymentVerifier>,
    auth: Arc<AuthManager>,
    timers: Arc<OnOffTimerEngine>,
    planner: Arc<MaintenancePlanner>,
    logs: LogBuffer,

    /// Captured once when the actor starts.
    capabilities: CapabilityFlags,

    /// Topics of the current connection; `None` while disconnected.
    topics: Option<ShadowTopics>,
    online: bool,

    /// Latest verification started; older results are dropped.
    deployment_generation: u64,
    deployment_target: Option<Url>,

    handle: BridgeHandle,
    command_rx: mpsc::Receiver<BridgeCommand>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: mpsc::Receiver<InboundMessage>,
}

impl ShadowSyncBridge {
    /// Creates the bridge and returns a handle.
    pub fn new(deps: BridgeDeps, log_capacity: usize) -> (Self, BridgeHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_SIZE);
        let handle = BridgeHandle { command_tx };

        let timers = Arc::new(OnOffTimerEngine::new(
            deps.scheduler.clone(),
            deps.device.clone(),
        ));
        let planner = Arc::new(MaintenancePlanner::new(
            deps.scheduler.clone(),
            deps.device.clone(),
            handle.clone(),
        ));

        let bridge = ShadowSyncBridge {
            logs: LogBuffer::new(deps.device.clone(), log_capacity),
            settings: deps.settings,
            device: deps.device,
            pubsub: deps.pubsub,
            scheduler: deps.scheduler,
            verifier: deps.verifier,
            auth: deps.auth,
            timers,
            planner,
            capabilities: CapabilityFlags::default(),
            topics: None,
            online: false,
            deployment_generation: 0,
            deployment_target: None,
            handle: handle.clone(),
            command_rx,
            inbound_tx,
            inbound_rx,
        };

        (bridge, handle)
    }

    /// Runs the actor loop. Spawn as a background task.
    pub async fn run(mut self) {
        info!("Shadow sync bridge starting");

        self.capabilities = self.device.capabilities().await;
        self.restore_schedules().await;

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(BridgeCommand::Shutdown) | None => {
                        info!("Shadow sync bridge shutting down");
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                },

                Some(message) = self.inbound_rx.recv() => self.on_inbound(message).await,
            }
        }

        if self.topics.take().is_some() {
            if let Err(e) = self.pubsub.disconnect().await {
                warn!(error = %e, "Disconnect on shutdown failed");
            }
        }
        info!("Shadow sync bridge stopped");
    }

    async fn handle_command(&mut self, command: BridgeCommand) {
        match command {
            BridgeCommand::Apply {
                setting,
                ignore_update_to_cloud,
            } => {
                let key = setting.key_name();
                if let Setting::CurrentUrl(url) = &setting {
                    // A direct change supersedes verifications in flight.
                    self.next_deployment(url.as_deref());
                }
                if let Err(e) = self.apply(setting, ignore_update_to_cloud).await {
                    warn!(key, error = %e, "Failed to apply setting");
                }
            }
            BridgeCommand::ShadowDelta(payload) => self.on_delta(&payload).await,
            BridgeCommand::ShadowSnapshot(payload) => self.on_snapshot(&payload).await,
            BridgeCommand::Online => self.on_online().await,
            BridgeCommand::Offline => self.on_offline().await,
            BridgeCommand::RefreshTokens => self.on_refresh_tokens().await,
            BridgeCommand::DeploymentVerified { url, generation } => {
                self.on_deployment_verified(url, generation).await
            }
            BridgeCommand::RebaseOrigin(new_base) => self.on_rebase(new_base).await,
            BridgeCommand::UploadLogs => self.upload_logs().await,
            BridgeCommand::Log(entry) => self.logs.push(entry, self.online).await,
            BridgeCommand::Status(reply) => {
                let _ = reply.send(self.status().await);
            }
            // Handled by the run loop.
            BridgeCommand::Shutdown => {}
        }
    }

    async fn status(&self) -> BridgeStatus {
        let config = self.settings.snapshot().await;
        BridgeStatus {
            online: self.online,
            connected: self.topics.is_some(),
            device_id: config.device_id,
            current_url: config.current_url,
            pending_logs: self.logs.len(),
            pending_tasks: self.scheduler.len(),
        }
    }

    async fn restore_schedules(&mut self) {
        let config = self.settings.snapshot().await;
        if config.on_off_timers_enabled {
            self.timers.save(&config.on_off_timers);
        }
        self.planner.reschedule(&config).await;
    }

    // =========================================================================
    // Local → Cloud
    // =========================================================================

    /// Writes through the store, then reports, then runs side effects.
    async fn apply(&mut self, setting: Setting, ignore_update_to_cloud: bool) -> SyncResult<()> {
        self.settings.apply(setting.clone()).await?;

        if !ignore_update_to_cloud {
            if let Some(key) = setting.cloud_key() {
                self.report(key, setting.value()).await;
            }
        }

        self.side_effects(&setting).await;
        Ok(())
    }

    /// Reports one key, logging instead of failing.
    async fn report(&self, key: CloudKey, value: Value) {
        match self.publish_report(key, value).await {
            Ok(()) => debug!(%key, "Reported to cloud"),
            Err(SyncError::NotConnected) => debug!(%key, "Not connected, report skipped"),
            Err(e) => warn!(%key, error = %e, "Failed to publish report"),
        }
    }

    async fn publish_report(&self, key: CloudKey, value: Value) -> SyncResult<()> {
        let topics = self.topics.as_ref().ok_or(SyncError::NotConnected)?;
        let payload = ReportedUpdate::single(key, value).to_json()?;
        self.pubsub.publish(&topics.update(), payload).await
    }

    async fn side_effects(&mut self, setting: &Setting) {
        match setting {
            Setting::RebootTime(_)
            | Setting::WantReboot(_)
            | Setting::SoftwareUpdateUrl(_)
            | Setting::SoftwareUpdateTime(_)
            | Setting::FirmwareUpdateUrl(_)
            | Setting::FirmwareUpdateTime(_)
            | Setting::UploadLogTimeInterval(_) => {
                let config = self.settings.snapshot().await;
                self.planner.reschedule(&config).await;
            }
            Setting::OnOffTimers(timers) => {
                if self.settings.snapshot().await.on_off_timers_enabled {
                    self.timers.save(timers);
                }
            }
            Setting::OnOffTimersEnabled(true) => {
                let config = self.settings.snapshot().await;
                self.timers.save(&config.on_off_timers);
            }
            Setting::OnOffTimersEnabled(false) => self.timers.disable(),
            Setting::AccessCode(_) => {
                // The old session belongs to the previous code.
                self.auth.logout().await;
                self.scheduler.cancel_by_name(REFRESH_TOKENS_TASK);
                if self.online {
                    self.ensure_session().await;
                }
            }
            Setting::Volume(volume) if self.capabilities.volume_control => {
                if let Err(e) = self.device.set_volume(*volume).await {
                    warn!(volume, error = %e, "Failed to set volume");
                }
            }
            Setting::Resolution(Some(resolution)) if self.capabilities.resolution_change => {
                if let Err(e) = self
                    .device
                    .set_resolution(resolution.width, resolution.height, resolution.refresh_rate)
                    .await
                {
                    warn!(%resolution, error = %e, "Failed to set resolution");
                }
            }
            _ => {}
        }
    }

    // =========================================================================
    // Cloud → Local
    // =========================================================================

    async fn on_inbound(&mut self, message: InboundMessage) {
        let kind = self
            .topics
            .as_ref()
            .and_then(|topics| topics.classify(&message.topic));
        match kind {
            Some(InboundKind::Delta) => self.on_delta(&message.payload).await,
            Some(InboundKind::Snapshot) => self.on_snapshot(&message.payload).await,
            None => debug!(topic = %message.topic, "Ignoring message on unknown topic"),
        }
    }

    async fn on_delta(&mut self, payload: &str) {
        match ShadowDelta::parse(payload) {
            Ok(delta) => {
                debug!(version = ?delta.version, keys = delta.state.len(), "Shadow delta");
                self.apply_desired(delta.state).await;
            }
            Err(e) => warn!(error = %e, "Invalid shadow delta"),
        }
    }

    async fn on_snapshot(&mut self, payload: &str) {
        let snapshot = match ShadowSnapshot::parse(payload) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Invalid shadow snapshot");
                return;
            }
        };
        debug!(version = ?snapshot.version, "Shadow snapshot");

        let desired = snapshot.state.desired.unwrap_or_default();
        let reported = snapshot.state.reported.unwrap_or_default();
        self.apply_desired(desired.clone()).await;

        // Re-report local values the cloud has stale or missing.
        let config = self.settings.snapshot().await;
        for key in CloudKey::ALL {
            if desired.contains_key(key.as_str()) {
                continue;
            }
            let local = config.cloud_setting(key).value();
            let stale = match reported.get(key.as_str()) {
                Some(remote) => *remote != local,
                None => !local.is_null(),
            };
            if stale {
                self.report(key, local).await;
            }
        }
    }

    async fn apply_desired(&mut self, desired: Map<String, Value>) {
        for (key, value) in desired {
            if key == CloudKey::CurrentUrl.as_str() {
                match value {
                    Value::String(url) => self.verify_content_url(url),
                    other => warn!(value = %other, "Ignoring non-string currentURL"),
                }
                continue;
            }

            match Setting::from_cloud(&key, value) {
                Ok(setting) => {
                    if let Err(e) = self.apply(setting, false).await {
                        warn!(%key, error = %e, "Failed to apply cloud setting");
                    }
                }
                Err(CoreError::UnknownSetting(_)) | Err(CoreError::LocalOnlySetting(_)) => {
                    warn!(%key, "Ignoring unrecognised shadow key");
                }
                Err(e) => warn!(%key, error = %e, "Rejected cloud setting"),
            }
        }
    }

    // =========================================================================
    // Deployment
    // =========================================================================

    /// Starts a new verification generation aimed at `target`.
    fn next_deployment(&mut self, target: Option<&str>) -> u64 {
        self.deployment_generation += 1;
        self.deployment_target = target.and_then(|url| Url::parse(url).ok());
        self.deployment_generation
    }

    /// Verifies a new content URL off the actor; the result comes back as
    /// [`BridgeCommand::DeploymentVerified`].
    fn verify_content_url(&mut self, url: String) {
        let generation = self.next_deployment(Some(&url));
        let verifier = Arc::clone(&self.verifier);
        let handle = self.handle.clone();
        tokio::spawn(async move {
            report_verification(&handle, generation, verifier.resolve(&url, 0).await).await;
        });
    }

    async fn on_rebase(&mut self, new_base: String) {
        let Some(current) = self.settings.current_url().await else {
            self.verify_content_url(new_base);
            return;
        };

        let verifier = Arc::clone(&self.verifier);
        let handle = self.handle.clone();
        let generation = self.next_deployment(Some(&new_base));
        tokio::spawn(async move {
            match verifier.rebase_on_new_origin(&current, &new_base).await {
                Some(result) => report_verification(&handle, generation, result).await,
                None => debug!("Player origin unchanged"),
            }
        });
    }

    async fn on_deployment_verified(&mut self, url: String, generation: Option<u64>) {
        let current = match generation {
            Some(generation) => generation == self.deployment_generation,
            None => match (&self.deployment_target, Url::parse(&url)) {
                (None, _) => true,
                (Some(target), Ok(verified)) => same_resource(target, &verified),
                (Some(_), Err(_)) => false,
            },
        };
        if !current {
            info!(%url, "Dropping result of a superseded verification");
            return;
        }

        if let Err(e) = self.apply(Setting::CurrentUrl(Some(url)), false).await {
            warn!(error = %e, "Failed to persist verified URL");
        }
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    async fn on_online(&mut self) {
        info!("Device online");
        self.online = true;

        match self.connect().await {
            Ok(()) => {}
            Err(SyncError::MissingDeviceId) => warn!("No device id, cloud channel not connected"),
            Err(e) => error!(error = %e, "Failed to connect cloud channel"),
        }
        self.ensure_session().await;

        if let Some(current) = self.settings.current_url().await {
            let generation = self.next_deployment(Some(&current));
            let verifier = Arc::clone(&self.verifier);
            let handle = self.handle.clone();
            tokio::spawn(async move {
                report_verification(&handle, generation, verifier.bust_cache(&current).await).await;
            });
        }

        match self.logs.merge_durable().await {
            Ok(0) => {}
            Ok(merged) => info!(merged, "Offline logs restored"),
            Err(e) => warn!(error = %e, "Could not read offline logs"),
        }
        self.upload_logs().await;
    }

    async fn on_offline(&mut self) {
        info!("Device offline");
        self.online = false;

        if self.topics.take().is_some() {
            if let Err(e) = self.pubsub.disconnect().await {
                warn!(error = %e, "Disconnect failed");
            }
        }

        let config = self.settings.snapshot().await;
        if config.current_url.is_some() && config.cached_url != config.current_url {
            if let Err(e) = self.apply(Setting::CachedUrl(config.current_url), true).await {
                warn!(error = %e, "Failed to persist cached URL");
            }
        }

        self.logs.reset_memory();
    }

    async fn connect(&mut self) -> SyncResult<()> {
        let device_id = self
            .settings
            .device_id()
            .await
            .ok_or(SyncError::MissingDeviceId)?;

        self.pubsub.connect(&device_id, self.inbound_tx.clone()).await?;

        let topics = ShadowTopics::new(&device_id);
        for topic in topics.inbound() {
            if let Err(e) = self.pubsub.subscribe(&topic).await {
                warn!(%topic, error = %e, "Subscribe failed");
            }
        }
        if let Err(e) = self.pubsub.publish(&topics.get(), "{}".to_string()).await {
            warn!(error = %e, "Snapshot request failed");
        }

        info!(%device_id, "Cloud channel connected");
        self.topics = Some(topics);
        Ok(())
    }

    async fn ensure_session(&mut self) {
        let now = self.scheduler.now();
        let session = match self.auth.current_session().await {
            Some(session) if !session.needs_refresh(now) => Ok(session),
            Some(_) => self.auth.refresh().await,
            None => match self.settings.access_code().await {
                Some(code) => self.auth.authenticate(&code).await,
                None => {
                    debug!("No access code, skipping authentication");
                    return;
                }
            },
        };

        match session {
            Ok(session) => self.schedule_token_refresh(&session),
            Err(e) => error!(error = %e, "Failed to establish cloud session"),
        }
    }

    async fn on_refresh_tokens(&mut self) {
        if !self.online {
            info!("Offline, token refresh skipped");
            return;
        }

        match self.auth.refresh().await {
            Ok(session) => self.schedule_token_refresh(&session),
            Err(e) => error!(error = %e, "Token refresh failed"),
        }
    }

    fn schedule_token_refresh(&self, session: &AuthSession) {
        let handle = self.handle.clone();
        self.scheduler.schedule_replacing(
            move |_| async move { handle.refresh_tokens().await.map_err(TaskError::from) },
            session.refresh_at(),
            REFRESH_TOKENS_TASK,
            Value::Null,
        );
        debug!(at = %session.refresh_at(), "Token refresh scheduled");
    }

    // =========================================================================
    // Logs
    // =========================================================================

    async fn upload_logs(&mut self) {
        let Some(topics) = &self.topics else {
            debug!("Not connected, log upload skipped");
            return;
        };
        let Some(device_id) = self.settings.device_id().await else {
            return;
        };

        let entries = self.logs.drain();
        if entries.is_empty() {
            return;
        }

        let count = entries.len();
        let batch = LogBatch {
            device_id,
            logs: entries,
        };
        let result = match batch.to_json() {
            Ok(payload) => self.pubsub.publish(&topics.logs(), payload).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => info!(count, "Logs uploaded"),
            Err(e) if e.is_retryable() => {
                warn!(count, error = %e, "Log upload failed, keeping entries");
                self.logs.requeue(batch.logs);
            }
            Err(e) => error!(count, error = %e, "Log upload rejected, dropping entries"),
        }
    }
}

/// Same scheme, host, port and path. Query parameters (credentials, cache
/// bust, display size) are ignored.
fn same_resource(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
        && a.path() == b.path()
}

async fn report_verification(
    handle: &BridgeHandle,
    generation: u64,
    result: Result<String, DeploymentError>,
) {
    match result {
        Ok(url) => {
            let command = BridgeCommand::DeploymentVerified {
                url,
                generation: Some(generation),
            };
            if let Err(e) = handle.send(command).await {
                warn!(error = %e, "Could not deliver verified URL");
            }
        }
        Err(e) if e.is_retryable() => info!(%e, "Deployment verification pending"),
        Err(e) => warn!(%e, "Deployment verification failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthConfig;
    use crate::clock::{Clock, FakeClock};
    use crate::fakes::{DeviceCall, FakeDevice, FakePubSub};
    use crate::logs::DEFAULT_LOG_CAPACITY;
    use crate::ports::InMemorySettingsStore;
    use chrono::{NaiveTime, TimeZone, Utc};
    use serde_json::json;
    use signage_core::{DayOfWeek, DeviceConfig, LogLevel, OnOffTimerSetting, Orientation};
    use std::future::Future;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const UPDATE: &str = "$things/dev-1/shadow/update";
    const DELTA: &str = "$things/dev-1/shadow/update/delta";

    struct Harness {
        server: MockServer,
        clock: Arc<FakeClock>,
        store: Arc<InMemorySettingsStore>,
        device: FakeDevice,
        pubsub: FakePubSub,
        scheduler: Arc<TaskScheduler>,
        handle: BridgeHandle,
    }

    fn provisioned() -> DeviceConfig {
        DeviceConfig {
            device_id: Some("dev-1".into()),
            ..DeviceConfig::default()
        }
    }

    async fn harness(config: DeviceConfig) -> Harness {
        let server = MockServer::start().await;
        let clock = Arc::new(FakeClock::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap(),
        ));
        let scheduler = Arc::new(TaskScheduler::new(clock.clone()));
        let store = Arc::new(InMemorySettingsStore::new(config));
        let device = FakeDevice::default();
        let pubsub = FakePubSub::default();
        let auth = Arc::new(AuthManager::new(
            AuthConfig {
                auth_url: format!("{}/auth", server.uri()),
            },
            reqwest::Client::new(),
            clock.clone(),
        ));
        let verifier = Arc::new(DeploymentVerifier::new(
            reqwest::Client::new(),
            scheduler.clone(),
            store.clone(),
            Arc::new(device.clone()),
            auth.clone(),
        ));

        let (bridge, handle) = ShadowSyncBridge::new(
            BridgeDeps {
                settings: store.clone(),
                device: Arc::new(device.clone()),
                pubsub: Arc::new(pubsub.clone()),
                scheduler: scheduler.clone(),
                verifier,
                auth,
            },
            DEFAULT_LOG_CAPACITY,
        );
        tokio::spawn(bridge.run());

        Harness {
            server,
            clock,
            store,
            device,
            pubsub,
            scheduler,
            handle,
        }
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn mount_player(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/player/api/about"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/player/index.html"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_same_value_twice_publishes_twice() {
        let h = harness(provisioned()).await;
        h.handle.online().await.unwrap();
        h.handle.apply(Setting::Volume(40)).await.unwrap();
        h.handle.apply(Setting::Volume(40)).await.unwrap();
        let status = h.handle.status().await.unwrap();

        assert!(status.online && status.connected);
        let expected = r#"{"state":{"reported":{"volume":40},"desired":null}}"#;
        assert_eq!(h.pubsub.published(UPDATE), vec![expected, expected]);
        assert_eq!(h.pubsub.published("$things/dev-1/shadow/get"), vec!["{}"]);
        assert_eq!(
            h.device.calls(),
            vec![DeviceCall::SetVolume(40), DeviceCall::SetVolume(40)]
        );
    }

    #[tokio::test]
    async fn test_ignore_flag_and_local_keys_are_not_published() {
        let h = harness(provisioned()).await;
        h.handle.online().await.unwrap();
        h.handle.apply_local(Setting::Volume(10)).await.unwrap();
        h.handle
            .apply(Setting::CachedUrl(Some("https://fallback.example/".into())))
            .await
            .unwrap();
        h.handle.status().await.unwrap();

        assert!(h.pubsub.published(UPDATE).is_empty());
        let config = h.store.snapshot().await;
        assert_eq!(config.volume, 10);
        assert_eq!(config.cached_url.as_deref(), Some("https://fallback.example/"));
    }

    #[tokio::test]
    async fn test_rejected_setting_is_not_published() {
        let h = harness(provisioned()).await;
        h.handle.online().await.unwrap();
        h.handle.apply(Setting::Volume(150)).await.unwrap();
        h.handle.status().await.unwrap();

        assert!(h.pubsub.published(UPDATE).is_empty());
        assert_eq!(h.store.snapshot().await.volume, 50);
    }

    #[tokio::test]
    async fn test_online_without_device_id_stays_disconnected() {
        let h = harness(DeviceConfig::default()).await;
        h.handle.online().await.unwrap();
        h.handle.apply(Setting::Volume(35)).await.unwrap();
        let status = h.handle.status().await.unwrap();

        assert!(status.online);
        assert!(!status.connected);
        assert!(h.pubsub.calls().is_empty());
        assert_eq!(h.store.snapshot().await.volume, 35);
    }

    #[tokio::test]
    async fn test_reports_skipped_while_disconnected() {
        let h = harness(provisioned()).await;
        h.handle.apply(Setting::LogLevel(LogLevel::Debug)).await.unwrap();
        let status = h.handle.status().await.unwrap();

        assert!(!status.connected);
        assert!(h.pubsub.calls().is_empty());
        assert_eq!(h.store.snapshot().await.log_level, LogLevel::Debug);
    }

    #[tokio::test]
    async fn test_delta_applies_and_acknowledges() {
        let h = harness(provisioned()).await;
        h.handle.online().await.unwrap();
        h.handle
            .shadow_delta(r#"{"version":3,"state":{"volume":30,"bogus":1,"wantReboot":"yes"}}"#.into())
            .await
            .unwrap();
        h.handle.status().await.unwrap();

        assert_eq!(h.store.snapshot().await.volume, 30);
        assert!(!h.store.snapshot().await.want_reboot);
        assert_eq!(
            h.pubsub.published(UPDATE),
            vec![r#"{"state":{"reported":{"volume":30},"desired":null}}"#]
        );
    }

    #[tokio::test]
    async fn test_inbound_delta_is_routed() {
        let h = harness(provisioned()).await;
        h.handle.online().await.unwrap();
        h.handle.status().await.unwrap();

        h.pubsub.inject(DELTA, r#"{"state":{"volume":33}}"#).await;
        let store = h.store.clone();
        eventually(move || {
            let store = store.clone();
            async move { store.snapshot().await.volume == 33 }
        })
        .await;
    }

    #[tokio::test]
    async fn test_snapshot_merges_desired_and_stale_reported() {
        let h = harness(provisioned()).await;
        h.handle.online().await.unwrap();

        let mut reported = DeviceConfig::default().reported_state();
        reported.insert("orientation".into(), json!("portrait"));
        let payload = json!({
            "version": 9,
            "state": {
                "desired": {"volume": 20},
                "reported": reported
            }
        });
        h.handle.shadow_snapshot(payload.to_string()).await.unwrap();
        h.handle.status().await.unwrap();

        let config = h.store.snapshot().await;
        assert_eq!(config.volume, 20);
        assert_eq!(config.orientation, Orientation::Landscape);
        assert_eq!(
            h.pubsub.published(UPDATE),
            vec![
                r#"{"state":{"reported":{"volume":20},"desired":null}}"#,
                r#"{"state":{"reported":{"orientation":"landscape"},"desired":null}}"#,
            ]
        );

        // Applying the same snapshot again only re-acknowledges desired.
        let mut reported = config.reported_state();
        reported.insert("volume".into(), json!(20));
        let payload = json!({"state": {"desired": {"volume": 20}, "reported": reported}});
        h.handle.shadow_snapshot(payload.to_string()).await.unwrap();
        h.handle.status().await.unwrap();
        assert_eq!(h.pubsub.published(UPDATE).len(), 3);
    }

    #[tokio::test]
    async fn test_offline_then_online_revalidates_current_url() {
        let h = harness(provisioned()).await;
        mount_player(&h.server).await;
        let current = format!("{}/player/index.html", h.server.uri());
        h.store
            .apply(Setting::CurrentUrl(Some(current.clone())))
            .await
            .unwrap();
        h.store
            .apply(Setting::CachedUrl(Some("https://fallback.example/".into())))
            .await
            .unwrap();

        h.handle.offline().await.unwrap();
        h.handle.status().await.unwrap();
        assert_eq!(h.store.cached_url().await, Some(current.clone()));
        assert!(h.pubsub.published(UPDATE).is_empty());

        h.handle.online().await.unwrap();
        let store = h.store.clone();
        eventually(move || {
            let store = store.clone();
            async move {
                store
                    .current_url()
                    .await
                    .is_some_and(|url| url.contains("_fwi_cacheBust") && url.contains("width=1920"))
            }
        })
        .await;

        let status = h.handle.status().await.unwrap();
        assert!(status.current_url.unwrap().starts_with(&current));
        assert_eq!(h.pubsub.published(UPDATE).len(), 1);
    }

    #[tokio::test]
    async fn test_delta_current_url_is_verified_before_apply() {
        let h = harness(provisioned()).await;
        mount_player(&h.server).await;
        h.handle.online().await.unwrap();

        let candidate = format!("{}/player/index.html", h.server.uri());
        let payload = json!({"state": {"currentURL": candidate}});
        h.handle.shadow_delta(payload.to_string()).await.unwrap();

        let store = h.store.clone();
        eventually(move || {
            let store = store.clone();
            async move {
                store
                    .current_url()
                    .await
                    .is_some_and(|url| url.contains("height=1080"))
            }
        })
        .await;
    }

    #[tokio::test]
    async fn test_online_authenticates_and_schedules_refresh() {
        let h = harness(DeviceConfig {
            access_code: Some("AB12".into()),
            ..provisioned()
        })
        .await;
        Mock::given(method("POST"))
            .and(path("/auth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "tok-1",
                "refreshToken": "ref-1",
                "expiresIn": 3600
            })))
            .expect(1)
            .mount(&h.server)
            .await;

        h.handle.online().await.unwrap();
        h.handle.status().await.unwrap();

        assert_eq!(
            h.scheduler.execution_time_of(REFRESH_TOKENS_TASK),
            Some(h.clock.now() + chrono::Duration::minutes(55))
        );
    }

    #[tokio::test]
    async fn test_failed_refresh_is_not_retried() {
        let h = harness(DeviceConfig {
            access_code: Some("AB12".into()),
            ..provisioned()
        })
        .await;
        Mock::given(method("POST"))
            .and(path("/auth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "tok-1",
                "refreshToken": "ref-1",
                "expiresIn": 3600
            })))
            .expect(1)
            .mount(&h.server)
            .await;
        h.handle.online().await.unwrap();
        h.handle.status().await.unwrap();

        Mock::given(method("POST"))
            .and(path("/auth/token/refresh"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&h.server)
            .await;

        h.clock.advance(chrono::Duration::minutes(55));
        for task in h.scheduler.fire_due() {
            task.outcome().await;
        }
        h.handle.status().await.unwrap();

        assert!(!h.scheduler.is_pending(REFRESH_TOKENS_TASK));
        h.server.verify().await;
    }

    #[tokio::test]
    async fn test_access_code_change_starts_new_session() {
        let h = harness(DeviceConfig {
            access_code: Some("AB12".into()),
            ..provisioned()
        })
        .await;
        Mock::given(method("POST"))
            .and(path("/auth/token"))
            .and(body_json(json!({"accessCode": "AB12"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "tok-1",
                "refreshToken": "ref-1",
                "expiresIn": 3600
            })))
            .expect(1)
            .mount(&h.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/token"))
            .and(body_json(json!({"accessCode": "CD34"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "tok-2",
                "refreshToken": "ref-2",
                "expiresIn": 7200
            })))
            .expect(1)
            .mount(&h.server)
            .await;

        h.handle.online().await.unwrap();
        h.handle
            .apply_local(Setting::AccessCode(Some("CD34".into())))
            .await
            .unwrap();
        h.handle.status().await.unwrap();
        assert_eq!(
            h.scheduler.execution_time_of(REFRESH_TOKENS_TASK),
            Some(h.clock.now() + chrono::Duration::minutes(115))
        );

        h.handle.apply_local(Setting::AccessCode(None)).await.unwrap();
        h.handle.status().await.unwrap();
        assert!(!h.scheduler.is_pending(REFRESH_TOKENS_TASK));
        h.server.verify().await;
    }

    #[tokio::test]
    async fn test_refresh_tokens_offline_is_skipped() {
        let h = harness(provisioned()).await;
        Mock::given(method("POST"))
            .and(path("/auth/token/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&h.server)
            .await;

        h.handle.refresh_tokens().await.unwrap();
        h.handle.status().await.unwrap();
        assert!(!h.scheduler.is_pending(REFRESH_TOKENS_TASK));
    }

    #[tokio::test]
    async fn test_offline_logs_are_uploaded_when_online() {
        let h = harness(provisioned()).await;
        let at = h.clock.now();
        h.handle.offline().await.unwrap();
        h.handle
            .log(LogEntry::new(at, LogLevel::Warn, "network lost"))
            .await
            .unwrap();
        h.handle
            .log(LogEntry::new(at, LogLevel::Info, "still playing"))
            .await
            .unwrap();
        assert_eq!(h.handle.status().await.unwrap().pending_logs, 0);

        h.handle.online().await.unwrap();
        h.handle.status().await.unwrap();

        let batches = h.pubsub.published("$things/dev-1/logs");
        assert_eq!(batches.len(), 1);
        let batch: Value = serde_json::from_str(&batches[0]).unwrap();
        assert_eq!(batch["deviceId"], json!("dev-1"));
        assert_eq!(batch["logs"][0]["message"], json!("network lost"));
        assert_eq!(batch["logs"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_log_upload_keeps_entries_only_on_transient_failure() {
        let h = harness(provisioned()).await;
        h.handle.online().await.unwrap();
        let at = h.clock.now();

        h.pubsub
            .fail_publishes(Some(|| SyncError::ConnectionFailed("broker unreachable".into())));
        h.handle
            .log(LogEntry::new(at, LogLevel::Warn, "decoder stalled"))
            .await
            .unwrap();
        h.handle.upload_logs().await.unwrap();
        assert_eq!(h.handle.status().await.unwrap().pending_logs, 1);

        h.pubsub
            .fail_publishes(Some(|| SyncError::SerializationFailed("payload too large".into())));
        h.handle.upload_logs().await.unwrap();
        assert_eq!(h.handle.status().await.unwrap().pending_logs, 0);
        assert!(h.pubsub.published("$things/dev-1/logs").is_empty());
    }

    #[tokio::test]
    async fn test_slow_verification_does_not_replace_newer_url() {
        let h = harness(provisioned()).await;
        mount_player(&h.server).await;
        Mock::given(method("GET"))
            .and(path("/old/api/about"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(400)))
            .mount(&h.server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/old/index.html"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&h.server)
            .await;
        h.store
            .apply(Setting::CurrentUrl(Some(format!("{}/old/index.html", h.server.uri()))))
            .await
            .unwrap();

        // Online re-verifies the old URL; a delta moves on before it answers.
        h.handle.online().await.unwrap();
        let candidate = format!("{}/player/index.html", h.server.uri());
        let payload = json!({"state": {"currentURL": candidate}});
        h.handle.shadow_delta(payload.to_string()).await.unwrap();

        let store = h.store.clone();
        eventually(move || {
            let store = store.clone();
            async move {
                store
                    .current_url()
                    .await
                    .is_some_and(|url| url.contains("/player/index.html"))
            }
        })
        .await;

        tokio::time::sleep(Duration::from_millis(600)).await;
        let status = h.handle.status().await.unwrap();
        assert!(status.current_url.unwrap().contains("/player/index.html"));
        assert!(h
            .pubsub
            .published(UPDATE)
            .iter()
            .all(|payload| !payload.contains("/old/")));
    }

    #[tokio::test]
    async fn test_retry_result_for_other_resource_is_dropped() {
        let h = harness(provisioned()).await;
        mount_player(&h.server).await;
        h.handle.online().await.unwrap();

        let candidate = format!("{}/player/index.html", h.server.uri());
        let payload = json!({"state": {"currentURL": candidate}});
        h.handle.shadow_delta(payload.to_string()).await.unwrap();
        let store = h.store.clone();
        eventually(move || {
            let store = store.clone();
            async move { store.current_url().await.is_some() }
        })
        .await;

        h.handle
            .deployment_verified(format!("{}/old/index.html?width=1920", h.server.uri()))
            .await
            .unwrap();
        h.handle.status().await.unwrap();
        assert!(h
            .store
            .current_url()
            .await
            .is_some_and(|url| url.contains("/player/index.html")));

        let retried = format!("{}/player/index.html?_fwi_cacheBust=7", h.server.uri());
        h.handle.deployment_verified(retried.clone()).await.unwrap();
        h.handle.status().await.unwrap();
        assert_eq!(h.store.current_url().await, Some(retried));
    }

    #[tokio::test]
    async fn test_timer_settings_drive_power_schedule() {
        let h = harness(provisioned()).await;
        let timer = OnOffTimerSetting::new(
            [DayOfWeek::Monday],
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        );
        h.handle.apply(Setting::OnOffTimers(vec![timer])).await.unwrap();
        h.handle.status().await.unwrap();
        assert!(!h.scheduler.is_pending("OnOffTimer on mo080000180000"));

        h.handle.apply(Setting::OnOffTimersEnabled(true)).await.unwrap();
        h.handle.status().await.unwrap();
        assert!(h.scheduler.is_pending("OnOffTimer on mo080000180000"));
        assert!(h.scheduler.is_pending("OnOffTimer off mo080000180000"));

        h.handle.apply(Setting::OnOffTimersEnabled(false)).await.unwrap();
        h.handle.status().await.unwrap();
        assert!(h.scheduler.is_empty());
        assert_eq!(h.store.snapshot().await.on_off_timers.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_disconnects() {
        let h = harness(provisioned()).await;
        h.handle.online().await.unwrap();
        h.handle.status().await.unwrap();
        assert!(h.pubsub.is_connected());

        h.handle.shutdown().await.unwrap();
        let pubsub = h.pubsub.clone();
        eventually(move || {
            let pubsub = pubsub.clone();
            async move { !pubsub.is_connected() }
        })
        .await;
    }
}
