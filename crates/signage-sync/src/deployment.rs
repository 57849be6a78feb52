//! # Deployment Verifier
//!
//! Verifies that a content URL points at a live player deployment before the
//! device switches to it, adding credentials and display hints as needed.
//!
//! ## Verification Round
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      resolve(url, attempt)                              │
//! │                                                                         │
//! │  attempt >= 5 ──► defer: "retry Deployment" in 5,10,30,60,120,300s     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  GET  <url dir>/api/about                                              │
//! │       ├── 200 ────────► continue                                       │
//! │       ├── other ──────► InvalidPlayer (terminal)                       │
//! │       └── no answer ──► attempt + 1                                    │
//! │       ▼                                                                 │
//! │  HEAD <url>                                                            │
//! │       ├── 200 ────────► finalize (width/height, cancel retries,        │
//! │       │                 precache)                                      │
//! │       ├── 401/403 ────► set _fwi_accessToken + _fwi_cloudCompanyId,    │
//! │       │                 attempt + 1                                    │
//! │       ├── 404 ────────► ContentNotFound (terminal)                     │
//! │       ├── 5xx ────────► "Retry Deployment" every 30s, from attempt 0   │
//! │       ├── other ──────► UnexpectedStatus (terminal)                    │
//! │       └── no answer ──► attempt + 1                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A deferred retry runs one round before it defers again, so the backoff
//! escalates one step per scheduled attempt and settles at 300 seconds.
//! Each chain keeps at most one pending retry per task name.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use signage_core::{ACCESS_TOKEN_PARAM, CACHE_BUST_PARAM, COMPANY_ID_PARAM};

use crate::auth::AuthManager;
use crate::error::{DeploymentError, TaskError};
use crate::ports::{DeviceCapabilityProvider, SettingsStore};
use crate::scheduler::TaskScheduler;

// =============================================================================
// Constants
// =============================================================================

/// Attempts made inline before retries move onto the scheduler.
pub const MAX_INLINE_ATTEMPTS: u32 = 5;

/// Task name of the escalating retry.
pub const DEFERRED_RETRY_TASK: &str = "retry Deployment";

/// Task name of the fixed-interval retry after a server error.
pub const SERVER_RETRY_TASK: &str = "Retry Deployment";

/// Interval of the server error retry.
pub const SERVER_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Escalation steps in seconds, indexed by `attempt - MAX_INLINE_ATTEMPTS`.
const ESCALATION_SECS: [u64; 6] = [5, 10, 30, 60, 120, 300];

/// Player statuses treated as a temporarily unavailable server.
const SERVER_ERROR_STATUSES: [u16; 5] = [500, 502, 503, 504, 512];

// =============================================================================
// Escalating Backoff
// =============================================================================

/// Backoff over [`ESCALATION_SECS`], clamped to its last step.
#[derive(Debug, Clone)]
pub struct EscalatingBackoff {
    attempt: u32,
}

impl EscalatingBackoff {
    /// Backoff whose next delay is the one for `attempt`.
    pub fn starting_at(attempt: u32) -> Self {
        EscalatingBackoff { attempt }
    }

    /// Delay before the retry that follows `attempt`.
    pub fn delay_for(attempt: u32) -> Duration {
        let step = attempt.saturating_sub(MAX_INLINE_ATTEMPTS) as usize;
        let secs = ESCALATION_SECS[step.min(ESCALATION_SECS.len() - 1)];
        Duration::from_secs(secs)
    }
}

impl Backoff for EscalatingBackoff {
    fn reset(&mut self) {
        self.attempt = MAX_INLINE_ATTEMPTS;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        let delay = Self::delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }
}

// =============================================================================
// Round Outcome
// =============================================================================

/// What one verification round decided.
enum Round {
    Verified(Url),
    /// Try again with a higher attempt count.
    Transient,
    /// Credentials were added; go again immediately.
    Authorized(Url),
    Failed(DeploymentError),
}

// =============================================================================
// Deployment Verifier
// =============================================================================

/// Content URL verifier.
///
/// Shared as `Arc<DeploymentVerifier>` so scheduled retries can call back
/// into it.
pub struct DeploymentVerifier {
    http: reqwest::Client,
    scheduler: Arc<TaskScheduler>,
    settings: Arc<dyn SettingsStore>,
    device: Arc<dyn DeviceCapabilityProvider>,
    auth: Arc<AuthManager>,
    listener: Option<mpsc::UnboundedSender<String>>,
    last_cache_bust: AtomicU64,
}

impl DeploymentVerifier {
    pub fn new(
        http: reqwest::Client,
        scheduler: Arc<TaskScheduler>,
        settings: Arc<dyn SettingsStore>,
        device: Arc<dyn DeviceCapabilityProvider>,
        auth: Arc<AuthManager>,
    ) -> Self {
        DeploymentVerifier {
            http,
            scheduler,
            settings,
            device,
            auth,
            listener: None,
            last_cache_bust: AtomicU64::new(0),
        }
    }

    /// Receives the final URL of every scheduled retry that succeeds.
    pub fn with_listener(mut self, listener: mpsc::UnboundedSender<String>) -> Self {
        self.listener = Some(listener);
        self
    }

    // =========================================================================
    // Public API
    // =========================================================================

    /// Verifies `url`, starting at `attempt`. Returns the final URL.
    pub async fn resolve(self: &Arc<Self>, url: &str, attempt: u32) -> Result<String, DeploymentError> {
        Arc::clone(self)
            .resolve_inner(url.to_string(), attempt, false)
            .await
    }

    /// Sets a fresh `_fwi_cacheBust` value on `url` and verifies it.
    pub async fn bust_cache(self: &Arc<Self>, url: &str) -> Result<String, DeploymentError> {
        let mut parsed = parse_content_url(url)?;
        let stamp = self.next_cache_bust();
        set_query_param(&mut parsed, CACHE_BUST_PARAM, &stamp.to_string());
        debug!(stamp, "Cache bust applied");
        self.resolve(parsed.as_str(), 0).await
    }

    /// Verifies `new_base` carrying the query of `current`, but only when
    /// the origin changed. Returns `None` for the same origin.
    pub async fn rebase_on_new_origin(
        self: &Arc<Self>,
        current: &str,
        new_base: &str,
    ) -> Option<Result<String, DeploymentError>> {
        let mut target = match parse_content_url(new_base) {
            Ok(url) => url,
            Err(e) => return Some(Err(e)),
        };

        let Ok(current) = Url::parse(current) else {
            return Some(self.resolve(target.as_str(), 0).await);
        };

        if current.origin() == target.origin() {
            return None;
        }

        info!(from = %current.origin().ascii_serialization(), to = %target.origin().ascii_serialization(), "Player origin changed");
        target.set_query(current.query());
        Some(self.resolve(target.as_str(), 0).await)
    }

    // =========================================================================
    // State Machine
    // =========================================================================

    /// `from_schedule` marks a scheduled retry: it gets one round before the
    /// attempt gate applies again.
    fn resolve_inner(
        self: Arc<Self>,
        url: String,
        attempt: u32,
        from_schedule: bool,
    ) -> BoxFuture<'static, Result<String, DeploymentError>> {
        async move {
            let mut target = parse_content_url(&url)?;
            let mut attempt = attempt;
            let mut from_schedule = from_schedule;

            loop {
                if attempt >= MAX_INLINE_ATTEMPTS && !from_schedule {
                    return Err(self.defer(target.as_str(), attempt));
                }

                debug!(url = %target, attempt, "Verifying deployment");
                match self.round(target.clone()).await {
                    Round::Verified(verified) => return Ok(self.finalize(verified).await),
                    Round::Failed(e) => return Err(e),
                    Round::Authorized(authorized) => {
                        target = authorized;
                        attempt += 1;
                    }
                    Round::Transient if from_schedule => {
                        return Err(self.defer(target.as_str(), attempt));
                    }
                    Round::Transient => attempt += 1,
                }
                from_schedule = false;
            }
        }
        .boxed()
    }

    async fn round(self: &Arc<Self>, target: Url) -> Round {
        let about = match target.join("api/about") {
            Ok(about) => about,
            Err(e) => {
                return Round::Failed(DeploymentError::InvalidUrl {
                    url: target.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        match self.http.get(about.clone()).send().await {
            Ok(response) if response.status().as_u16() == 200 => {}
            Ok(response) => {
                return Round::Failed(DeploymentError::InvalidPlayer {
                    url: about.to_string(),
                    status: response.status().as_u16(),
                })
            }
            Err(e) => {
                debug!(url = %about, error = %e, "Player not reachable");
                return Round::Transient;
            }
        }

        let status = match self.http.head(target.clone()).send().await {
            Ok(response) => response.status().as_u16(),
            Err(e) => {
                debug!(url = %target, error = %e, "Content not reachable");
                return Round::Transient;
            }
        };

        match status {
            200 => Round::Verified(target),
            401 | 403 => self.authorize(target).await,
            404 => Round::Failed(DeploymentError::ContentNotFound {
                url: target.to_string(),
            }),
            s if SERVER_ERROR_STATUSES.contains(&s) => {
                Round::Failed(self.schedule_server_retry(target.as_str(), s))
            }
            s => Round::Failed(DeploymentError::UnexpectedStatus {
                url: target.to_string(),
                status: s,
            }),
        }
    }

    /// Replaces the credential parameters on `target`.
    async fn authorize(&self, mut target: Url) -> Round {
        let access_code = self.settings.access_code().await;
        let token = match self.auth.valid_token(access_code.as_deref()).await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Could not obtain access token for content");
                return Round::Transient;
            }
        };

        set_query_param(&mut target, ACCESS_TOKEN_PARAM, &token);
        match self.settings.company_id().await {
            Some(company) => set_query_param(&mut target, COMPANY_ID_PARAM, &company),
            None => warn!("No company id to attach to content URL"),
        }
        debug!("Content requires authorization, credentials attached");
        Round::Authorized(target)
    }

    async fn finalize(&self, mut target: Url) -> String {
        match self.device.display_size().await {
            Ok(size) => {
                let width = size.width.to_string();
                let height = size.height.to_string();
                if query_param(&target, "width").as_deref() != Some(width.as_str()) {
                    set_query_param(&mut target, "width", &width);
                }
                if query_param(&target, "height").as_deref() != Some(height.as_str()) {
                    set_query_param(&mut target, "height", &height);
                }
            }
            Err(e) => warn!(error = %e, "Could not read display size"),
        }

        self.scheduler.cancel_by_name(DEFERRED_RETRY_TASK);
        self.scheduler.cancel_by_name(SERVER_RETRY_TASK);

        let final_url = target.to_string();
        let device = Arc::clone(&self.device);
        let precache_url = final_url.clone();
        tokio::spawn(async move {
            if let Err(e) = device.precache(&precache_url).await {
                warn!(url = %precache_url, error = %e, "Content precache failed");
            }
        });

        info!(url = %final_url, "Deployment verified");
        final_url
    }

    // =========================================================================
    // Scheduled Retries
    // =========================================================================

    fn defer(self: &Arc<Self>, url: &str, attempt: u32) -> DeploymentError {
        let delay = EscalatingBackoff::starting_at(attempt)
            .next_backoff()
            .unwrap_or(SERVER_RETRY_INTERVAL);
        let this = Arc::clone(self);
        let retry_url = url.to_string();

        self.scheduler.schedule_in(
            move |_| this.run_scheduled(retry_url, attempt + 1, true),
            delay,
            DEFERRED_RETRY_TASK,
            json!({ "url": url, "attempt": attempt + 1 }),
        );

        let err = DeploymentError::Deferred {
            url: url.to_string(),
            attempt,
            retry_in_secs: delay.as_secs(),
        };
        warn!(%err, "Deployment deferred");
        err
    }

    fn schedule_server_retry(self: &Arc<Self>, url: &str, status: u16) -> DeploymentError {
        let delay = Constant::new(SERVER_RETRY_INTERVAL)
            .next_backoff()
            .unwrap_or(SERVER_RETRY_INTERVAL);
        let this = Arc::clone(self);
        let retry_url = url.to_string();

        self.scheduler.schedule_in(
            move |_| this.run_scheduled(retry_url, 0, false),
            delay,
            SERVER_RETRY_TASK,
            json!({ "url": url, "status": status }),
        );

        let err = DeploymentError::ServerUnavailable {
            url: url.to_string(),
            status,
            retry_in_secs: delay.as_secs(),
        };
        warn!(%err, "Player server unavailable");
        err
    }

    async fn run_scheduled(self: Arc<Self>, url: String, attempt: u32, from_schedule: bool) -> Result<(), TaskError> {
        match Arc::clone(&self).resolve_inner(url, attempt, from_schedule).await {
            Ok(final_url) => {
                if let Some(listener) = &self.listener {
                    let _ = listener.send(final_url);
                }
                Ok(())
            }
            // A further retry is already pending.
            Err(e) if e.is_retryable() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Monotonic cache-bust stamp, at least the current time in milliseconds.
    fn next_cache_bust(&self) -> u64 {
        let now_ms = u64::try_from(self.scheduler.now().timestamp_millis()).unwrap_or(0);
        let mut previous = self.last_cache_bust.load(Ordering::SeqCst);
        loop {
            let next = now_ms.max(previous + 1);
            match self.last_cache_bust.compare_exchange(
                previous,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => previous = actual,
            }
        }
    }
}

// =============================================================================
// URL Helpers
// =============================================================================

fn parse_content_url(url: &str) -> Result<Url, DeploymentError> {
    let parsed = Url::parse(url).map_err(|e| DeploymentError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(DeploymentError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

/// First value of `key` in the query.
pub fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Removes every `key` pair, then appends `key=value`.
pub fn set_query_param(url: &mut Url, key: &str, value: &str) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(key, value);
}
