//! # Cloud Authentication Manager
//!
//! Exchanges the device access code for an access/refresh token pair and
//! refreshes the session before it expires.
//!
//! ## Authentication Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Cloud Authentication Flow                          │
//! │                                                                         │
//! │  ┌────────────────┐                         ┌─────────────────┐        │
//! │  │  signage-sync  │                         │  Auth service   │        │
//! │  └───────┬────────┘                         └────────┬────────┘        │
//! │          │  1. POST /token {accessCode}              │                 │
//! │          │──────────────────────────────────────────►│                 │
//! │          │  2. {accessToken, refreshToken, expiresIn}│                 │
//! │          │◄──────────────────────────────────────────│                 │
//! │          │                                           │                 │
//! │          │  [expires_at - 5 min: "Refresh tokens"]   │                 │
//! │          │                                           │                 │
//! │          │  3. POST /token/refresh {refreshToken}    │                 │
//! │          │──────────────────────────────────────────►│                 │
//! │          │  4. New token pair                        │                 │
//! │          │◄──────────────────────────────────────────│                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Token Storage
//! Tokens live in memory. The bridge schedules the next refresh 5 minutes
//! before expiry and skips it while the device is offline.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{SyncError, SyncResult};

/// Margin before token expiration to trigger refresh (5 minutes).
pub const REFRESH_MARGIN_SECS: i64 = 300;

// =============================================================================
// Session
// =============================================================================

/// Token pair held after authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthSession {
    /// When the next refresh is due.
    pub fn refresh_at(&self) -> DateTime<Utc> {
        self.expires_at - Duration::seconds(REFRESH_MARGIN_SECS)
    }

    /// True once inside the refresh margin.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_at()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    access_code: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    /// Seconds until the access token expires.
    expires_in: i64,
}

// =============================================================================
// Auth Manager
// =============================================================================

/// Configuration for cloud authentication.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Base URL of the auth service (e.g., "https://auth.example.com/v1").
    pub auth_url: String,
}

/// Cloud authentication manager.
pub struct AuthManager {
    config: AuthConfig,
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
    session: RwLock<Option<AuthSession>>,
}

impl AuthManager {
    pub fn new(config: AuthConfig, http: reqwest::Client, clock: Arc<dyn Clock>) -> Self {
        AuthManager {
            config,
            http,
            clock,
            session: RwLock::new(None),
        }
    }

    /// Current session (without triggering refresh).
    pub async fn current_session(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    #[cfg(test)]
    pub(crate) async fn restore(&self, session: AuthSession) {
        *self.session.write().await = Some(session);
    }

    /// Exchanges an access code for a new session.
    pub async fn authenticate(&self, access_code: &str) -> SyncResult<AuthSession> {
        let session = self.do_authenticate(access_code).await?;
        *self.session.write().await = Some(session.clone());
        info!(
            expires_in_secs = session.remaining_secs(self.clock.now()),
            "Authenticated with cloud"
        );
        Ok(session)
    }

    /// Refreshes the current session.
    pub async fn refresh(&self) -> SyncResult<AuthSession> {
        let mut guard = self.session.write().await;
        let refresh_token = guard
            .as_ref()
            .map(|s| s.refresh_token.clone())
            .ok_or(SyncError::NotAuthenticated)?;

        let session = self.do_refresh(&refresh_token).await?;
        info!(
            expires_in_secs = session.remaining_secs(self.clock.now()),
            "Token refreshed successfully"
        );
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Returns a usable access token, refreshing or authenticating as needed.
    ///
    /// ## Flow
    /// 1. Token outside the refresh margin: use it
    /// 2. Token inside the margin but not expired: refresh
    /// 3. Otherwise: authenticate with `access_code`
    pub async fn valid_token(&self, access_code: Option<&str>) -> SyncResult<String> {
        let now = self.clock.now();
        {
            let guard = self.session.read().await;
            if let Some(session) = guard.as_ref() {
                if !session.needs_refresh(now) {
                    debug!(remaining_secs = session.remaining_secs(now), "Using cached token");
                    return Ok(session.access_token.clone());
                }
            }
        }

        let mut guard = self.session.write().await;

        // Double-check after acquiring write lock
        if let Some(session) = guard.as_ref() {
            if !session.needs_refresh(now) {
                return Ok(session.access_token.clone());
            }

            if !session.is_expired(now) {
                match self.do_refresh(&session.refresh_token).await {
                    Ok(new_session) => {
                        let token = new_session.access_token.clone();
                        *guard = Some(new_session);
                        return Ok(token);
                    }
                    Err(e) => {
                        warn!(error = %e, "Token refresh failed, will re-authenticate");
                    }
                }
            }
        }

        let access_code = access_code.ok_or(SyncError::NotAuthenticated)?;
        let new_session = self.do_authenticate(access_code).await?;
        let token = new_session.access_token.clone();
        *guard = Some(new_session);
        Ok(token)
    }

    /// Clears the local session. Called when the access code changes.
    pub async fn logout(&self) {
        *self.session.write().await = None;
        info!("Logged out from cloud");
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.auth_url.trim_end_matches('/'), path)
    }

    async fn do_authenticate(&self, access_code: &str) -> SyncResult<AuthSession> {
        let response = self
            .http
            .post(self.endpoint("token"))
            .json(&TokenRequest { access_code })
            .send()
            .await?;
        self.session_from(response).await
    }

    async fn do_refresh(&self, refresh_token: &str) -> SyncResult<AuthSession> {
        let response = self
            .http
            .post(self.endpoint("token/refresh"))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        self.session_from(response).await
    }

    async fn session_from(&self, response: reqwest::Response) -> SyncResult<AuthSession> {
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::AuthFailed(format!(
                "{} answered {}",
                response.url(),
                status.as_u16()
            )));
        }

        let body: TokenResponse = response.json().await?;
        Ok(AuthSession {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires_at: self.clock.now() + Duration::seconds(body.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn manager(server: &MockServer) -> (Arc<FakeClock>, AuthManager) {
        let clock = Arc::new(FakeClock::new(start()));
        let manager = AuthManager::new(
            AuthConfig {
                auth_url: format!("{}/auth/", server.uri()),
            },
            reqwest::Client::new(),
            clock.clone(),
        );
        (clock, manager)
    }

    #[test]
    fn test_session_refresh_margin() {
        let session = AuthSession {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: start() + Duration::hours(1),
        };
        assert_eq!(session.refresh_at(), start() + Duration::minutes(55));
        assert!(!session.needs_refresh(start()));
        assert!(session.needs_refresh(start() + Duration::minutes(56)));
        assert!(!session.is_expired(start() + Duration::minutes(56)));
        assert_eq!(session.remaining_secs(start() + Duration::hours(2)), 0);
    }

    #[tokio::test]
    async fn test_authenticate_with_access_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/token"))
            .and(body_json(json!({"accessCode": "AB12"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "tok-1",
                "refreshToken": "ref-1",
                "expiresIn": 3600
            })))
            .mount(&server)
            .await;

        let (_, manager) = manager(&server);
        let session = manager.authenticate("AB12").await.unwrap();
        assert_eq!(session.access_token, "tok-1");
        assert_eq!(session.expires_at, start() + Duration::hours(1));
        assert_eq!(manager.current_session().await, Some(session));

        manager.logout().await;
        assert!(manager.current_session().await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_replaces_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/token/refresh"))
            .and(body_json(json!({"refreshToken": "ref-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "tok-2",
                "refreshToken": "ref-2",
                "expiresIn": 600
            })))
            .mount(&server)
            .await;

        let (_, manager) = manager(&server);
        manager
            .restore(AuthSession {
                access_token: "tok-1".into(),
                refresh_token: "ref-1".into(),
                expires_at: start() + Duration::minutes(2),
            })
            .await;

        let session = manager.refresh().await.unwrap();
        assert_eq!(session.refresh_token, "ref-2");
        assert_eq!(manager.current_session().await, Some(session));
    }

    #[tokio::test]
    async fn test_refresh_without_session_fails() {
        let server = MockServer::start().await;
        let (_, manager) = manager(&server);
        assert!(matches!(
            manager.refresh().await,
            Err(SyncError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/token/refresh"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let (_, manager) = manager(&server);
        manager
            .restore(AuthSession {
                access_token: "tok-1".into(),
                refresh_token: "ref-1".into(),
                expires_at: start() + Duration::minutes(2),
            })
            .await;
        assert!(matches!(manager.refresh().await, Err(SyncError::AuthFailed(_))));
    }

    #[tokio::test]
    async fn test_valid_token_uses_cache_outside_margin() {
        let server = MockServer::start().await;
        let (_, manager) = manager(&server);
        manager
            .restore(AuthSession {
                access_token: "cached".into(),
                refresh_token: "ref".into(),
                expires_at: start() + Duration::hours(1),
            })
            .await;

        // No mock mounted: any HTTP call would fail.
        assert_eq!(manager.valid_token(None).await.unwrap(), "cached");
    }

    #[tokio::test]
    async fn test_valid_token_authenticates_after_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "fresh",
                "refreshToken": "ref-9",
                "expiresIn": 3600
            })))
            .mount(&server)
            .await;

        let (clock, manager) = manager(&server);
        manager
            .restore(AuthSession {
                access_token: "old".into(),
                refresh_token: "ref".into(),
                expires_at: start() + Duration::minutes(1),
            })
            .await;
        clock.advance(Duration::minutes(2));

        assert_eq!(manager.valid_token(Some("AB12")).await.unwrap(), "fresh");
        assert!(matches!(
            AuthManager::new(
                AuthConfig { auth_url: server.uri() },
                reqwest::Client::new(),
                clock.clone()
            )
            .valid_token(None)
            .await,
            Err(SyncError::NotAuthenticated)
        ));
    }
}
