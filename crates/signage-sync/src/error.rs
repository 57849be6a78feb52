//! # Sync Error Types
//!
//! Error types for the sync engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  SerializationFailed    │ │
//! │  │  MissingDeviceId│  │  Http           │  │  DeserializationFailed  │ │
//! │  │  InvalidUrl     │  │  NotConnected   │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │      Auth       │  │ Settings/Device │  │   Deployment (own enum) │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  AuthFailed     │  │  SettingRejected│  │  InvalidPlayer   (term) │ │
//! │  │  NotAuthenticated│ │  Device         │  │  ContentNotFound (term) │ │
//! │  │                 │  │  Core           │  │  ServerUnavailable      │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Scheduled actions return TaskError; the scheduler logs it and moves on │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use signage_core::CoreError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering engine failures outside deployment verification.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid agent configuration.
    #[error("Invalid agent configuration: {0}")]
    InvalidConfig(String),

    /// No device identity yet (device not provisioned).
    #[error("Device ID not configured. Provision the device first.")]
    MissingDeviceId,

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Could not reach a remote endpoint.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// HTTP request completed with a failing status.
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    /// The cloud channel is not connected.
    #[error("Cloud channel is not connected")]
    NotConnected,

    // =========================================================================
    // Auth Errors
    // =========================================================================
    /// Token exchange or refresh rejected.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// No session and no access code to create one.
    #[error("Not authenticated")]
    NotAuthenticated,

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Failed to serialize message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to deserialize message.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    // =========================================================================
    // Settings / Device Errors
    // =========================================================================
    /// The settings store refused a value.
    #[error("Setting rejected: {0}")]
    SettingRejected(String),

    /// Domain error from signage-core.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Device capability provider failure.
    #[error("Device operation failed: {0}")]
    Device(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => SyncError::HttpStatus {
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
                status: status.as_u16(),
            },
            None if err.is_decode() => SyncError::DeserializationFailed(err.to_string()),
            None => SyncError::ConnectionFailed(err.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if this error is recoverable and the operation can be retried.
    ///
    /// ## Retryable Errors
    /// - Connection failures (network issues)
    /// - 5xx responses
    /// - Cloud channel not connected
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_) | SyncError::NotConnected => true,
            SyncError::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

// =============================================================================
// Deployment Error
// =============================================================================

/// Outcome of a failed content URL verification.
///
/// ## Terminal vs Transient
/// ```text
/// ┌──────────────────────┬──────────┬──────────────────────────────────────┐
/// │ Variant              │ Terminal │ What happens next                    │
/// ├──────────────────────┼──────────┼──────────────────────────────────────┤
/// │ InvalidUrl           │ yes      │ nothing                              │
/// │ InvalidPlayer        │ yes      │ nothing                              │
/// │ ContentNotFound      │ yes      │ nothing                              │
/// │ UnexpectedStatus     │ yes      │ nothing                              │
/// │ ServerUnavailable    │ no       │ "Retry Deployment" every 30s         │
/// │ Deferred             │ no       │ "retry Deployment" on the backoff    │
/// └──────────────────────┴──────────┴──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeploymentError {
    /// The candidate is not a parseable http(s) URL.
    #[error("Invalid content URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// `api/about` did not answer 200.
    #[error("{url} is not a valid player instance (status {status})")]
    InvalidPlayer { url: String, status: u16 },

    /// HEAD answered 404.
    #[error("Content not found at {url}")]
    ContentNotFound { url: String },

    /// HEAD answered a status with no defined handling.
    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    /// HEAD answered a server error; an unlimited retry is pending.
    #[error("Player server unavailable (status {status}), retrying in {retry_in_secs}s")]
    ServerUnavailable {
        url: String,
        status: u16,
        retry_in_secs: u64,
    },

    /// Too many transient failures; a backoff retry is pending.
    #[error("Could not verify deployment after {attempt} attempts, retrying in {retry_in_secs}s")]
    Deferred {
        url: String,
        attempt: u32,
        retry_in_secs: u64,
    },
}

impl DeploymentError {
    /// Returns true if no retry was scheduled for this failure.
    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
    }

    /// Returns true if a scheduled retry continues independently.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeploymentError::ServerUnavailable { .. } | DeploymentError::Deferred { .. }
        )
    }
}

// =============================================================================
// Task Error
// =============================================================================

/// Error returned by a scheduled action.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Deployment(#[from] DeploymentError),

    #[error("{0}")]
    Failed(String),
}
