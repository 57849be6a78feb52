//! # Error Types
//!
//! Domain-specific error types for signage-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  signage-core errors (this file)                                       │
//! │  ├── CoreError        - Setting / shadow key failures                  │
//! │  └── ValidationError  - Value validation failures                      │
//! │                                                                         │
//! │  signage-sync errors (separate crate)                                  │
//! │  ├── SyncError        - Transport, auth, settings, scheduler           │
//! │  └── DeploymentError  - Content URL verification outcomes              │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → logged / reported     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain errors raised while mapping settings to and from the cloud shadow.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The shadow carried a key this device does not know.
    #[error("Unknown setting key: {0}")]
    UnknownSetting(String),

    /// The key exists but is never mirrored to the cloud.
    ///
    /// ## When This Occurs
    /// - A delta tries to overwrite `cachedURL` or `accessCode`
    /// - Code asks for the cloud key of a device-local setting
    #[error("Setting {0} is device-local and not mirrored to the cloud")]
    LocalOnlySetting(String),

    /// The value could not be decoded into the setting's type.
    #[error("Invalid value for {key}: {reason}")]
    InvalidSettingValue { key: String, reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Value validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., invalid URL, invalid time of day).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Collection must not be empty.
    #[error("{field} must contain at least one entry")]
    Empty { field: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
