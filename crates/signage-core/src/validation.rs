//! # Validation Module
//!
//! Value checks applied to settings before they reach the settings store.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Deserialization (serde)                                      │
//! │  ├── Type checks: "volume" must be a number, "rebootTime" HH:MM:SS     │
//! │  └── Unknown / device-local keys rejected by CloudKey parsing          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Ranges (volume, upload interval, proxy port)                      │
//! │  └── Formats (content URLs must be http(s) with a host)                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Deployment verification (signage-sync)                       │
//! │  └── The URL actually resolves to a player                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use signage_core::validation::{validate_http_url, validate_volume};
//!
//! validate_http_url("currentURL", "https://player.example.com/p/1").unwrap();
//! validate_volume(40).unwrap();
//! ```

use crate::error::ValidationError;
use crate::{MAX_UPLOAD_LOG_INTERVAL_MINUTES, MAX_VOLUME};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a content or update URL.
///
/// ## Rules
/// - Must not be empty
/// - Scheme must be `http` or `https`
/// - Must carry a non-empty host
///
/// ## Example
/// ```rust
/// use signage_core::validation::validate_http_url;
///
/// assert!(validate_http_url("currentURL", "http://10.0.0.5:8080/x").is_ok());
/// assert!(validate_http_url("currentURL", "file:///etc/passwd").is_err());
/// assert!(validate_http_url("currentURL", "https://").is_err());
/// ```
pub fn validate_http_url(field: &str, url: &str) -> ValidationResult<()> {
    let url = url.trim();

    if url.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "scheme must be http or https".to_string(),
        })?;

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(())
}

/// Validates a provisioning access code.
///
/// Codes are short alphanumeric strings typed on the device.
pub fn validate_access_code(code: &str) -> ValidationResult<()> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "accessCode".to_string(),
        });
    }

    if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ValidationError::InvalidFormat {
            field: "accessCode".to_string(),
            reason: "must contain only letters, digits and hyphens".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates an output volume (0..=100).
pub fn validate_volume(volume: u8) -> ValidationResult<()> {
    if volume > MAX_VOLUME {
        return Err(ValidationError::OutOfRange {
            field: "volume".to_string(),
            min: 0,
            max: MAX_VOLUME as i64,
        });
    }

    Ok(())
}

/// Validates the log upload interval in minutes.
///
/// Zero disables periodic upload; anything else is capped at one day.
pub fn validate_upload_interval(minutes: u32) -> ValidationResult<()> {
    if minutes > MAX_UPLOAD_LOG_INTERVAL_MINUTES {
        return Err(ValidationError::OutOfRange {
            field: "uploadLogTimeInterval".to_string(),
            min: 0,
            max: MAX_UPLOAD_LOG_INTERVAL_MINUTES as i64,
        });
    }

    Ok(())
}

/// Validates a proxy port. Port 0 is never a usable proxy.
pub fn validate_port(port: u16) -> ValidationResult<()> {
    if port == 0 {
        return Err(ValidationError::OutOfRange {
            field: "proxyPort".to_string(),
            min: 1,
            max: u16::MAX as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
